//! Integration tests for the bridge event loop.
//!
//! Each test creates a segment file in a temp dir, maps it twice (the bridge
//! writes through one mapping, the test reads through the other exactly as
//! the host would), runs the bridge on a loopback port in a background task,
//! and talks to it with plain `tokio::net::TcpStream` clients.

use std::net::SocketAddr;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use shm_bridge::bridge::{BridgeError, BridgeStats};
use shm_bridge::packet::HEADER_LEN;
use shm_bridge::shutdown::ShutdownHandle;
use shm_bridge::{Bridge, BridgeConfig, Packet, Protocol, RingReader, Segment};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: TempDir,
    reader: RingReader,
    addr: SocketAddr,
    stop: ShutdownHandle,
    task: JoinHandle<BridgeStats>,
}

fn test_config() -> BridgeConfig {
    BridgeConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        capacity: 4096,
        max_payload: 1024,
        poll_timeout: Duration::from_millis(50),
        idle_sleep: Duration::from_millis(1),
        ..BridgeConfig::default()
    }
}

/// Create a segment, start a bridge on it, and keep a host-side reader.
async fn start(config: BridgeConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring");
    Segment::create(&path, config.capacity).expect("create segment");
    let reader = RingReader::new(Segment::open(&path, config.capacity).expect("open segment"));

    let bridge = Bridge::bind(BridgeConfig {
        segment_path: path,
        ..config
    })
    .await
    .expect("bridge bind");
    let addr = bridge.local_addr();
    let stop = bridge.shutdown_handle();
    let task = tokio::spawn(bridge.run());

    Harness {
        _dir: dir,
        reader,
        addr,
        stop,
        task,
    }
}

impl Harness {
    async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.expect("connect")
    }

    /// Wait until at least `n` bytes are pending, then consume everything.
    async fn read_at_least(&mut self, n: usize) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.reader.cursors().unwrap().pending() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("ring never reached {n} pending bytes"));
        self.reader.read_available().unwrap()
    }

    async fn pending_after_wait(&self, n: usize) -> usize {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.reader.cursors().unwrap().pending() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("ring never reached {n} pending bytes"));
        self.reader.cursors().unwrap().pending()
    }

    async fn finish(self) -> BridgeStats {
        self.stop.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("bridge did not stop")
            .expect("bridge task panicked")
    }
}

fn call(name: &str, payload: &[u8]) -> Packet {
    Packet::new(Protocol::RemoteCall, 1, 2, name, payload).unwrap()
}

/// The peer must see the stream closed (EOF or reset), not hang.
async fn assert_closed_by_bridge(stream: &mut TcpStream) {
    let mut buf = [0u8; 16];
    let result = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("bridge never closed the connection");
    match result {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("unexpected {n} bytes from bridge"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_packet_lands_in_ring_verbatim() {
    let mut h = start(test_config()).await;
    let pkt = call("OnLogin", b"account=42");

    let mut client = h.connect().await;
    client.write_all(pkt.as_bytes()).await.unwrap();

    assert_eq!(h.read_at_least(pkt.len()).await, pkt.as_bytes());

    let stats = h.finish().await;
    assert_eq!(stats.packets_written, 1);
    assert_eq!(stats.bytes_written, pkt.len() as u64);
    assert_eq!(stats.accepted, 1);
}

#[tokio::test]
async fn packet_sent_byte_by_byte_is_written_once() {
    let mut h = start(test_config()).await;
    let pkt = call("Move", &[7u8; 20]);

    let mut client = h.connect().await;
    for b in pkt.as_bytes() {
        client.write_all(std::slice::from_ref(b)).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(h.read_at_least(pkt.len()).await, pkt.as_bytes());
    let stats = h.finish().await;
    assert_eq!(stats.packets_written, 1);
}

#[tokio::test]
async fn pipelined_packets_keep_their_order() {
    let mut h = start(test_config()).await;
    let a = call("First", b"a");
    let b = call("Second", b"bb");
    let mut both = a.as_bytes().to_vec();
    both.extend_from_slice(b.as_bytes());

    let mut client = h.connect().await;
    client.write_all(&both).await.unwrap();

    assert_eq!(h.read_at_least(both.len()).await, both);
    let stats = h.finish().await;
    assert_eq!(stats.packets_written, 2);
}

#[tokio::test]
async fn oversized_header_drops_only_the_offending_connection() {
    let mut h = start(BridgeConfig {
        max_payload: 128,
        ..test_config()
    })
    .await;

    let mut bad = h.connect().await;
    let good_pkt = call("Valid", b"ok");
    let mut good = h.connect().await;

    // Header declares 1024 payload bytes; only the header is ever sent.
    let huge = call("Huge", &[0u8; 1024]);
    bad.write_all(&huge.as_bytes()[..HEADER_LEN]).await.unwrap();
    assert_closed_by_bridge(&mut bad).await;

    good.write_all(good_pkt.as_bytes()).await.unwrap();
    assert_eq!(h.read_at_least(good_pkt.len()).await, good_pkt.as_bytes());

    let stats = h.finish().await;
    assert_eq!(stats.framing_errors, 1);
    assert_eq!(stats.disconnected, 1);
    assert_eq!(stats.closed_at_shutdown, 1);
    assert_eq!(stats.packets_written, 1);
}

#[tokio::test]
async fn full_ring_drops_packet_and_keeps_connection() {
    let mut h = start(BridgeConfig {
        capacity: 256,
        max_payload: 100,
        ..test_config()
    })
    .await;
    let big = call("Big", &[1u8; 100]);
    let marker = call("Marker", b"");
    assert_eq!(big.len(), 146);

    let mut client = h.connect().await;
    client.write_all(big.as_bytes()).await.unwrap();
    assert_eq!(h.pending_after_wait(big.len()).await, big.len());

    // 110 bytes free: the second big packet is dropped, the marker fits.
    client.write_all(big.as_bytes()).await.unwrap();
    client.write_all(marker.as_bytes()).await.unwrap();
    let mut expected = big.as_bytes().to_vec();
    expected.extend_from_slice(marker.as_bytes());
    assert_eq!(h.read_at_least(expected.len()).await, expected);

    // Same connection still delivers once space is back.
    client.write_all(big.as_bytes()).await.unwrap();
    assert_eq!(h.read_at_least(big.len()).await, big.as_bytes());

    let stats = h.finish().await;
    assert_eq!(stats.packets_written, 3);
    assert_eq!(stats.packets_dropped, 1);
    assert_eq!(stats.disconnected, 0);
}

#[tokio::test]
async fn graceful_disconnect_removes_connection() {
    let mut h = start(test_config()).await;
    let pkt = call("Bye", b"");

    let mut client = h.connect().await;
    client.write_all(pkt.as_bytes()).await.unwrap();
    drop(client);

    assert_eq!(h.read_at_least(pkt.len()).await, pkt.as_bytes());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stats = h.finish().await;
    assert_eq!(stats.disconnected, 1);
    assert_eq!(stats.closed_at_shutdown, 0);
}

#[tokio::test]
async fn reset_connection_is_removed() {
    let mut h = start(test_config()).await;
    let pkt = call("Reset", &[5u8; 40]);

    let mut writer = h.connect().await;
    writer.write_all(&pkt.as_bytes()[..20]).await.unwrap();
    writer.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Zero linger turns the close into an RST.
    writer.set_linger(Some(Duration::ZERO)).unwrap();
    drop(writer);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.reader.cursors().unwrap().pending(), 0);
    assert!(h.reader.read_available().unwrap().is_empty());

    let stats = h.finish().await;
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.disconnected, 1);
    assert_eq!(stats.closed_at_shutdown, 0);
    assert_eq!(stats.packets_written, 0);
}

#[tokio::test]
async fn partial_packet_at_disconnect_is_discarded() {
    let mut h = start(test_config()).await;
    let partial = call("Cut", b"0123456789");
    let whole = call("Whole", b"x");

    let mut a = h.connect().await;
    a.write_all(&partial.as_bytes()[..partial.len() - 3]).await.unwrap();
    drop(a);

    let mut b = h.connect().await;
    b.write_all(whole.as_bytes()).await.unwrap();

    assert_eq!(h.read_at_least(whole.len()).await, whole.as_bytes());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.reader.cursors().unwrap().pending(), 0);

    let stats = h.finish().await;
    assert_eq!(stats.packets_written, 1);
}

#[tokio::test]
async fn connection_limit_refuses_extra_clients() {
    let mut h = start(BridgeConfig {
        max_connections: 1,
        ..test_config()
    })
    .await;
    let pkt = call("Only", b"1");

    let mut first = h.connect().await;
    first.write_all(pkt.as_bytes()).await.unwrap();
    assert_eq!(h.read_at_least(pkt.len()).await, pkt.as_bytes());

    let mut second = h.connect().await;
    assert_closed_by_bridge(&mut second).await;

    let stats = h.finish().await;
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.refused, 1);
    assert_eq!(stats.closed_at_shutdown, 1);
}

#[tokio::test]
async fn idle_bridge_stops_on_shutdown() {
    let h = start(test_config()).await;
    let stats = h.finish().await;
    assert_eq!(stats, BridgeStats::default());
}

#[tokio::test]
async fn manual_turns_track_connections() {
    let segment = Segment::anonymous(4096).unwrap();
    let mut bridge = Bridge::with_segment(test_config(), segment).await.unwrap();
    assert_eq!(bridge.connection_count(), 0);

    let client = TcpStream::connect(bridge.local_addr()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while bridge.connection_count() < 1 {
            bridge.turn().await;
        }
    })
    .await
    .expect("connection never accepted");
    assert_eq!(bridge.stats().accepted, 1);

    drop(client);
    tokio::time::timeout(Duration::from_secs(5), async {
        while bridge.connection_count() > 0 {
            bridge.turn().await;
        }
    })
    .await
    .expect("connection never removed");
    assert_eq!(bridge.stats().disconnected, 1);
    assert_eq!(bridge.stats().packets_written, 0);
}

#[tokio::test]
async fn missing_segment_is_a_setup_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Bridge::bind(BridgeConfig {
        segment_path: dir.path().join("absent"),
        ..test_config()
    })
    .await;
    assert!(matches!(result, Err(BridgeError::Segment(_))));
}

#[tokio::test]
async fn segment_capacity_must_match_configuration() {
    let segment = Segment::anonymous(128).unwrap();
    let result = Bridge::with_segment(test_config(), segment).await;
    assert!(matches!(
        result,
        Err(BridgeError::CapacityMismatch {
            segment: 128,
            configured: 4096
        })
    ));
}

#[tokio::test]
async fn occupied_port_is_a_setup_error() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = BridgeConfig {
        listen: taken.local_addr().unwrap(),
        ..test_config()
    };
    let segment = Segment::anonymous(config.capacity).unwrap();
    let result = Bridge::with_segment(config, segment).await;
    assert!(matches!(result, Err(BridgeError::Listen { .. })));
}

#[tokio::test]
async fn invalid_configuration_is_rejected_before_binding() {
    let config = BridgeConfig {
        max_payload: 8192,
        ..test_config()
    };
    let segment = Segment::anonymous(config.capacity).unwrap();
    let result = Bridge::with_segment(config, segment).await;
    assert!(matches!(result, Err(BridgeError::Config(_))));
}
