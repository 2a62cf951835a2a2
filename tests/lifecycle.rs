//! End-to-end session lifecycle over loopback TCP.

#![allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use remote_profiler::domain::Snapshot;
use remote_profiler::net::{BoxedTransport, StreamWrapper};
use remote_profiler::wire::{self, WireFormat, WireMessage};
use remote_profiler::config::saturating_millis;
use remote_profiler::{
    AppState, Profiler, ProfilerError, ProfilingServer, ServerConfig, WallClockProfiler,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);

fn test_config(interval: Duration) -> ServerConfig {
    ServerConfig {
        listen_host: "127.0.0.1".to_string(),
        listen_port: 0,
        interval,
        send_timeout: Duration::from_secs(1),
        ..ServerConfig::default()
    }
}

async fn start_with(server: ProfilingServer) -> (SocketAddr, AppState) {
    let addr = server.local_addr().expect("bound server has an address");
    let state = server.state().clone();
    tokio::spawn(server.serve());
    (addr, state)
}

async fn start(interval: Duration) -> (SocketAddr, AppState) {
    let server = ProfilingServer::bind(test_config(interval), Arc::new(WallClockProfiler::new()))
        .await
        .expect("bind on loopback");
    start_with(server).await
}

/// Connects and consumes the greeting frame.
async fn connect(addr: SocketAddr, interval: Duration) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let greeting = tokio::time::timeout(READ_TIMEOUT, wire::read_message(&mut stream)).await;
    let info = match greeting {
        Ok(Ok(WireMessage::Profiler(info))) => info,
        other => panic!("expected a PROFILER greeting, got {other:?}"),
    };
    assert_eq!(info.interval_ms, saturating_millis(interval));
    stream
}

async fn next_snapshot(stream: &mut TcpStream) -> Snapshot {
    loop {
        let read = tokio::time::timeout(READ_TIMEOUT, wire::read_message(stream)).await;
        match read {
            Ok(Ok(WireMessage::Result(snapshot))) => return snapshot,
            Ok(Ok(WireMessage::Profiler(_))) => {}
            other => panic!("expected a snapshot, got {other:?}"),
        }
    }
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn registry_len_is(state: &AppState, expected: usize) {
    eventually("registry size", || {
        let registry = Arc::clone(&state.registry);
        async move { registry.len().await == expected }
    })
    .await;
}

async fn session_stopped(state: &AppState) {
    eventually("session to stop", || {
        let sampling = Arc::clone(&state.sampling);
        async move { !sampling.is_running() }
    })
    .await;
}

#[tokio::test]
async fn two_clients_share_one_session_and_it_restarts() {
    let interval = Duration::from_millis(50);
    let (addr, state) = start(interval).await;

    let mut first = connect(addr, interval).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut second = connect(addr, interval).await;
    registry_len_is(&state, 2).await;

    let a = next_snapshot(&mut first).await;
    let b = next_snapshot(&mut second).await;
    assert!(a.wall_time >= 0.0 && b.wall_time >= 0.0);

    let counters = state.sampling.counters();
    assert_eq!(counters.started, 1);
    assert_eq!(counters.max_concurrent, 1);

    drop(first);
    drop(second);
    registry_len_is(&state, 0).await;
    session_stopped(&state).await;

    let counters = state.sampling.counters();
    assert_eq!(counters.active, 0);
    assert_eq!(counters.completed, 1);

    // A new connection after the drain starts a fresh session.
    let mut third = connect(addr, interval).await;
    next_snapshot(&mut third).await;
    next_snapshot(&mut third).await;
    assert_eq!(state.sampling.counters().started, 2);
    assert_eq!(state.sampling.counters().max_concurrent, 1);
}

#[tokio::test]
async fn late_joiner_gets_latest_snapshot_immediately() {
    let interval = Duration::from_millis(200);
    let (addr, state) = start(interval).await;

    let mut early = connect(addr, interval).await;
    let broadcast = next_snapshot(&mut early).await;
    assert!(state.sampling.latest_frame().await.is_some());

    let mut late = TcpStream::connect(addr).await.expect("connect");
    let Ok(Ok(WireMessage::Profiler(_))) =
        tokio::time::timeout(READ_TIMEOUT, wire::read_message(&mut late)).await
    else {
        panic!("expected greeting");
    };
    // Well inside one interval: this can only be the replayed frame.
    let replay = tokio::time::timeout(interval / 2, wire::read_message(&mut late)).await;
    let replayed = match replay {
        Ok(Ok(WireMessage::Result(snapshot))) => snapshot,
        other => panic!("expected replay of latest snapshot, got {other:?}"),
    };
    assert!(replayed.sequence >= broadcast.sequence);
}

#[tokio::test]
async fn client_sending_data_is_evicted_without_affecting_others() {
    let interval = Duration::from_millis(30);
    let (addr, state) = start(interval).await;

    let mut rude = connect(addr, interval).await;
    let mut polite = connect(addr, interval).await;
    registry_len_is(&state, 2).await;

    rude.write_all(b"?").await.expect("write");
    registry_len_is(&state, 1).await;
    let last_before_removal = match state.sampling.latest_frame().await {
        Some(frame) => sequence_of(&frame),
        None => 0,
    };

    // The polite client keeps streaming past the removal.
    let mut later = next_snapshot(&mut polite).await;
    while later.sequence <= last_before_removal {
        later = next_snapshot(&mut polite).await;
    }
    assert!(state.sampling.is_running());

    let mut drained = Vec::new();
    let eof = tokio::time::timeout(READ_TIMEOUT, rude.read_to_end(&mut drained)).await;
    assert!(matches!(eof, Ok(Ok(_))), "evicted client should see EOF");
    for snapshot in snapshots_in(&drained) {
        assert!(
            snapshot.sequence <= last_before_removal,
            "snapshot {} reached a client after its removal",
            snapshot.sequence
        );
    }
}

fn sequence_of(frame: &[u8]) -> u64 {
    match wire::decode(frame) {
        Ok((WireMessage::Result(snapshot), _)) => snapshot.sequence,
        other => panic!("latest frame is not a snapshot: {other:?}"),
    }
}

/// Decodes every complete RESULT frame in `buf`.
fn snapshots_in(buf: &[u8]) -> Vec<Snapshot> {
    let mut rest = buf;
    let mut snapshots = Vec::new();
    while !rest.is_empty() {
        let (message, used) = wire::decode(rest).expect("well-formed frame");
        if let WireMessage::Result(snapshot) = message {
            snapshots.push(snapshot);
        }
        rest = rest.get(used..).unwrap_or_default();
    }
    snapshots
}

#[tokio::test]
async fn last_disconnect_frees_the_gate_within_one_interval() {
    let interval = Duration::from_millis(50);
    let (addr, state) = start(interval).await;

    let mut first = connect(addr, interval).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut second = connect(addr, interval).await;
    next_snapshot(&mut first).await;
    next_snapshot(&mut second).await;

    drop(first);
    drop(second);
    let dropped_at = Instant::now();
    while state.sampling.is_running() {
        assert!(
            dropped_at.elapsed() < interval * 3,
            "session still running {:?} after the last client left",
            dropped_at.elapsed()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(dropped_at.elapsed() < interval * 3);
    assert_eq!(state.sampling.counters().active, 0);
    assert_eq!(state.registry.len().await, 0);
}

#[tokio::test]
async fn connection_churn_never_runs_two_sessions() {
    let interval = Duration::from_millis(15);
    let (addr, state) = start(interval).await;

    for round in 0..5_u64 {
        let mut tasks = Vec::new();
        for i in 0..6_u64 {
            tasks.push(tokio::spawn(async move {
                let stream = connect(addr, interval).await;
                tokio::time::sleep(Duration::from_millis((round * 7 + i * 5) % 40)).await;
                drop(stream);
            }));
        }
        for task in tasks {
            task.await.expect("client task");
        }
    }

    registry_len_is(&state, 0).await;
    session_stopped(&state).await;

    let counters = state.sampling.counters();
    assert!(counters.max_concurrent <= 1);
    assert_eq!(counters.active, 0);
    assert_eq!(counters.started, counters.completed);
}

#[derive(Debug, Default)]
struct RejectFirst {
    rejected: AtomicBool,
}

#[async_trait]
impl StreamWrapper for RejectFirst {
    async fn wrap(&self, stream: TcpStream, _peer: SocketAddr) -> io::Result<BoxedTransport> {
        if !self.rejected.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "handshake failed"));
        }
        Ok(Box::new(stream))
    }
}

#[tokio::test]
async fn wrapper_failure_only_drops_that_connection() {
    let interval = Duration::from_millis(30);
    let server = ProfilingServer::bind_with(
        test_config(interval),
        Arc::new(WallClockProfiler::new()),
        Arc::new(RejectFirst::default()),
    )
    .await
    .expect("bind on loopback");
    let (addr, state) = start_with(server).await;

    let mut rejected = TcpStream::connect(addr).await.expect("connect");
    let mut buf = Vec::new();
    let closed = tokio::time::timeout(READ_TIMEOUT, rejected.read_to_end(&mut buf)).await;
    assert!(closed.is_ok(), "rejected connection should be closed");
    assert!(buf.is_empty());

    let mut accepted = connect(addr, interval).await;
    next_snapshot(&mut accepted).await;
    assert_eq!(state.registry.len().await, 1);
}

#[tokio::test]
async fn bincode_format_streams_decodable_frames() {
    let interval = Duration::from_millis(30);
    let config = ServerConfig {
        wire_format: WireFormat::Bincode,
        ..test_config(interval)
    };
    let server = ProfilingServer::bind(config, Arc::new(WallClockProfiler::new()))
        .await
        .expect("bind on loopback");
    let (addr, _state) = start_with(server).await;

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let mut head = [0_u8; wire::HEADER_LEN];
    stream.read_exact(&mut head).await.expect("greeting header");
    let header = wire::FrameHeader::parse(&head).expect("valid header");
    assert_eq!(header.format, WireFormat::Bincode);
    let mut payload = vec![0_u8; header.length];
    stream.read_exact(&mut payload).await.expect("greeting payload");

    next_snapshot(&mut stream).await;
}

/// Reports itself unavailable on the first snapshot, then recovers.
#[derive(Debug, Default)]
struct UnavailableOnce {
    failed: AtomicBool,
    inner: WallClockProfiler,
}

impl Profiler for UnavailableOnce {
    fn start(&self) -> Result<(), ProfilerError> {
        self.inner.start()
    }

    fn stop(&self) -> Result<(), ProfilerError> {
        self.inner.stop()
    }

    fn take_snapshot(&self) -> Result<Snapshot, ProfilerError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(ProfilerError::Unavailable("sampler detached".to_string()));
        }
        self.inner.take_snapshot()
    }
}

#[tokio::test]
async fn unavailable_profiler_evicts_clients_and_reconnect_streams_again() {
    let interval = Duration::from_millis(30);
    let server = ProfilingServer::bind(test_config(interval), Arc::new(UnavailableOnce::default()))
        .await
        .expect("bind on loopback");
    let (addr, state) = start_with(server).await;

    let mut stranded = connect(addr, interval).await;
    let mut leftover = Vec::new();
    let closed = tokio::time::timeout(READ_TIMEOUT, stranded.read_to_end(&mut leftover)).await;
    assert!(matches!(closed, Ok(Ok(_))), "client should be closed once the profiler fails");
    assert!(snapshots_in(&leftover).is_empty());
    registry_len_is(&state, 0).await;
    session_stopped(&state).await;

    let mut retry = connect(addr, interval).await;
    let mut joiner = connect(addr, interval).await;
    next_snapshot(&mut retry).await;
    next_snapshot(&mut joiner).await;

    let counters = state.sampling.counters();
    assert_eq!(counters.started, 2);
    assert_eq!(counters.max_concurrent, 1);
}
