//! Tests for listener runtime behaviour.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener},
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use rstest::{fixture, rstest};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, duplex, split},
    net::TcpStream,
    sync::oneshot,
    task::yield_now,
    time::{Duration, Instant, advance, sleep, timeout},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_test::traced_test;

use super::{
    BackoffConfig,
    accept::{AcceptLoopOptions, MockAcceptListener, accept_loop},
    connection::{ConnectionServices, Driver},
};
use crate::{
    connection::{CloseReason, Connection, ConnectionId, ConnectionRegistry},
    keep_alive::{KeepAlive, KeepAliveConfig},
    listener::{
        Bound,
        LISTENER_SLOT,
        Listener,
        ListenerComposer,
        ListenerConfig,
        ListenerError,
        ListenerState,
    },
    monitoring::{MonitoringRegistry, ViewKey},
    pipeline::{IoEvent, Pipeline, Stage, StageAction, StageContext, StageError},
    transport::TcpTransport,
    write_queue::WriteQueueConfig,
};

type Trace = Arc<Mutex<Vec<&'static str>>>;

struct Echo;

impl Stage for Echo {
    fn name(&self) -> &str { "echo" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        if let Some(bytes) = ctx.take_message::<Bytes>() {
            ctx.write(bytes)?;
        }
        Ok(StageAction::Continue)
    }
}

struct Farewell;

impl Stage for Farewell {
    fn name(&self) -> &str { "farewell" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        if matches!(ctx.event(), IoEvent::Read) {
            ctx.write("bye")?;
            ctx.request_close(CloseReason::Local);
        }
        Ok(StageAction::Stop)
    }
}

struct Rejecting(Trace);

impl Stage for Rejecting {
    fn name(&self) -> &str { "rejecting" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        self.0.lock().expect("trace lock").push(ctx.event().kind());
        match ctx.event() {
            IoEvent::Read => Err(StageError::protocol("malformed request")),
            _ => Ok(StageAction::Continue),
        }
    }
}

struct Panicking;

impl Stage for Panicking {
    fn name(&self) -> &str { "panicking" }

    fn handle(&self, ctx: &mut StageContext<'_>) -> Result<StageAction, StageError> {
        assert!(!matches!(ctx.event(), IoEvent::Read), "boom");
        Ok(StageAction::Continue)
    }
}

#[fixture]
fn free_listener() -> StdTcpListener {
    let addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0);
    StdTcpListener::bind(addr).expect("Failed to bind free port listener")
}

fn connection(stage: Arc<dyn Stage>) -> Arc<Connection> {
    Arc::new(Connection::new(
        ConnectionId::new(7),
        Arc::new(Pipeline::new(vec![stage])),
        WriteQueueConfig::default(),
    ))
}

fn services() -> Arc<ConnectionServices> {
    Arc::new(ConnectionServices {
        composer: Arc::new(ListenerComposer::new("test", Arc::new(MonitoringRegistry::new()))),
        connections: Arc::new(ConnectionRegistry::new()),
        write_queue: WriteQueueConfig::default(),
        idle_timeout: None,
        transport: Arc::new(TcpTransport::default()),
        next_id: std::sync::atomic::AtomicU64::new(1),
    })
}

#[rstest]
#[tokio::test]
async fn driver_echoes_reads_and_ends_on_eof() {
    let conn = connection(Arc::new(Echo));
    let (mut client, server) = duplex(1024);
    let driven = Arc::clone(&conn);
    let task = tokio::spawn(async move {
        let transport = TcpTransport::default();
        let (reader, mut writer) = split(server);
        let driver = Driver {
            connection: &driven,
            transport: &transport,
            keep_alive: None,
            idle_timeout: None,
        };
        driver.run(reader, &mut writer, &CancellationToken::new()).await
    });

    client.write_all(b"ping").await.expect("write");
    let mut reply = [0_u8; 4];
    client.read_exact(&mut reply).await.expect("read");
    assert_eq!(&reply, b"ping");

    client.shutdown().await.expect("shutdown");
    drop(client);
    let reason = timeout(Duration::from_secs(1), task)
        .await
        .expect("driver finished")
        .expect("join");
    assert_eq!(reason, CloseReason::Remote);
}

#[rstest]
#[tokio::test]
async fn requested_close_flushes_first() {
    let conn = connection(Arc::new(Farewell));
    let (mut client, server) = duplex(1024);
    let driven = Arc::clone(&conn);
    let task = tokio::spawn(async move {
        let transport = TcpTransport::default();
        let (reader, mut writer) = split(server);
        let driver = Driver {
            connection: &driven,
            transport: &transport,
            keep_alive: None,
            idle_timeout: None,
        };
        driver.run(reader, &mut writer, &CancellationToken::new()).await
    });

    client.write_all(b"GET /").await.expect("write");
    let reason = task.await.expect("join");
    assert_eq!(reason, CloseReason::Local);
    let mut reply = [0_u8; 3];
    client.read_exact(&mut reply).await.expect("read");
    assert_eq!(&reply, b"bye");
}

#[rstest]
#[tokio::test]
async fn stage_failure_fires_error_event() {
    let trace = Trace::default();
    let conn = connection(Arc::new(Rejecting(Arc::clone(&trace))));
    let (mut client, server) = duplex(1024);
    let driven = Arc::clone(&conn);
    let task = tokio::spawn(async move {
        let transport = TcpTransport::default();
        let (reader, mut writer) = split(server);
        let driver = Driver {
            connection: &driven,
            transport: &transport,
            keep_alive: None,
            idle_timeout: None,
        };
        driver.run(reader, &mut writer, &CancellationToken::new()).await
    });

    client.write_all(b"junk").await.expect("write");
    assert_eq!(task.await.expect("join"), CloseReason::StageFailure);
    assert_eq!(*trace.lock().expect("trace lock"), vec!["accept", "read", "error"]);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn idle_connections_time_out() {
    let policy = KeepAlive::new(KeepAliveConfig::default());
    let conn = connection(Arc::new(Echo));
    let (_client, server) = duplex(64);
    let transport = TcpTransport::default();
    let (reader, mut writer) = split(server);
    let driver = Driver {
        connection: &conn,
        transport: &transport,
        keep_alive: Some(&policy),
        idle_timeout: Some(Duration::from_secs(5)),
    };

    let started = Instant::now();
    let reason = driver.run(reader, &mut writer, &CancellationToken::new()).await;
    assert_eq!(reason, CloseReason::IdleTimeout);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(policy.stats().timeouts, 1);
}

#[rstest]
#[tokio::test]
async fn shutdown_interrupts_driver() {
    let conn = connection(Arc::new(Echo));
    let (_client, server) = duplex(64);
    let transport = TcpTransport::default();
    let (reader, mut writer) = split(server);
    let driver = Driver {
        connection: &conn,
        transport: &transport,
        keep_alive: None,
        idle_timeout: None,
    };
    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(driver.run(reader, &mut writer, &token).await, CloseReason::Shutdown);
}

/// Creates a mock listener that fails every call, logging call times.
fn failing_listener(calls: &Arc<Mutex<Vec<Instant>>>, num_calls: usize) -> MockAcceptListener {
    let mut listener = MockAcceptListener::new();
    let call_log = Arc::clone(calls);
    listener
        .expect_accept()
        .returning(move || {
            let call_log = Arc::clone(&call_log);
            Box::pin(async move {
                call_log.lock().expect("lock").push(Instant::now());
                Err(io::Error::other("mock error"))
            })
        })
        .times(num_calls);
    listener
        .expect_local_addr()
        .returning(|| Ok("127.0.0.1:0".parse().expect("addr parse")))
        .times(num_calls);
    listener
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn accept_loop_backs_off_exponentially() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let listener = Arc::new(failing_listener(&calls, 4));
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn(accept_loop(
        listener,
        services(),
        AcceptLoopOptions {
            state: Arc::new(ListenerState::default()),
            shutdown: token.clone(),
            tracker: tracker.clone(),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
        },
    ));

    yield_now().await;
    for ms in [5, 10, 20] {
        advance(Duration::from_millis(ms)).await;
        yield_now().await;
    }
    token.cancel();
    advance(Duration::from_millis(20)).await;
    yield_now().await;
    tracker.close();
    tracker.wait().await;

    let calls = calls.lock().expect("lock");
    let intervals: Vec<_> = calls.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        intervals,
        vec![
            Duration::from_millis(5),
            Duration::from_millis(10),
            Duration::from_millis(20),
        ]
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn paused_listener_does_not_accept() {
    let mut listener = MockAcceptListener::new();
    listener.expect_accept().times(0);
    let state = Arc::new(ListenerState::default());
    state.pause();
    let token = CancellationToken::new();
    let tracker = TaskTracker::new();

    tracker.spawn(accept_loop(
        Arc::new(listener),
        services(),
        AcceptLoopOptions {
            state: Arc::clone(&state),
            shutdown: token.clone(),
            tracker: tracker.clone(),
            backoff: BackoffConfig::default(),
        },
    ));

    advance(Duration::from_secs(1)).await;
    yield_now().await;
    token.cancel();
    tracker.close();
    timeout(Duration::from_secs(1), tracker.wait())
        .await
        .expect("accept loop stopped");
}

async fn start(
    listener: Listener<Bound>,
) -> (
    SocketAddr,
    oneshot::Sender<()>,
    tokio::task::JoinHandle<Result<(), ListenerError>>,
) {
    let addr = listener.local_addr().expect("local addr");
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(listener.ready_signal(ready_tx).run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    ready_rx.await.expect("listener ready");
    (addr, stop_tx, handle)
}

#[rstest]
#[tokio::test]
async fn listener_serves_and_publishes_its_view(free_listener: StdTcpListener) {
    let monitoring = Arc::new(MonitoringRegistry::new());
    let composer = ListenerComposer::new("echo", Arc::clone(&monitoring)).with_stage(Arc::new(Echo));
    let listener = Listener::new(
        ListenerConfig::new("echo").host("127.0.0.1").workers(2),
        composer,
    )
    .bind_existing_listener(free_listener)
    .expect("bind");
    let state = listener.state();
    let (addr, stop, handle) = start(listener).await;

    let key = ViewKey::new("echo", LISTENER_SLOT);
    let view = monitoring.snapshot(&key).expect("listener view");
    assert_eq!(view.get("started"), Some(&true.into()));
    assert!(state.is_started());

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(b"hello").await.expect("write");
    let mut reply = [0_u8; 5];
    stream.read_exact(&mut reply).await.expect("read");
    assert_eq!(&reply, b"hello");

    let _ = stop.send(());
    handle.await.expect("join").expect("listener run");
    assert!(!state.is_started());
    assert!(monitoring.is_empty());
}

#[rstest]
#[traced_test]
#[tokio::test]
async fn panicking_connection_is_logged(free_listener: StdTcpListener) {
    let composer = ListenerComposer::new("panics", Arc::new(MonitoringRegistry::new()))
        .with_stage(Arc::new(Panicking));
    let listener = Listener::new(ListenerConfig::new("panics").workers(1), composer)
        .bind_existing_listener(free_listener)
        .expect("bind");
    let (addr, stop, handle) = start(listener).await;

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(b"x").await.expect("write");
    let mut buf = [0_u8; 1];
    let _ = stream.read(&mut buf).await;

    for _ in 0..50 {
        if logs_contain("connection task panicked") {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(logs_contain("connection task panicked"));

    let _ = stop.send(());
    handle.await.expect("join").expect("listener run");
}
