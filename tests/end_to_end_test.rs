//! Edge agent talking to a live collector over HTTP


use axum::{extract::Path, http::StatusCode, routing::post, Router};
use classvision::{
    app::{EdgeApp, NdjsonFrameSource},
    batcher::{OverflowPolicy, SignalBatcher},
    collector::{server, Collector},
    config::{CollectorConfig, Config},
    signal::{BatchPayload, IngestReceipt},
    uploader::{FlushOutcome, HttpTransport, Transport, Uploader},
    Error,
};
use std::future::Future;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::TempDir;
use test_helpers::{keypoint_frame, signals, synthesize_face};
use tokio::sync::oneshot;

/// An HTTP server on an ephemeral port, driven by its own runtime thread
struct ServerThread {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ServerThread {
    fn spawn<F, Fut>(serve: F) -> Self
    where
        F: FnOnce(tokio::net::TcpListener, oneshot::Receiver<()>) -> Fut + Send + 'static,
        Fut: Future<Output = ()>,
    {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let handle = thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                serve(listener, stopped).await;
            });
        });

        Self {
            addr,
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    /// Serves a plain router until dropped
    fn router(router: Router) -> Self {
        Self::spawn(move |listener, stopped| async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = stopped.await;
                })
                .await
                .unwrap();
        })
    }

    fn api_base(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for ServerThread {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Collector served from its own runtime on an ephemeral port
struct RunningCollector {
    server: ServerThread,
    collector: Arc<Collector>,
    _dir: TempDir,
}

impl RunningCollector {
    fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let collector = Arc::new(
            Collector::new(CollectorConfig {
                data_dir: dir.path().to_path_buf(),
                ..CollectorConfig::default()
            })
            .unwrap(),
        );

        let served = collector.clone();
        let server = ServerThread::spawn(move |listener, stopped| async move {
            server::serve(listener, served, async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
        });

        Self {
            server,
            collector,
            _dir: dir,
        }
    }

    fn api_base(&self) -> String {
        self.server.api_base()
    }

    fn transport(&self) -> HttpTransport {
        HttpTransport::new(&self.api_base(), Duration::from_secs(2)).unwrap()
    }
}

/// Answers every ingest with the status named by the session id, e.g. `status-503`
async fn status_named_by_session(Path(session_id): Path<String>) -> StatusCode {
    session_id
        .strip_prefix("status-")
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn status_stub() -> ServerThread {
    ServerThread::router(Router::new().route("/v1/sessions/:session_id/signals", post(status_named_by_session)))
}

#[test]
fn test_resent_batch_is_not_duplicated() {
    let running = RunningCollector::start();
    let transport = running.transport();
    let payload = BatchPayload {
        session_id: "room-3".to_string(),
        batch: signals(0..3),
    };

    let first = transport.send(&payload).unwrap();
    assert_eq!(first, IngestReceipt { written: 3, duplicates: 0 });

    // Acknowledgement lost, edge resends the same batch
    let second = transport.send(&payload).unwrap();
    assert_eq!(second, IngestReceipt { written: 0, duplicates: 3 });

    assert_eq!(running.collector.preview("room-3", Some(10)).unwrap().len(), 3);
}

#[test]
fn test_invalid_batch_is_rejected_not_retried() {
    let running = RunningCollector::start();
    let transport = running.transport();
    let empty = BatchPayload {
        session_id: "room-3".to_string(),
        batch: Vec::new(),
    };

    match transport.send(&empty) {
        Err(e @ Error::Rejected { status: 400, .. }) => assert!(!e.is_transient()),
        other => panic!("Expected a 400 rejection, got {other:?}"),
    }
}

#[test]
fn test_unreachable_collector_is_transient() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let transport = HttpTransport::new(&format!("http://{addr}"), Duration::from_millis(500)).unwrap();
    let payload = BatchPayload {
        session_id: "room-3".to_string(),
        batch: signals(0..1),
    };

    let err = transport.send(&payload).unwrap_err();
    assert!(err.is_transient(), "{err:?}");
}

#[test]
fn test_frames_flow_from_keypoints_to_session_log() {
    let running = RunningCollector::start();

    let mut config = Config::default();
    config.edge.api_base = running.api_base();
    config.edge.session_id = "room-7".to_string();
    config.edge.flush_interval_ms = 20;
    config.edge.grid_columns = Some(2);

    let faces = [synthesize_face(0.0, 0.0, 180.0), synthesize_face(40.0, 0.0, 180.0)];
    let mut input = String::new();
    for ts in 0..3 {
        input.push_str(&serde_json::to_string(&keypoint_frame(1_700_000_000.0 + f64::from(ts), &faces)).unwrap());
        input.push('\n');
    }
    input.push_str("{\"width\": 640\n");

    let transport = Arc::new(HttpTransport::from_config(&config.edge).unwrap());
    let mut app = EdgeApp::new(&config, transport).unwrap();
    let summary = app.run(&mut NdjsonFrameSource::new(Cursor::new(input))).unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.bad_frames, 1);
    assert_eq!(summary.signals, 6);

    let stats = app.shutdown();
    assert_eq!(stats.delivered, 6);
    assert_eq!(stats.abandoned, 0);

    let records = running.collector.preview("room-7", Some(100)).unwrap();
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r.session_id == "room-7"));

    let frontal = &records[0].signal;
    let turned = &records[1].signal;
    assert_eq!(frontal.zone_id, "row0_col0");
    assert_eq!(turned.zone_id, "row0_col1");
    assert!(frontal.gaze_to_board_prob.unwrap().value() > 0.99);
    assert!((turned.head_pose_yaw.unwrap() - 40.0).abs() < 0.5);
    assert!(turned.gaze_to_board_prob.unwrap().value() < 0.5);
}

#[test]
fn test_overloaded_collector_keeps_batch_for_retry() {
    let stub = status_stub();
    let transport = Arc::new(HttpTransport::new(&stub.api_base(), Duration::from_secs(2)).unwrap());

    for code in [408u16, 429, 500, 503] {
        let session_id = format!("status-{code}");
        let payload = BatchPayload {
            session_id: session_id.clone(),
            batch: signals(0..3),
        };
        match transport.send(&payload) {
            Err(Error::Transport(msg)) => assert!(msg.contains(&code.to_string()), "{msg}"),
            other => panic!("Expected a transient failure for {code}, got {other:?}"),
        }

        let batcher = Arc::new(SignalBatcher::new(100, OverflowPolicy::DropOldest));
        for signal in signals(0..3) {
            batcher.append(signal);
        }
        let mut uploader = Uploader::new(session_id, batcher.clone(), transport.clone(), Duration::from_millis(700));

        assert!(
            matches!(uploader.flush(), FlushOutcome::Retained { pending: 3, .. }),
            "status {code}"
        );
        assert_eq!(batcher.len(), 3);
        assert_eq!(uploader.stats().discarded, 0);
    }
}

#[test]
fn test_refused_batch_is_discarded() {
    let stub = status_stub();
    let transport = Arc::new(HttpTransport::new(&stub.api_base(), Duration::from_secs(2)).unwrap());

    for code in [400u16, 404, 422] {
        let batcher = Arc::new(SignalBatcher::new(100, OverflowPolicy::DropOldest));
        for signal in signals(0..3) {
            batcher.append(signal);
        }
        let mut uploader = Uploader::new(
            format!("status-{code}"),
            batcher.clone(),
            transport.clone(),
            Duration::from_millis(700),
        );

        assert!(
            matches!(uploader.flush(), FlushOutcome::Discarded { count: 3, .. }),
            "status {code}"
        );
        assert!(batcher.is_empty());
    }
}
