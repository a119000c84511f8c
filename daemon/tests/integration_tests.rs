//! End-to-end tests for the daemon state and the control socket.

mod common;

use common::FakeProvider;
use nicewatch_daemon::{
    activity_log::ActivityLog,
    config::Config,
    controller::ThrottleController,
    daemon::{monitoring_loop, DaemonState},
    protocol::{Request, Response, TailLogParams},
    socket::{handle_client, ControlServer, RequestHandler},
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, watch};

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.general.target_priority = 19;
    config.general.tick_interval_seconds = 1;
    config.general.log_path = Some(dir.path().join("throttle.log"));
    config.watch.unprivileged = vec!["alpha".to_string()];
    config.watch.privileged = vec!["beta".to_string()];
    config
}

fn daemon_state(dir: &TempDir, provider: Arc<FakeProvider>) -> Arc<DaemonState> {
    let config = test_config(dir);
    let controller = ThrottleController::from_config(&config, provider).unwrap();
    let (tx, _) = broadcast::channel(16);
    Arc::new(DaemonState::new(config, controller, tx))
}

fn data(response: Response) -> serde_json::Value {
    match response {
        Response::Response { data, .. } => data,
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_throttle_now_and_tail_log() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.spawn("alpha", 100, 0);
    let state = daemon_state(&dir, provider.clone());

    let report = data(state.handle(Request::ThrottleNow).await);
    assert_eq!(report["corrections_applied"], 1);
    assert_eq!(report["transitions"][0]["kind"], "throttled");
    assert_eq!(provider.priority_of(100), Some(19));

    let tail = data(
        state
            .handle(Request::TailLog {
                params: TailLogParams { lines: Some(5) },
            })
            .await,
    );
    let lines = tail.as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0]
        .as_str()
        .unwrap()
        .ends_with(" - Throttled alpha (pid=100) from 0 to 19"));
}

#[tokio::test]
async fn test_status_and_watch_state_are_snapshots() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.spawn("alpha", 100, 19);
    let state = daemon_state(&dir, provider);

    assert!(data(state.handle(Request::GetStatus).await).is_null());

    assert_eq!(state.tick_count(), 0);
    state.run_pass().await;
    assert_eq!(state.tick_count(), 1);
    let status = data(state.handle(Request::GetStatus).await);
    assert_eq!(status["rows"].as_array().unwrap().len(), 2);
    assert_eq!(status["rows"][0]["instances"][0]["pid"], 100);

    let entries = data(state.handle(Request::GetWatchState).await);
    assert_eq!(
        entries,
        serde_json::json!([{ "name": "alpha", "pid": 100, "state": "corrected" }])
    );

    match state.handle(Request::GetConfig).await {
        Response::Config { data } => assert_eq!(data.watch.privileged, ["beta"]),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn test_monitoring_loop_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(FakeProvider::new());
    provider.spawn("beta", 300, 0);
    let state = daemon_state(&dir, provider.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitoring_loop(state.clone(), shutdown_rx));

    // The first tick runs immediately.
    for _ in 0..50 {
        if provider.priority_of(300) == Some(19) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(provider.priority_of(300), Some(19));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop between ticks")
        .unwrap();
    assert_eq!(provider.calls().len(), 1);
}

#[tokio::test]
async fn test_socket_round_trip() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("nicewatch.sock");
    let server = ControlServer::bind(&socket_path).await.unwrap();
    let provider = Arc::new(FakeProvider::new());
    let state = {
        let config = test_config(&dir);
        let controller = ThrottleController::from_config(&config, provider).unwrap();
        Arc::new(DaemonState::new(config, controller, server.broadcast_sender()))
    };

    let client = tokio::spawn({
        let socket_path = socket_path.clone();
        async move {
            let stream = UnixStream::connect(&socket_path).await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);
            writer.write_all(b"{\"cmd\":\"ping\"}\n").await.unwrap();
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            line
        }
    });

    let stream = server.accept().await.unwrap();
    let rx = server.broadcast_sender().subscribe();
    tokio::spawn(handle_client(stream, rx, state));

    let line = client.await.unwrap();
    assert_eq!(line.trim(), r#"{"type":"pong"}"#);
}

#[test]
fn test_activity_log_appends() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("logs").join("throttle.log");
    {
        let mut log = ActivityLog::open(&path).unwrap();
        log.record("first").unwrap();
    }
    let mut log = ActivityLog::open(&path).unwrap();
    log.record("second").unwrap();
    log.flush().unwrap();

    let tail = nicewatch_daemon::activity_log::tail(&path, 1).unwrap();
    assert_eq!(tail.len(), 1);
    assert!(tail[0].ends_with(" - second"));
    assert_eq!(nicewatch_daemon::activity_log::tail(&path, 10).unwrap().len(), 2);
}
