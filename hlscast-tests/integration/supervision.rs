//! Supervisor lifecycle against real sockets and child processes.

use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hlscast_core::config::HlscastConfig;
use hlscast_core::supervisor::{ProcessKind, ProcessState, Supervisor, SupervisorError};
use hlscast_core::{StreamSource, TranscodePlan};
use tempfile::tempdir;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_segments_written_after_start_are_served() {
    let dir = tempdir().unwrap();
    let port = free_port();
    let supervisor = Supervisor::new(Arc::new(HlscastConfig::for_testing()));

    let mut server = supervisor
        .start_file_server(Ipv4Addr::LOCALHOST, port, dir.path())
        .await
        .unwrap();
    assert_eq!(server.kind(), ProcessKind::FileServer);
    assert_eq!(server.state(), ProcessState::Healthy);

    std::fs::write(dir.path().join("stream0.ts"), b"\x47segment").unwrap();
    let response = reqwest::get(format!("http://127.0.0.1:{port}/stream0.ts"))
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "video/mp2t");
    assert_eq!(&response.bytes().await.unwrap()[..], b"\x47segment");

    supervisor.stop(&mut server).await.unwrap();
    assert!(
        reqwest::get(format!("http://127.0.0.1:{port}/stream0.ts"))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_occupied_port_leaves_nothing_running() {
    let dir = tempdir().unwrap();
    let holder = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();
    let supervisor = Supervisor::new(Arc::new(HlscastConfig::for_testing()));

    let error = supervisor
        .start_file_server(Ipv4Addr::LOCALHOST, port, dir.path())
        .await
        .unwrap_err();
    match error {
        SupervisorError::AddressInUse { addr } => assert_eq!(addr.port(), port),
        other => panic!("expected address in use, got {other:?}"),
    }

    // Once the port is released a new server can take it
    drop(holder);
    let mut server = supervisor
        .start_file_server(Ipv4Addr::LOCALHOST, port, dir.path())
        .await
        .unwrap();
    supervisor.stop(&mut server).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_stopping_twice_signals_once() {
    use hlscast_core::testing::write_fake_encoder;

    let tools = tempdir().unwrap();
    let stream = tempdir().unwrap();
    let mut config = HlscastConfig::for_testing();
    config.supervisor.startup_timeout = Duration::from_millis(300);
    config.tools.ffmpeg_path = write_fake_encoder(tools.path(), "exec sleep 30");
    let supervisor = Supervisor::new(Arc::new(config));

    let mut encoder = supervisor
        .start_encoder(
            Ipv4Addr::LOCALHOST,
            free_port(),
            stream.path(),
            &TranscodePlan::passthrough(),
            &StreamSource::Local(PathBuf::from("/videos/sample.mp4")),
        )
        .await
        .unwrap();
    let started_at = encoder.started_at();

    supervisor.stop(&mut encoder).await.unwrap();
    let after_first = encoder.state();
    supervisor.stop(&mut encoder).await.unwrap();

    assert!(after_first.is_exited());
    assert_eq!(encoder.state(), after_first);
    assert!(encoder.termination_sent());
    assert_eq!(encoder.started_at(), started_at);
}

#[cfg(unix)]
#[tokio::test]
async fn test_encoder_dying_mid_window_is_reported() {
    use hlscast_core::testing::write_fake_encoder;

    let tools = tempdir().unwrap();
    let stream = tempdir().unwrap();
    let mut config = HlscastConfig::for_testing();
    config.tools.ffmpeg_path = write_fake_encoder(tools.path(), "sleep 0.2\nexit 0");
    let supervisor = Supervisor::new(Arc::new(config));

    let error = supervisor
        .start_encoder(
            Ipv4Addr::LOCALHOST,
            free_port(),
            stream.path(),
            &TranscodePlan::passthrough(),
            &StreamSource::Local(PathBuf::from("/videos/sample.mp4")),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        SupervisorError::ExitedDuringStartup {
            kind: ProcessKind::Encoder,
            code: Some(0)
        }
    ));
}
