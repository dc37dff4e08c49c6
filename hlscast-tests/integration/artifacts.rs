//! Cleanup of what an encoder session leaves in the streaming directory.
#![cfg(unix)]

use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hlscast_core::config::HlscastConfig;
use hlscast_core::supervisor::Supervisor;
use hlscast_core::testing::write_fake_encoder;
use hlscast_core::{CleanupOutcome, StreamSource, TranscodePlan, cleanup};
use tempfile::tempdir;

const SEGMENTING_ENCODER: &str = r#"dir=$(dirname "$last")
for n in 0 1 2; do printf 'segment' > "$dir/stream$n.ts"; done
exec sleep 30"#;

#[tokio::test]
async fn test_session_artifacts_are_removed_and_media_kept() {
    let tools = tempdir().unwrap();
    let stream = tempdir().unwrap();
    std::fs::write(stream.path().join("sample.mp4"), b"media").unwrap();
    std::fs::create_dir(stream.path().join("archive")).unwrap();
    std::fs::write(stream.path().join("archive").join("old0.ts"), b"old").unwrap();

    let mut config = HlscastConfig::for_testing();
    config.supervisor.startup_timeout = Duration::from_millis(300);
    config.tools.ffmpeg_path = write_fake_encoder(tools.path(), SEGMENTING_ENCODER);
    let config = Arc::new(config);
    let supervisor = Supervisor::new(Arc::clone(&config));
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let mut encoder = supervisor
        .start_encoder(
            Ipv4Addr::LOCALHOST,
            port,
            stream.path(),
            &TranscodePlan::passthrough(),
            &StreamSource::Local(PathBuf::from("/videos/sample.mp4")),
        )
        .await
        .unwrap();
    supervisor.stop(&mut encoder).await.unwrap();

    let first = cleanup(stream.path(), &config.cleanup);
    let second = cleanup(stream.path(), &config.cleanup);

    assert_eq!(first, CleanupOutcome::Deleted { count: 4 });
    assert_eq!(second, CleanupOutcome::NothingToDelete);
    assert!(stream.path().join("sample.mp4").exists());
    assert!(stream.path().join("archive").join("old0.ts").exists());
}
