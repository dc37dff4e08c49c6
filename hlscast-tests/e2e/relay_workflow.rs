//! Complete relay sessions driven through the orchestrator.
#![cfg(unix)]

use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hlscast_core::config::HlscastConfig;
use hlscast_core::testing::{ScriptedProber, recorded_encoder_args, write_fake_encoder};
use hlscast_core::{
    CleanupOutcome, EXIT_INTERRUPTED, EXIT_OK, Orchestrator, RunInputs, RunOutcome, StreamSource,
};
use tempfile::tempdir;
use tokio::sync::oneshot;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn relay_config(tools_dir: &Path, encoder_tail: &str) -> Arc<HlscastConfig> {
    let mut config = HlscastConfig::for_testing();
    config.supervisor.startup_timeout = Duration::from_millis(300);
    config.tools.ffmpeg_path = write_fake_encoder(tools_dir, encoder_tail);
    Arc::new(config)
}

/// Polls the playlist URL until the file server answers with it.
async fn fetch_playlist(port: u16) -> String {
    let url = format!("http://127.0.0.1:{port}/stream.m3u8");
    for _ in 0..100 {
        if let Ok(response) = reqwest::get(&url).await
            && response.status().is_success()
        {
            return response.text().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("playlist never served at {url}");
}

#[tokio::test]
async fn test_h264_mp3_sample_is_relayed_with_aac_audio() {
    let tools = tempdir().unwrap();
    let stream = tempdir().unwrap();
    let sample = stream.path().join("sample.mp4");
    std::fs::write(&sample, b"media").unwrap();
    let port = free_port();

    let prober = Arc::new(ScriptedProber::new(&["h264"], &["mp3"]));
    let orchestrator = Orchestrator::new(relay_config(tools.path(), "exec sleep 30"), prober.clone());
    let inputs = RunInputs {
        bind_address: Ipv4Addr::LOCALHOST,
        port,
        streaming_dir: stream.path().to_path_buf(),
        transcode: true,
        source: StreamSource::Local(sample.clone()),
    };

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(async move {
        orchestrator
            .run(inputs, async {
                let _ = stop_rx.await;
            })
            .await
    });

    let playlist = fetch_playlist(port).await;
    assert!(playlist.starts_with("#EXTM3U"));

    let playlist_path = stream.path().join("stream.m3u8");
    let sample_arg = sample.display().to_string();
    let base_url = format!("http://127.0.0.1:{port}/");
    let playlist_arg = playlist_path.display().to_string();
    let expected: Vec<String> = [
        "-re",
        "-i",
        sample_arg.as_str(),
        "-map",
        "0:v?",
        "-map",
        "0:a?",
        "-map",
        "0:a:0?",
        "-map",
        "0:s?",
        "-map",
        "0:d?",
        "-map",
        "0:t?",
        "-c:v",
        "copy",
        "-c:a",
        "copy",
        "-c:a:1",
        "aac",
        "-ac:a:1",
        "2",
        "-b:a:1",
        "192k",
        "-c:s",
        "copy",
        "-c:d",
        "copy",
        "-c:t",
        "copy",
        "-f",
        "hls",
        "-hls_time",
        "10",
        "-hls_list_size",
        "24",
        "-hls_flags",
        "delete_segments+independent_segments",
        "-hls_base_url",
        base_url.as_str(),
        "-hls_allow_cache",
        "1",
        "-hls_segment_type",
        "mpegts",
        "-loglevel",
        "info",
        playlist_arg.as_str(),
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();
    assert_eq!(recorded_encoder_args(tools.path()), expected);

    stop_tx.send(()).unwrap();
    let report = run.await.unwrap();

    assert_eq!(report.outcome.as_ref().unwrap(), &RunOutcome::Interrupted);
    assert_eq!(report.exit_code(), EXIT_INTERRUPTED);
    assert_eq!(report.cleanup, CleanupOutcome::Deleted { count: 1 });
    assert!(!playlist_path.exists());
    assert!(sample.exists());
    assert_eq!(prober.calls(), 2);
    assert!(reqwest::get(format!("http://127.0.0.1:{port}/stream.m3u8")).await.is_err());
}

#[tokio::test]
async fn test_disabled_transcoding_copies_without_probing() {
    let tools = tempdir().unwrap();
    let stream = tempdir().unwrap();
    let port = free_port();

    let prober = Arc::new(ScriptedProber::new(&["hevc"], &["opus"]));
    let orchestrator = Orchestrator::new(relay_config(tools.path(), "sleep 1"), prober.clone());
    let inputs = RunInputs {
        bind_address: Ipv4Addr::LOCALHOST,
        port,
        streaming_dir: stream.path().to_path_buf(),
        transcode: false,
        source: StreamSource::Local(stream.path().join("clip.mkv")),
    };

    let report = orchestrator.run(inputs, std::future::pending()).await;

    assert_eq!(report.exit_code(), EXIT_OK);
    assert!(matches!(report.outcome, Ok(RunOutcome::Completed(exit)) if exit.is_success()));
    assert_eq!(prober.calls(), 0);

    let args = recorded_encoder_args(tools.path());
    let input = args.iter().position(|arg| arg == "-i").unwrap();
    assert_eq!(args[input + 2..input + 6], ["-map", "0", "-c", "copy"]);
    assert_eq!(args[input + 6], "-f");
}

#[tokio::test]
async fn test_remote_source_is_passed_through_verbatim() {
    let tools = tempdir().unwrap();
    let stream = tempdir().unwrap();
    let url = "https://cdn.example.com/live/movie.mp4";

    let orchestrator = Orchestrator::new(
        relay_config(tools.path(), "sleep 1"),
        Arc::new(ScriptedProber::new(&["h264"], &["aac"])),
    );
    let inputs = RunInputs {
        bind_address: Ipv4Addr::LOCALHOST,
        port: free_port(),
        streaming_dir: stream.path().to_path_buf(),
        transcode: true,
        source: StreamSource::Remote(url.parse().unwrap()),
    };

    let report = orchestrator.run(inputs, std::future::pending()).await;

    assert_eq!(report.exit_code(), EXIT_OK);
    let args = recorded_encoder_args(tools.path());
    assert_eq!(args[..3], ["-re", "-i", url]);
}
