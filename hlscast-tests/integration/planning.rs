//! Probing through a real child process feeding the planner.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use hlscast_core::config::HlscastConfig;
use hlscast_core::streaming::{PlanShape, plan_for_source};
use hlscast_core::testing::write_script;
use hlscast_core::{FfprobeProber, HlscastError, PlanError, ProbeError, StreamSource};
use tempfile::tempdir;

/// Fake ffprobe answering per stream selector (`$4` is `v` or `a`).
fn fake_ffprobe(dir: &Path, video: &str, audio: &str) -> PathBuf {
    let body = format!(
        r#"case "$4" in
  v) printf '{video}' ;;
  a) printf '{audio}' ;;
esac"#
    );
    write_script(dir, "fake-ffprobe", &body)
}

fn sample() -> StreamSource {
    StreamSource::Local(PathBuf::from("/videos/sample.mp4"))
}

#[tokio::test]
async fn test_h264_with_mp3_adds_aac_rendition() {
    let dir = tempdir().unwrap();
    let prober = FfprobeProber::new(
        fake_ffprobe(dir.path(), "h264\\n", "mp3\\n"),
        Duration::from_secs(5),
    );
    let config = HlscastConfig::for_testing();

    let plan = plan_for_source(&config, &prober, &sample(), true)
        .await
        .unwrap();

    assert_eq!(plan.shape, PlanShape::TranscodeAudio { audio_tracks: 1 });
    let rendition: Vec<&str> = plan
        .tokens
        .iter()
        .skip_while(|token| *token != "-c:a:1")
        .take(6)
        .map(String::as_str)
        .collect();
    assert_eq!(
        rendition,
        ["-c:a:1", "aac", "-ac:a:1", "2", "-b:a:1", "192k"]
    );
}

#[tokio::test]
async fn test_existing_aac_track_among_several_is_reused() {
    let dir = tempdir().unwrap();
    let prober = FfprobeProber::new(
        fake_ffprobe(dir.path(), "h264\\n", "mp3\\nAAC\\n"),
        Duration::from_secs(5),
    );

    let plan = plan_for_source(&HlscastConfig::for_testing(), &prober, &sample(), true)
        .await
        .unwrap();

    assert!(plan.is_passthrough());
    assert_eq!(plan.tokens, ["-map", "0", "-c", "copy"]);
}

#[tokio::test]
async fn test_hevc_without_audio_drops_audio() {
    let dir = tempdir().unwrap();
    let prober = FfprobeProber::new(
        fake_ffprobe(dir.path(), "hevc\\n", ""),
        Duration::from_secs(5),
    );

    let plan = plan_for_source(&HlscastConfig::for_testing(), &prober, &sample(), true)
        .await
        .unwrap();

    assert_eq!(
        plan.shape,
        PlanShape::TranscodeVideoDropAudio { video_tracks: 1 }
    );
    assert!(plan.tokens.iter().any(|token| token == "-an"));
    assert!(plan.tokens.iter().any(|token| token == "libx264"));
}

#[tokio::test]
async fn test_audio_only_source_is_rejected() {
    let dir = tempdir().unwrap();
    let prober = FfprobeProber::new(
        fake_ffprobe(dir.path(), "", "aac\\n"),
        Duration::from_secs(5),
    );

    let error = plan_for_source(&HlscastConfig::for_testing(), &prober, &sample(), true)
        .await
        .unwrap_err();

    assert!(matches!(error, PlanError::NoVideoTrack));
    assert!(HlscastError::from(error).is_user_error());
}

#[tokio::test]
async fn test_broken_prober_is_a_probe_failure() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "broken-ffprobe", "echo 'moov atom not found' >&2\nexit 1");
    let prober = FfprobeProber::new(script, Duration::from_secs(5));

    let error = plan_for_source(&HlscastConfig::for_testing(), &prober, &sample(), true)
        .await
        .unwrap_err();

    match HlscastError::from(error) {
        HlscastError::Probe(ProbeError::NonZeroExit { stderr, .. }) => {
            assert_eq!(stderr, "moov atom not found");
        }
        other => panic!("expected a probe failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_hanging_prober_times_out() {
    let dir = tempdir().unwrap();
    let script = write_script(dir.path(), "slow-ffprobe", "exec sleep 30");
    let prober = FfprobeProber::new(script, Duration::from_millis(200));

    let error = plan_for_source(&HlscastConfig::for_testing(), &prober, &sample(), true)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        PlanError::Probe(ProbeError::Timeout { .. })
    ));
}
