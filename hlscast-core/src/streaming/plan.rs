//! Transcode planning: from probed codecs to encoder stream-mapping tokens.
//!
//! Each media type is classified as absent, already in the target codec, or
//! in another codec. The pair of classifications selects one of five plan
//! shapes. Converted tracks are added as an extra rendition of the first track
//! of that type; the source tracks themselves are always kept as copies.

use serde::Serialize;

use super::{CodecProbeResult, CodecProber, ProbeError, StreamSource, StreamType};
use crate::config::{HlscastConfig, TranscodeConfig};

/// Planning failures.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("the input doesn't have a video track")]
    NoVideoTrack,

    #[error("codec probe failed: {0}")]
    Probe(#[from] ProbeError),
}

/// How the tracks of one media type relate to the target codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackStatus {
    /// No track of this type
    Absent,
    /// At least one track already uses the target codec
    Matches,
    /// Tracks exist, none uses the target codec
    Mismatch { tracks: usize },
}

impl TrackStatus {
    pub fn classify(probe: &CodecProbeResult, target_codec: &str) -> Self {
        if !probe.has_tracks() {
            TrackStatus::Absent
        } else if probe.contains(target_codec) {
            TrackStatus::Matches
        } else {
            TrackStatus::Mismatch {
                tracks: probe.track_count(),
            }
        }
    }
}

/// The five plan shapes the decision table collapses to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlanShape {
    /// Copy every stream as is
    Passthrough,
    /// Copy video, add an AAC rendition of the first audio track
    TranscodeAudio { audio_tracks: usize },
    /// Copy audio, add an H.264 rendition of the first video track
    TranscodeVideo { video_tracks: usize },
    /// Add converted renditions for both media types
    TranscodeBoth {
        video_tracks: usize,
        audio_tracks: usize,
    },
    /// Add an H.264 rendition and suppress audio output
    TranscodeVideoDropAudio { video_tracks: usize },
}

impl PlanShape {
    /// Maps a (video, audio) classification onto a plan shape.
    ///
    /// # Errors
    /// - `PlanError::NoVideoTrack` - The source has no video track, whatever its audio
    pub fn classify(video: TrackStatus, audio: TrackStatus) -> Result<Self, PlanError> {
        use TrackStatus::{Absent, Matches, Mismatch};

        let shape = match (video, audio) {
            (Absent, _) => return Err(PlanError::NoVideoTrack),
            (Matches, Matches | Absent) => PlanShape::Passthrough,
            (Matches, Mismatch { tracks }) => PlanShape::TranscodeAudio {
                audio_tracks: tracks,
            },
            (Mismatch { tracks }, Matches) => PlanShape::TranscodeVideo {
                video_tracks: tracks,
            },
            (Mismatch { tracks: video }, Mismatch { tracks: audio }) => PlanShape::TranscodeBoth {
                video_tracks: video,
                audio_tracks: audio,
            },
            (Mismatch { tracks }, Absent) => PlanShape::TranscodeVideoDropAudio {
                video_tracks: tracks,
            },
        };
        Ok(shape)
    }

    fn converted_video_index(self) -> Option<usize> {
        match self {
            PlanShape::TranscodeVideo { video_tracks }
            | PlanShape::TranscodeBoth { video_tracks, .. }
            | PlanShape::TranscodeVideoDropAudio { video_tracks } => Some(video_tracks),
            PlanShape::Passthrough | PlanShape::TranscodeAudio { .. } => None,
        }
    }

    fn converted_audio_index(self) -> Option<usize> {
        match self {
            PlanShape::TranscodeAudio { audio_tracks }
            | PlanShape::TranscodeBoth { audio_tracks, .. } => Some(audio_tracks),
            _ => None,
        }
    }

    fn keeps_audio(self) -> bool {
        !matches!(self, PlanShape::TranscodeVideoDropAudio { .. })
    }
}

/// Ordered encoder tokens for stream mapping and per-track codec selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscodePlan {
    pub shape: PlanShape,
    pub tokens: Vec<String>,
}

impl TranscodePlan {
    /// The fixed "copy everything" plan.
    pub fn passthrough() -> Self {
        Self {
            shape: PlanShape::Passthrough,
            tokens: to_tokens(&["-map", "0", "-c", "copy"]),
        }
    }

    /// Renders the encoder tokens for a shape.
    pub fn from_shape(shape: PlanShape, transcode: &TranscodeConfig) -> Self {
        if shape == PlanShape::Passthrough {
            return Self::passthrough();
        }

        let video_index = shape.converted_video_index();
        let audio_index = shape.converted_audio_index();

        let mut tokens = Vec::new();
        let mut map = |spec: &str| tokens.extend(["-map".to_string(), spec.to_string()]);

        map("0:v?");
        if video_index.is_some() {
            map("0:v:0?");
        }
        if shape.keeps_audio() {
            map("0:a?");
        }
        if audio_index.is_some() {
            map("0:a:0?");
        }
        map("0:s?");
        map("0:d?");
        map("0:t?");

        tokens.extend(to_tokens(&["-c:v", "copy"]));
        if let Some(index) = video_index {
            tokens.extend([
                format!("-c:v:{index}"),
                transcode.video_encoder.clone(),
                "-preset".to_string(),
                transcode.video_preset.clone(),
                "-crf".to_string(),
                transcode.video_crf.to_string(),
            ]);
        }

        if shape.keeps_audio() {
            tokens.extend(to_tokens(&["-c:a", "copy"]));
        } else {
            tokens.push("-an".to_string());
        }
        if let Some(index) = audio_index {
            tokens.extend([
                format!("-c:a:{index}"),
                transcode.audio_encoder.clone(),
                format!("-ac:a:{index}"),
                transcode.audio_channels.to_string(),
                format!("-b:a:{index}"),
                transcode.audio_bitrate.clone(),
            ]);
        }

        tokens.extend(to_tokens(&[
            "-c:s", "copy", "-c:d", "copy", "-c:t", "copy",
        ]));

        Self { shape, tokens }
    }

    pub fn is_passthrough(&self) -> bool {
        self.shape == PlanShape::Passthrough
    }
}

/// Derives the plan from a video and an audio probe. Pure and deterministic.
///
/// # Errors
/// - `PlanError::NoVideoTrack` - The video probe reported no track
pub fn plan(
    video: &CodecProbeResult,
    audio: &CodecProbeResult,
    transcode: &TranscodeConfig,
) -> Result<TranscodePlan, PlanError> {
    let video_status = TrackStatus::classify(video, &transcode.target_video_codec);
    let audio_status = TrackStatus::classify(audio, &transcode.target_audio_codec);
    let shape = PlanShape::classify(video_status, audio_status)?;
    Ok(TranscodePlan::from_shape(shape, transcode))
}

/// Probes the source and plans, or returns the copy plan without probing when
/// transcoding is disabled.
///
/// # Errors
/// - `PlanError::Probe` - Either probe failed
/// - `PlanError::NoVideoTrack` - The source has no video track
pub async fn plan_for_source(
    config: &HlscastConfig,
    prober: &dyn CodecProber,
    source: &StreamSource,
    transcode: bool,
) -> Result<TranscodePlan, PlanError> {
    if !transcode {
        tracing::debug!("Transcoding disabled, copying every stream");
        return Ok(TranscodePlan::passthrough());
    }

    let video = prober.probe(source, StreamType::Video).await?;
    if !video.has_tracks() {
        tracing::error!("The input doesn't have a video track");
        return Err(PlanError::NoVideoTrack);
    }
    let audio = prober.probe(source, StreamType::Audio).await?;

    let plan = plan(&video, &audio, &config.transcode)?;
    match plan.shape {
        PlanShape::Passthrough => tracing::info!("Source codecs already streamable, copying"),
        PlanShape::TranscodeAudio { .. } => {
            tracing::info!("Adding audio track: {}", config.transcode.target_audio_codec)
        }
        PlanShape::TranscodeVideo { .. } => {
            tracing::info!("Adding video track: {}", config.transcode.target_video_codec)
        }
        PlanShape::TranscodeBoth { .. } => tracing::info!(
            "Adding video track: {}, adding audio track: {}",
            config.transcode.target_video_codec,
            config.transcode.target_audio_codec
        ),
        PlanShape::TranscodeVideoDropAudio { .. } => tracing::info!(
            "Adding video track: {}, the input doesn't have an audio track",
            config.transcode.target_video_codec
        ),
    }
    tracing::debug!(tokens = ?plan.tokens, "Transcode plan ready");

    Ok(plan)
}

fn to_tokens(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProber;

    fn probe(stream_type: StreamType, codecs: &[&str]) -> CodecProbeResult {
        CodecProbeResult::new(stream_type, to_tokens(codecs))
    }

    fn video(codecs: &[&str]) -> CodecProbeResult {
        probe(StreamType::Video, codecs)
    }

    fn audio(codecs: &[&str]) -> CodecProbeResult {
        probe(StreamType::Audio, codecs)
    }

    fn plan_tokens(video: &CodecProbeResult, audio: &CodecProbeResult) -> Vec<String> {
        plan(video, audio, &TranscodeConfig::default())
            .unwrap()
            .tokens
    }

    #[test]
    fn test_matching_codecs_copy_everything() {
        let tokens = plan_tokens(&video(&["h264"]), &audio(&["aac"]));
        assert_eq!(tokens, ["-map", "0", "-c", "copy"]);
    }

    #[test]
    fn test_matching_video_without_audio_copies_everything() {
        let result = plan(&video(&["h264"]), &audio(&[]), &TranscodeConfig::default()).unwrap();
        assert!(result.is_passthrough());
    }

    #[test]
    fn test_wrong_audio_adds_aac_rendition() {
        let tokens = plan_tokens(&video(&["h264"]), &audio(&["mp3"]));
        assert_eq!(
            tokens,
            [
                "-map", "0:v?", "-map", "0:a?", "-map", "0:a:0?", "-map", "0:s?", "-map", "0:d?",
                "-map", "0:t?", "-c:v", "copy", "-c:a", "copy", "-c:a:1", "aac", "-ac:a:1", "2",
                "-b:a:1", "192k", "-c:s", "copy", "-c:d", "copy", "-c:t", "copy",
            ]
        );
    }

    #[test]
    fn test_wrong_video_adds_h264_rendition() {
        let tokens = plan_tokens(&video(&["mpeg4"]), &audio(&["aac"]));
        assert_eq!(
            tokens,
            [
                "-map", "0:v?", "-map", "0:v:0?", "-map", "0:a?", "-map", "0:s?", "-map", "0:d?",
                "-map", "0:t?", "-c:v", "copy", "-c:v:1", "libx264", "-preset", "medium", "-crf",
                "23", "-c:a", "copy", "-c:s", "copy", "-c:d", "copy", "-c:t", "copy",
            ]
        );
    }

    #[test]
    fn test_both_wrong_converts_both() {
        let tokens = plan_tokens(&video(&["hevc", "mpeg4"]), &audio(&["ac3", "dts", "mp3"]));
        assert_eq!(
            tokens,
            [
                "-map", "0:v?", "-map", "0:v:0?", "-map", "0:a?", "-map", "0:a:0?", "-map", "0:s?",
                "-map", "0:d?", "-map", "0:t?", "-c:v", "copy", "-c:v:2", "libx264", "-preset",
                "medium", "-crf", "23", "-c:a", "copy", "-c:a:3", "aac", "-ac:a:3", "2", "-b:a:3",
                "192k", "-c:s", "copy", "-c:d", "copy", "-c:t", "copy",
            ]
        );
    }

    #[test]
    fn test_wrong_video_without_audio_suppresses_audio() {
        let tokens = plan_tokens(&video(&["vp9"]), &audio(&[]));
        assert_eq!(
            tokens,
            [
                "-map", "0:v?", "-map", "0:v:0?", "-map", "0:s?", "-map", "0:d?", "-map", "0:t?",
                "-c:v", "copy", "-c:v:1", "libx264", "-preset", "medium", "-crf", "23", "-an",
                "-c:s", "copy", "-c:d", "copy", "-c:t", "copy",
            ]
        );
    }

    #[test]
    fn test_no_video_track_is_fatal_regardless_of_audio() {
        for audio_codecs in [&[][..], &["aac"][..], &["mp3"][..]] {
            let result = plan(&video(&[]), &audio(audio_codecs), &TranscodeConfig::default());
            assert!(matches!(result, Err(PlanError::NoVideoTrack)));
        }
    }

    #[test]
    fn test_one_matching_track_among_many_counts_as_match() {
        let shape = PlanShape::classify(
            TrackStatus::classify(&video(&["mpeg4", "h264"]), "h264"),
            TrackStatus::classify(&audio(&["aac"]), "aac"),
        )
        .unwrap();
        assert_eq!(shape, PlanShape::Passthrough);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let first = plan_tokens(&video(&["hevc"]), &audio(&["opus"]));
        let second = plan_tokens(&video(&["hevc"]), &audio(&["opus"]));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_disabled_transcoding_never_probes() {
        let prober = ScriptedProber::new(&["hevc"], &["mp3"]);
        let source = StreamSource::Local("/videos/sample.mkv".into());

        let result = plan_for_source(&HlscastConfig::default(), &prober, &source, false)
            .await
            .unwrap();

        assert!(result.is_passthrough());
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_source_without_video_skips_audio_probe() {
        let prober = ScriptedProber::new(&[], &["aac"]);
        let source = StreamSource::Local("/videos/radio.mp4".into());

        let result = plan_for_source(&HlscastConfig::default(), &prober, &source, true).await;

        assert!(matches!(result, Err(PlanError::NoVideoTrack)));
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn test_probe_failure_propagates() {
        let prober = ScriptedProber::failing();
        let source = StreamSource::Local("/videos/sample.mp4".into());

        let result = plan_for_source(&HlscastConfig::default(), &prober, &source, true).await;

        assert!(matches!(result, Err(PlanError::Probe(_))));
    }
}
