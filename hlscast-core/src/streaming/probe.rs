//! Codec probing through the external media inspection tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use super::StreamSource;
use crate::config::ToolsConfig;

/// Kind of elementary stream a probe is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StreamType {
    Video,
    Audio,
}

impl StreamType {
    /// Stream selector understood by ffprobe's `-select_streams`.
    pub fn selector(self) -> &'static str {
        match self {
            StreamType::Video => "v",
            StreamType::Audio => "a",
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamType::Video => write!(f, "video"),
            StreamType::Audio => write!(f, "audio"),
        }
    }
}

/// Codecs reported for one stream type. Produced fresh per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodecProbeResult {
    pub stream_type: StreamType,
    /// Lowercase codec names in the order the tool reported them
    pub codecs: Vec<String>,
}

impl CodecProbeResult {
    pub fn new(stream_type: StreamType, codecs: Vec<String>) -> Self {
        Self {
            stream_type,
            codecs,
        }
    }

    /// Number of tracks of this type present in the source.
    pub fn track_count(&self) -> usize {
        self.codecs.len()
    }

    pub fn has_tracks(&self) -> bool {
        !self.codecs.is_empty()
    }

    /// Checks whether any track already uses `codec`, ignoring case.
    pub fn contains(&self, codec: &str) -> bool {
        self.codecs
            .iter()
            .any(|present| present.eq_ignore_ascii_case(codec))
    }
}

/// Errors raised while probing. All of them are fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe tool not found at {path}")]
    ToolNotFound { path: PathBuf },

    #[error("failed to start probe tool: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("probe tool exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },

    #[error("probe timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("I/O error while probing: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstraction over codec inspection so planning can run against real or scripted probes.
#[async_trait]
pub trait CodecProber: Send + Sync {
    /// Reports the codecs of every `stream_type` track in `source`.
    ///
    /// # Errors
    /// - `ProbeError::ToolNotFound` - Inspection binary missing
    /// - `ProbeError::NonZeroExit` - Tool could not read the source
    /// - `ProbeError::Timeout` - Tool did not answer within the configured budget
    async fn probe(
        &self,
        source: &StreamSource,
        stream_type: StreamType,
    ) -> Result<CodecProbeResult, ProbeError>;
}

/// Production prober backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            timeout,
        }
    }

    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self::new(tools.ffprobe_path.clone(), tools.probe_timeout)
    }

    /// Argument list for one probe, without the binary itself.
    pub fn probe_args(source: &StreamSource, stream_type: StreamType) -> Vec<String> {
        vec![
            "-v".to_string(),
            "quiet".to_string(),
            "-select_streams".to_string(),
            stream_type.selector().to_string(),
            "-show_entries".to_string(),
            "stream=codec_name".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            source.address(),
        ]
    }
}

#[async_trait]
impl CodecProber for FfprobeProber {
    async fn probe(
        &self,
        source: &StreamSource,
        stream_type: StreamType,
    ) -> Result<CodecProbeResult, ProbeError> {
        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.args(Self::probe_args(source, stream_type))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(?cmd, "Probing {} codecs", stream_type);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProbeError::ToolNotFound {
                    path: self.ffprobe_path.clone(),
                }
            } else {
                ProbeError::Spawn { source: e }
            }
        })?;

        // Dropping the pending future kills the child through kill_on_drop.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout {
                seconds: self.timeout.as_secs(),
            })??;

        if !output.status.success() {
            return Err(ProbeError::NonZeroExit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let codecs = parse_probe_output(&String::from_utf8_lossy(&output.stdout));
        tracing::info!(
            stream_type = %stream_type,
            tracks = codecs.len(),
            codecs = ?codecs,
            "Probed source codecs"
        );

        Ok(CodecProbeResult::new(stream_type, codecs))
    }
}

/// Splits ffprobe's bare output into lowercase codec names, skipping blank lines.
pub fn parse_probe_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_output() {
        assert_eq!(parse_probe_output("H264\nhevc\n"), ["h264", "hevc"]);
        assert_eq!(parse_probe_output("  aac \r\n\n"), ["aac"]);
        assert!(parse_probe_output("").is_empty());
        assert!(parse_probe_output("\n\n").is_empty());
    }

    #[test]
    fn test_probe_result_matching() {
        let result = CodecProbeResult::new(
            StreamType::Audio,
            vec!["mp3".to_string(), "aac".to_string()],
        );
        assert_eq!(result.track_count(), 2);
        assert!(result.contains("AAC"));
        assert!(!result.contains("opus"));

        let empty = CodecProbeResult::new(StreamType::Audio, Vec::new());
        assert!(!empty.has_tracks());
    }

    #[test]
    fn test_probe_args_select_first_stream_type() {
        let source = StreamSource::Local(PathBuf::from("/videos/sample.mp4"));
        let args = FfprobeProber::probe_args(&source, StreamType::Video);
        assert_eq!(args[3], "v");
        assert_eq!(args[5], "stream=codec_name");
        assert_eq!(args.last().map(String::as_str), Some("/videos/sample.mp4"));
    }

    #[tokio::test]
    async fn test_missing_probe_binary() {
        let prober = FfprobeProber::new("/nonexistent/ffprobe-binary", Duration::from_secs(1));
        let source = StreamSource::Local(PathBuf::from("/videos/sample.mp4"));

        let result = prober.probe(&source, StreamType::Video).await;
        assert!(matches!(result, Err(ProbeError::ToolNotFound { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_parses_tool_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let tool = crate::testing::write_script(
            dir.path(),
            "fake-ffprobe",
            "printf 'H264\\nmpeg4\\n'",
        );

        let prober = FfprobeProber::new(tool, Duration::from_secs(5));
        let source = StreamSource::Local(PathBuf::from("/videos/sample.mp4"));
        let result = prober.probe(&source, StreamType::Video).await.unwrap();

        assert_eq!(result.codecs, ["h264", "mpeg4"]);
        assert_eq!(result.stream_type, StreamType::Video);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_non_zero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = crate::testing::write_script(dir.path(), "fake-ffprobe", "exit 1");

        let prober = FfprobeProber::new(tool, Duration::from_secs(5));
        let source = StreamSource::Local(PathBuf::from("/videos/missing.mp4"));
        let result = prober.probe(&source, StreamType::Audio).await;

        assert!(matches!(result, Err(ProbeError::NonZeroExit { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let tool = crate::testing::write_script(dir.path(), "fake-ffprobe", "sleep 5");

        let prober = FfprobeProber::new(tool, Duration::from_millis(200));
        let source = StreamSource::Local(PathBuf::from("/videos/sample.mp4"));
        let result = prober.probe(&source, StreamType::Video).await;

        assert!(matches!(result, Err(ProbeError::Timeout { .. })));
    }
}
