//! Centralized configuration for hlscast.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase. One value is built
//! at startup and handed to every component.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Central configuration for all hlscast components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HlscastConfig {
    pub tools: ToolsConfig,
    pub supervisor: SupervisorConfig,
    pub transcode: TranscodeConfig,
    pub hls: HlsConfig,
    pub cleanup: CleanupConfig,
    pub network: NetworkConfig,
    pub validation: ValidationConfig,
}

/// External binaries and their invocation limits.
#[derive(Debug, Clone, Serialize)]
pub struct ToolsConfig {
    /// Encoder binary
    pub ffmpeg_path: PathBuf,
    /// Media inspection binary
    pub ffprobe_path: PathBuf,
    /// Upper bound on a single probe invocation
    pub probe_timeout: Duration,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            probe_timeout: Duration::from_secs(60),
        }
    }
}

/// Startup health checks and shutdown pacing.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorConfig {
    /// Budget for a managed process to become healthy
    pub startup_timeout: Duration,
    /// Delay between two health-check polls
    pub poll_interval: Duration,
    /// Timeout of a single TCP connect attempt against the file server
    pub connect_timeout: Duration,
    /// How long the file server keeps serving after the encoder exits on its own
    pub linger_after_exit: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(1),
            linger_after_exit: Duration::from_secs(10),
        }
    }
}

/// Target codecs and encoder parameters for converted tracks.
#[derive(Debug, Clone, Serialize)]
pub struct TranscodeConfig {
    /// Video codec name as reported by the prober
    pub target_video_codec: String,
    /// Audio codec name as reported by the prober
    pub target_audio_codec: String,
    /// Encoder used for the converted video track
    pub video_encoder: String,
    pub video_preset: String,
    pub video_crf: u8,
    /// Encoder used for the converted audio track
    pub audio_encoder: String,
    pub audio_bitrate: String,
    pub audio_channels: u8,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            target_video_codec: "h264".to_string(),
            target_audio_codec: "aac".to_string(),
            video_encoder: "libx264".to_string(),
            video_preset: "medium".to_string(),
            video_crf: 23,
            audio_encoder: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            audio_channels: 2, // Stereo downmix
        }
    }
}

/// HLS packaging parameters passed to the encoder.
#[derive(Debug, Clone, Serialize)]
pub struct HlsConfig {
    /// Target segment duration in seconds
    pub segment_duration_secs: u32,
    /// Number of segments kept in the sliding playlist window
    pub playlist_size: u32,
    pub hls_flags: String,
    pub allow_cache: bool,
    pub segment_type: String,
    pub encoder_log_level: String,
    /// Playlist file name inside the streaming directory
    pub playlist_name: String,
    /// Read the input at its native frame rate
    pub realtime_input: bool,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            segment_duration_secs: 10,
            playlist_size: 24,
            hls_flags: "delete_segments+independent_segments".to_string(),
            allow_cache: true,
            segment_type: "mpegts".to_string(),
            encoder_log_level: "info".to_string(),
            playlist_name: "stream.m3u8".to_string(),
            realtime_input: true,
        }
    }
}

/// Which generated files are purged from the streaming directory.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupConfig {
    /// Extensions without the leading dot, compared case-insensitively
    pub artifact_extensions: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            artifact_extensions: vec!["ts".to_string(), "m3u".to_string(), "m3u8".to_string()],
        }
    }
}

/// Network binding constraints.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkConfig {
    /// Dynamic/private port range the server may bind to
    pub port_range: RangeInclusive<u16>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port_range: 49152..=65535,
        }
    }
}

impl NetworkConfig {
    /// Checks whether the port lies in the allowed range.
    pub fn contains_port(&self, port: u16) -> bool {
        self.port_range.contains(&port)
    }
}

/// Input validation settings used by the command-line layer.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationConfig {
    /// Accepted local video extensions without the leading dot
    pub video_extensions: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            video_extensions: [
                "mp4", "mkv", "avi", "mov", "flv", "wmv", "webm", "mpeg", "mpg", "3gp", "m4v",
                "divx",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        }
    }
}

impl ValidationConfig {
    /// Checks an extension against the accepted list, ignoring case.
    pub fn is_video_extension(&self, extension: &str) -> bool {
        self.video_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension))
    }
}

impl HlscastConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("HLSCAST_FFMPEG_PATH")
            && !path.is_empty()
        {
            config.tools.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("HLSCAST_FFPROBE_PATH")
            && !path.is_empty()
        {
            config.tools.ffprobe_path = PathBuf::from(path);
        }

        if let Ok(timeout) = std::env::var("HLSCAST_PROBE_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.tools.probe_timeout = Duration::from_secs(seconds);
        }

        if let Ok(timeout) = std::env::var("HLSCAST_STARTUP_TIMEOUT")
            && let Ok(seconds) = timeout.parse::<u64>()
        {
            config.supervisor.startup_timeout = Duration::from_secs(seconds);
        }

        if let Ok(linger) = std::env::var("HLSCAST_LINGER_SECS")
            && let Ok(seconds) = linger.parse::<u64>()
        {
            config.supervisor.linger_after_exit = Duration::from_secs(seconds);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Budgets are short so failing startups resolve quickly.
    pub fn for_testing() -> Self {
        Self {
            tools: ToolsConfig {
                probe_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            supervisor: SupervisorConfig {
                startup_timeout: Duration::from_secs(2),
                poll_interval: Duration::from_millis(50),
                connect_timeout: Duration::from_millis(200),
                linger_after_exit: Duration::ZERO,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = HlscastConfig::default();

        assert_eq!(config.tools.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.tools.probe_timeout, Duration::from_secs(60));
        assert_eq!(config.supervisor.startup_timeout, Duration::from_secs(20));
        assert_eq!(config.supervisor.poll_interval, Duration::from_millis(500));
        assert_eq!(config.hls.segment_duration_secs, 10);
        assert_eq!(config.hls.playlist_size, 24);
        assert_eq!(config.hls.playlist_name, "stream.m3u8");
        assert_eq!(config.transcode.video_crf, 23);
        assert_eq!(config.transcode.audio_bitrate, "192k");
        assert_eq!(config.cleanup.artifact_extensions, ["ts", "m3u", "m3u8"]);
    }

    #[test]
    fn test_port_range_bounds() {
        let network = NetworkConfig::default();
        assert!(network.contains_port(49152));
        assert!(network.contains_port(65535));
        assert!(!network.contains_port(49151));
        assert!(!network.contains_port(8080));
    }

    #[test]
    fn test_video_extension_ignores_case() {
        let validation = ValidationConfig::default();
        assert!(validation.is_video_extension("MKV"));
        assert!(validation.is_video_extension("mp4"));
        assert!(!validation.is_video_extension("txt"));
    }

    #[test]
    fn test_testing_preset_shrinks_budgets() {
        let config = HlscastConfig::for_testing();
        assert!(config.supervisor.startup_timeout < Duration::from_secs(20));
        assert_eq!(config.supervisor.linger_after_exit, Duration::ZERO);
        assert_eq!(config.hls.playlist_size, 24);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("HLSCAST_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg");
            std::env::set_var("HLSCAST_STARTUP_TIMEOUT", "45");
            std::env::set_var("HLSCAST_PROBE_TIMEOUT", "not-a-number");
            std::env::set_var("HLSCAST_LINGER_SECS", "0");
        }

        let config = HlscastConfig::from_env();

        assert_eq!(
            config.tools.ffmpeg_path,
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
        assert_eq!(config.supervisor.startup_timeout, Duration::from_secs(45));
        assert_eq!(config.tools.probe_timeout, Duration::from_secs(60));
        assert_eq!(config.supervisor.linger_after_exit, Duration::ZERO);

        // Cleanup
        unsafe {
            std::env::remove_var("HLSCAST_FFMPEG_PATH");
            std::env::remove_var("HLSCAST_STARTUP_TIMEOUT");
            std::env::remove_var("HLSCAST_PROBE_TIMEOUT");
            std::env::remove_var("HLSCAST_LINGER_SECS");
        }
    }
}
