//! Test doubles shared by unit tests and the integration test crate.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::streaming::{CodecProbeResult, CodecProber, ProbeError, StreamSource, StreamType};

/// Prober answering from fixed codec lists and counting its invocations.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    video: Vec<String>,
    audio: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new(video: &[&str], audio: &[&str]) -> Self {
        Self {
            video: video.iter().map(|codec| codec.to_string()).collect(),
            audio: audio.iter().map(|codec| codec.to_string()).collect(),
            ..Default::default()
        }
    }

    /// A prober whose every call fails as if the tool exited non-zero.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodecProber for ScriptedProber {
    async fn probe(
        &self,
        _source: &StreamSource,
        stream_type: StreamType,
    ) -> Result<CodecProbeResult, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProbeError::NonZeroExit {
                status: "exit status: 1".to_string(),
                stderr: "scripted failure".to_string(),
            });
        }

        let codecs = match stream_type {
            StreamType::Video => self.video.clone(),
            StreamType::Audio => self.audio.clone(),
        };
        Ok(CodecProbeResult::new(stream_type, codecs))
    }
}

/// Writes an executable `/bin/sh` script and returns its path.
///
/// # Panics
/// Panics if the script cannot be written or made executable.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make script executable");
    path
}

/// Fake encoder that records its arguments, writes the playlist named by its
/// last argument, then runs `tail` (for example `exec sleep 30` or `exit 3`).
///
/// Arguments are written one per line to `<dir>/encoder-args.txt`.
///
/// # Panics
/// Panics if the script cannot be written.
#[cfg(unix)]
pub fn write_fake_encoder(dir: &Path, tail: &str) -> PathBuf {
    let args_file = dir.join(FAKE_ENCODER_ARGS);
    let body = format!(
        r#"for arg in "$@"; do printf '%s\n' "$arg"; done > '{args}'
for last in "$@"; do :; done
printf '#EXTM3U\n#EXT-X-VERSION:3\n' > "$last"
{tail}"#,
        args = args_file.display(),
    );
    write_script(dir, "fake-ffmpeg", &body)
}

/// File the fake encoder records its arguments into.
pub const FAKE_ENCODER_ARGS: &str = "encoder-args.txt";

/// Reads the arguments recorded by [`write_fake_encoder`].
///
/// # Panics
/// Panics if the fake encoder never ran.
pub fn recorded_encoder_args(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join(FAKE_ENCODER_ARGS))
        .expect("fake encoder recorded its arguments")
        .lines()
        .map(str::to_string)
        .collect()
}
