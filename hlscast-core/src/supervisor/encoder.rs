//! External HLS encoder process.

use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{ManagedTask, SupervisorError, TaskExit};
use crate::config::HlscastConfig;
use crate::streaming::{StreamSource, TranscodePlan};

/// Builds the full encoder argument list for one run.
///
/// Layout: input options, the plan's mapping/codec tokens, then the HLS muxer
/// options, ending with the playlist path inside `streaming_dir`.
pub fn build_encoder_args(
    config: &HlscastConfig,
    bind_address: Ipv4Addr,
    port: u16,
    streaming_dir: &Path,
    plan: &TranscodePlan,
    source: &StreamSource,
) -> Vec<String> {
    let hls = &config.hls;
    let mut args = Vec::with_capacity(plan.tokens.len() + 24);

    if hls.realtime_input {
        args.push("-re".to_string());
    }
    args.push("-i".to_string());
    args.push(source.address());
    args.extend(plan.tokens.iter().cloned());

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        hls.segment_duration_secs.to_string(),
        "-hls_list_size".to_string(),
        hls.playlist_size.to_string(),
        "-hls_flags".to_string(),
        hls.hls_flags.clone(),
        "-hls_base_url".to_string(),
        format!("http://{bind_address}:{port}/"),
        "-hls_allow_cache".to_string(),
        if hls.allow_cache { "1" } else { "0" }.to_string(),
        "-hls_segment_type".to_string(),
        hls.segment_type.clone(),
        "-loglevel".to_string(),
        hls.encoder_log_level.clone(),
        playlist_path(config, streaming_dir)
            .to_string_lossy()
            .into_owned(),
    ]);
    args
}

/// Where the encoder writes the playlist.
pub fn playlist_path(config: &HlscastConfig, streaming_dir: &Path) -> PathBuf {
    streaming_dir.join(&config.hls.playlist_name)
}

/// The encoder child process. Its diagnostics go straight to our stderr.
#[derive(Debug)]
pub struct EncoderTask {
    child: Child,
}

impl EncoderTask {
    /// Spawns the encoder with stdin and stdout detached.
    ///
    /// # Errors
    /// - `SupervisorError::BinaryNotFound` - The encoder binary does not exist
    /// - `SupervisorError::Spawn` - The OS refused to start it
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self, SupervisorError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => SupervisorError::BinaryNotFound {
                    path: program.to_path_buf(),
                },
                _ => SupervisorError::Spawn { source },
            })?;
        Ok(Self { child })
    }
}

#[async_trait]
impl ManagedTask for EncoderTask {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> io::Result<Option<TaskExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| TaskExit { code: status.code() }))
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        // Already reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid = i32::try_from(pid).map_err(|_| io::Error::other("pid out of range"))?;
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(io::Error::from(errno)),
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    async fn wait(&mut self) -> io::Result<TaskExit> {
        let status = self.child.wait().await?;
        Ok(TaskExit {
            code: status.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{PlanShape, TranscodePlan};

    fn local_source() -> StreamSource {
        StreamSource::Local(PathBuf::from("/media/sample.mp4"))
    }

    #[test]
    fn test_passthrough_args_in_order() {
        let config = HlscastConfig::default();
        let args = build_encoder_args(
            &config,
            Ipv4Addr::new(192, 168, 1, 10),
            8080,
            Path::new("/srv/hls"),
            &TranscodePlan::passthrough(),
            &local_source(),
        );

        assert_eq!(
            args,
            [
                "-re",
                "-i",
                "/media/sample.mp4",
                "-map",
                "0",
                "-c",
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
                "http://192.168.1.10:8080/",
                "-hls_allow_cache",
                "1",
                "-hls_segment_type",
                "mpegts",
                "-loglevel",
                "info",
                "/srv/hls/stream.m3u8",
            ]
        );
    }

    #[test]
    fn test_plan_tokens_sit_between_input_and_muxer() {
        let config = HlscastConfig::default();
        let plan = TranscodePlan::from_shape(
            PlanShape::TranscodeAudio { audio_tracks: 1 },
            &config.transcode,
        );
        let args = build_encoder_args(
            &config,
            Ipv4Addr::new(10, 0, 0, 2),
            9000,
            Path::new("/srv/hls"),
            &plan,
            &local_source(),
        );

        let muxer = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(&args[3..muxer], plan.tokens.as_slice());
    }

    #[test]
    fn test_realtime_flag_can_be_disabled() {
        let mut config = HlscastConfig::default();
        config.hls.realtime_input = false;
        let args = build_encoder_args(
            &config,
            Ipv4Addr::new(10, 0, 0, 2),
            9000,
            Path::new("/srv/hls"),
            &TranscodePlan::passthrough(),
            &local_source(),
        );
        assert_eq!(args[0], "-i");
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let result = EncoderTask::spawn(Path::new("/nonexistent/ffmpeg"), &[]);
        assert!(matches!(
            result,
            Err(SupervisorError::BinaryNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_stops_child() {
        let mut task =
            EncoderTask::spawn(Path::new("/bin/sh"), &["-c".into(), "exec sleep 30".into()])
                .unwrap();
        assert!(task.pid().is_some());
        assert_eq!(task.try_exit().unwrap(), None);

        task.signal_terminate().unwrap();
        let exit = task.wait().await.unwrap();

        assert_eq!(exit, TaskExit { code: None });
        // Signalling a reaped child is harmless
        task.signal_terminate().unwrap();
    }
}
