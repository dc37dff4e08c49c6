//! Process supervision for the encoder and the static file server.
//!
//! Both are started, health-checked within a bounded budget, and stopped
//! through the same lifecycle, regardless of whether they run as a child
//! process or an in-process task.

pub mod encoder;
pub mod file_server;
pub mod state;
pub mod task;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use encoder::{EncoderTask, build_encoder_args, playlist_path};
pub use file_server::{FileServerTask, file_server_router};
pub use state::{
    HealthPolicy, ManagedProcess, Observation, ProcessKind, ProcessState, StartupFailure,
    StartupVerdict, TaskExit,
};
pub use task::ManagedTask;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::HlscastConfig;
use crate::streaming::{StreamSource, TranscodePlan};

/// Errors from starting, observing, or stopping a managed process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Address already in use: {addr}")]
    AddressInUse { addr: SocketAddr },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} not reachable after {waited_secs}s")]
    NotReachable { kind: ProcessKind, waited_secs: u64 },

    #[error("Binary not found: {path}")]
    BinaryNotFound { path: PathBuf },

    #[error("Failed to spawn process: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} exited during startup with code {code:?}")]
    ExitedDuringStartup {
        kind: ProcessKind,
        code: Option<i32>,
    },

    #[error("Failed to wait for {kind}: {source}")]
    Wait {
        kind: ProcessKind,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal {kind}: {source}")]
    Signal {
        kind: ProcessKind,
        #[source]
        source: std::io::Error,
    },
}

/// Starts, health-checks and stops the per-run processes.
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: Arc<HlscastConfig>,
}

impl Supervisor {
    pub fn new(config: Arc<HlscastConfig>) -> Self {
        Self { config }
    }

    /// Binds the file server for `root_dir` on `bind_address:port`.
    ///
    /// The returned process is still `Starting`; the address is the one
    /// [`Supervisor::check_startup`] connects to.
    ///
    /// # Errors
    /// - `SupervisorError::AddressInUse` - The port is taken; nothing was started
    /// - `SupervisorError::Bind` - Any other bind failure
    pub async fn spawn_file_server(
        &self,
        bind_address: Ipv4Addr,
        port: u16,
        root_dir: &Path,
    ) -> Result<(ManagedProcess, SocketAddr), SupervisorError> {
        let task = FileServerTask::bind(SocketAddrV4::new(bind_address, port), root_dir).await?;
        let local_addr = task.local_addr();
        info!(
            "HTTP file server starting on {} for {}",
            local_addr,
            root_dir.display()
        );

        let process = ManagedProcess::new(ProcessKind::FileServer, Box::new(task));
        Ok((process, local_addr))
    }

    /// Serves `root_dir` on `bind_address:port` and waits until it accepts connections.
    ///
    /// # Errors
    /// - `SupervisorError::AddressInUse` - The port is taken; nothing was started
    /// - `SupervisorError::NotReachable` - No connection succeeded within the budget
    /// - `SupervisorError::ExitedDuringStartup` - The server stopped on its own
    pub async fn start_file_server(
        &self,
        bind_address: Ipv4Addr,
        port: u16,
        root_dir: &Path,
    ) -> Result<ManagedProcess, SupervisorError> {
        let (mut process, local_addr) = self
            .spawn_file_server(bind_address, port, root_dir)
            .await?;
        self.check_startup(&mut process, Some(local_addr)).await?;
        Ok(process)
    }

    /// Spawns the encoder for `source` with `plan`. The process is still `Starting`.
    ///
    /// # Errors
    /// - `SupervisorError::BinaryNotFound` - The encoder binary is missing
    /// - `SupervisorError::Spawn` - The OS refused to start it
    pub fn spawn_encoder(
        &self,
        bind_address: Ipv4Addr,
        port: u16,
        root_dir: &Path,
        plan: &TranscodePlan,
        source: &StreamSource,
    ) -> Result<ManagedProcess, SupervisorError> {
        let args = build_encoder_args(&self.config, bind_address, port, root_dir, plan, source);
        let program = &self.config.tools.ffmpeg_path;
        debug!("Encoder command: {} {}", program.display(), args.join(" "));

        let task = EncoderTask::spawn(program, &args)?;
        let process = ManagedProcess::new(ProcessKind::Encoder, Box::new(task));
        match process.pid() {
            Some(pid) => info!("Encoder process starts with PID {}", pid),
            None => info!("Encoder process starts"),
        }
        Ok(process)
    }

    /// Spawns the encoder for `source` with `plan` and waits out the startup window.
    ///
    /// # Errors
    /// - `SupervisorError::BinaryNotFound` - The encoder binary is missing
    /// - `SupervisorError::Spawn` - The OS refused to start it
    /// - `SupervisorError::ExitedDuringStartup` - It exited before the window elapsed
    pub async fn start_encoder(
        &self,
        bind_address: Ipv4Addr,
        port: u16,
        root_dir: &Path,
        plan: &TranscodePlan,
        source: &StreamSource,
    ) -> Result<ManagedProcess, SupervisorError> {
        let mut process = self.spawn_encoder(bind_address, port, root_dir, plan, source)?;
        self.check_startup(&mut process, None).await?;
        Ok(process)
    }

    /// Runs the startup check for `process` and stops it if the check fails.
    ///
    /// The caller keeps ownership throughout, so a check abandoned midway
    /// leaves a `Starting` process that [`Supervisor::stop`] still handles.
    pub async fn check_startup(
        &self,
        process: &mut ManagedProcess,
        probe_addr: Option<SocketAddr>,
    ) -> Result<(), SupervisorError> {
        let policy = HealthPolicy::for_kind(process.kind());
        let Err(e) = self.await_startup(process, policy, probe_addr).await else {
            return Ok(());
        };
        if let Err(stop_error) = self.stop(process).await {
            warn!(
                "Failed to stop {} after a failed startup: {}",
                process.kind(),
                stop_error
            );
        }
        Err(e)
    }

    /// Polls `process` until `policy` declares it healthy or failed.
    ///
    /// With a `probe_addr`, each poll also tries a TCP connection to it.
    pub async fn await_startup(
        &self,
        process: &mut ManagedProcess,
        policy: HealthPolicy,
        probe_addr: Option<SocketAddr>,
    ) -> Result<(), SupervisorError> {
        let budget = self.config.supervisor.startup_timeout;
        let started = Instant::now();
        let kind = process.kind();

        loop {
            let observation = match process.poll_exit()? {
                Some(exit) => Observation::Exited(exit),
                None => match probe_addr {
                    Some(addr) if self.accepts_connections(addr).await => {
                        Observation::AcceptingConnections
                    }
                    _ => Observation::Running,
                },
            };

            match policy.evaluate(started.elapsed(), budget, observation) {
                StartupVerdict::KeepPolling => sleep(self.config.supervisor.poll_interval).await,
                StartupVerdict::Healthy => {
                    process.mark_healthy();
                    info!("{} is healthy", kind);
                    return Ok(());
                }
                StartupVerdict::Failed(StartupFailure::ExitedEarly(exit)) => {
                    warn!("{} stopped during startup ({})", kind, exit);
                    return Err(SupervisorError::ExitedDuringStartup {
                        kind,
                        code: exit.code,
                    });
                }
                StartupVerdict::Failed(StartupFailure::NotReachable) => {
                    warn!("{} did not accept connections in time", kind);
                    return Err(SupervisorError::NotReachable {
                        kind,
                        waited_secs: budget.as_secs(),
                    });
                }
            }
        }
    }

    async fn accepts_connections(&self, addr: SocketAddr) -> bool {
        let connect_timeout: Duration = self.config.supervisor.connect_timeout;
        matches!(
            timeout(connect_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    /// Stops `process` gracefully. Idempotent: an exited process is left alone
    /// and no process is ever signalled twice.
    ///
    /// # Errors
    /// - `SupervisorError::Signal` - The termination signal could not be delivered
    /// - `SupervisorError::Wait` - Waiting for termination failed
    pub async fn stop(&self, process: &mut ManagedProcess) -> Result<(), SupervisorError> {
        let kind = process.kind();
        if let Some(exit) = process.poll_exit()? {
            info!("{} was no longer active ({})", kind, exit);
            return Ok(());
        }

        if process.termination_sent() {
            debug!("{} already signalled, waiting for it", kind);
        } else {
            info!("{} termination...", kind);
            process.send_terminate()?;
        }

        let exit = process.wait().await?;
        info!("{} terminated ({})", kind, exit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tempfile::tempdir;

    use super::task::tests::FakeTask;
    use super::*;

    fn supervisor() -> Supervisor {
        Supervisor::new(Arc::new(HlscastConfig::for_testing()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_encoder_healthy_after_surviving_budget() {
        let supervisor = supervisor();
        let mut process = ManagedProcess::new(ProcessKind::Encoder, Box::new(FakeTask::running()));
        let started = Instant::now();

        supervisor
            .await_startup(&mut process, HealthPolicy::SurviveWindow, None)
            .await
            .unwrap();

        assert_eq!(process.state(), ProcessState::Healthy);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_exit_reports_code_without_signalling() {
        let supervisor = supervisor();
        let task = FakeTask::exiting_after(Duration::from_millis(300), TaskExit { code: Some(3) });
        let signals = task.signal_counter();
        let mut process = ManagedProcess::new(ProcessKind::Encoder, Box::new(task));

        let error = supervisor
            .check_startup(&mut process, None)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            SupervisorError::ExitedDuringStartup {
                kind: ProcessKind::Encoder,
                code: Some(3)
            }
        ));
        assert_eq!(signals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_exit_during_startup_is_still_a_failure() {
        let supervisor = supervisor();
        let task = FakeTask::exiting_after(Duration::from_millis(100), TaskExit::success());
        let mut process = ManagedProcess::new(ProcessKind::Encoder, Box::new(task));

        let error = supervisor
            .check_startup(&mut process, None)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            SupervisorError::ExitedDuringStartup { code: Some(0), .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_server_is_stopped() {
        let supervisor = supervisor();
        let task = FakeTask::running();
        let signals = task.signal_counter();
        let mut process = ManagedProcess::new(ProcessKind::FileServer, Box::new(task));

        let error = supervisor
            .check_startup(&mut process, None)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            SupervisorError::NotReachable {
                kind: ProcessKind::FileServer,
                ..
            }
        ));
        assert_eq!(signals.load(Ordering::SeqCst), 1);
        assert!(process.state().is_exited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_startup_check_leaves_process_stoppable() {
        let supervisor = supervisor();
        let task = FakeTask::running();
        let signals = task.signal_counter();
        let mut process = ManagedProcess::new(ProcessKind::Encoder, Box::new(task));

        let check = supervisor.check_startup(&mut process, None);
        assert!(timeout(Duration::from_millis(500), check).await.is_err());
        assert_eq!(process.state(), ProcessState::Starting);
        assert_eq!(signals.load(Ordering::SeqCst), 0);

        supervisor.stop(&mut process).await.unwrap();

        assert_eq!(signals.load(Ordering::SeqCst), 1);
        assert!(process.state().is_exited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let supervisor = supervisor();
        let task = FakeTask::running();
        let signals = task.signal_counter();
        let mut process = ManagedProcess::new(ProcessKind::Encoder, Box::new(task));

        supervisor.stop(&mut process).await.unwrap();
        supervisor.stop(&mut process).await.unwrap();

        assert_eq!(process.state(), ProcessState::Exited(TaskExit { code: None }));
        assert_eq!(signals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_natural_exit_sends_nothing() {
        let supervisor = supervisor();
        let task = FakeTask::exiting_after(Duration::from_secs(1), TaskExit::success());
        let signals = task.signal_counter();
        let mut process = ManagedProcess::new(ProcessKind::Encoder, Box::new(task));

        assert_eq!(process.wait().await.unwrap(), TaskExit::success());
        supervisor.stop(&mut process).await.unwrap();

        assert_eq!(signals.load(Ordering::SeqCst), 0);
        assert_eq!(process.state(), ProcessState::Exited(TaskExit::success()));
    }

    #[tokio::test]
    async fn test_file_server_healthy_and_serving() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("stream.m3u8"), "#EXTM3U\n").unwrap();
        let supervisor = supervisor();

        let mut server = supervisor
            .start_file_server(Ipv4Addr::LOCALHOST, 0, dir.path())
            .await
            .unwrap();

        assert_eq!(server.state(), ProcessState::Healthy);
        assert_eq!(server.pid(), None);

        supervisor.stop(&mut server).await.unwrap();
        assert!(server.state().is_exited());
    }

    #[tokio::test]
    async fn test_file_server_port_conflict_starts_nothing() {
        let dir = tempdir().unwrap();
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let error = supervisor()
            .start_file_server(Ipv4Addr::LOCALHOST, port, dir.path())
            .await
            .unwrap_err();

        assert!(matches!(error, SupervisorError::AddressInUse { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fake_encoder_lifecycle() {
        use crate::testing::{recorded_encoder_args, write_fake_encoder};

        let dir = tempdir().unwrap();
        let mut config = HlscastConfig::for_testing();
        config.supervisor.startup_timeout = Duration::from_millis(500);
        config.tools.ffmpeg_path = write_fake_encoder(dir.path(), "exec sleep 30");
        let supervisor = Supervisor::new(Arc::new(config));
        let source = StreamSource::Local(PathBuf::from("/videos/sample.mp4"));

        let mut encoder = supervisor
            .start_encoder(
                Ipv4Addr::new(192, 168, 1, 10),
                50000,
                dir.path(),
                &TranscodePlan::passthrough(),
                &source,
            )
            .await
            .unwrap();

        assert_eq!(encoder.state(), ProcessState::Healthy);
        assert!(encoder.pid().is_some());
        assert!(dir.path().join("stream.m3u8").exists());
        let args = recorded_encoder_args(dir.path());
        assert_eq!(args[..3], ["-re", "-i", "/videos/sample.mp4"]);

        supervisor.stop(&mut encoder).await.unwrap();
        assert!(encoder.termination_sent());
        assert_eq!(encoder.state(), ProcessState::Exited(TaskExit { code: None }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_encoder_reports_exit_code() {
        use crate::testing::write_fake_encoder;

        let dir = tempdir().unwrap();
        let mut config = HlscastConfig::for_testing();
        config.tools.ffmpeg_path = write_fake_encoder(dir.path(), "exit 3");
        let supervisor = Supervisor::new(Arc::new(config));
        let source = StreamSource::Local(PathBuf::from("/videos/sample.mp4"));

        let error = supervisor
            .start_encoder(
                Ipv4Addr::LOCALHOST,
                50000,
                dir.path(),
                &TranscodePlan::passthrough(),
                &source,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            SupervisorError::ExitedDuringStartup {
                kind: ProcessKind::Encoder,
                code: Some(3)
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_encoder_binary() {
        let mut config = HlscastConfig::for_testing();
        config.tools.ffmpeg_path = PathBuf::from("/nonexistent/hlscast-ffmpeg");
        let supervisor = Supervisor::new(Arc::new(config));
        let source = StreamSource::Local(PathBuf::from("/videos/sample.mp4"));

        let error = supervisor
            .start_encoder(
                Ipv4Addr::LOCALHOST,
                50000,
                Path::new("/tmp"),
                &TranscodePlan::passthrough(),
                &source,
            )
            .await
            .unwrap_err();

        assert!(matches!(error, SupervisorError::BinaryNotFound { .. }));
    }
}
