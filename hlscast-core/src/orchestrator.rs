//! Sequencing of a relay run: plan, start, serve, tear down.

use std::future::Future;
use std::net::Ipv4Addr;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info};

use crate::cleanup::{CleanupOutcome, cleanup};
use crate::config::HlscastConfig;
use crate::streaming::{CodecProber, StreamSource, plan_for_source};
use crate::supervisor::{ManagedProcess, Supervisor, TaskExit};
use crate::{EXIT_INTERRUPTED, EXIT_OK, HlscastError};

/// Already-validated parameters of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunInputs {
    /// Private address both the file server and segment URLs use
    pub bind_address: Ipv4Addr,
    pub port: u16,
    /// Absolute, existing directory for the playlist and segments
    pub streaming_dir: PathBuf,
    pub transcode: bool,
    pub source: StreamSource,
}

/// How a run that got past startup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
    /// The encoder exited on its own
    Completed(TaskExit),
    /// The shutdown signal arrived first
    Interrupted,
}

/// Final result of a run, after teardown.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: Result<RunOutcome, HlscastError>,
    pub cleanup: CleanupOutcome,
}

impl RunReport {
    /// 0 when the encoder finished, 130 on interrupt, 1 on any failure.
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Ok(RunOutcome::Completed(_)) => EXIT_OK,
            Ok(RunOutcome::Interrupted) => EXIT_INTERRUPTED,
            Err(e) => e.exit_code(),
        }
    }
}

/// Processes started so far in the current run.
#[derive(Debug, Default)]
struct RunProcesses {
    file_server: Option<ManagedProcess>,
    encoder: Option<ManagedProcess>,
}

/// URL players open for a run.
pub fn stream_url(bind_address: Ipv4Addr, port: u16, playlist_name: &str) -> String {
    format!("http://{bind_address}:{port}/{playlist_name}")
}

/// Drives a single relay run and guarantees teardown on every exit path.
pub struct Orchestrator {
    config: Arc<HlscastConfig>,
    prober: Arc<dyn CodecProber>,
    supervisor: Supervisor,
}

impl Orchestrator {
    pub fn new(config: Arc<HlscastConfig>, prober: Arc<dyn CodecProber>) -> Self {
        let supervisor = Supervisor::new(Arc::clone(&config));
        Self {
            config,
            prober,
            supervisor,
        }
    }

    /// Runs until the encoder exits or `shutdown` resolves, then tears down.
    ///
    /// Teardown stops the encoder, then the file server, then removes stream
    /// artifacts. It also runs when the run panics; the panic is resumed
    /// afterwards.
    pub async fn run<F>(&self, inputs: RunInputs, shutdown: F) -> RunReport
    where
        F: Future<Output = ()> + Send,
    {
        let mut processes = RunProcesses::default();

        let body = AssertUnwindSafe(self.drive(&inputs, &mut processes, shutdown))
            .catch_unwind()
            .await;
        let cleanup = self.teardown(&inputs, &mut processes).await;

        match body {
            Ok(outcome) => {
                if let Err(e) = &outcome {
                    error!("Run failed: {}", e);
                }
                RunReport { outcome, cleanup }
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn drive<F>(
        &self,
        inputs: &RunInputs,
        processes: &mut RunProcesses,
        shutdown: F,
    ) -> Result<RunOutcome, HlscastError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::select! {
            outcome = self.serve(inputs, processes) => outcome,
            () = shutdown => {
                println!("\nInterrupted. Closing the current processes...");
                Ok(RunOutcome::Interrupted)
            }
        }
    }

    async fn serve(
        &self,
        inputs: &RunInputs,
        processes: &mut RunProcesses,
    ) -> Result<RunOutcome, HlscastError> {
        let plan = plan_for_source(
            &self.config,
            self.prober.as_ref(),
            &inputs.source,
            inputs.transcode,
        )
        .await?;

        // Each process is recorded before its startup check so an interrupt
        // during the check still reaches teardown's stop.
        let (file_server, server_addr) = self
            .supervisor
            .spawn_file_server(inputs.bind_address, inputs.port, &inputs.streaming_dir)
            .await?;
        let file_server = processes.file_server.insert(file_server);
        self.supervisor
            .check_startup(file_server, Some(server_addr))
            .await?;

        let encoder = self.supervisor.spawn_encoder(
            inputs.bind_address,
            inputs.port,
            &inputs.streaming_dir,
            &plan,
            &inputs.source,
        )?;
        let encoder = processes.encoder.insert(encoder);
        self.supervisor.check_startup(encoder, None).await?;

        println!("\nHLS relay successfully started!");
        println!(
            "Open this URL in a player like VLC: {}",
            stream_url(inputs.bind_address, inputs.port, &self.config.hls.playlist_name)
        );
        println!(
            "Press Ctrl+C to stop the streaming and clean the stream files in the streaming directory.\n"
        );

        let exit = encoder.wait().await?;
        info!("Encoder finished ({})", exit);

        // Players still fetching the tail of the playlist get a grace period
        let linger = self.config.supervisor.linger_after_exit;
        if !linger.is_zero() {
            info!("Serving remaining segments for {}s", linger.as_secs());
            sleep(linger).await;
        }

        Ok(RunOutcome::Completed(exit))
    }

    async fn teardown(&self, inputs: &RunInputs, processes: &mut RunProcesses) -> CleanupOutcome {
        let RunProcesses {
            file_server,
            encoder,
        } = processes;

        for process in [encoder.as_mut(), file_server.as_mut()].into_iter().flatten() {
            if let Err(e) = self.supervisor.stop(process).await {
                error!("Failed to stop {}: {}", process.kind(), e);
            }
        }

        let outcome = cleanup(&inputs.streaming_dir, &self.config.cleanup);
        if !outcome.is_success() {
            println!(
                "Delete manually the stream files in the streaming directory: {}",
                inputs.streaming_dir.display()
            );
        }
        outcome
    }
}
