//! Hlscast Core - live HLS relay orchestration
//!
//! This crate provides the building blocks for exposing a local file or a
//! remote URL as a live HLS stream: codec probing, transcode planning,
//! supervision of the encoder process and the static file server, artifact
//! cleanup, and the orchestrator that sequences them.

pub mod cleanup;
pub mod config;
pub mod network;
pub mod orchestrator;
pub mod streaming;
pub mod supervisor;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use cleanup::{CleanupOutcome, cleanup};
pub use config::HlscastConfig;
pub use orchestrator::{Orchestrator, RunInputs, RunOutcome, RunReport};
pub use streaming::{
    CodecProbeResult, CodecProber, FfprobeProber, PlanError, PlanShape, ProbeError, StreamSource,
    StreamType, TranscodePlan,
};
pub use supervisor::{ManagedProcess, ProcessKind, ProcessState, Supervisor, SupervisorError};

/// Exit code for a run that ended without error.
pub const EXIT_OK: i32 = 0;
/// Exit code for validation, probing, planning, or startup failures.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for a run stopped by the user.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Core errors that can bubble up from any hlscast subsystem.
///
/// High-level error types representing failures that end a run.
#[derive(Debug, thiserror::Error)]
pub enum HlscastError {
    #[error("Validation error: {reason}")]
    Validation { reason: String },

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Planning error: {0}")]
    Planning(PlanError),

    #[error("Startup error: {0}")]
    Startup(#[from] SupervisorError),
}

impl From<PlanError> for HlscastError {
    fn from(error: PlanError) -> Self {
        match error {
            PlanError::Probe(probe) => HlscastError::Probe(probe),
            other => HlscastError::Planning(other),
        }
    }
}

impl HlscastError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            HlscastError::Validation { reason } => reason.clone(),
            HlscastError::Probe(e) => {
                format!("it isn't possible to check the input codecs: {e}")
            }
            HlscastError::Planning(PlanError::NoVideoTrack) => {
                "the input doesn't have a video track".to_string()
            }
            HlscastError::Planning(e) => format!("transcode planning failed: {e}"),
            HlscastError::Startup(e) => match e {
                SupervisorError::AddressInUse { addr } => format!("port already in use: {addr}"),
                SupervisorError::BinaryNotFound { path } => {
                    format!("the encoder command wasn't found: {}", path.display())
                }
                SupervisorError::ExitedDuringStartup { kind, code } => match code {
                    Some(0) => format!("{kind} stopped prematurely without any error"),
                    Some(code) => format!(
                        "{kind} stopped prematurely due to a generic error (code={code}), check the stderr traceback"
                    ),
                    None => format!("{kind} was terminated by a signal during startup"),
                },
                other => other.to_string(),
            },
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            HlscastError::Validation { .. } | HlscastError::Planning(PlanError::NoVideoTrack)
        )
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        EXIT_FAILURE
    }
}
