//! Mechanism seam between the supervisor and what it supervises.

use std::io;

use async_trait::async_trait;

use super::TaskExit;

/// A long-running task the supervisor can poll, signal and reap.
///
/// Implemented by the external encoder process and by the in-process file
/// server, so both share the same lifecycle handling.
#[async_trait]
pub trait ManagedTask: Send {
    /// OS process id, if the task is a child process.
    fn pid(&self) -> Option<u32>;

    /// Non-blocking check for termination.
    fn try_exit(&mut self) -> io::Result<Option<TaskExit>>;

    /// Requests graceful termination. Must tolerate an already-exited task.
    fn signal_terminate(&mut self) -> io::Result<()>;

    /// Waits for termination. Must be cancel-safe.
    async fn wait(&mut self) -> io::Result<TaskExit>;
}
