//! Lifecycle state of supervised processes and the startup health-check machine.
//!
//! A managed process moves `Starting -> Healthy -> Exited`, or straight from
//! `Starting` to `Exited` when it dies during its startup window. `Exited` is
//! terminal. The health check is a pure function of elapsed time and the latest
//! observation, so it can be driven tick by tick without real timers.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ManagedTask, SupervisorError};

/// Which of the two per-run processes this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProcessKind {
    /// In-process static HTTP server for the streaming directory
    FileServer,
    /// External HLS encoder process
    Encoder,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::FileServer => write!(f, "HTTP file server"),
            ProcessKind::Encoder => write!(f, "encoder"),
        }
    }
}

/// How a task ended. `code` is `None` when it was killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TaskExit {
    pub code: Option<i32>,
}

impl TaskExit {
    pub fn success() -> Self {
        Self { code: Some(0) }
    }

    pub fn is_success(self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for TaskExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Lifecycle state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    /// Spawned, startup health check pending
    Starting,
    /// Passed its startup health check
    Healthy,
    /// Terminated; never left once entered
    Exited(TaskExit),
}

impl ProcessState {
    pub fn is_exited(self) -> bool {
        matches!(self, ProcessState::Exited(_))
    }
}

/// What a single health-check poll saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Still running, not (yet) accepting connections
    Running,
    /// Still running and a TCP connection succeeded
    AcceptingConnections,
    /// The OS reported termination
    Exited(TaskExit),
}

/// Why a startup health check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupFailure {
    ExitedEarly(TaskExit),
    NotReachable,
}

/// Decision after one health-check poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupVerdict {
    KeepPolling,
    Healthy,
    Failed(StartupFailure),
}

/// Startup acceptance rule for a process kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthPolicy {
    /// Healthy on the first successful connection; failure once the budget runs out
    AcceptConnections,
    /// Healthy once the budget elapses without the process exiting
    SurviveWindow,
}

impl HealthPolicy {
    pub fn for_kind(kind: ProcessKind) -> Self {
        match kind {
            ProcessKind::FileServer => HealthPolicy::AcceptConnections,
            ProcessKind::Encoder => HealthPolicy::SurviveWindow,
        }
    }

    /// Evaluates one poll. Exiting during startup always fails, whatever the exit code.
    pub fn evaluate(
        self,
        elapsed: Duration,
        budget: Duration,
        observation: Observation,
    ) -> StartupVerdict {
        match (self, observation) {
            (_, Observation::Exited(exit)) => {
                StartupVerdict::Failed(StartupFailure::ExitedEarly(exit))
            }
            (HealthPolicy::AcceptConnections, Observation::AcceptingConnections) => {
                StartupVerdict::Healthy
            }
            (HealthPolicy::AcceptConnections, Observation::Running) if elapsed >= budget => {
                StartupVerdict::Failed(StartupFailure::NotReachable)
            }
            (HealthPolicy::SurviveWindow, _) if elapsed >= budget => StartupVerdict::Healthy,
            _ => StartupVerdict::KeepPolling,
        }
    }
}

/// A supervised long-running task and its lifecycle bookkeeping.
///
/// Owned exclusively by the supervisor's caller; the underlying mechanism
/// (child process or in-process task) is hidden behind [`ManagedTask`].
pub struct ManagedProcess {
    kind: ProcessKind,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    state: ProcessState,
    termination_sent: bool,
    task: Box<dyn ManagedTask>,
}

impl ManagedProcess {
    pub fn new(kind: ProcessKind, task: Box<dyn ManagedTask>) -> Self {
        Self {
            kind,
            pid: task.pid(),
            started_at: Utc::now(),
            state: ProcessState::Starting,
            termination_sent: false,
            task,
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// OS process id; `None` for in-process tasks.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether a termination signal has already been delivered.
    pub fn termination_sent(&self) -> bool {
        self.termination_sent
    }

    /// `Starting -> Healthy`. Returns false for any other transition.
    pub fn mark_healthy(&mut self) -> bool {
        if self.state == ProcessState::Starting {
            self.state = ProcessState::Healthy;
            true
        } else {
            false
        }
    }

    /// Records termination unless already recorded.
    pub fn mark_exited(&mut self, exit: TaskExit) {
        if !self.state.is_exited() {
            tracing::debug!(kind = %self.kind, %exit, "Process exited");
            self.state = ProcessState::Exited(exit);
        }
    }

    /// Non-blocking exit check, recording the exit if it happened.
    ///
    /// # Errors
    /// - `SupervisorError::Wait` - The OS status query failed
    pub fn poll_exit(&mut self) -> Result<Option<TaskExit>, SupervisorError> {
        if let ProcessState::Exited(exit) = self.state {
            return Ok(Some(exit));
        }
        let exit = self
            .task
            .try_exit()
            .map_err(|source| SupervisorError::Wait {
                kind: self.kind,
                source,
            })?;
        if let Some(exit) = exit {
            self.mark_exited(exit);
        }
        Ok(exit)
    }

    /// Delivers the graceful termination signal at most once.
    ///
    /// # Errors
    /// - `SupervisorError::Signal` - The signal could not be delivered
    pub fn send_terminate(&mut self) -> Result<(), SupervisorError> {
        if self.termination_sent || self.state.is_exited() {
            return Ok(());
        }
        self.termination_sent = true;
        self.task
            .signal_terminate()
            .map_err(|source| SupervisorError::Signal {
                kind: self.kind,
                source,
            })
    }

    /// Blocks until the task exits. Cancel-safe.
    ///
    /// # Errors
    /// - `SupervisorError::Wait` - Waiting on the task failed
    pub async fn wait(&mut self) -> Result<TaskExit, SupervisorError> {
        if let ProcessState::Exited(exit) = self.state {
            return Ok(exit);
        }
        let kind = self.kind;
        let exit = self
            .task
            .wait()
            .await
            .map_err(|source| SupervisorError::Wait { kind, source })?;
        self.mark_exited(exit);
        Ok(exit)
    }
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("started_at", &self.started_at)
            .field("state", &self.state)
            .field("termination_sent", &self.termination_sent)
            .finish_non_exhaustive()
    }
}
