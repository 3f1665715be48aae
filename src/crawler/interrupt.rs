//! Cooperative interruption and final run status
//!
//! Stop requests (signals, a deadline, or an explicit call) only set a
//! cancellation token. The crawl loop checks it between nodes, so a node's
//! fetch/write/mark unit always runs to completion.

use crate::storage::RunStatus;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalStatus {
    /// No pending or retryable nodes remain
    Completed,

    /// A stop was requested while work remained
    Interrupted,

    /// A storage fault ended the run
    Aborted,
}

impl FinalStatus {
    /// Process exit code for the operational wrapper
    ///
    /// `Interrupted` uses `EX_TEMPFAIL` (75): the job is resumable.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Aborted => 1,
            Self::Interrupted => 75,
        }
    }

    /// Returns whichever of the two statuses is more severe
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    fn severity(&self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Interrupted => 1,
            Self::Aborted => 2,
        }
    }
}

impl From<FinalStatus> for RunStatus {
    fn from(status: FinalStatus) -> Self {
        match status {
            FinalStatus::Completed => RunStatus::Completed,
            FinalStatus::Interrupted => RunStatus::Interrupted,
            FinalStatus::Aborted => RunStatus::Aborted,
        }
    }
}

impl fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Aborted => "aborted",
        };
        write!(f, "{}", name)
    }
}

/// Turns signals, deadlines and explicit requests into one stop flag
#[derive(Debug, Clone, Default)]
pub struct InterruptHandler {
    token: CancellationToken,
}

impl InterruptHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token the crawl loop observes
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_stop_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Requests a stop at the next loop boundary; repeated calls have no further effect
    pub fn request_stop(&self, reason: &str) {
        if !self.token.is_cancelled() {
            tracing::info!("Stop requested ({}), finishing the current node", reason);
        }
        self.token.cancel();
    }

    /// Requests a stop on Ctrl+C or SIGTERM
    ///
    /// Must be called from within a tokio runtime.
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        let handler = self.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            let terminate = async move {
                terminate.recv().await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
                        return;
                    }
                    handler.request_stop("interrupt signal");
                }
                _ = terminate => handler.request_stop("terminate signal"),
                _ = handler.token.cancelled() => {}
            }
        });

        Ok(())
    }

    /// Requests a stop once `after` has elapsed
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm_deadline(&self, after: Duration) {
        let handler = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => handler.request_stop("deadline reached"),
                _ = handler.token.cancelled() => {}
            }
        });
    }
}
