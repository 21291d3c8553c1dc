//! # Termination signals for [`Orchestrator::execute`](crate::Orchestrator::execute).
//!
//! [`wait_for_shutdown_signal`] resolves with the [`ShutdownSignal`] that ended
//! the wait; the run it guards is then cancelled with `CancelReason::Signal`.
//!
//! | Platform | Signals                        |
//! |----------|--------------------------------|
//! | unix     | `SIGINT`, `SIGTERM`, `SIGQUIT` |
//! | other    | Ctrl-C                         |

use std::fmt;

/// Signal that interrupted a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownSignal {
    Interrupt,
    #[cfg_attr(not(unix), allow(dead_code))]
    Terminate,
    #[cfg_attr(not(unix), allow(dead_code))]
    Quit,
}

impl ShutdownSignal {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Waits for the first termination signal.
///
/// Listeners are registered per call; registration failure is returned as `Err`.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let received = tokio::select! {
        _ = sigint.recv() => ShutdownSignal::Interrupt,
        _ = sigterm.recv() => ShutdownSignal::Terminate,
        _ = sigquit.recv() => ShutdownSignal::Quit,
    };
    Ok(received)
}

#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.as_str(), "SIGTERM");
        assert_eq!(ShutdownSignal::Quit.as_str(), "SIGQUIT");
    }
}
