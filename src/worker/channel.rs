//! # Worker channel protocol.
//!
//! [`WorkerChannel::pair`] creates both ends of the protocol:
//! - the runtime keeps the [`WorkerChannel`] (sends commands, receives messages);
//! - the worker implementation keeps the [`WorkerEndpoint`].
//!
//! ## Rules
//! - Commands are processed in order; at most one unit is executed at a time.
//! - `Stop` is answered with `Stopped` and the endpoint is dropped afterwards.
//! - Dropping the endpoint without sending `Stopped` reads as a crash.
//! - Cancelling `terminate` forcibly tears the worker down (the in-process
//!   equivalent of killing the child process).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::events::{OutputStream, TestOutcome};
use crate::execution::UnitOfWork;

/// Command sent to a worker.
#[derive(Debug, Clone)]
pub enum WorkerCommand {
    /// Execute one test class.
    Execute(UnitOfWork),
    /// Finish gracefully and acknowledge with [`WorkerMessage::Stopped`].
    Stop,
}

/// Message reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// The worker began executing `test`.
    Started { test: Arc<str> },
    /// `test` wrote output.
    Output {
        test: Arc<str>,
        stream: OutputStream,
        text: Arc<str>,
    },
    /// `test` finished.
    Completed {
        test: Arc<str>,
        outcome: TestOutcome,
        failure: Option<Arc<str>>,
    },
    /// Acknowledgement of [`WorkerCommand::Stop`].
    Stopped,
}

impl WorkerMessage {
    /// Test identity the message refers to (`None` for `Stopped`).
    pub fn test(&self) -> Option<&Arc<str>> {
        match self {
            WorkerMessage::Started { test }
            | WorkerMessage::Output { test, .. }
            | WorkerMessage::Completed { test, .. } => Some(test),
            WorkerMessage::Stopped => None,
        }
    }
}

/// Runtime side of a worker.
#[derive(Debug)]
pub struct WorkerChannel {
    pub(crate) commands: mpsc::UnboundedSender<WorkerCommand>,
    pub(crate) events: mpsc::UnboundedReceiver<WorkerMessage>,
    pub(crate) terminate: CancellationToken,
}

impl WorkerChannel {
    /// Creates a connected channel/endpoint pair.
    pub fn pair() -> (WorkerChannel, WorkerEndpoint) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let terminate = CancellationToken::new();
        (
            WorkerChannel {
                commands: cmd_tx,
                events: ev_rx,
                terminate: terminate.clone(),
            },
            WorkerEndpoint {
                commands: cmd_rx,
                events: ev_tx,
                terminate,
            },
        )
    }
}

/// Worker side of the protocol.
#[derive(Debug)]
pub struct WorkerEndpoint {
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerMessage>,
    terminate: CancellationToken,
}

impl WorkerEndpoint {
    /// Waits for the next command.
    ///
    /// Returns `None` once the runtime dropped its side or terminated the worker.
    pub async fn next_command(&mut self) -> Option<WorkerCommand> {
        tokio::select! {
            biased;
            _ = self.terminate.cancelled() => None,
            cmd = self.commands.recv() => cmd,
        }
    }

    /// Token cancelled when the runtime forcibly terminates the worker.
    pub fn terminated(&self) -> CancellationToken {
        self.terminate.clone()
    }

    /// Sender for reporting messages from concurrently running code.
    pub fn reporter(&self) -> mpsc::UnboundedSender<WorkerMessage> {
        self.events.clone()
    }

    /// Reports a message; returns `false` if the runtime is no longer listening.
    pub fn send(&self, msg: WorkerMessage) -> bool {
        self.events.send(msg).is_ok()
    }

    pub fn started(&self, test: &Arc<str>) -> bool {
        self.send(WorkerMessage::Started {
            test: Arc::clone(test),
        })
    }

    pub fn completed(
        &self,
        test: &Arc<str>,
        outcome: TestOutcome,
        failure: Option<Arc<str>>,
    ) -> bool {
        self.send(WorkerMessage::Completed {
            test: Arc::clone(test),
            outcome,
            failure,
        })
    }

    /// Acknowledges a stop request and closes the worker side.
    pub fn stopped(self) {
        let _ = self.events.send(WorkerMessage::Stopped);
    }
}
