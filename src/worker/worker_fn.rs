//! # Function-backed worker factory (`WorkerFn`)
//!
//! [`WorkerFn`] wraps a closure `F: Fn(ClassContext) -> Fut` and turns it into an
//! in-process [`WorkerFactory`]: every spawned "worker" is a tokio task that
//! serves the channel protocol and calls the closure once per test class.
//!
//! ## Concurrency semantics
//! - Each worker executes one class at a time; each call creates a **new** future.
//! - Cancelling the worker's `terminate` token drops the running future and the
//!   endpoint without `Stopped`, so the runtime observes a crash.
//! - Shared state across workers must be explicit (`Arc<...>` captured by the closure).
//!
//! ## Example
//! ```rust
//! use testvisor::{ClassContext, ClassFailure, WorkerFn, WorkerRef};
//!
//! let factory: WorkerRef = WorkerFn::arc("in-process", |ctx: ClassContext| async move {
//!     ctx.stdout(format!("running {}", ctx.class_name()));
//!     if ctx.class_name().ends_with("BrokenTest") {
//!         return Err(ClassFailure::new("assertion failed"));
//!     }
//!     Ok(())
//! });
//!
//! assert_eq!(factory.name(), "in-process");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::WorkerId;
use super::channel::{WorkerChannel, WorkerCommand, WorkerEndpoint, WorkerMessage};
use super::factory::{WorkerFactory, WorkerLaunch};
use crate::error::WorkerError;
use crate::events::{OutputStream, TestOutcome};
use crate::execution::UnitOfWork;

/// Why a class did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFailure {
    outcome: TestOutcome,
    message: Arc<str>,
}

impl ClassFailure {
    /// The class ran and failed.
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            outcome: TestOutcome::Failed,
            message: message.into(),
        }
    }

    /// The class was not run.
    pub fn skipped(reason: impl Into<Arc<str>>) -> Self {
        Self {
            outcome: TestOutcome::Skipped,
            message: reason.into(),
        }
    }
}

/// Per-class context handed to the closure.
#[derive(Debug, Clone)]
pub struct ClassContext {
    unit: UnitOfWork,
    worker: WorkerId,
    events: mpsc::UnboundedSender<WorkerMessage>,
}

impl ClassContext {
    pub fn class_name(&self) -> &str {
        &self.unit.class_name
    }

    pub fn unit(&self) -> &UnitOfWork {
        &self.unit
    }

    /// Worker executing this class.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn stdout(&self, text: impl Into<Arc<str>>) {
        self.output(OutputStream::Stdout, text.into());
    }

    pub fn stderr(&self, text: impl Into<Arc<str>>) {
        self.output(OutputStream::Stderr, text.into());
    }

    fn output(&self, stream: OutputStream, text: Arc<str>) {
        let _ = self.events.send(WorkerMessage::Output {
            test: Arc::clone(&self.unit.class_name),
            stream,
            text,
        });
    }
}

/// Function-backed worker factory.
#[derive(Debug)]
pub struct WorkerFn<F> {
    name: Cow<'static, str>,
    f: Arc<F>,
}

impl<F> WorkerFn<F> {
    /// Creates a new function-backed factory.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    /// Creates the factory and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> WorkerFactory for WorkerFn<F>
where
    F: Fn(ClassContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ClassFailure>> + Send + 'static,
{
    async fn spawn(&self, launch: WorkerLaunch) -> Result<WorkerChannel, WorkerError> {
        let (channel, endpoint) = WorkerChannel::pair();
        tokio::spawn(serve(endpoint, launch.worker, Arc::clone(&self.f)));
        Ok(channel)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

async fn serve<F, Fut>(mut endpoint: WorkerEndpoint, worker: WorkerId, f: Arc<F>)
where
    F: Fn(ClassContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ClassFailure>> + Send + 'static,
{
    let terminate = endpoint.terminated();
    while let Some(cmd) = endpoint.next_command().await {
        let unit = match cmd {
            WorkerCommand::Execute(unit) => unit,
            WorkerCommand::Stop => {
                endpoint.stopped();
                return;
            }
        };

        let test = Arc::clone(&unit.class_name);
        endpoint.started(&test);
        let ctx = ClassContext {
            unit,
            worker,
            events: endpoint.reporter(),
        };

        let res = tokio::select! {
            res = f(ctx) => res,
            _ = terminate.cancelled() => return,
        };
        match res {
            Ok(()) => endpoint.completed(&test, TestOutcome::Passed, None),
            Err(fail) => endpoint.completed(&test, fail.outcome, Some(fail.message)),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{LaunchOptions, RunId};

    fn launch() -> WorkerLaunch {
        WorkerLaunch {
            worker: WorkerId::from_raw(1),
            run: RunId::from("r"),
            options: Arc::new(LaunchOptions::default()),
            classpath: Arc::from(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_serves_units_then_acknowledges_stop() {
        let factory = WorkerFn::arc("fn", |ctx: ClassContext| async move {
            ctx.stdout("hello");
            if ctx.class_name() == "a.Bad" {
                Err(ClassFailure::new("boom"))
            } else {
                Ok(())
            }
        });
        let mut ch = factory.spawn(launch()).await.unwrap();
        let good = UnitOfWork::new("a.Good", RunId::from("r"));
        let bad = UnitOfWork::new("a.Bad", RunId::from("r"));
        ch.commands.send(WorkerCommand::Execute(good)).unwrap();
        ch.commands.send(WorkerCommand::Execute(bad)).unwrap();
        ch.commands.send(WorkerCommand::Stop).unwrap();

        let mut got = Vec::new();
        while let Some(msg) = ch.events.recv().await {
            got.push(msg);
        }
        assert_eq!(got.len(), 7);
        assert_eq!(
            got[2],
            WorkerMessage::Completed {
                test: Arc::from("a.Good"),
                outcome: TestOutcome::Passed,
                failure: None,
            }
        );
        assert_eq!(
            got[5],
            WorkerMessage::Completed {
                test: Arc::from("a.Bad"),
                outcome: TestOutcome::Failed,
                failure: Some(Arc::from("boom")),
            }
        );
        assert_eq!(got[6], WorkerMessage::Stopped);
    }

    #[tokio::test]
    async fn test_terminate_drops_running_class() {
        let factory = WorkerFn::arc("hang", |_ctx: ClassContext| async move {
            std::future::pending::<()>().await;
            Ok(())
        });
        let mut ch = factory.spawn(launch()).await.unwrap();
        let unit = UnitOfWork::new("a.Slow", RunId::from("r"));
        ch.commands.send(WorkerCommand::Execute(unit)).unwrap();

        assert!(matches!(
            ch.events.recv().await,
            Some(WorkerMessage::Started { .. })
        ));
        ch.terminate.cancel();
        assert_eq!(ch.events.recv().await, None);
    }
}
