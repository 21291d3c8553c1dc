//! Scripted in-process workers for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::events::{OutputStream, TestOutcome};
use crate::worker::{
    WorkerChannel, WorkerCommand, WorkerEndpoint, WorkerFactory, WorkerLaunch, WorkerMessage,
};

/// What a scripted worker does with one class.
#[derive(Clone, Debug)]
pub(crate) enum Script {
    Pass,
    Fail(&'static str),
    Skip,
    /// Reports `Started`, then the worker exits without a stop acknowledgement.
    CrashAfterStart,
    /// Reports `Started`, then waits until terminated.
    Hang,
    /// Passes once every party of the barrier reached it.
    Barrier(Arc<tokio::sync::Barrier>),
    Sleep(Duration),
    /// Reports `Completed` without `Started`.
    CompleteWithoutStart,
    /// Reports `Output` before `Started`, then passes.
    OutputBeforeStart,
}

#[derive(Default)]
struct Stats {
    spawns: usize,
    failing: usize,
    live: usize,
    peak: usize,
    units: Vec<Vec<String>>,
}

/// Worker factory driven by per-class scripts.
pub(crate) struct ScriptedFactory {
    scripts: HashMap<String, Script>,
    default: Script,
    ignore_stop: bool,
    stats: Arc<Mutex<Stats>>,
}

impl ScriptedFactory {
    pub(crate) fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            default: Script::Pass,
            ignore_stop: false,
            stats: Arc::new(Mutex::new(Stats::default())),
        }
    }

    pub(crate) fn script(mut self, class: &str, script: Script) -> Self {
        self.scripts.insert(class.to_string(), script);
        self
    }

    pub(crate) fn with_default(mut self, script: Script) -> Self {
        self.default = script;
        self
    }

    /// The next `n` spawns fail.
    pub(crate) fn failing_spawns(self, n: usize) -> Self {
        self.stats.lock().unwrap().failing = n;
        self
    }

    /// Workers never acknowledge `Stop`.
    pub(crate) fn ignoring_stop(mut self) -> Self {
        self.ignore_stop = true;
        self
    }

    /// Successful spawns so far.
    pub(crate) fn spawns(&self) -> usize {
        self.stats.lock().unwrap().spawns
    }

    pub(crate) fn peak_live(&self) -> usize {
        self.stats.lock().unwrap().peak
    }

    /// Classes executed by each worker, in spawn order.
    pub(crate) fn units_per_worker(&self) -> Vec<Vec<String>> {
        self.stats.lock().unwrap().units.clone()
    }
}

#[async_trait]
impl WorkerFactory for ScriptedFactory {
    async fn spawn(&self, _launch: WorkerLaunch) -> Result<WorkerChannel, WorkerError> {
        let slot = {
            let mut stats = self.stats.lock().unwrap();
            if stats.failing > 0 {
                stats.failing -= 1;
                return Err(WorkerError::spawn("scripted spawn failure"));
            }
            stats.spawns += 1;
            stats.live += 1;
            stats.peak = stats.peak.max(stats.live);
            stats.units.push(Vec::new());
            stats.units.len() - 1
        };

        let (channel, endpoint) = WorkerChannel::pair();
        let worker = ScriptedWorker {
            scripts: self.scripts.clone(),
            default: self.default.clone(),
            ignore_stop: self.ignore_stop,
            live: LiveGuard(Arc::clone(&self.stats)),
            slot,
        };
        tokio::spawn(worker.serve(endpoint));
        Ok(channel)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Factory whose `spawn` never returns.
pub(crate) struct StalledFactory;

#[async_trait]
impl WorkerFactory for StalledFactory {
    async fn spawn(&self, _launch: WorkerLaunch) -> Result<WorkerChannel, WorkerError> {
        std::future::pending().await
    }

    fn name(&self) -> &str {
        "stalled"
    }
}

/// Decrements the live count once the worker is gone.
struct LiveGuard(Arc<Mutex<Stats>>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        if let Ok(mut stats) = self.0.lock() {
            stats.live -= 1;
        }
    }
}

struct ScriptedWorker {
    scripts: HashMap<String, Script>,
    default: Script,
    ignore_stop: bool,
    live: LiveGuard,
    slot: usize,
}

impl ScriptedWorker {
    async fn serve(self, mut endpoint: WorkerEndpoint) {
        let terminate = endpoint.terminated();
        while let Some(cmd) = endpoint.next_command().await {
            let unit = match cmd {
                WorkerCommand::Execute(unit) => unit,
                WorkerCommand::Stop if self.ignore_stop => {
                    terminate.cancelled().await;
                    return;
                }
                WorkerCommand::Stop => {
                    drop(self.live);
                    endpoint.stopped();
                    return;
                }
            };
            let test = Arc::clone(&unit.class_name);
            if let Ok(mut stats) = self.live.0.lock() {
                stats.units[self.slot].push(test.to_string());
            }

            let script = self
                .scripts
                .get(&*test)
                .cloned()
                .unwrap_or_else(|| self.default.clone());
            let outcome = match script {
                Script::Pass => TestOutcome::Passed,
                Script::Skip => TestOutcome::Skipped,
                Script::Fail(msg) => {
                    endpoint.started(&test);
                    endpoint.completed(&test, TestOutcome::Failed, Some(Arc::from(msg)));
                    continue;
                }
                Script::CrashAfterStart => {
                    endpoint.started(&test);
                    drop(self.live);
                    return;
                }
                Script::Hang => {
                    endpoint.started(&test);
                    terminate.cancelled().await;
                    return;
                }
                Script::Barrier(barrier) => {
                    endpoint.started(&test);
                    tokio::select! {
                        _ = barrier.wait() => {}
                        _ = terminate.cancelled() => return,
                    }
                    endpoint.completed(&test, TestOutcome::Passed, None);
                    continue;
                }
                Script::Sleep(d) => {
                    endpoint.started(&test);
                    tokio::select! {
                        _ = tokio::time::sleep(d) => {}
                        _ = terminate.cancelled() => return,
                    }
                    endpoint.completed(&test, TestOutcome::Passed, None);
                    continue;
                }
                Script::CompleteWithoutStart => {
                    endpoint.completed(&test, TestOutcome::Passed, None);
                    continue;
                }
                Script::OutputBeforeStart => {
                    endpoint.send(WorkerMessage::Output {
                        test: Arc::clone(&test),
                        stream: OutputStream::Stdout,
                        text: Arc::from("too early"),
                    });
                    TestOutcome::Passed
                }
            };
            endpoint.started(&test);
            endpoint.completed(&test, outcome, None);
        }
    }
}
