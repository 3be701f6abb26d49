//! Background loop that turns queued images into sorting commands.
//!
//! Per item the worker moves through `Idle -> Classifying -> Actuating ->
//! Idle`. Each stage reports failure through `ItemError`; the loop logs it
//! and moves on, so one bad image never stops the worker.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::actuator::{self, ActuatorError, SharedActuator, SortCommand};
use crate::classify::{
    ClassificationError, Classification, Classifier, ImageData, CLASSIFY_INSTRUCTION,
};
use crate::queue::{WorkItem, WorkQueue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStage {
    Idle,
    Classifying,
    Actuating,
}

/// Why a single item was dropped. Always terminal for that item only.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("image {} no longer exists", .0.display())]
    SourceMissing(PathBuf),
    #[error("failed to read image {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Classification(#[from] ClassificationError),
    #[error("unrecognized label {0:?}")]
    UnrecognizedLabel(String),
    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

/// Counters shared by every worker of a processor.
#[derive(Debug, Default)]
pub struct WorkerStats {
    loop_entries: AtomicU64,
    dequeued: AtomicU64,
    commands_sent: AtomicU64,
    source_missing: AtomicU64,
    classification_failures: AtomicU64,
    unrecognized: AtomicU64,
    actuator_failures: AtomicU64,
    classifying: AtomicU64,
    actuating: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub loop_entries: u64,
    pub dequeued: u64,
    pub commands_sent: u64,
    pub source_missing: u64,
    pub classification_failures: u64,
    pub unrecognized: u64,
    pub actuator_failures: u64,
    /// Workers currently waiting on the classifier.
    pub classifying: u64,
    /// Workers currently writing to the actuator.
    pub actuating: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            loop_entries: self.loop_entries.load(Ordering::SeqCst),
            dequeued: self.dequeued.load(Ordering::SeqCst),
            commands_sent: self.commands_sent.load(Ordering::SeqCst),
            source_missing: self.source_missing.load(Ordering::SeqCst),
            classification_failures: self.classification_failures.load(Ordering::SeqCst),
            unrecognized: self.unrecognized.load(Ordering::SeqCst),
            actuator_failures: self.actuator_failures.load(Ordering::SeqCst),
            classifying: self.classifying.load(Ordering::SeqCst),
            actuating: self.actuating.load(Ordering::SeqCst),
        }
    }

    fn stage_gauge(&self, stage: WorkerStage) -> Option<&AtomicU64> {
        match stage {
            WorkerStage::Idle => None,
            WorkerStage::Classifying => Some(&self.classifying),
            WorkerStage::Actuating => Some(&self.actuating),
        }
    }

    fn record_failure(&self, err: &ItemError) {
        let counter = match err {
            ItemError::SourceMissing(_) | ItemError::Unreadable { .. } => &self.source_missing,
            ItemError::Classification(_) => &self.classification_failures,
            ItemError::UnrecognizedLabel(_) => &self.unrecognized,
            ItemError::Actuator(_) => &self.actuator_failures,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ProcessingWorker {
    id: usize,
    queue: WorkQueue,
    classifier: Arc<dyn Classifier>,
    actuator: SharedActuator,
    stats: Arc<WorkerStats>,
    poll_interval: Duration,
    reconnect_on_send: bool,
    stage: WorkerStage,
}

impl ProcessingWorker {
    pub fn new(
        id: usize,
        queue: WorkQueue,
        classifier: Arc<dyn Classifier>,
        actuator: SharedActuator,
        stats: Arc<WorkerStats>,
    ) -> Self {
        Self {
            id,
            queue,
            classifier,
            actuator,
            stats,
            poll_interval: Duration::from_secs(1),
            reconnect_on_send: false,
            stage: WorkerStage::Idle,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_reconnect_on_send(mut self, reconnect: bool) -> Self {
        self.reconnect_on_send = reconnect;
        self
    }

    pub fn stage(&self) -> WorkerStage {
        self.stage
    }

    /// Run until `stop` is observed.
    ///
    /// The flag is checked once per iteration; an item already in flight is
    /// finished before the loop exits.
    pub fn run(&mut self, stop: &AtomicBool) {
        self.stats.loop_entries.fetch_add(1, Ordering::SeqCst);
        {
            let mut actuator = actuator::lock(&self.actuator);
            if !actuator.is_connected() {
                actuator.connect();
            }
        }
        log::info!("worker {} started", self.id);

        while !stop.load(Ordering::SeqCst) {
            let Some(item) = self.queue.dequeue(self.poll_interval) else {
                log::trace!("worker {} idle", self.id);
                continue;
            };
            self.stats.dequeued.fetch_add(1, Ordering::SeqCst);
            self.handle_isolated(item);
        }

        log::info!("worker {} stopped", self.id);
    }

    /// `handle`, with a panic in a collaborator contained to the item.
    ///
    /// A panic counts as a classification failure.
    pub fn handle_isolated(&mut self, item: WorkItem) -> Option<SortCommand> {
        let path = item.path().to_path_buf();
        match panic::catch_unwind(AssertUnwindSafe(|| self.handle(item))) {
            Ok(command) => command,
            Err(_) => {
                self.set_stage(WorkerStage::Idle);
                self.stats
                    .classification_failures
                    .fetch_add(1, Ordering::SeqCst);
                log::error!(
                    "worker {}: {} panicked; item dropped",
                    self.id,
                    path.display()
                );
                None
            }
        }
    }

    /// Process one item and log the outcome.
    pub fn handle(&mut self, item: WorkItem) -> Option<SortCommand> {
        let outcome = self.process(&item);
        self.set_stage(WorkerStage::Idle);
        match outcome {
            Ok(command) => {
                self.stats.commands_sent.fetch_add(1, Ordering::SeqCst);
                log::info!(
                    "worker {}: {} -> command {} ({} ms in queue)",
                    self.id,
                    item.path().display(),
                    command,
                    item.age().as_millis()
                );
                Some(command)
            }
            Err(err) => {
                self.stats.record_failure(&err);
                match &err {
                    ItemError::SourceMissing(_) | ItemError::UnrecognizedLabel(_) => {
                        log::warn!("worker {}: discarding item: {}", self.id, err)
                    }
                    _ => log::error!(
                        "worker {}: {} failed: {}",
                        self.id,
                        item.path().display(),
                        err
                    ),
                }
                None
            }
        }
    }

    /// Classify one image and dispatch the matching command.
    pub fn process(&mut self, item: &WorkItem) -> Result<SortCommand, ItemError> {
        let path = item.path();
        let image = match ImageData::read(path) {
            Ok(image) => image,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ItemError::SourceMissing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(ItemError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        self.set_stage(WorkerStage::Classifying);
        log::debug!("worker {}: classifying {}", self.id, path.display());
        let label = self.classifier.classify(&image, CLASSIFY_INSTRUCTION)?;
        let classification = Classification::from_label(&label);
        log::info!(
            "worker {}: {} classified as {} (raw {:?})",
            self.id,
            path.display(),
            classification,
            label.trim()
        );
        let command = classification
            .command()
            .ok_or_else(|| ItemError::UnrecognizedLabel(label.trim().to_string()))?;

        self.set_stage(WorkerStage::Actuating);
        self.dispatch(command)?;
        Ok(command)
    }

    fn set_stage(&mut self, next: WorkerStage) {
        if let Some(gauge) = self.stats.stage_gauge(self.stage) {
            gauge.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(gauge) = self.stats.stage_gauge(next) {
            gauge.fetch_add(1, Ordering::SeqCst);
        }
        self.stage = next;
    }

    fn dispatch(&self, command: SortCommand) -> Result<(), ActuatorError> {
        let mut actuator = actuator::lock(&self.actuator);
        match actuator.send(command) {
            Err(ActuatorError::NotConnected) if self.reconnect_on_send => {
                log::info!("worker {}: actuator disconnected, reconnecting", self.id);
                if actuator.connect() {
                    actuator.send(command)
                } else {
                    Err(ActuatorError::NotConnected)
                }
            }
            other => other,
        }
    }
}
