//! Start/stop control for the worker pool.
//!
//! A `Processor` is built once at process start and handed to the upload
//! boundary by reference. `start` is idempotent. `stop` raises the shared
//! stop flag, waits up to a deadline for the workers to notice, and closes
//! the actuator whether or not they did.
//!
//! Cancellation is cooperative. A worker blocked inside a classification
//! call cannot be preempted; if it misses the deadline it is detached and
//! reported in `StopReport::outstanding`. It still exits on its own once
//! the call returns, because it observes the same stop flag. Until it does,
//! the processor stays in `StopRequested` and refuses `start`, so a new run
//! never overlaps with a detached worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::Serialize;

use crate::actuator::{self, ConnectionState, HardwareActuator, SharedActuator};
use crate::classify::Classifier;
use crate::queue::WorkQueue;
use crate::worker::{ProcessingWorker, WorkerStats, WorkerStatsSnapshot};

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Number of competing workers on the shared queue.
    pub workers: usize,
    /// Dequeue wait per loop iteration; bounds stop latency while idle.
    pub poll_interval: Duration,
    pub reconnect_on_send: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval: Duration::from_secs(1),
            reconnect_on_send: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Stopped,
    Running,
    StopRequested,
}

/// Outcome of `Processor::stop`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Workers that exited and were joined.
    pub joined: usize,
    /// Workers still inside an item when the deadline passed. While any
    /// remain, the processor reports `StopRequested`.
    pub outstanding: usize,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.outstanding == 0
    }
}

struct Lifecycle {
    state: WorkerState,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    done_rx: Option<Receiver<()>>,
}

pub struct Processor {
    queue: WorkQueue,
    classifier: Arc<dyn Classifier>,
    actuator: SharedActuator,
    config: ProcessorConfig,
    stats: Arc<WorkerStats>,
    lifecycle: Mutex<Lifecycle>,
}

impl Processor {
    pub fn new(
        queue: WorkQueue,
        classifier: Arc<dyn Classifier>,
        actuator: HardwareActuator,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queue,
            classifier,
            actuator: actuator.into_shared(),
            config,
            stats: Arc::new(WorkerStats::default()),
            lifecycle: Mutex::new(Lifecycle {
                state: WorkerState::Stopped,
                stop: Arc::new(AtomicBool::new(false)),
                handles: Vec::new(),
                done_rx: None,
            }),
        }
    }

    /// Queue handle for the ingestion side.
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn state(&self) -> WorkerState {
        let mut lifecycle = self.lifecycle();
        settle(&mut lifecycle);
        lifecycle.state
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn actuator_state(&self) -> ConnectionState {
        actuator::lock(&self.actuator).state()
    }

    /// Spawn the worker pool. A no-op when already running.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        settle(&mut lifecycle);
        match lifecycle.state {
            WorkerState::Running => {
                log::info!("processor already running; start ignored");
                return Ok(());
            }
            WorkerState::StopRequested => {
                return Err(anyhow!("processor is stopping; start rejected"));
            }
            WorkerState::Stopped => {}
        }

        // Fresh flag per run so detached workers from an earlier run keep
        // seeing their own stop request.
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let mut handles = Vec::with_capacity(self.config.workers);

        for id in 0..self.config.workers {
            let mut worker = ProcessingWorker::new(
                id,
                self.queue.clone(),
                self.classifier.clone(),
                self.actuator.clone(),
                self.stats.clone(),
            )
            .with_poll_interval(self.config.poll_interval)
            .with_reconnect_on_send(self.config.reconnect_on_send);
            let worker_stop = stop.clone();
            let worker_done = done_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("sorter-worker-{id}"))
                .spawn(move || {
                    // Dropped on exit, including unwinding.
                    let _done = worker_done;
                    worker.run(&worker_stop);
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    stop.store(true, Ordering::SeqCst);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(anyhow!("failed to spawn worker {}: {}", id, err));
                }
            }
        }

        log::info!(
            "processor started with {} worker(s), classifier={}",
            handles.len(),
            self.classifier.name()
        );
        lifecycle.state = WorkerState::Running;
        lifecycle.stop = stop;
        lifecycle.handles = handles;
        lifecycle.done_rx = Some(done_rx);
        Ok(())
    }

    /// Request stop and wait up to `timeout` for the workers to exit.
    ///
    /// A no-op when stopped. Calling it again after a stop that left
    /// workers outstanding waits for those workers. The actuator is closed
    /// in every case.
    pub fn stop(&self, timeout: Duration) -> StopReport {
        let (handles, done_rx) = {
            let mut lifecycle = self.lifecycle();
            settle(&mut lifecycle);
            match lifecycle.state {
                WorkerState::Stopped => return StopReport::default(),
                WorkerState::Running => {
                    lifecycle.state = WorkerState::StopRequested;
                    lifecycle.stop.store(true, Ordering::SeqCst);
                }
                WorkerState::StopRequested => {}
            }
            (
                std::mem::take(&mut lifecycle.handles),
                lifecycle.done_rx.clone(),
            )
        };

        let deadline = Instant::now() + timeout;
        // Nothing is ever sent; the channel disconnects once every worker
        // has dropped its sender.
        let all_exited = match done_rx {
            Some(done_rx) => matches!(
                done_rx.recv_deadline(deadline),
                Err(RecvTimeoutError::Disconnected)
            ),
            None => true,
        };

        let mut report = StopReport::default();
        let mut detached = Vec::new();
        for handle in handles {
            if all_exited || handle.is_finished() {
                if handle.join().is_err() {
                    log::error!("worker thread panicked");
                }
                report.joined += 1;
            } else {
                report.outstanding += 1;
                detached.push(handle);
            }
        }
        if report.outstanding > 0 {
            log::warn!(
                "{} worker(s) still busy after {:?}; detaching (in-flight classification cannot be interrupted)",
                report.outstanding,
                timeout
            );
        }

        actuator::lock(&self.actuator).close();
        let mut lifecycle = self.lifecycle();
        // A concurrent `state` or `start` may already have settled this stop.
        if lifecycle.state == WorkerState::StopRequested {
            if report.outstanding == 0 {
                lifecycle.state = WorkerState::Stopped;
                lifecycle.done_rx = None;
                log::info!("processor stopped (joined {})", report.joined);
            } else {
                lifecycle.handles.extend(detached);
            }
        }
        report
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Finish a pending stop once every detached worker has exited.
fn settle(lifecycle: &mut Lifecycle) {
    if lifecycle.state != WorkerState::StopRequested {
        return;
    }
    let exited = match &lifecycle.done_rx {
        Some(done_rx) => matches!(done_rx.try_recv(), Err(TryRecvError::Disconnected)),
        None => true,
    };
    if !exited {
        return;
    }
    for handle in lifecycle.handles.drain(..) {
        if handle.join().is_err() {
            log::error!("worker thread panicked");
        }
    }
    lifecycle.done_rx = None;
    lifecycle.state = WorkerState::Stopped;
    log::info!("detached workers exited; processor stopped");
}

impl Drop for Processor {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle();
        if lifecycle.state == WorkerState::Running {
            lifecycle.stop.store(true, Ordering::SeqCst);
        }
    }
}
