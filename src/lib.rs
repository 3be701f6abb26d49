//! Waste Sorter
//!
//! Classifies uploaded images of waste items as biodegradable or
//! non-biodegradable and drives a serial-connected sorting mechanism.
//!
//! # Architecture
//!
//! ```text
//! upload -> UploadStore -> WorkQueue -> ProcessingWorker -> Classifier
//!                                              |
//!                                              v
//!                                      HardwareActuator -> serial device
//! ```
//!
//! The pipeline holds these invariants:
//!
//! 1. **Decoupled ingestion**: uploads only learn that an item was queued.
//! 2. **At-most-once delivery**: each queued item reaches one worker.
//! 3. **Per-item isolation**: a failing item is logged and dropped; the
//!    worker keeps running.
//! 4. **Single writer**: actuator access is serialized behind one lock.
//! 5. **Cooperative stop**: workers observe a stop flag between items.
//!
//! # Module Structure
//!
//! - `queue`: FIFO work queue and optional content-hash dedup
//! - `actuator`: serial link to the sorting device
//! - `classify`: classifier boundary and label normalization
//! - `worker`: the per-item state machine and its counters
//! - `processor`: start/stop control of the worker pool
//! - `ingest`: PNG upload validation and storage
//! - `api`: HTTP upload endpoint
//! - `config`: daemon configuration

pub mod actuator;
pub mod api;
pub mod classify;
pub mod config;
pub mod ingest;
pub mod processor;
pub mod queue;
pub mod worker;

pub use actuator::{ActuatorConfig, ActuatorError, ConnectionState, HardwareActuator, SortCommand};
pub use classify::{Classification, ClassificationError, Classifier, CLASSIFY_INSTRUCTION};
pub use config::SorterConfig;
pub use ingest::{UploadError, UploadStore};
pub use processor::{Processor, ProcessorConfig, StopReport, WorkerState};
pub use queue::{EnqueueError, QueueConfig, WorkItem, WorkQueue};
pub use worker::{ItemError, ProcessingWorker, WorkerStats, WorkerStatsSnapshot};
