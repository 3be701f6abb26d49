//! sorterd - waste sorting daemon
//!
//! This daemon:
//! 1. Accepts PNG uploads over HTTP and stores them in the upload directory
//! 2. Queues each stored image for the background worker
//! 3. Classifies images as biodegradable or non-biodegradable
//! 4. Sends the matching command to the sorting device over serial
//! 5. Shuts down cleanly on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use waste_sorter::{
    api::ApiServer,
    classify, HardwareActuator, Processor, SorterConfig, UploadStore, WorkQueue,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "SORTER_CONFIG")]
    config: Option<PathBuf>,
    /// Use the stub actuator and classifier (no hardware, no network).
    #[arg(long)]
    stub: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = SorterConfig::load_from(args.config.as_deref())?;
    if args.stub {
        cfg.actuator.port = "stub://sorter".to_string();
        cfg.classifier.endpoint = "stub://biodegradable".to_string();
    }

    let classifier = classify::build(&cfg.classifier)?;
    let actuator = HardwareActuator::new(&cfg.actuator);
    let queue = WorkQueue::new(&cfg.queue);
    let store = UploadStore::new(&cfg.upload_dir)?;

    let processor = Arc::new(Processor::new(
        queue,
        classifier,
        actuator,
        cfg.processor.clone(),
    ));
    processor.start()?;

    let api_handle = ApiServer::new(cfg.api.clone(), store, processor.clone()).spawn()?;
    log::info!("upload api listening on {}", api_handle.addr);
    log::info!(
        "sorterd running. uploads={} actuator={} model={}",
        cfg.upload_dir.display(),
        cfg.actuator.port,
        cfg.classifier.model
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let mut last_health_log = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
        if last_health_log.elapsed() >= Duration::from_secs(30) {
            let stats = processor.stats();
            log::info!(
                "health: state={:?} actuator={:?} queued={} sent={} discarded={}",
                processor.state(),
                processor.actuator_state(),
                processor.queue().len(),
                stats.commands_sent,
                stats.source_missing
                    + stats.classification_failures
                    + stats.unrecognized
                    + stats.actuator_failures
            );
            last_health_log = Instant::now();
        }
    }

    log::info!("shutdown requested");
    if let Err(err) = api_handle.stop() {
        log::error!("upload api shutdown failed: {}", err);
    }
    let report = processor.stop(cfg.stop_timeout);
    if !report.is_clean() {
        log::warn!(
            "{} worker(s) were still classifying at exit; their items may not be actuated",
            report.outstanding
        );
    }
    Ok(())
}
