//! Run a frame pipeline against a synthetic depth camera.
//!
//! A producer thread enqueues one pooled frame per timer tick, a workload
//! module simulates per-frame processing and an interval probe measures how
//! evenly frames reach the worker. A throughput report is logged every
//! second until the run ends, then the queue is drained.
//!
//! ```text
//! pipeline_demo --duration 10 --frequency 30 --work-ms 40 --realtime
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use frame_pipeline::frame_pool::{FrameBuffer, FramePool};
use frame_pipeline::modules::{IntervalProbe, WorkloadModule};
use frame_pipeline::{
    logging, Backpressure, BackgroundPipeline, EnqueueOutcome, ModuleErrorPolicy, PipelineConfig,
    PipelineEvent, SharedModule,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const BYTES_PER_PIXEL: u32 = 2;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "pipeline_demo")]
#[command(about = "Drive a background frame pipeline with synthetic frames")]
#[command(version)]
struct Cli {
    /// TOML config file (defaults, then file, then PIPELINE_* env)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to produce frames for
    #[arg(short, long, default_value = "5")]
    duration: u64,

    /// Override the producer/timer frequency in Hz
    #[arg(short, long)]
    frequency: Option<u32>,

    /// Simulated processing time per frame in milliseconds
    #[arg(short, long, default_value = "10")]
    work_ms: u64,

    /// Drop frames when the queue is full instead of blocking the producer
    #[arg(long)]
    realtime: bool,

    /// Abort the pipeline on the first module error
    #[arg(long)]
    halt_on_error: bool,

    #[arg(long, default_value = "512")]
    width: u32,

    #[arg(long, default_value = "424")]
    height: u32,

    /// Print lifecycle events and reports as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::from_env()?,
    };
    if let Some(frequency) = cli.frequency {
        config.frequency_hz = frequency;
    }
    if cli.realtime {
        config.backpressure = Backpressure::Drop;
    }
    if cli.halt_on_error {
        config.module_errors = ModuleErrorPolicy::Halt;
    }
    config.validate()?;
    Ok(config)
}

/// Enqueue one synthetic frame per tick until `running` clears.
fn produce(
    pipeline: &BackgroundPipeline<FrameBuffer>,
    pool: &FramePool<FrameBuffer>,
    ticks: mpsc::Receiver<()>,
    running: &AtomicBool,
) -> u64 {
    let epoch = Instant::now();
    let mut sequence = 0u64;
    let mut pattern = Vec::new();

    while running.load(Ordering::Acquire) {
        match ticks.recv_timeout(Duration::from_millis(100)) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let mut frame = pool.get();
        pattern.resize(frame.capacity(), 0);
        pattern.fill(sequence as u8);
        if let Err(err) = frame.fill_from(&pattern) {
            warn!(error = %err, "Synthetic frame does not fit buffer");
            pool.put(frame);
            continue;
        }
        sequence += 1;
        frame.sequence = sequence;
        frame.timestamp_ns = epoch.elapsed().as_nanos() as u64;

        if pipeline.enqueue(frame) == EnqueueOutcome::Rejected {
            debug!(sequence, "Pipeline no longer accepting frames");
            break;
        }
    }
    sequence
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(&config.log_level);

    let (width, height) = (cli.width, cli.height);
    let pool = FramePool::builder()
        .size(config.pool_size)
        .factory(move || FrameBuffer::for_shape(width, height, BYTES_PER_PIXEL))
        .reset(FrameBuffer::reset)
        .build()?;

    let probe = SharedModule::new::<FrameBuffer>(IntervalProbe::new());
    let pipeline = Arc::new(
        BackgroundPipeline::builder(config.clone())
            .with_pool(Arc::clone(&pool))
            .module(WorkloadModule::new(Duration::from_millis(cli.work_ms)))
            .module(probe.clone())
            .build()?,
    );

    let json = cli.json;
    let mut events = pipeline.subscribe();
    let event_logger = thread::Builder::new()
        .name("pipeline-events".to_string())
        .spawn(move || loop {
            match events.blocking_recv() {
                Ok(event) if json => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(error = %err, "Failed to serialize event"),
                },
                Ok(PipelineEvent::FrameDropped { .. }) => {}
                Ok(event) => debug!(?event, "Pipeline event"),
                Err(RecvError::Lagged(missed)) => debug!(missed, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        })?;

    pipeline.on_queue_complete(|| info!("All queued frames processed"));

    // The tick thread only signals; enqueueing may block under lossless backpressure
    let (tick_tx, tick_rx) = mpsc::sync_channel(1);
    pipeline.timer().on_tick(move || {
        // Full means the producer is still on the previous tick
        let _ = tick_tx.try_send(());
    });

    info!(
        frequency_hz = config.frequency_hz,
        backpressure = ?config.backpressure,
        pool_size = config.pool_size,
        work_ms = cli.work_ms,
        width,
        height,
        "Starting pipeline demo"
    );
    pipeline.start()?;

    let running = Arc::new(AtomicBool::new(true));
    let producer = {
        let pipeline = Arc::clone(&pipeline);
        let pool = Arc::clone(&pool);
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("frame-producer".to_string())
            .spawn(move || produce(&pipeline, &pool, tick_rx, &running))?
    };

    for _ in 0..cli.duration {
        thread::sleep(Duration::from_secs(1));
        let stats = pipeline.stats();
        let mean_interval_ms = {
            let mut probe = probe.lock();
            let mean = probe.mean_interval().map(|d| d.as_secs_f64() * 1000.0);
            probe.reset();
            mean
        };

        if json {
            println!("{}", serde_json::to_string(&stats)?);
        }
        info!(
            elapsed_ms = stats.elapsed_ms,
            fps = %format_args!("{:.1}", stats.fps),
            backlog = stats.backlog,
            processed = stats.processed,
            dropped = stats.dropped,
            pool_idle = ?stats.pool_idle,
            mean_interval_ms = ?mean_interval_ms,
            "Pipeline report"
        );
    }

    running.store(false, Ordering::Release);
    let produced = producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))?;

    pipeline.stop();
    if !pipeline.wait_for_completion(DRAIN_TIMEOUT) {
        warn!(backlog = pipeline.count(), "Drain timed out, aborting");
        pipeline.abort();
    }

    info!(
        produced,
        processed = pipeline.processed_frames(),
        dropped = pipeline.dropped_frames(),
        allocations = pool.allocations(),
        elapsed_ms = pipeline.timer().elapsed().as_millis() as u64,
        "Pipeline demo finished"
    );

    pipeline.dispose();
    drop(pipeline);
    let _ = event_logger.join();
    Ok(())
}
