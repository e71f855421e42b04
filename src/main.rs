use anyhow::{anyhow, Context, Result};
use bottleneck_survey::ambient::{self, Services};
use bottleneck_survey::bottleneck::{Bottleneck, UtilizationAlgorithm};
use bottleneck_survey::call_context;
use bottleneck_survey::cli::{Cli, OutputFormat};
use bottleneck_survey::clock::NANOS_PER_SECOND;
use bottleneck_survey::coordinator::Coordinator;
use bottleneck_survey::report::SurveyReport;
use bottleneck_survey::settings::SurveyConfig;
use bottleneck_survey::surveyor::{Surveyor, SurveyorOptions};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Bytes reported per simulated disk write
const IO_WRITE_BYTES: f64 = 256.0 * 1024.0;

/// Disk write budget per second
const IO_BYTES_PER_SECOND: f64 = 64.0 * 1024.0 * 1024.0;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Bottlenecks exercised by the synthetic workload
struct Workload {
    lock: Bottleneck,
    index: Bottleneck,
    io: Bottleneck,
    presence: Bottleneck,
    config: Bottleneck,
    shared_state: parking_lot::Mutex<u64>,
    index_state: parking_lot::Mutex<Vec<usize>>,
}

impl Workload {
    fn new() -> Result<Self> {
        Ok(Self {
            lock: Bottleneck::with_limit(
                "lock.shared-state",
                UtilizationAlgorithm::Linear,
                true,
                "Mutex guarding the shared counter",
                Some(NANOS_PER_SECOND as f64),
                Some(Duration::from_secs(1)),
            )?,
            index: Bottleneck::with_limit(
                "lock.index",
                UtilizationAlgorithm::ExponentialLimitApproach,
                true,
                "Mutex guarding the lookup index",
                Some(NANOS_PER_SECOND as f64),
                Some(Duration::from_secs(1)),
            )?,
            io: Bottleneck::with_limit(
                "io.disk-writes",
                UtilizationAlgorithm::ExponentialLimitApproach,
                false,
                "Simulated disk write bandwidth",
                Some(IO_BYTES_PER_SECOND),
                Some(Duration::from_secs(1)),
            )?,
            presence: Bottleneck::new(
                "presence.worker-loop",
                UtilizationAlgorithm::Zero,
                true,
                "Worker loop iterations",
            ),
            config: Bottleneck::with_limit(
                "config.load",
                UtilizationAlgorithm::Linear,
                false,
                "Configuration reads at startup",
                Some(100.0),
                Some(Duration::from_secs(1)),
            )?,
            shared_state: parking_lot::Mutex::new(0),
            index_state: parking_lot::Mutex::new(Vec::new()),
        })
    }
}

/// Settings passed through the run
struct RunOptions {
    iterations: usize,
    hold: Duration,
    top: usize,
    surveyor: SurveyorOptions,
}

fn run_worker(
    coordinator: &Coordinator,
    workload: &Workload,
    options: &RunOptions,
) -> Result<SurveyReport> {
    let surveyor = coordinator.create_thread_surveyor(options.surveyor.clone())?;
    ambient::sync_scope(coordinator.services(), || -> Result<()> {
        for i in 0..options.iterations {
            let _iteration = workload.presence.enter();
            {
                let _access = workload.lock.enter();
                let mut state = workload.shared_state.lock();
                *state += 1;
                std::thread::sleep(options.hold);
            }
            if i % 2 == 0 {
                let _access = workload.index.enter();
                let mut index = workload.index_state.lock();
                index.push(i);
                std::thread::sleep(options.hold / 4);
            }
            if i % 4 == 0 {
                let write = workload.io.enter();
                write.add_usage(1, IO_WRITE_BYTES)?;
                std::thread::sleep(options.hold / 2);
            }
        }
        Ok(())
    })?;
    Ok(SurveyReport::from_snapshot(&surveyor.snapshot(), options.top))
}

/// Startup work observed by a call-context surveyor
async fn load_startup_config(
    coordinator: &Coordinator,
    workload: &Workload,
    options: &RunOptions,
) -> Result<SurveyReport> {
    call_context::scope(async {
        let surveyor = coordinator.create_call_context_surveyor(
            options.surveyor.clone().scope_name("startup"),
        )?;
        for _ in 0..3 {
            let read = workload.config.enter_with(&coordinator.services());
            read.add_usage(1, 1.0)?;
            tokio::task::yield_now().await;
        }
        let report = SurveyReport::from_snapshot(&surveyor.snapshot(), options.top);
        surveyor.dispose()?;
        Ok::<_, anyhow::Error>(report)
    })
    .await
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => SurveyConfig::from_toml(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => SurveyConfig::default(),
    };
    let window = Duration::from_millis(cli.window_ms.unwrap_or(config.default_window_ms).max(1));
    let options = Arc::new(RunOptions {
        iterations: cli.iterations,
        hold: Duration::from_micros(cli.hold_us),
        top: cli.top.unwrap_or(config.default_top),
        surveyor: SurveyorOptions {
            scope_name: None,
            allow: cli.allow.clone(),
            block: cli.block.clone(),
        },
    });

    let coordinator = Arc::new(Coordinator::new(
        Services::new().with_settings(Arc::new(config)),
    ));
    let workload = Arc::new(Workload::new()?);
    let process = coordinator.create_process_surveyor(options.surveyor.clone())?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _windows = coordinator.create_time_window_surveyor(
        window,
        move |snapshot| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(snapshot);
            }
        },
        options.surveyor.clone(),
    )?;
    let scheduler = coordinator.spawn_window_scheduler((window / 4).max(Duration::from_millis(5)));

    let startup = load_startup_config(&coordinator, &workload, &options).await?;

    let mut handles = Vec::with_capacity(cli.threads);
    for i in 0..cli.threads {
        let coordinator = Arc::clone(&coordinator);
        let workload = Arc::clone(&workload);
        let options = Arc::clone(&options);
        let handle = std::thread::Builder::new()
            .name(format!("worker-{i}"))
            .spawn(move || run_worker(&coordinator, &workload, &options))
            .context("Failed to spawn worker thread")?;
        handles.push(handle);
    }
    let threads = tokio::task::spawn_blocking(move || -> Result<Vec<SurveyReport>> {
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = handle
                .join()
                .map_err(|_| anyhow!("Worker thread panicked"))??;
            reports.push(report);
        }
        Ok(reports)
    })
    .await
    .context("Worker join task failed")??;

    scheduler.abort();
    coordinator.rotate_due_windows().await;
    let mut windows = Vec::new();
    while let Ok(snapshot) = rx.try_recv() {
        windows.push(SurveyReport::from_snapshot(&snapshot, options.top));
    }
    let process = SurveyReport::from_snapshot(&process.snapshot(), options.top);

    match cli.format {
        OutputFormat::Text => {
            print!("{}", process.render_text());
            print!("{}", startup.render_text());
            for report in threads.iter().chain(windows.iter()) {
                print!("{}", report.render_text());
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "process": process,
                "call_context": startup,
                "threads": threads,
                "windows": windows,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime.block_on(run(cli))
}
