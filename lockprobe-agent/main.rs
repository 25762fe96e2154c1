use anyhow::{bail, Context};
use axum::{response::IntoResponse, routing::get, Router};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use lockprobe::checks::all_modules;
use lockprobe::common::{chipset, PollPolicy};
use lockprobe::{
    BackendKind, HardwareBackend, NativeBackend, RegisterEngine, ScanConfig, ScanMetricExporter,
    Scanner, SimulatedPlatform,
};

#[derive(Parser, Debug)]
#[command(name = "lockprobe")]
#[command(about = "Platform lockdown checks for Intel chipsets")]
struct Args {
    #[arg(long, help = "JSON config file; command line options override its values")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Hardware access backend [default: native]")]
    backend: Option<BackendKind>,

    #[arg(long, help = "Force a chipset code (e.g. cfl, avn) instead of detecting it")]
    chipset: Option<String>,

    #[arg(
        long = "module",
        help = "Module to run (can be specified multiple times, defaults to all)",
        action = clap::ArgAction::Append
    )]
    modules: Vec<String>,

    #[arg(long, help = "Logical thread used for MSR registers [default: 0]")]
    thread: Option<u32>,

    #[arg(long, help = "Attempts before a hardware handshake is reported as not ready")]
    poll_attempts: Option<u32>,

    #[arg(long, help = "Sleep between handshake attempts in milliseconds")]
    poll_interval_ms: Option<u64>,

    #[arg(long, help = "Serve scan results on /metrics at this address after the scan")]
    listen: Option<SocketAddr>,

    #[arg(long, help = "JSON array of register definitions layered over the chipset's")]
    definitions: Option<PathBuf>,

    #[arg(long, help = "Print every register defined for the chipset and exit")]
    list_registers: bool,

    #[arg(
        short,
        long,
        help = "Enable verbose logging (shows every register read/write)"
    )]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ScanConfig> {
        let base = match &self.config {
            Some(path) => ScanConfig::load(path)?,
            None => ScanConfig::default(),
        };
        let poll = PollPolicy::new(
            self.poll_attempts.unwrap_or(base.poll.attempts),
            self.poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(base.poll.interval),
        );
        let modules = if self.modules.is_empty() {
            base.modules
        } else {
            self.modules
        };
        Ok(ScanConfig {
            backend: self.backend.unwrap_or(base.backend),
            chipset: self.chipset.or(base.chipset),
            modules,
            thread: self.thread.unwrap_or(base.thread),
            poll,
            listen: self.listen.or(base.listen),
            definitions: self.definitions.or(base.definitions),
            root: base.root,
        })
    }
}

async fn metrics_handler(
    axum::extract::State(exporter): axum::extract::State<Arc<ScanMetricExporter>>,
) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    lockprobe::gather_metrics!(buffer, encoder, Some(exporter.as_ref()), "scan");

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

fn check_permissions(config: &ScanConfig) -> anyhow::Result<()> {
    let msr_path = config.msr_device_path();
    if std::fs::metadata(&msr_path).is_err() {
        bail!(
            "Cannot access {}. The MSR kernel module may not be loaded (sudo modprobe msr)",
            msr_path.display()
        );
    }

    if let Err(e) = std::fs::File::open(&msr_path) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            bail!(
                "Permission denied accessing {}. Run as root or use --backend sim",
                msr_path.display()
            );
        }
    }
    Ok(())
}

fn build_backend(config: &ScanConfig) -> anyhow::Result<Arc<dyn HardwareBackend>> {
    let backend: Arc<dyn HardwareBackend> = match config.backend {
        BackendKind::Native => {
            check_permissions(config)?;
            Arc::new(NativeBackend::new(&config.root))
        }
        BackendKind::Sim => Arc::new(SimulatedPlatform::reference()),
    };
    tracing::info!("Using {} backend", backend.name());
    Ok(backend)
}

fn build_engine(config: &ScanConfig) -> anyhow::Result<RegisterEngine> {
    let backend = build_backend(config)?;
    let chipset = match &config.chipset {
        Some(code) => chipset::force(backend.as_ref(), code)?,
        None => chipset::detect(backend.as_ref())
            .context("Chipset detection failed, pass --chipset to force one")?,
    };
    let store = chipset.store_with(config.load_definitions()?)?;
    Ok(RegisterEngine::new(Arc::new(store), backend).with_thread(config.thread))
}

fn list_registers(engine: &RegisterEngine) {
    for def in engine.store().iter() {
        println!("{:<24} {:<40} {}", def.name, def.class, def.desc);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Shutdown triggered by Ctrl+C");
        },
        _ = terminate => {
            tracing::warn!("Shutdown triggered by SIGTERM");
        },
    }
}

async fn serve(addr: SocketAddr, exporter: Arc<ScanMetricExporter>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(exporter);

    tracing::warn!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let list = args.list_registers;
    let config = args.into_config()?;
    let engine = build_engine(&config)?;

    if list {
        list_registers(&engine);
        return Ok(ExitCode::SUCCESS);
    }

    let scanner = Scanner::new(engine, all_modules(config.poll)).select(&config.modules)?;
    // Handshake polls sleep, keep them off the runtime workers
    let report = tokio::task::spawn_blocking(move || scanner.scan()).await?;
    report.log_summary();

    let exporter = Arc::new(ScanMetricExporter::new()?);
    exporter.record(&report);

    if let Some(addr) = config.listen {
        serve(addr, exporter).await?;
    }

    Ok(ExitCode::from(report.overall().severity()))
}
