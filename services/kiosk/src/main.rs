//! Weighing kiosk service binary.
//!
//! Wires the load cell, camera, calibration store, and capture pipeline
//! together and runs the live measurement loop. Operator events normally
//! arrive from the display layer; when run on a terminal the same events can
//! be driven over stdin (`help` lists the commands), which is how the kiosk
//! is exercised during bring-up.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use weigh_kiosk::calibration::{CalibrationSession, CalibrationStore};
use weigh_kiosk::camera::{StaticCamera, StillCamera};
use weigh_kiosk::config::{CameraConfig, KioskConfig, LoggingConfig, ScaleConfig};
use weigh_kiosk::notify::{LogNotifier, OperatorNotifier};
use weigh_kiosk::pipeline::CapturePipeline;
use weigh_kiosk::recorder::CaptureRecorder;
use weigh_kiosk::scale::{ScaleError, ScaleReader, SimulatedLoadCell};
use weigh_kiosk::session::MeasurementSession;
use weigh_kiosk::upload::UploadClient;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    init_logging(&config.logging)?;

    info!(
        service = "weigh-kiosk",
        version = env!("CARGO_PKG_VERSION"),
        "Starting weighing kiosk service"
    );

    config.validate().context("Invalid configuration")?;

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let app = KioskApp::new(config)?;
    app.run().await
}

/// Load and validate configuration.
fn load_config() -> Result<KioskConfig> {
    let config = KioskConfig::load().or_else(|e| {
        eprintln!("Failed to load config from files ({e}), trying environment");
        KioskConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("weigh_kiosk={}", level).parse()?)
        .add_directive("reqwest=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Initialize the Prometheus metrics exporter.
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port, "Prometheus metrics exporter started");
    Ok(())
}

fn build_load_cell(config: &ScaleConfig) -> Result<SimulatedLoadCell> {
    match config.driver.as_str() {
        // The hardware bridge integrates through the LoadCell trait; the
        // simulator carries bring-up and headless operation.
        "sim" => Ok(SimulatedLoadCell::new(80_000, 30)),
        other => anyhow::bail!("unknown load cell driver '{other}'"),
    }
}

fn build_camera(config: &CameraConfig) -> Result<Arc<dyn StillCamera>> {
    match config.device.as_str() {
        "static" => Ok(Arc::new(StaticCamera::new(
            Bytes::from_static(b"\xff\xd8\xff\xe0 static test frame"),
            "jpeg",
        ))),
        other => anyhow::bail!("unknown camera device '{other}'"),
    }
}

/// Application state and shared resources.
struct KioskApp {
    config: KioskConfig,
    store: CalibrationStore,
    reader: Arc<ScaleReader>,
    camera: Arc<dyn StillCamera>,
    pipeline: CapturePipeline,
    notifier: Arc<dyn OperatorNotifier>,
    calibration: CalibrationSession,
    display: Option<(CancellationToken, JoinHandle<()>)>,
}

impl KioskApp {
    fn new(config: KioskConfig) -> Result<Self> {
        let store = CalibrationStore::new(&config.storage.calibration_file);
        let reader = Arc::new(ScaleReader::new(
            build_load_cell(&config.scale)?,
            &config.scale,
        ));
        let camera = build_camera(&config.camera)?;
        let notifier: Arc<dyn OperatorNotifier> = Arc::new(LogNotifier);

        let uploader = Arc::new(
            UploadClient::new(&config.upload).context("Failed to build upload client")?,
        );
        let recorder =
            CaptureRecorder::new(&config.storage.image_dir, &config.storage.capture_log);
        let pipeline = CapturePipeline::new(recorder, uploader, notifier.clone());

        let calibration =
            CalibrationSession::new(reader.clone(), store.clone(), notifier.clone());

        Ok(Self {
            config,
            store,
            reader,
            camera,
            pipeline,
            notifier,
            calibration,
            display: None,
        })
    }

    async fn run(mut self) -> Result<()> {
        info!(items = ?self.config.catalog.items, "item catalog loaded");

        self.start_display().await;

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        loop {
            tokio::select! {
                _ = shutdown_signal() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if self.handle_command(line.trim()).await {
                            break;
                        }
                    }
                    // stdin closed: keep running headless until a signal.
                    Ok(None) => {
                        shutdown_signal().await;
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "stdin read failed");
                        shutdown_signal().await;
                        break;
                    }
                }
            }
        }

        info!("Shutting down kiosk service");
        self.stop_display().await;
        info!("Kiosk service stopped");
        Ok(())
    }

    /// Start the live weight display loop, if the scale is calibrated.
    async fn start_display(&mut self) {
        if self.display.is_some() {
            return;
        }

        match MeasurementSession::begin(
            self.reader.clone(),
            &self.store,
            self.notifier.clone(),
            self.config.scale.poll_interval(),
        )
        .await
        {
            Ok(session) => {
                let cancel = session.cancel_token();
                let handle = tokio::spawn(session.run());
                self.display = Some((cancel, handle));
            }
            Err(ScaleError::Uncalibrated) => {
                warn!("scale is not calibrated; run 'zero' / 'ref <grams>' first");
            }
            Err(e) => {
                error!(error = %e, "could not start measurement session");
            }
        }
    }

    async fn stop_display(&mut self) {
        if let Some((cancel, handle)) = self.display.take() {
            cancel.cancel();
            let _ = handle.await;
        }
    }

    /// Handle one operator command. Returns true on quit.
    async fn handle_command(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("zero") => {
                // The calibration flow owns the scale while it runs.
                self.stop_display().await;
                match self.calibration.zero().await {
                    Ok(mean) => info!(post_zero_mean = mean, "scale zeroed, place the reference mass and enter 'ref <grams>'"),
                    Err(e) => error!(error = %e, "zeroing failed"),
                }
            }
            Some("ref") => {
                let grams = parts.next().and_then(|s| s.parse::<f64>().ok());
                match grams {
                    Some(grams) => self.run_reference_step(grams).await,
                    None => warn!("usage: ref <grams>"),
                }
            }
            Some("abandon") => {
                self.calibration.abandon();
                self.start_display().await;
            }
            Some("capture") => {
                match parts.next() {
                    Some(label) => self.run_capture(label).await,
                    None => warn!("usage: capture <label>"),
                }
            }
            Some("items") => {
                info!(items = ?self.config.catalog.items, "item catalog");
            }
            Some("quit") | Some("exit") => return true,
            Some(_) => {
                info!("commands: zero | ref <grams> | abandon | capture <label> | items | quit");
            }
            None => {}
        }
        false
    }

    /// Complete a calibration run from the reference mass the operator typed.
    async fn run_reference_step(&mut self, grams: f64) {
        if let Err(e) = self.calibration.confirm_reference_placed() {
            error!(error = %e, "cannot take a reference reading now");
            return;
        }

        match self.calibration.submit_reference_mass(grams).await {
            Ok(ratio) => match self.calibration.persist().await {
                Ok(_) => {
                    info!(ratio, "calibration complete");
                    self.start_display().await;
                }
                Err(e) => error!(error = %e, "persisting the calibration failed"),
            },
            Err(e) => error!(error = %e, "reference step failed, still awaiting reference weight"),
        }
    }

    /// Capture the current measurement for the given item label.
    async fn run_capture(&mut self, label: &str) {
        if !self.config.catalog.items.iter().any(|i| i == label) {
            warn!(label, "label is not in the item catalog, see 'items'");
            return;
        }

        let weight = match self.reader.read_weight().await {
            Ok(weight) => weight,
            Err(e) => {
                error!(error = %e, "cannot read a stable weight");
                return;
            }
        };

        let image = match self.camera.capture_still().await {
            Ok(image) => image,
            Err(e) => {
                error!(error = %e, "image capture failed, measurement not saved");
                return;
            }
        };

        // Local save result is reported by the pipeline; the upload outcome
        // follows asynchronously through the notifier.
        let _ = self.pipeline.capture(label, weight, image).await;
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
