use std::time::Duration;

use dotenv::dotenv;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{BatchConfigBuilder, RandomIdGenerator, Sampler, Tracer},
    Resource,
};
use opentelemetry_semantic_conventions::{
    resource::{SERVICE_NAME, SERVICE_VERSION},
    SCHEMA_URL,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use super::config::TelemetryConfig;
use super::{AppError, AppResult};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn resource() -> Resource {
    Resource::from_schema_url(
        [
            KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ],
        SCHEMA_URL,
    )
}

// Construct Tracer for OpenTelemetryLayer
fn init_tracer(endpoint: &str) -> AppResult<Tracer> {
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_scheduled_delay(Duration::from_secs(5))
                .build(),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    1.0,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource()),
        )
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .install_batch(runtime::Tokio)
        .map_err(|e| AppError::Telemetry(e.to_string()))
}

/// Keeps the file writer and the span exporter alive; flushes both on drop.
pub struct TelemetryGuard {
    otel_enabled: bool,
    _worker_guard: Option<WorkerGuard>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.otel_enabled {
            opentelemetry::global::shutdown_tracer_provider();
            tracing::info!("shutdown otel tracer provider");
        }
    }
}

/// Console-only subscriber, filtered by `RUST_LOG`.
pub fn setup_local_tracing() -> AppResult<()> {
    dotenv().ok();
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| AppError::Telemetry(e.to_string()))
}

/// Console plus optional hourly log file, and span export when an OTLP endpoint
/// is configured. Must be called inside a tokio runtime when exporting.
pub fn setup_tracing(telemetry: &TelemetryConfig) -> AppResult<TelemetryGuard> {
    dotenv().ok();

    let (file_writer, worker_guard) = match &telemetry.log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::hourly(dir, "txspout.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (Some(non_blocking), Some(guard))
        }
        None => (None, None),
    };

    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(timer)
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(file_writer.is_none());
    let fmt_layer = match file_writer {
        Some(file_writer) => fmt_layer
            .with_writer(file_writer.and(std::io::stdout))
            .boxed(),
        None => fmt_layer.boxed(),
    };

    let otel_layer = match &telemetry.otlp_endpoint {
        Some(endpoint) => Some(OpenTelemetryLayer::new(init_tracer(endpoint)?)),
        None => None,
    };
    let otel_enabled = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| AppError::Telemetry(e.to_string()))?;

    Ok(TelemetryGuard {
        otel_enabled,
        _worker_guard: worker_guard,
    })
}
