// Telemetry setup
//
// Console logging via tracing-subscriber plus optional OTLP trace and metric
// exporters, shared by the server and worker binaries.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{MetricError, SdkMeterProvider},
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider, Tracer},
    Resource,
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_SERVICE_NAME: &str = "calendar";
const DEFAULT_LOG_FILTER: &str = "info";

/// Logging and tracing settings for one process
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: Option<String>,
    /// OTLP gRPC endpoint, e.g. "http://localhost:4317". Trace and metric export are off when unset.
    pub otlp_endpoint: Option<String>,
    /// Deployment environment, e.g. "production"
    pub environment: Option<String>,
    pub enable_console: bool,
    /// EnvFilter directive, e.g. "info" or "calendar_worker=debug"
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: None,
            otlp_endpoint: None,
            environment: None,
            enable_console: true,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Defaults with a specific service name
    pub fn for_service(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }

    /// Read settings from the environment, falling back to `default_service` for the name.
    ///
    /// - `OTEL_SERVICE_NAME`
    /// - `OTEL_SERVICE_VERSION`
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`
    /// - `OTEL_ENVIRONMENT`
    /// - `RUST_LOG`, then `LOG_LEVEL`
    pub fn from_env(default_service: &str) -> Self {
        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| default_service.to_string()),
            service_version: std::env::var("OTEL_SERVICE_VERSION").ok(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            environment: std::env::var("OTEL_ENVIRONMENT").ok(),
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
        }
    }

    /// Set the version unless the environment already did
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version.get_or_insert(version.into());
        self
    }

    fn resource(&self) -> Resource {
        let mut attrs = vec![KeyValue::new("service.name", self.service_name.clone())];
        if let Some(version) = &self.service_version {
            attrs.push(KeyValue::new("service.version", version.clone()));
        }
        if let Some(env) = &self.environment {
            attrs.push(KeyValue::new("deployment.environment", env.clone()));
        }
        Resource::builder().with_attributes(attrs).build()
    }

    fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Flushes and shuts down the tracer and meter providers on drop. Hold it for the life of `main`.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shutdown tracer provider: {:?}", e);
            }
        }
        if let Some(meter_provider) = self.meter_provider.take() {
            if let Err(e) = meter_provider.shutdown() {
                eprintln!("Failed to shutdown meter provider: {:?}", e);
            }
        }
    }
}

/// Install the global tracing subscriber and, with an OTLP endpoint, the
/// global meter provider that `OtelMetrics::global` reads from.
///
/// ```ignore
/// let _guard = init_telemetry(TelemetryConfig::from_env("calendar-server"));
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let console_layer = config.enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(config.env_filter())
    });

    let (provider, otel_layer, otel_status) = match &config.otlp_endpoint {
        Some(endpoint) => {
            match build_otlp_tracer(endpoint, config.resource(), &config.service_name) {
                Ok((provider, tracer)) => (
                    Some(provider),
                    Some(tracing_opentelemetry::layer().with_tracer(tracer)),
                    Some(Ok(endpoint.clone())),
                ),
                Err(e) => (None, None, Some(Err(e.to_string()))),
            }
        }
        None => (None, None, None),
    };

    let (meter_provider, metrics_status) = match &config.otlp_endpoint {
        Some(endpoint) => match build_otlp_meter_provider(endpoint, config.resource()) {
            Ok(meter_provider) => {
                opentelemetry::global::set_meter_provider(meter_provider.clone());
                (Some(meter_provider), Some(Ok(())))
            }
            Err(e) => (None, Some(Err(e.to_string()))),
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(otel_layer)
        .init();

    // Only loggable once the subscriber exists
    match otel_status {
        Some(Ok(endpoint)) => tracing::info!(%endpoint, "OpenTelemetry tracing enabled"),
        Some(Err(error)) => {
            tracing::warn!(%error, "Failed to initialize OTLP tracer, continuing without export")
        }
        None => tracing::debug!("OpenTelemetry tracing disabled"),
    }
    match metrics_status {
        Some(Ok(())) => tracing::info!("OpenTelemetry metrics enabled"),
        Some(Err(error)) => {
            tracing::warn!(%error, "Failed to initialize OTLP metrics, counters are not exported")
        }
        None => tracing::debug!("OpenTelemetry metrics disabled"),
    }

    TelemetryGuard {
        provider,
        meter_provider,
    }
}

fn build_otlp_meter_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<SdkMeterProvider, MetricError> {
    let exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;

    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn build_otlp_tracer(
    endpoint: &str,
    resource: Resource,
    service_name: &str,
) -> Result<(SdkTracerProvider, Tracer), opentelemetry::trace::TraceError> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = provider.tracer(service_name.to_string());
    Ok((provider, tracer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "calendar");
        assert!(config.otlp_endpoint.is_none());
        assert!(config.enable_console);
    }

    #[test]
    fn test_config_for_service() {
        let config = TelemetryConfig::for_service("calendar-worker").with_version("1.0.0");
        assert_eq!(config.service_name, "calendar-worker");
        assert_eq!(config.service_version.as_deref(), Some("1.0.0"));
    }
}
