//! Tracing subscriber and optional OpenTelemetry export.
//!
//! Local logging always goes to stdout through `tracing-subscriber`, filtered by
//! `RUST_LOG` (default `info`). When any `OTEL_EXPORTER_OTLP_*` variable is set,
//! spans and metrics are exported over OTLP as well.

use opentelemetry::{KeyValue, global, trace::TracerProvider as _};
use opentelemetry_otlp::ExporterBuildError;
use opentelemetry_sdk::{
    Resource,
    metrics::{MeterProviderBuilder, PeriodicReader, SdkMeterProvider},
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::{
    SCHEMA_URL,
    attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION},
};
use std::env;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, HttpMakeClassifier, TraceLayer,
};
use tracing::Level;
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Layer type returned by [`TelemetryProviders::http_tracing`].
pub type HttpTracing =
    TraceLayer<HttpMakeClassifier, DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse>;

/// Telemetry protocol to use for OTLP export
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TelemetryProtocol {
    HTTP,
    GRPC,
}

impl TelemetryProtocol {
    /// Determines telemetry protocol from environment variables if OTEL is configured
    fn from_env() -> Option<Self> {
        let is_enabled = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
            || env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
            || env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok();
        if !is_enabled {
            return None;
        }
        let protocol = match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Ok("grpc") => TelemetryProtocol::GRPC,
            _ => TelemetryProtocol::HTTP,
        };
        Some(protocol)
    }
}

/// Builder for process-wide telemetry.
#[derive(Debug, Clone)]
pub struct Telemetry {
    name: String,
    version: String,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Generates a semantic OpenTelemetry `Resource` describing this service
    fn resource(&self) -> Resource {
        let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
        Resource::builder()
            .with_service_name(self.name.clone())
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_VERSION, self.version.clone()),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                ],
                SCHEMA_URL,
            )
            .build()
    }

    fn init_meter_provider(
        &self,
        protocol: TelemetryProtocol,
    ) -> Result<SdkMeterProvider, ExporterBuildError> {
        let exporter = opentelemetry_otlp::MetricExporter::builder();
        let exporter = match protocol {
            TelemetryProtocol::HTTP => exporter
                .with_http()
                .with_temporality(opentelemetry_sdk::metrics::Temporality::default())
                .build(),
            TelemetryProtocol::GRPC => exporter
                .with_tonic()
                .with_temporality(opentelemetry_sdk::metrics::Temporality::default())
                .build(),
        };
        let exporter = exporter?;

        let reader = PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(30))
            .build();
        let stdout_reader =
            PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default()).build();

        let meter_provider = MeterProviderBuilder::default()
            .with_resource(self.resource())
            .with_reader(reader)
            .with_reader(stdout_reader)
            .build();
        global::set_meter_provider(meter_provider.clone());
        Ok(meter_provider)
    }

    fn init_tracer_provider(
        &self,
        protocol: TelemetryProtocol,
    ) -> Result<SdkTracerProvider, ExporterBuildError> {
        let exporter = opentelemetry_otlp::SpanExporter::builder();
        let exporter = match protocol {
            TelemetryProtocol::HTTP => exporter.with_http().build(),
            TelemetryProtocol::GRPC => exporter.with_tonic().build(),
        };
        let exporter = exporter?;

        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                1.0,
            ))))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(self.resource())
            .with_batch_exporter(exporter)
            .build();
        Ok(provider)
    }

    /// Installs the global subscriber. Calling it twice keeps the first subscriber.
    ///
    /// If the OTLP exporters cannot be built, only local logging is installed.
    pub fn register(self) -> TelemetryProviders {
        let exporters = TelemetryProtocol::from_env().map(|protocol| {
            let providers = self
                .init_tracer_provider(protocol)
                .and_then(|tracer| Ok((tracer, self.init_meter_provider(protocol)?)));
            (protocol, providers)
        });
        match exporters {
            Some((protocol, Ok((tracer_provider, meter_provider)))) => {
                let tracer = tracer_provider.tracer(self.name.clone());
                let _ = tracing_subscriber::registry()
                    .with(env_filter())
                    .with(tracing_subscriber::fmt::layer())
                    .with(MetricsLayer::new(meter_provider.clone()))
                    .with(OpenTelemetryLayer::new(tracer))
                    .try_init();

                tracing::info!(
                    "OpenTelemetry tracing and metrics exporter is enabled via {:?}",
                    protocol
                );
                TelemetryProviders {
                    tracer_provider: Some(tracer_provider),
                    meter_provider: Some(meter_provider),
                }
            }
            Some((_, Err(error))) => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter())
                    .with(tracing_subscriber::fmt::layer())
                    .try_init();
                tracing::error!(%error, "Failed to build OTLP exporters; logging locally only");
                TelemetryProviders::default()
            }
            None => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter())
                    .with(tracing_subscriber::fmt::layer())
                    .try_init();
                tracing::info!("OpenTelemetry is not enabled");
                TelemetryProviders::default()
            }
        }
    }
}

/// `RUST_LOG` if set and valid, `info` otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Registered providers; flushed and shut down on drop.
#[derive(Default)]
pub struct TelemetryProviders {
    pub tracer_provider: Option<SdkTracerProvider>,
    pub meter_provider: Option<SdkMeterProvider>,
}

impl TelemetryProviders {
    /// Request span layer for the HTTP router.
    pub fn http_tracing(&self) -> HttpTracing {
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::INFO))
    }
}

impl Drop for TelemetryProviders {
    fn drop(&mut self) {
        if let Some(tracer_provider) = self.tracer_provider.as_ref() {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
        if let Some(meter_provider) = self.meter_provider.as_ref() {
            if let Err(err) = meter_provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
    }
}
