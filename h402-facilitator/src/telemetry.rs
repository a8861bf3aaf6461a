//! Log and trace subscriber setup.
//!
//! Always logs to stdout through `tracing-subscriber`, filtered by `RUST_LOG`
//! (default `info`). With the `telemetry` feature, spans and metrics are also
//! exported over OTLP when any `OTEL_EXPORTER_OTLP_*` variable is set.

#[cfg(feature = "telemetry")]
use opentelemetry::trace::TracerProvider as _;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installed subscriber and exporters. Flushes exporters on drop.
#[derive(Debug)]
pub struct Telemetry {
    #[cfg(feature = "telemetry")]
    providers: Option<otel::Providers>,
}

impl Telemetry {
    /// Installs the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if an OTLP exporter cannot be built or a global
    /// subscriber is already installed.
    pub fn init() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        #[cfg(feature = "telemetry")]
        if let Some(protocol) = otel::Protocol::from_env() {
            let providers = otel::Providers::new(protocol)?;
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_opentelemetry::MetricsLayer::new(providers.meter.clone()))
                .with(tracing_opentelemetry::OpenTelemetryLayer::new(
                    providers.tracer.tracer(env!("CARGO_PKG_NAME")),
                ))
                .try_init()?;
            tracing::info!(?protocol, "OpenTelemetry export enabled");
            return Ok(Self {
                providers: Some(providers),
            });
        }

        tracing_subscriber::registry()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
        Ok(Self {
            #[cfg(feature = "telemetry")]
            providers: None,
        })
    }
}

#[cfg(feature = "telemetry")]
impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(providers) = &self.providers {
            providers.shutdown();
        }
    }
}

#[cfg(feature = "telemetry")]
mod otel {
    use std::time::Duration;

    use opentelemetry::KeyValue;
    use opentelemetry::global;
    use opentelemetry_otlp::{MetricExporter, SpanExporter};
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
    use opentelemetry_semantic_conventions::SCHEMA_URL;
    use opentelemetry_semantic_conventions::attribute::{
        DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION,
    };

    /// OTLP transport.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(super) enum Protocol {
        HttpProtobuf,
        Grpc,
    }

    impl Protocol {
        pub(super) fn from_env() -> Option<Self> {
            let enabled = ["ENDPOINT", "HEADERS", "PROTOCOL"]
                .iter()
                .any(|suffix| std::env::var(format!("OTEL_EXPORTER_OTLP_{suffix}")).is_ok());
            if !enabled {
                return None;
            }
            match std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
                Ok("grpc") => Some(Self::Grpc),
                _ => Some(Self::HttpProtobuf),
            }
        }
    }

    fn resource() -> Resource {
        let deployment_env =
            std::env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_owned());
        Resource::builder()
            .with_service_name(env!("CARGO_PKG_NAME"))
            .with_schema_url(
                [
                    KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                    KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
                ],
                SCHEMA_URL,
            )
            .build()
    }

    #[derive(Debug)]
    pub(super) struct Providers {
        pub(super) tracer: SdkTracerProvider,
        pub(super) meter: SdkMeterProvider,
    }

    impl Providers {
        pub(super) fn new(
            protocol: Protocol,
        ) -> Result<Self, opentelemetry_otlp::ExporterBuildError> {
            let spans = match protocol {
                Protocol::HttpProtobuf => SpanExporter::builder().with_http().build()?,
                Protocol::Grpc => SpanExporter::builder().with_tonic().build()?,
            };
            let tracer = SdkTracerProvider::builder()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource())
                .with_batch_exporter(spans)
                .build();

            let metrics = match protocol {
                Protocol::HttpProtobuf => MetricExporter::builder().with_http().build()?,
                Protocol::Grpc => MetricExporter::builder().with_tonic().build()?,
            };
            let reader = PeriodicReader::builder(metrics)
                .with_interval(Duration::from_secs(30))
                .build();
            let stdout_reader =
                PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default()).build();
            let meter = SdkMeterProvider::builder()
                .with_resource(resource())
                .with_reader(reader)
                .with_reader(stdout_reader)
                .build();
            global::set_meter_provider(meter.clone());

            Ok(Self { tracer, meter })
        }

        pub(super) fn shutdown(&self) {
            if let Err(err) = self.tracer.shutdown() {
                tracing::warn!(%err, "tracer provider shutdown failed");
            }
            if let Err(err) = self.meter.shutdown() {
                tracing::warn!(%err, "meter provider shutdown failed");
            }
        }
    }
}
