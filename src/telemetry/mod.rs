//! # Módulo de Telemetria
//!
//! Logging estruturado via `tracing` com exportação OpenTelemetry
//! opcional. O subscriber global é montado em uma única passada de
//! layers: filtro de nível, console (opcional) e exportação OTLP
//! (opcional, quando há endpoint configurado).
//!
//! ## Variáveis de ambiente:
//!
//! | Variável                       | Efeito                             |
//! |--------------------------------|------------------------------------|
//! | `OTEL_SERVICE_NAME`            | Nome do serviço nos traces         |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT`  | URL do collector (gRPC)            |
//! | `OTEL_TRACES_SAMPLER_ARG`      | Taxa de sampling (0.0 a 1.0)       |
//! | `RUST_LOG`                     | Filtro de nível do console         |
//!
//! `shutdown_telemetry` deve rodar antes do encerramento do processo:
//! o exporter em lote acumula spans em memória e um exit sem flush os
//! perde.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Configuração da telemetria.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Nome do serviço nos traces exportados.
    pub service_name: String,

    /// Endpoint OTLP (gRPC). `None` = apenas console.
    pub otlp_endpoint: Option<String>,

    /// Taxa de sampling (0.0 a 1.0).
    pub sampling_ratio: f64,

    /// Habilita a layer de console.
    pub enable_console_logging: bool,

    /// Nível mínimo quando `RUST_LOG` não está definido.
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "testflow".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

/// Variável de ambiente não vazia.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl TelemetryConfig {
    /// Configuração a partir das variáveis `OTEL_*`, sobre os defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(name) = env_var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        config.otlp_endpoint = env_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        if let Some(ratio) = env_var("OTEL_TRACES_SAMPLER_ARG")
            .and_then(|raw| raw.parse::<f64>().ok())
        {
            config.sampling_ratio = ratio.clamp(0.0, 1.0);
        }

        config
    }
}

/// Sampler correspondente à taxa configurada. Os extremos viram os
/// samplers constantes para evitar o custo do ratio-based.
fn sampler_for(ratio: f64) -> Sampler {
    if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Instala o subscriber global.
///
/// Todas as layers são montadas de uma vez: o filtro de nível
/// (`RUST_LOG` ou o `log_level` da configuração), o console quando
/// habilitado, e a layer OpenTelemetry quando há endpoint. Devolve o
/// tracer quando a exportação está ativa.
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let tracer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => Some(install_exporter(&config, endpoint)?),
        None => None,
    };

    let console = config
        .enable_console_logging
        .then(|| tracing_subscriber::fmt::layer().compact());
    let export = tracer.clone().map(OpenTelemetryLayer::new);

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(export)
        .init();

    if let Some(endpoint) = &config.otlp_endpoint {
        tracing::info!(
            service = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "Trace export enabled"
        );
    }

    Ok(tracer)
}

/// Cria o pipeline de exportação OTLP (gRPC) e registra o provider
/// globalmente, devolvendo um tracer do serviço.
fn install_exporter(config: &TelemetryConfig, endpoint: &str) -> anyhow::Result<Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()?;

    let identity = Resource::new([KeyValue::new(
        "service.name",
        config.service_name.clone(),
    )]);
    let trace_config = sdktrace::Config::default()
        .with_resource(identity)
        .with_id_generator(RandomIdGenerator::default())
        .with_sampler(sampler_for(config.sampling_ratio));

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(trace_config)
        .build();
    let tracer = provider.tracer(config.service_name.clone());

    global::set_tracer_provider(provider);
    Ok(tracer)
}

/// Flush final dos spans pendentes.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "testflow");
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.sampling_ratio, 1.0);
        assert!(config.enable_console_logging);
    }

    #[test]
    fn test_sampling_ratio_clamped() {
        std::env::set_var("OTEL_TRACES_SAMPLER_ARG", "7.5");
        let config = TelemetryConfig::from_env();
        assert_eq!(config.sampling_ratio, 1.0);
        std::env::remove_var("OTEL_TRACES_SAMPLER_ARG");
    }

    #[test]
    fn test_sampler_extremes() {
        assert!(matches!(sampler_for(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(-1.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(1.0), Sampler::AlwaysOn));
        assert!(matches!(sampler_for(2.0), Sampler::AlwaysOn));
        assert!(matches!(sampler_for(0.25), Sampler::TraceIdRatioBased(_)));
    }

    #[test]
    fn test_env_var_helper_ignores_empty() {
        std::env::set_var("TESTFLOW_TELEMETRY_EMPTY_PROBE", "");
        assert_eq!(env_var("TESTFLOW_TELEMETRY_EMPTY_PROBE"), None);
        std::env::remove_var("TESTFLOW_TELEMETRY_EMPTY_PROBE");
    }
}
