//! # Módulo de Telemetria
//!
//! Logs estruturados via `tracing` e, opcionalmente, exportação dos spans
//! (workflow → step → ação) para um coletor OpenTelemetry.
//!
//! ## Para todos entenderem:
//!
//! Cada execução gera uma árvore de spans:
//!
//! ```text
//! [workflow run_id=...] ──────────────────────────────────>
//!   [step step_id=fill_name role=name] ───────>
//!     [element_action action=type] ─────>
//!   [step step_id=save role=save] ─────────────────>
//! ```
//!
//! Num coletor (Jaeger, Grafana Tempo) dá para ver qual step demorou,
//! quantas tentativas a ação levou e onde o workflow parou.
//!
//! Os logs vão para stderr, para não misturar com o relatório JSON que o
//! comando `run` escreve em stdout.
//!
//! ## Configuração via variáveis de ambiente:
//!
//! - `RUST_LOG`: Filtro de logs (ex: `ui_runner=debug`)
//! - `OTEL_SERVICE_NAME`: Nome do serviço
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: URL do coletor OTLP (gRPC)
//! - `OTEL_TRACES_SAMPLER_ARG`: Taxa de sampling (0.0-1.0)

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

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Nome do serviço nos traces.
    pub service_name: String,

    /// Endpoint OTLP, ex: "http://localhost:4317". Se None, apenas loga.
    pub otlp_endpoint: Option<String>,

    /// Taxa de sampling (0.0 a 1.0).
    pub sampling_ratio: f64,

    pub enable_console_logging: bool,

    /// Nível usado quando `RUST_LOG` não está definido.
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "ui-runner".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// Cria configuração a partir de variáveis de ambiente.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }

        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                config.otlp_endpoint = Some(endpoint);
            }
        }

        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(r) = ratio.parse::<f64>() {
                config.sampling_ratio = r.clamp(0.0, 1.0);
            }
        }

        config
    }

    /// Modo silencioso da CLI: só avisos e erros.
    pub fn quiet(mut self) -> Self {
        self.log_level = Level::WARN;
        self
    }
}

// ============================================================================
// INICIALIZAÇÃO
// ============================================================================

/// Instala o subscriber global.
///
/// ## Retorno:
///
/// - `Ok(Some(Tracer))`: OTLP configurado
/// - `Ok(None)`: Apenas console
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    // Primeiro tenta ler de RUST_LOG, senão usa o padrão.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = init_otlp_tracer(&config.service_name, endpoint, config.sampling_ratio)?;

        // O tipo do fmt layer depende do subscriber abaixo dele: um por ramo.
        let console = config.enable_console_logging.then(|| {
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(OpenTelemetryLayer::new(tracer.clone()))
            .with(console)
            .try_init()?;

        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "Telemetria OTEL inicializada"
        );

        Ok(Some(tracer))
    } else {
        let console = config.enable_console_logging.then(|| {
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
        });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .try_init()?;

        tracing::debug!("Telemetria inicializada (apenas console, sem OTLP)");
        Ok(None)
    }
}

// ============================================================================
// TRACER OTLP
// ============================================================================

fn sampler_for(sampling_ratio: f64) -> Sampler {
    if sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        // Decisão pelo trace ID: spans de um mesmo workflow entram ou saem juntos.
        Sampler::TraceIdRatioBased(sampling_ratio)
    }
}

fn init_otlp_tracer(
    service_name: &str,
    endpoint: &str,
    sampling_ratio: f64,
) -> anyhow::Result<Tracer> {
    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler_for(sampling_ratio))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);

    Ok(tracer)
}

// ============================================================================
// ENCERRAMENTO
// ============================================================================

/// Faz o flush dos spans pendentes. Chamar antes de sair do processo.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
    tracing::debug!("Telemetria OTEL encerrada");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "ui-runner");
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.sampling_ratio, 1.0);
        assert!(config.enable_console_logging);
    }

    #[test]
    fn test_quiet_raises_level() {
        let config = TelemetryConfig::default().quiet();
        assert_eq!(config.log_level, Level::WARN);
    }

    #[test]
    fn test_init_console_only() {
        // Único teste que instala o subscriber global.
        let tracer = init_telemetry(TelemetryConfig::default().quiet()).unwrap();
        assert!(tracer.is_none());
        assert!(init_telemetry(TelemetryConfig::default()).is_err());
    }

    #[test]
    fn test_sampler_bounds() {
        assert!(matches!(sampler_for(1.0), Sampler::AlwaysOn));
        assert!(matches!(sampler_for(0.0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(0.25), Sampler::TraceIdRatioBased(r) if r == 0.25));
    }
}
