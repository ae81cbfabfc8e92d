//! # Módulo de Limites de Execução
//!
//! Define timeouts, intervalos de polling e orçamentos que protegem a
//! execução contra suítes que nunca terminariam.
//!
//! ## Para todos entenderem:
//!
//! Uma UI dinâmica pode simplesmente nunca mostrar o botão esperado.
//! Sem limites, o runner ficaria esperando para sempre. Aqui definimos:
//! - Quanto tempo esperar um elemento aparecer (timeout)
//! - De quanto em quanto tempo olhar de novo (poll interval)
//! - Quantos retries o workflow inteiro pode gastar
//! - Quanto tempo um workflow pode durar no total
//!
//! ## Limites configuráveis:
//!
//! | Limite                | Padrão  | Descrição                              |
//! |-----------------------|---------|----------------------------------------|
//! | default_timeout       | 10s     | Espera padrão por elementos/condições  |
//! | short_timeout         | 5s      | Steps com `on_failure: ignore`         |
//! | long_timeout          | 30s     | Steps de `navigate`                    |
//! | poll_interval         | 100ms   | Intervalo entre rodadas de polling     |
//! | max_steps             | 100     | Máximo de steps por workflow           |
//! | max_retries_total     | 50      | Máximo de retries no workflow todo     |
//! | max_workflow_time     | 300s    | Orçamento de tempo por workflow        |
//! | retry (padrão)        | 3×1000ms| Política de retry de ações             |

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::RetryPolicy;

// ============================================================================
// LIMITES PADRÃO (CONSTANTES)
// ============================================================================

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_SHORT_TIMEOUT_MS: u64 = 5_000;

/// Usado em navegação e no primeiro carregamento da página.
pub const DEFAULT_LONG_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Número máximo de steps em um workflow.
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Número máximo de retries no workflow inteiro.
/// Evita que uma página quebrada consuma o orçamento da suíte.
pub const DEFAULT_MAX_RETRIES_TOTAL: u32 = 50;

pub const DEFAULT_MAX_WORKFLOW_SECS: u64 = 300;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

// ============================================================================
// ESTRUTURA DE LIMITES
// ============================================================================

/// Configuração de limites de execução.
///
/// ## Exemplo de uso:
///
/// ```rust
/// use ui_runner::limits::ExecutionLimits;
/// use std::time::Duration;
///
/// let limits = ExecutionLimits {
///     default_timeout: Duration::from_secs(2),
///     ..Default::default()
/// };
/// assert_eq!(limits.max_steps, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Espera por elementos e condições quando o step não define `timeout_ms`.
    pub default_timeout: Duration,

    pub short_timeout: Duration,

    pub long_timeout: Duration,

    /// Intervalo entre rodadas de resolução e de checagem de condições.
    pub poll_interval: Duration,

    /// Se excedido, a suíte é rejeitada na validação.
    pub max_steps: usize,

    /// Soma dos retries de todos os steps de um workflow.
    pub max_retries_total: u32,

    /// Checado antes de cada step.
    pub max_workflow_time: Duration,

    /// Política usada por steps sem `retry`.
    pub default_retry: RetryPolicy,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            short_timeout: Duration::from_millis(DEFAULT_SHORT_TIMEOUT_MS),
            long_timeout: Duration::from_millis(DEFAULT_LONG_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_steps: DEFAULT_MAX_STEPS,
            max_retries_total: DEFAULT_MAX_RETRIES_TOTAL,
            max_workflow_time: Duration::from_secs(DEFAULT_MAX_WORKFLOW_SECS),
            default_retry: RetryPolicy::new(DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|val| val.parse().ok())
}

impl ExecutionLimits {
    /// Cria limites a partir de variáveis de ambiente.
    ///
    /// Variáveis suportadas:
    /// - `RUNNER_TIMEOUT_MS`: Timeout padrão
    /// - `RUNNER_POLL_INTERVAL_MS`: Intervalo de polling
    /// - `RUNNER_MAX_STEPS`: Máximo de steps
    /// - `RUNNER_MAX_RETRIES`: Máximo retries por workflow
    /// - `RUNNER_MAX_WORKFLOW_SECS`: Orçamento de tempo por workflow
    /// - `RUNNER_RETRY_ATTEMPTS` / `RUNNER_RETRY_DELAY_MS`: Retry padrão
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Some(ms) = env_parse::<u64>("RUNNER_TIMEOUT_MS") {
            limits.default_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse::<u64>("RUNNER_POLL_INTERVAL_MS") {
            limits.poll_interval = Duration::from_millis(ms);
        }

        if let Some(n) = env_parse("RUNNER_MAX_STEPS") {
            limits.max_steps = n;
        }

        if let Some(n) = env_parse("RUNNER_MAX_RETRIES") {
            limits.max_retries_total = n;
        }

        if let Some(secs) = env_parse::<u64>("RUNNER_MAX_WORKFLOW_SECS") {
            limits.max_workflow_time = Duration::from_secs(secs);
        }

        if let Some(n) = env_parse::<u32>("RUNNER_RETRY_ATTEMPTS") {
            limits.default_retry.max_attempts = n.max(1);
        }

        if let Some(ms) = env_parse("RUNNER_RETRY_DELAY_MS") {
            limits.default_retry.delay_ms = ms;
        }

        limits
    }

    /// Limites restritivos para testes.
    pub fn strict() -> Self {
        Self {
            default_timeout: Duration::from_secs(2),
            short_timeout: Duration::from_secs(1),
            long_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            max_steps: 10,
            max_retries_total: 5,
            max_workflow_time: Duration::from_secs(30),
            default_retry: RetryPolicy::new(2, 100),
        }
    }

    /// Limites permissivos para ambientes lentos.
    pub fn relaxed() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            short_timeout: Duration::from_secs(10),
            long_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(250),
            max_steps: 500,
            max_retries_total: 200,
            max_workflow_time: Duration::from_secs(3600), // 1 hora
            default_retry: RetryPolicy::new(5, 1_000),
        }
    }

    /// Preset pelo nome usado na CLI (`default`, `strict`, `relaxed`).
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::from_env()),
            "strict" => Some(Self::strict()),
            "relaxed" => Some(Self::relaxed()),
            _ => None,
        }
    }
}

// ============================================================================
// VALIDAÇÃO DE LIMITES
// ============================================================================

#[derive(Debug)]
pub struct LimitValidationResult {
    pub passed: bool,
    pub violations: Vec<LimitViolation>,
}

/// Violação de limite detectada.
#[derive(Debug, Clone)]
pub struct LimitViolation {
    pub limit_name: String,
    pub limit_value: String,
    /// Valor encontrado na suíte.
    pub actual_value: String,
    pub message: String,
}

/// Valida se um workflow está dentro dos limites.
///
/// ## Parâmetros:
/// - `workflow`: Nome do workflow (para a mensagem)
/// - `step_count`: Número de steps do workflow
/// - `limits`: Configuração de limites
pub fn validate_limits(
    workflow: &str,
    step_count: usize,
    limits: &ExecutionLimits,
) -> LimitValidationResult {
    let mut violations = Vec::new();

    if step_count > limits.max_steps {
        violations.push(LimitViolation {
            limit_name: "max_steps".to_string(),
            limit_value: limits.max_steps.to_string(),
            actual_value: step_count.to_string(),
            message: format!(
                "Workflow '{}' tem {} steps, máximo permitido é {}",
                workflow, step_count, limits.max_steps
            ),
        });
    }

    LimitValidationResult {
        passed: violations.is_empty(),
        violations,
    }
}

// ============================================================================
// CONTADOR DE RETRIES (RUNTIME)
// ============================================================================

/// Contador de retries em tempo de execução.
///
/// Compartilhado por todos os steps de um workflow; o executor pede
/// permissão antes de cada nova tentativa.
#[derive(Debug, Default)]
pub struct RetryCounter {
    count: std::sync::atomic::AtomicU32,
    limit: u32,
}

impl RetryCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            count: std::sync::atomic::AtomicU32::new(0),
            limit,
        }
    }

    /// Tenta incrementar o contador.
    /// Retorna `false` se excedeu (retry não deve ser feito).
    pub fn try_increment(&self) -> bool {
        let current = self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        current < self.limit
    }

    pub fn current(&self) -> u32 {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.default_timeout, Duration::from_secs(10));
        assert_eq!(limits.short_timeout, Duration::from_secs(5));
        assert_eq!(limits.long_timeout, Duration::from_secs(30));
        assert_eq!(limits.max_steps, 100);
        assert_eq!(limits.default_retry.max_attempts, 3);
        assert_eq!(limits.default_retry.delay_ms, 1000);
    }

    #[test]
    fn test_presets() {
        assert_eq!(ExecutionLimits::preset("strict").unwrap().max_steps, 10);
        assert_eq!(ExecutionLimits::preset("relaxed").unwrap().max_steps, 500);
        assert!(ExecutionLimits::preset("turbo").is_none());
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("RUNNER_POLL_INTERVAL_MS", "25");
        std::env::set_var("RUNNER_RETRY_ATTEMPTS", "0");
        let limits = ExecutionLimits::from_env();
        std::env::remove_var("RUNNER_POLL_INTERVAL_MS");
        std::env::remove_var("RUNNER_RETRY_ATTEMPTS");

        assert_eq!(limits.poll_interval, Duration::from_millis(25));
        // Pelo menos uma tentativa sempre acontece.
        assert_eq!(limits.default_retry.max_attempts, 1);
    }

    #[test]
    fn test_validate_limits_ok() {
        let limits = ExecutionLimits::default();
        let result = validate_limits("wf", 50, &limits);
        assert!(result.passed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_validate_limits_steps_exceeded() {
        let limits = ExecutionLimits::strict();
        let result = validate_limits("wf", 11, &limits);
        assert!(!result.passed);
        assert_eq!(result.violations[0].limit_name, "max_steps");
        assert!(result.violations[0].message.contains("wf"));
    }

    #[test]
    fn test_retry_counter() {
        let counter = RetryCounter::new(3);

        assert!(counter.try_increment()); // 1
        assert!(counter.try_increment()); // 2
        assert!(counter.try_increment()); // 3
        assert!(!counter.try_increment()); // 4 - excedeu!

        assert_eq!(counter.current(), 4);
    }
}
