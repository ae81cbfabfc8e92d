//! Módulo de Retry com RetryPolicy.
//!
//! Laço genérico de tentativas usado pelos executores de ação:
//! - cada tentativa recebe o número da tentativa (1-based)
//! - falhas `Transient` são retentadas até `max_attempts`, com delay
//!   multiplicado por `backoff_factor` a cada nova tentativa
//! - falhas `Fatal` interrompem na hora
//! - o número de tentativas reportado é exato

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::limits::RetryCounter;
use crate::protocol::RetryPolicy;

/// Resultado de uma tentativa que falhou.
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Vale tentar de novo.
    Transient(E),
    /// Não adianta tentar de novo.
    Fatal(E),
}

impl<E> AttemptError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Transient(e) | Self::Fatal(e) => e,
        }
    }
}

/// Sucesso, com o número de tentativas usadas.
#[derive(Debug, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

/// Falha definitiva: último erro e total de tentativas.
#[derive(Debug, PartialEq)]
pub struct RetryExhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Executor de retry com backoff.
pub struct RetryExecutor<'a> {
    policy: RetryPolicy,
    budget: Option<&'a RetryCounter>,
}

impl<'a> RetryExecutor<'a> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            budget: None,
        }
    }

    /// Limita os retries pelo orçamento compartilhado do workflow.
    pub fn with_budget(mut self, budget: &'a RetryCounter) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executa uma operação com retry conforme a política.
    ///
    /// # Argumentos
    /// * `label` - Identificação para logging (step, ação)
    /// * `operation` - Closure assíncrona que recebe o número da tentativa
    ///
    /// # Retorno
    /// * `Ok(RetryOutcome)` - Sucesso, com as tentativas usadas
    /// * `Err(RetryExhausted)` - Último erro após todas as tentativas
    pub async fn execute<T, E, F, Fut>(
        &self,
        label: &str,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, RetryExhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
        E: fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut delay_ms = self.policy.delay_ms as f64;
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(label = %label, attempt, "Retry bem sucedido");
                    }
                    return Ok(RetryOutcome {
                        value,
                        attempts: attempt,
                    });
                }
                Err(AttemptError::Fatal(error)) => {
                    warn!(label = %label, attempt, error = %error, "Falha não retentável");
                    return Err(RetryExhausted {
                        error,
                        attempts: attempt,
                    });
                }
                Err(AttemptError::Transient(error)) => {
                    if attempt >= max_attempts {
                        warn!(
                            label = %label,
                            attempt,
                            max_attempts,
                            error = %error,
                            "Todas as tentativas esgotadas"
                        );
                        return Err(RetryExhausted {
                            error,
                            attempts: attempt,
                        });
                    }

                    if let Some(budget) = self.budget {
                        if !budget.try_increment() {
                            warn!(
                                label = %label,
                                attempt,
                                limit = budget.limit(),
                                error = %error,
                                "Orçamento de retries do workflow esgotado"
                            );
                            return Err(RetryExhausted {
                                error,
                                attempts: attempt,
                            });
                        }
                    }

                    warn!(
                        label = %label,
                        attempt,
                        max_attempts,
                        delay_ms = delay_ms as u64,
                        error = %error,
                        "Tentativa falhou, aguardando retry"
                    );

                    sleep(Duration::from_millis(delay_ms as u64)).await;
                    delay_ms *= self.policy.backoff_factor.max(0.0);
                    attempt += 1;
                }
            }
        }
    }
}
