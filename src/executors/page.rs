//! # Executor de Ações de Página
//!
//! Ações que não dependem de um elemento resolvido:
//! - `navigate` - Abre uma URL (relativa à `base_url` da suíte)
//! - `wait` - Pausa fixa
//! - `press_key` - Tecla no elemento focado (Enter, Escape, Tab...)
//! - `verify` - Nada; o step só checa as expectativas
//!
//! ## Exemplo no JSON da suíte:
//!
//! ```json
//! {
//!   "id": "open_bot",
//!   "action": { "type": "navigate", "url": "/bots/${bot_id}/edit" }
//! }
//! ```

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, instrument};

use super::{Ack, ActionError, ActionExecutor, ActionFailed, ActionRequest};
use crate::driver::Driver;
use crate::protocol::Action;
use crate::retry::{AttemptError, RetryExecutor};

// ============================================================================
// PAGE EXECUTOR
// ============================================================================

/// Executor para ações de página.
///
/// Guarda apenas a URL base da suíte, então pode ser compartilhado
/// entre workflows sem problemas.
#[derive(Debug, Default)]
pub struct PageExecutor {
    base_url: Option<String>,
}

impl PageExecutor {
    pub fn new(base_url: Option<String>) -> Self {
        Self { base_url }
    }

    /// Resolve `url` contra a URL base.
    ///
    /// URLs absolutas (`http://`, `https://`, `about:`, `file:`) passam intactas.
    pub fn resolve_url(&self, url: &str) -> String {
        let absolute = ["http://", "https://", "about:", "file:", "data:"]
            .iter()
            .any(|scheme| url.starts_with(scheme));
        match (&self.base_url, absolute) {
            (Some(base), false) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            _ => url.to_string(),
        }
    }
}

// ============================================================================
// IMPLEMENTAÇÃO DO TRAIT
// ============================================================================

#[async_trait]
impl ActionExecutor for PageExecutor {
    fn can_handle(&self, action: &Action) -> bool {
        matches!(
            action,
            Action::Navigate { .. } | Action::Wait { .. } | Action::PressKey { .. } | Action::Verify
        )
    }

    /// Executa a ação de página.
    ///
    /// `wait` e `verify` nunca falham. `navigate` e `press_key` usam a mesma
    /// política de retry das ações de elemento.
    #[instrument(
        name = "page_action",
        skip(self, driver, request),
        fields(step_id = %request.step_id, action = %request.action)
    )]
    async fn perform(
        &self,
        driver: &dyn Driver,
        request: ActionRequest<'_>,
    ) -> Result<Ack, ActionFailed> {
        let action = request.action;

        match action {
            Action::Wait { duration_ms } => {
                let start = Instant::now();
                info!(step_id = %request.step_id, duration_ms, "⏳ Aguardando...");
                sleep(Duration::from_millis(*duration_ms)).await;
                info!(
                    step_id = %request.step_id,
                    actual_duration_ms = start.elapsed().as_millis() as u64,
                    "✅ Wait concluído"
                );
                return Ok(Ack {
                    attempts: 1,
                    already_satisfied: false,
                });
            }
            Action::Verify => {
                return Ok(Ack {
                    attempts: 1,
                    already_satisfied: false,
                })
            }
            _ => {}
        }

        let url = match action {
            Action::Navigate { url } => Some(self.resolve_url(url)),
            _ => None,
        };
        let url = url.as_deref();

        let mut retry = RetryExecutor::new(request.policy.clone());
        if let Some(budget) = request.budget {
            retry = retry.with_budget(budget);
        }

        let outcome = retry
            .execute(request.step_id, move |_| async move {
                match (action, url) {
                    (Action::Navigate { .. }, Some(url)) => {
                        info!(url = %url, "Navegando");
                        Ok(driver.navigate(url).await?)
                    }
                    (Action::PressKey { key }, _) => Ok(driver.press_key(key).await?),
                    (other, _) => Err(AttemptError::Fatal(ActionError::Unsupported(
                        other.name().to_string(),
                    ))),
                }
            })
            .await;

        outcome
            .map(|done| Ack {
                attempts: done.attempts,
                already_satisfied: false,
            })
            .map_err(|exhausted| ActionFailed {
                action: action.name().to_string(),
                attempts: exhausted.attempts,
                last_error: exhausted.error,
            })
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryDriver;
    use crate::protocol::RetryPolicy;

    fn request<'a>(action: &'a Action, policy: &'a RetryPolicy) -> ActionRequest<'a> {
        ActionRequest {
            step_id: "page_step",
            element: None,
            destination: None,
            action,
            preconditions: action.default_preconditions(),
            policy,
            budget: None,
        }
    }

    #[test]
    fn test_page_executor_handles_page_actions_only() {
        let executor = PageExecutor::default();
        assert!(executor.can_handle(&Action::Wait { duration_ms: 1 }));
        assert!(executor.can_handle(&Action::Verify));
        assert!(!executor.can_handle(&Action::Click { force: false }));
    }

    #[test]
    fn test_relative_urls_use_base() {
        let executor = PageExecutor::new(Some("https://app.local/".into()));
        assert_eq!(executor.resolve_url("/bots"), "https://app.local/bots");
        assert_eq!(executor.resolve_url("bots/1"), "https://app.local/bots/1");
        assert_eq!(executor.resolve_url("https://other.local/x"), "https://other.local/x");

        let no_base = PageExecutor::new(None);
        assert_eq!(no_base.resolve_url("/bots"), "/bots");
    }

    #[tokio::test]
    async fn test_wait_delays_correctly() {
        let driver = MemoryDriver::from_elements(vec![]);
        let action = Action::Wait { duration_ms: 100 };
        let policy = RetryPolicy::once();
        let start = Instant::now();

        let ack = PageExecutor::default()
            .perform(&driver, request(&action, &policy))
            .await
            .unwrap();

        assert_eq!(ack.attempts, 1);
        assert!(start.elapsed() >= Duration::from_millis(100)); // Deve ter esperado pelo menos 100ms
    }

    #[tokio::test]
    async fn test_navigate_and_press_key_reach_driver() {
        let driver = MemoryDriver::from_elements(vec![]);
        let executor = PageExecutor::new(Some("https://app.local".into()));
        let policy = RetryPolicy::once();

        let navigate = Action::Navigate { url: "/home".into() };
        executor.perform(&driver, request(&navigate, &policy)).await.unwrap();
        assert_eq!(driver.url(), "https://app.local/home");

        let key = Action::PressKey { key: "Escape".into() };
        executor.perform(&driver, request(&key, &policy)).await.unwrap();
        assert_eq!(
            driver.actions(),
            vec!["navigate https://app.local/home", "press_key Escape"]
        );
    }

    #[tokio::test]
    async fn test_element_action_is_rejected() {
        let driver = MemoryDriver::from_elements(vec![]);
        let action = Action::Clear;
        let policy = RetryPolicy::new(3, 1);

        let failed = PageExecutor::default()
            .perform(&driver, request(&action, &policy))
            .await
            .unwrap_err();
        assert_eq!(failed.attempts, 1);
        assert!(matches!(failed.last_error, ActionError::Unsupported(_)));
    }
}
