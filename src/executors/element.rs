//! # Executor de Ações de Elemento
//!
//! Executa click, double click, type, clear, select, check, uncheck,
//! drag_to e upload sobre o elemento já resolvido e classificado, com retry.
//!
//! ## Cada tentativa faz, nesta ordem:
//!
//! 1. **Já satisfeito?** Se o campo já tem o valor alvo (ou o checkbox já
//!    está no estado pedido), a ação é reconhecida sem tocar na página.
//! 2. **Pré-condições**: visível e habilitado (ações forçadas pulam o
//!    habilitado). Não atendidas contam como falha transitória.
//! 3. **Ação** via driver.
//!
//! ## Digitação com retry
//!
//! Se uma tentativa de `type` falha no meio (o campo re-renderizou, por
//! exemplo), o campo pode ficar com parte do texto. A tentativa seguinte
//! limpa o campo e digita o valor alvo inteiro.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use super::{Ack, ActionError, ActionExecutor, ActionFailed, ActionRequest};
use crate::driver::{Driver, ElementInfo, ElementRef};
use crate::protocol::{Action, Preconditions};
use crate::retry::{AttemptError, RetryExecutor};

/// Executor das ações que precisam de um elemento alvo.
#[derive(Debug, Default)]
pub struct ElementExecutor;

impl ElementExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// Valor que o campo deve ter ao fim de um `type`.
fn type_target(initial: &str, text: &str, clear: bool) -> String {
    if clear {
        text.to_string()
    } else {
        format!("{}{}", initial, text)
    }
}

/// Dados da ação calculados uma vez, antes das tentativas.
#[derive(Debug, Clone, Copy, Default)]
struct AttemptPlan<'a> {
    /// Valor final esperado de um `type`.
    type_target: Option<&'a str>,
    /// Onde soltar, num `drag_to`.
    destination: Option<&'a ElementRef>,
    /// Caminho absoluto do arquivo, num `upload`.
    file: Option<&'a Path>,
}

fn already_satisfied(action: &Action, info: &ElementInfo, type_target: Option<&str>) -> bool {
    match action {
        Action::Type { .. } => type_target.is_some_and(|t| info.value.as_deref() == Some(t)),
        Action::Clear => info.value.as_deref().map_or(true, str::is_empty),
        Action::Select { option } => {
            info.value.as_deref() == Some(option.as_str())
                || info.selected_label.as_deref() == Some(option.as_str())
        }
        Action::Check => info.checked == Some(true),
        Action::Uncheck => info.checked == Some(false),
        _ => false,
    }
}

fn check_preconditions(info: &ElementInfo, preconditions: Preconditions) -> Result<(), ActionError> {
    if preconditions.visible && !info.visible {
        return Err(ActionError::PreconditionNotMet("elemento não está visível".to_string()));
    }
    if preconditions.enabled && !info.enabled {
        return Err(ActionError::PreconditionNotMet("elemento desabilitado".to_string()));
    }
    Ok(())
}

async fn type_chars(
    driver: &dyn Driver,
    element: &ElementRef,
    text: &str,
    delay_ms: Option<u64>,
) -> Result<(), AttemptError<ActionError>> {
    match delay_ms {
        Some(delay) if delay > 0 => {
            let mut buf = [0u8; 4];
            for c in text.chars() {
                driver.type_text(element, c.encode_utf8(&mut buf)).await?;
                sleep(Duration::from_millis(delay)).await;
            }
            Ok(())
        }
        _ => Ok(driver.type_text(element, text).await?),
    }
}

/// Uma tentativa. Retorna `true` quando o elemento já estava no estado alvo.
async fn attempt_once(
    driver: &dyn Driver,
    element: &ElementRef,
    action: &Action,
    preconditions: Preconditions,
    plan: AttemptPlan<'_>,
    attempt: u32,
) -> Result<bool, AttemptError<ActionError>> {
    let info = driver.describe(element).await?;
    let type_target = plan.type_target;

    if already_satisfied(action, &info, type_target) {
        return Ok(true);
    }

    check_preconditions(&info, preconditions).map_err(ActionError::into_attempt)?;

    match action {
        Action::Click { force } => driver.click(element, *force).await?,
        Action::DoubleClick { force } => driver.double_click(element, *force).await?,
        Action::Type {
            text,
            clear,
            delay_ms,
        } => {
            let current = info.value.unwrap_or_default();
            if attempt == 1 && !*clear {
                type_chars(driver, element, text, *delay_ms).await?;
            } else {
                if !current.is_empty() {
                    driver.clear(element).await?;
                }
                let target = type_target.unwrap_or(text.as_str());
                if attempt > 1 {
                    debug!(element = %element, attempt, "Redigitando valor completo");
                }
                type_chars(driver, element, target, *delay_ms).await?;
            }
        }
        Action::Clear => driver.clear(element).await?,
        Action::Select { option } => driver.select_option(element, option).await?,
        Action::Check => driver.set_checked(element, true).await?,
        Action::Uncheck => driver.set_checked(element, false).await?,
        Action::DragTo { .. } => match plan.destination {
            Some(destination) => driver.drag_to(element, destination).await?,
            None => {
                return Err(AttemptError::Fatal(ActionError::Unsupported(
                    "drag_to sem destino resolvido".to_string(),
                )))
            }
        },
        Action::Upload { path } => {
            let file = plan.file.unwrap_or_else(|| Path::new(path));
            driver.upload_file(element, file).await?
        }
        other => {
            return Err(AttemptError::Fatal(ActionError::Unsupported(other.name().to_string())));
        }
    }

    Ok(false)
}

#[async_trait]
impl ActionExecutor for ElementExecutor {
    fn can_handle(&self, action: &Action) -> bool {
        action.needs_target()
    }

    #[instrument(
        name = "element_action",
        skip(self, driver, request),
        fields(step_id = %request.step_id, action = %request.action)
    )]
    async fn perform(
        &self,
        driver: &dyn Driver,
        request: ActionRequest<'_>,
    ) -> Result<Ack, ActionFailed> {
        let action = request.action;
        let Some(element) = request.element else {
            return Err(ActionFailed {
                action: action.name().to_string(),
                attempts: 0,
                last_error: ActionError::Unsupported(format!("{} sem elemento alvo", action)),
            });
        };

        let target = match action {
            Action::Type { text, clear, .. } => {
                let initial = match driver.describe(element).await {
                    Ok(info) => info.value.unwrap_or_default(),
                    Err(_) => String::new(),
                };
                Some(type_target(&initial, text, *clear))
            }
            _ => None,
        };
        let file = match action {
            Action::Upload { path } => match tokio::fs::canonicalize(path).await {
                Ok(absolute) => Some(absolute),
                Err(e) => {
                    return Err(ActionFailed {
                        action: action.name().to_string(),
                        attempts: 0,
                        last_error: ActionError::MissingFile(format!("{} ({})", path, e)),
                    })
                }
            },
            _ => None,
        };
        let plan = AttemptPlan {
            type_target: target.as_deref(),
            destination: request.destination,
            file: file.as_deref(),
        };
        let preconditions = request.preconditions;

        let mut retry = RetryExecutor::new(request.policy.clone());
        if let Some(budget) = request.budget {
            retry = retry.with_budget(budget);
        }

        let outcome = retry
            .execute(request.step_id, move |attempt| async move {
                attempt_once(driver, element, action, preconditions, plan, attempt).await
            })
            .await;

        match outcome {
            Ok(done) => {
                if done.value {
                    info!(element = %element, "Elemento já estava no estado alvo");
                }
                Ok(Ack {
                    attempts: done.attempts,
                    already_satisfied: done.value,
                })
            }
            Err(exhausted) => Err(ActionFailed {
                action: action.name().to_string(),
                attempts: exhausted.attempts,
                last_error: exhausted.error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDriver, MemoryElement};
    use crate::driver::DriverError;
    use crate::limits::RetryCounter;
    use crate::protocol::RetryPolicy;

    fn request<'a>(
        element: &'a ElementRef,
        action: &'a Action,
        policy: &'a RetryPolicy,
    ) -> ActionRequest<'a> {
        ActionRequest {
            step_id: "s1",
            element: Some(element),
            destination: None,
            action,
            preconditions: action.default_preconditions(),
            policy,
            budget: None,
        }
    }

    fn type_action(text: &str, clear: bool) -> Action {
        Action::Type {
            text: text.into(),
            clear,
            delay_ms: None,
        }
    }

    #[tokio::test]
    async fn test_click_succeeds_first_try() {
        let driver = MemoryDriver::from_elements(vec![MemoryElement::new("btn", "button")]);
        let el = ElementRef::new("btn");
        let action = Action::Click { force: false };
        let policy = RetryPolicy::new(3, 1);

        let ack = ElementExecutor::new()
            .perform(&driver, request(&el, &action, &policy))
            .await
            .unwrap();

        assert_eq!(
            ack,
            Ack {
                attempts: 1,
                already_satisfied: false
            }
        );
        assert_eq!(driver.actions(), vec!["click btn"]);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let driver = MemoryDriver::from_elements(vec![MemoryElement::new("btn", "button")]);
        driver.fail_next("btn", DriverError::Intercepted("#btn".into()), 2);
        let el = ElementRef::new("btn");
        let action = Action::Click { force: false };
        let policy = RetryPolicy::new(3, 1);

        let ack = ElementExecutor::new()
            .perform(&driver, request(&el, &action, &policy))
            .await
            .unwrap();

        assert_eq!(ack.attempts, 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_reports_exact_attempts() {
        let driver = MemoryDriver::from_elements(vec![MemoryElement::new("btn", "button")]);
        driver.fail_next("btn", DriverError::Detached("#btn".into()), 10);
        let el = ElementRef::new("btn");
        let action = Action::Click { force: false };
        let policy = RetryPolicy::new(4, 1);

        let failed = ElementExecutor::new()
            .perform(&driver, request(&el, &action, &policy))
            .await
            .unwrap_err();

        assert_eq!(failed.attempts, 4);
        assert_eq!(failed.action, "click");
        assert!(matches!(failed.last_error, ActionError::Driver(DriverError::Detached(_))));
        assert!(driver.actions().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_driver_error_is_not_retried() {
        let driver = MemoryDriver::from_elements(vec![MemoryElement::new("btn", "button")]);
        driver.fail_next("btn", DriverError::Backend("session lost".into()), 5);
        let el = ElementRef::new("btn");
        let action = Action::Click { force: false };
        let policy = RetryPolicy::new(5, 1);

        let failed = ElementExecutor::new()
            .perform(&driver, request(&el, &action, &policy))
            .await
            .unwrap_err();
        assert_eq!(failed.attempts, 1);
    }

    #[tokio::test]
    async fn test_disabled_element_fails_precondition_unless_forced() {
        let driver = MemoryDriver::from_elements(vec![MemoryElement::new("btn", "button").disabled()]);
        let el = ElementRef::new("btn");
        let policy = RetryPolicy::new(2, 1);

        let plain = Action::Click { force: false };
        let failed = ElementExecutor::new()
            .perform(&driver, request(&el, &plain, &policy))
            .await
            .unwrap_err();
        assert_eq!(failed.attempts, 2);
        assert!(matches!(failed.last_error, ActionError::PreconditionNotMet(_)));

        let forced = Action::Click { force: true };
        let ack = ElementExecutor::new()
            .perform(&driver, request(&el, &forced, &policy))
            .await
            .unwrap();
        assert_eq!(ack.attempts, 1);
    }

    #[tokio::test]
    async fn test_type_already_satisfied_is_not_retyped() {
        let driver = MemoryDriver::from_elements(vec![
            MemoryElement::new("name", "input").value("bot_1")
        ]);
        let el = ElementRef::new("name");
        let action = type_action("bot_1", true);
        let policy = RetryPolicy::new(3, 1);

        let ack = ElementExecutor::new()
            .perform(&driver, request(&el, &action, &policy))
            .await
            .unwrap();

        assert!(ack.already_satisfied);
        assert!(driver.actions().is_empty());
    }

    #[tokio::test]
    async fn test_retry_clears_partial_input_and_retypes() {
        let driver = MemoryDriver::from_elements(vec![MemoryElement::new("msg", "textarea").value("")]);
        driver.partial_type("msg", 5);
        let el = ElementRef::new("msg");
        let action = type_action("Hello from the bot", true);
        let policy = RetryPolicy::new(3, 1);

        let ack = ElementExecutor::new()
            .perform(&driver, request(&el, &action, &policy))
            .await
            .unwrap();

        assert_eq!(ack.attempts, 2);
        assert_eq!(driver.value_of("msg").as_deref(), Some("Hello from the bot"));
    }

    #[tokio::test]
    async fn test_append_mode_keeps_initial_value_on_retry() {
        let driver = MemoryDriver::from_elements(vec![MemoryElement::new("q", "input").value("foo")]);
        driver.partial_type("q", 1);
        let el = ElementRef::new("q");
        let action = type_action("bar", false);
        let policy = RetryPolicy::new(2, 1);

        ElementExecutor::new()
            .perform(&driver, request(&el, &action, &policy))
            .await
            .unwrap();

        assert_eq!(driver.value_of("q").as_deref(), Some("foobar"));
    }

    #[tokio::test]
    async fn test_check_and_select_are_idempotent() {
        let driver = MemoryDriver::from_elements(vec![
            MemoryElement::new("agree", "input").attr("type", "checkbox").checked(true),
            MemoryElement::new("lang", "select")
                .options(&[("en", "English"), ("pt", "Português")])
                .value("en"),
        ]);
        let policy = RetryPolicy::new(1, 0);

        let agree = ElementRef::new("agree");
        let check = Action::Check;
        let ack = ElementExecutor::new()
            .perform(&driver, request(&agree, &check, &policy))
            .await
            .unwrap();
        assert!(ack.already_satisfied);

        let lang = ElementRef::new("lang");
        let select = Action::Select { option: "pt".into() };
        let ack = ElementExecutor::new()
            .perform(&driver, request(&lang, &select, &policy))
            .await
            .unwrap();
        assert!(!ack.already_satisfied);
        assert_eq!(driver.value_of("lang").as_deref(), Some("pt"));

        // Pelo label da opção já selecionada.
        let by_label = Action::Select {
            option: "Português".into(),
        };
        let ack = ElementExecutor::new()
            .perform(&driver, request(&lang, &by_label, &policy))
            .await
            .unwrap();
        assert!(ack.already_satisfied);
    }

    #[tokio::test]
    async fn test_budget_stops_retries_early() {
        let driver = MemoryDriver::from_elements(vec![MemoryElement::new("btn", "button")]);
        driver.fail_next("btn", DriverError::Intercepted("#btn".into()), 10);
        let el = ElementRef::new("btn");
        let action = Action::Click { force: false };
        let policy = RetryPolicy::new(5, 1);
        let budget = RetryCounter::new(0);

        let mut req = request(&el, &action, &policy);
        req.budget = Some(&budget);
        let failed = ElementExecutor::new().perform(&driver, req).await.unwrap_err();

        assert_eq!(failed.attempts, 1);
    }

    #[tokio::test]
    async fn test_drag_to_destination_with_retry() {
        let driver = MemoryDriver::from_elements(vec![
            MemoryElement::new("item", "li"),
            MemoryElement::new("canvas", "div"),
        ]);
        driver.fail_next("item", DriverError::Intercepted("#item".into()), 1);
        let item = ElementRef::new("item");
        let canvas = ElementRef::new("canvas");
        let action = Action::DragTo {
            target: crate::protocol::LocatorSpec::new("canvas", vec![]),
        };
        let policy = RetryPolicy::new(3, 1);

        let mut req = request(&item, &action, &policy);
        req.destination = Some(&canvas);
        let ack = ElementExecutor::new().perform(&driver, req).await.unwrap();

        assert_eq!(ack.attempts, 2);
        assert_eq!(driver.actions(), vec!["drag item canvas"]);

        // Sem destino resolvido não há o que tentar de novo.
        let failed = ElementExecutor::new()
            .perform(&driver, request(&item, &action, &policy))
            .await
            .unwrap_err();
        assert_eq!(failed.attempts, 1);
        assert!(matches!(failed.last_error, ActionError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_upload_checks_file_before_attempting() {
        let driver = MemoryDriver::from_elements(vec![
            MemoryElement::new("attachment", "input").attr("type", "file"),
        ]);
        let el = ElementRef::new("attachment");
        let policy = RetryPolicy::new(3, 1);

        let file = tempfile::NamedTempFile::new().unwrap();
        let upload = Action::Upload {
            path: file.path().to_string_lossy().into_owned(),
        };
        let ack = ElementExecutor::new()
            .perform(&driver, request(&el, &upload, &policy))
            .await
            .unwrap();
        assert_eq!(ack.attempts, 1);
        let expected = file.path().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(driver.value_of("attachment"), Some(expected));

        let missing = Action::Upload {
            path: "/nonexistent/bots.csv".into(),
        };
        let failed = ElementExecutor::new()
            .perform(&driver, request(&el, &missing, &policy))
            .await
            .unwrap_err();
        assert_eq!(failed.attempts, 0);
        assert!(matches!(failed.last_error, ActionError::MissingFile(_)));
    }
}
