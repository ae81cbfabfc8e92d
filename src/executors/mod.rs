// Module: Executors
// Carry out step actions against the driver, with retry.

pub mod element;
pub mod page;

use async_trait::async_trait;
use thiserror::Error;

use crate::driver::{Driver, DriverError, ElementRef};
use crate::limits::RetryCounter;
use crate::protocol::{Action, Preconditions, RetryPolicy};
use crate::retry::AttemptError;

pub use element::ElementExecutor;
pub use page::PageExecutor;

/// Why a single attempt failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ActionError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("pré-condição não atendida: {0}")]
    PreconditionNotMet(String),

    #[error("ação '{0}' não é tratada por este executor")]
    Unsupported(String),

    #[error("arquivo para upload não encontrado: {0}")]
    MissingFile(String),
}

impl ActionError {
    /// Driver errors keep their own classification; unmet preconditions are retried.
    pub fn into_attempt(self) -> AttemptError<ActionError> {
        match &self {
            Self::Driver(e) if e.is_transient() => AttemptError::Transient(self),
            Self::PreconditionNotMet(_) => AttemptError::Transient(self),
            _ => AttemptError::Fatal(self),
        }
    }
}

impl From<DriverError> for AttemptError<ActionError> {
    fn from(err: DriverError) -> Self {
        ActionError::Driver(err).into_attempt()
    }
}

/// Action acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub attempts: u32,
    /// The element was already in the target state; nothing was done.
    pub already_satisfied: bool,
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("ação '{action}' falhou após {attempts} tentativa(s): {last_error}")]
pub struct ActionFailed {
    pub action: String,
    pub attempts: u32,
    pub last_error: ActionError,
}

/// Everything an executor needs to perform one step's action.
#[derive(Debug, Clone, Copy)]
pub struct ActionRequest<'a> {
    pub step_id: &'a str,
    /// Resolved and classified target, for element actions.
    pub element: Option<&'a ElementRef>,
    /// Resolved drop target, for `drag_to`.
    pub destination: Option<&'a ElementRef>,
    /// Already interpolated.
    pub action: &'a Action,
    pub preconditions: Preconditions,
    pub policy: &'a RetryPolicy,
    /// Workflow-wide retry budget.
    pub budget: Option<&'a RetryCounter>,
}

/// Contract for anything able to carry out an action.
///
/// O trait requer Send + Sync para que o orquestrador guarde executores em `Box<dyn ...>`.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Checks if this executor is responsible for the given action.
    fn can_handle(&self, action: &Action) -> bool;

    async fn perform(
        &self,
        driver: &dyn Driver,
        request: ActionRequest<'_>,
    ) -> Result<Ack, ActionFailed>;
}

/// Default executor set: element actions, then page actions.
pub fn default_executors(base_url: Option<String>) -> Vec<Box<dyn ActionExecutor>> {
    vec![
        Box::new(ElementExecutor::new()),
        Box::new(PageExecutor::new(base_url)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Locator, LocatorSpec};

    #[test]
    fn test_every_action_has_an_executor() {
        let executors = default_executors(None);
        let actions = [
            Action::Click { force: false },
            Action::DoubleClick { force: true },
            Action::Type {
                text: "x".into(),
                clear: true,
                delay_ms: None,
            },
            Action::Clear,
            Action::Select { option: "a".into() },
            Action::Check,
            Action::Uncheck,
            Action::DragTo {
                target: LocatorSpec::new("canvas", vec![Locator::css("#canvas")]),
            },
            Action::Upload { path: "a.csv".into() },
            Action::Navigate { url: "/".into() },
            Action::Wait { duration_ms: 1 },
            Action::PressKey { key: "Enter".into() },
            Action::Verify,
        ];
        for action in &actions {
            let handlers = executors.iter().filter(|e| e.can_handle(action)).count();
            assert_eq!(handlers, 1, "ação {} deve ter exatamente um executor", action);
        }
    }

    #[test]
    fn test_attempt_classification() {
        assert!(matches!(
            ActionError::PreconditionNotMet("x".into()).into_attempt(),
            AttemptError::Transient(_)
        ));
        assert!(matches!(
            AttemptError::from(DriverError::Detached("e".into())),
            AttemptError::Transient(_)
        ));
        assert!(matches!(
            AttemptError::from(DriverError::Backend("down".into())),
            AttemptError::Fatal(_)
        ));
    }
}
