//! # Módulo de Validação de Suítes
//!
//! Valida a suíte antes da execução, para que erros de definição apareçam
//! antes de abrir o navegador e não no meio de um workflow.
//!
//! ## Para todos entenderem:
//!
//! Uma suíte mal escrita (um step de click sem alvo, uma lista de
//! candidatos vazia, um retry com zero tentativas) falharia de um jeito
//! confuso durante a execução. Aqui a suíte inteira é analisada e TODOS os
//! problemas são reportados de uma vez.
//!
//! ## Validações realizadas:
//!
//! 1. **spec_version**: Verifica se a versão do formato é suportada
//! 2. **Suíte não vazia**: Pelo menos um workflow, cada um com steps
//! 3. **IDs**: Não vazios e únicos dentro do workflow
//! 4. **Alvos**: Ações de elemento precisam de `target`; `within` só com `target`
//! 5. **Candidatos**: Todo `LocatorSpec` tem pelo menos um candidato
//! 6. **Retry**: `max_attempts >= 1` e `backoff_factor >= 0`
//! 7. **Classificação**: Critério com pelo menos uma regra
//! 8. **Limites**: Número de steps dentro de `max_steps`
//! 9. **Upload**: `upload` com caminho não vazio
//!
//! ## Exemplo de uso:
//!
//! ```ignore
//! let suite = loader::load_suite_from_file("suite.json")?;
//!
//! match validate_suite(&suite, &ExecutionLimits::default()) {
//!     Ok(()) => println!("Suíte válida!"),
//!     Err(errors) => {
//!         for err in errors {
//!             eprintln!("[{}] {}", err.code(), err);
//!         }
//!     }
//! }
//! ```

use std::collections::HashSet;
use thiserror::Error;

use crate::errors::ErrorCode;
use crate::limits::{validate_limits, ExecutionLimits};
use crate::protocol::{Action, Expectation, LocatorSpec, Suite, Workflow, WorkflowStep};

// ============================================================================
// TIPOS DE ERRO
// ============================================================================

/// Erros de validação de suíte.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Exemplo: spec_version "2.0" quando só suportamos "0.1"
    #[error("Suíte com spec_version '{version}' não suportada. Versão esperada: {expected}")]
    UnsupportedSpecVersion { version: String, expected: String },

    #[error("Suíte vazia: nenhum workflow definido")]
    EmptySuite,

    #[error("Workflow '{workflow}' não tem steps")]
    EmptyWorkflow { workflow: String },

    #[error("Workflow '{workflow}': step com ID vazio")]
    EmptyStepId { workflow: String },

    #[error("Workflow '{workflow}': step '{step_id}' duplicado")]
    DuplicateStepId { workflow: String, step_id: String },

    /// Exemplo: `click` sem `target`
    #[error("Step '{step_id}': ação '{action}' exige um target")]
    MissingTarget { step_id: String, action: String },

    /// `within` sem `target` não tem o que restringir.
    #[error("Step '{step_id}': 'within' definido sem 'target'")]
    OrphanScope { step_id: String },

    #[error("Step '{step_id}': locator '{role}' sem candidatos")]
    EmptyCandidates { step_id: String, role: String },

    #[error("Step '{step_id}': retry inválido ({reason})")]
    InvalidRetryPolicy { step_id: String, reason: String },

    #[error("Step '{step_id}': critério de classificação sem regras")]
    EmptyRules { step_id: String },

    #[error("{message}")]
    LimitExceeded { message: String },

    #[error("Step '{step_id}': upload sem caminho de arquivo")]
    EmptyUploadPath { step_id: String },
}

impl ValidationError {
    /// Código estruturado do erro.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedSpecVersion { .. } => ErrorCode::UNSUPPORTED_SPEC_VERSION,
            Self::EmptySuite => ErrorCode::EMPTY_SUITE,
            Self::EmptyWorkflow { .. } => ErrorCode::EMPTY_WORKFLOW,
            Self::EmptyStepId { .. } => ErrorCode::EMPTY_STEP_ID,
            Self::DuplicateStepId { .. } => ErrorCode::DUPLICATE_STEP_ID,
            Self::MissingTarget { .. } => ErrorCode::MISSING_TARGET,
            Self::OrphanScope { .. } => ErrorCode::ORPHAN_SCOPE,
            Self::EmptyCandidates { .. } => ErrorCode::EMPTY_CANDIDATES,
            Self::InvalidRetryPolicy { .. } => ErrorCode::INVALID_RETRY_POLICY,
            Self::EmptyRules { .. } => ErrorCode::EMPTY_RULES,
            Self::LimitExceeded { .. } => ErrorCode::LIMIT_EXCEEDED,
            Self::EmptyUploadPath { .. } => ErrorCode::EMPTY_UPLOAD_PATH,
        }
    }
}

// ============================================================================
// CONSTANTES
// ============================================================================

/// Versão do formato de suíte suportada pelo runner.
pub const SUPPORTED_SPEC_VERSION: &str = "0.1";

/// `Ok(())` ou a lista de todos os problemas encontrados.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

// ============================================================================
// FUNÇÃO PRINCIPAL DE VALIDAÇÃO
// ============================================================================

/// Valida uma suíte completa, bootstrap incluído.
///
/// Coleta TODOS os erros encontrados (não para no primeiro).
pub fn validate_suite(suite: &Suite, limits: &ExecutionLimits) -> ValidationResult {
    let mut errors = Vec::new();

    if suite.spec_version != SUPPORTED_SPEC_VERSION {
        errors.push(ValidationError::UnsupportedSpecVersion {
            version: suite.spec_version.clone(),
            expected: SUPPORTED_SPEC_VERSION.to_string(),
        });
    }

    if suite.workflows.is_empty() {
        errors.push(ValidationError::EmptySuite);
    }

    for workflow in suite.bootstrap.iter().chain(&suite.workflows) {
        validate_workflow(workflow, limits, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_workflow(workflow: &Workflow, limits: &ExecutionLimits, errors: &mut Vec<ValidationError>) {
    if workflow.steps.is_empty() {
        errors.push(ValidationError::EmptyWorkflow {
            workflow: workflow.name.clone(),
        });
        return;
    }

    let limit_check = validate_limits(&workflow.name, workflow.steps.len(), limits);
    errors.extend(
        limit_check
            .violations
            .into_iter()
            .map(|v| ValidationError::LimitExceeded { message: v.message }),
    );

    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if step.id.trim().is_empty() {
            errors.push(ValidationError::EmptyStepId {
                workflow: workflow.name.clone(),
            });
            continue;
        }
        if !seen.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId {
                workflow: workflow.name.clone(),
                step_id: step.id.clone(),
            });
        }
        validate_step(step, errors);
    }
}

// ============================================================================
// VALIDAÇÃO DE STEP INDIVIDUAL
// ============================================================================

fn validate_step(step: &WorkflowStep, errors: &mut Vec<ValidationError>) {
    if step.action.needs_target() && step.target.is_none() {
        errors.push(ValidationError::MissingTarget {
            step_id: step.id.clone(),
            action: step.action.name().to_string(),
        });
    }

    if step.within.is_some() && step.target.is_none() {
        errors.push(ValidationError::OrphanScope {
            step_id: step.id.clone(),
        });
    }

    let expectation_targets = step.expect.iter().filter_map(|e| match e {
        Expectation::Visible { target }
        | Expectation::Absent { target }
        | Expectation::TextContains { target, .. } => Some(target),
        Expectation::AttributeEquals { target, .. } => target.as_ref(),
        _ => None,
    });
    let destination = match &step.action {
        Action::DragTo { target } => Some(target),
        _ => None,
    };
    for spec in step
        .target
        .iter()
        .chain(step.within.iter())
        .chain(destination)
        .chain(expectation_targets)
    {
        check_candidates(&step.id, spec, errors);
    }

    if let Action::Upload { path } = &step.action {
        if path.trim().is_empty() {
            errors.push(ValidationError::EmptyUploadPath {
                step_id: step.id.clone(),
            });
        }
    }

    if let Some(policy) = &step.retry {
        if policy.max_attempts < 1 {
            errors.push(ValidationError::InvalidRetryPolicy {
                step_id: step.id.clone(),
                reason: "max_attempts deve ser >= 1".to_string(),
            });
        }
        if policy.backoff_factor < 0.0 || policy.backoff_factor.is_nan() {
            errors.push(ValidationError::InvalidRetryPolicy {
                step_id: step.id.clone(),
                reason: format!("backoff_factor {} deve ser >= 0", policy.backoff_factor),
            });
        }
    }

    if let Some(criterion) = &step.classify {
        if criterion.rules.is_empty() {
            errors.push(ValidationError::EmptyRules {
                step_id: step.id.clone(),
            });
        }
    }
}

fn check_candidates(step_id: &str, spec: &LocatorSpec, errors: &mut Vec<ValidationError>) {
    if spec.candidates.is_empty() {
        errors.push(ValidationError::EmptyCandidates {
            step_id: step_id.to_string(),
            role: spec.role.clone(),
        });
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClassificationCriterion, FailurePolicy, Locator, RetryPolicy};

    fn create_test_suite(steps: Vec<WorkflowStep>) -> Suite {
        Suite {
            spec_version: SUPPORTED_SPEC_VERSION.to_string(),
            name: "Test Suite".to_string(),
            base_url: None,
            variables: Default::default(),
            unique_ids: Default::default(),
            bootstrap: None,
            workflows: vec![Workflow {
                name: "wf".to_string(),
                description: None,
                steps,
            }],
        }
    }

    fn create_click_step(id: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            description: None,
            target: Some(LocatorSpec::new("save", vec![Locator::css("button.save")])),
            within: None,
            classify: None,
            action: Action::Click { force: false },
            preconditions: None,
            retry: None,
            timeout_ms: None,
            settle_ms: None,
            expect: vec![],
            scope_expectations: false,
            on_failure: FailurePolicy::FailFast,
        }
    }

    fn errors_of(suite: &Suite) -> Vec<ValidationError> {
        validate_suite(suite, &ExecutionLimits::default()).unwrap_err()
    }

    #[test]
    fn test_valid_suite() {
        let suite = create_test_suite(vec![create_click_step("step1")]);
        assert!(validate_suite(&suite, &ExecutionLimits::default()).is_ok());
    }

    #[test]
    fn test_empty_suite() {
        let mut suite = create_test_suite(vec![]);
        suite.workflows.clear();
        assert_eq!(errors_of(&suite), vec![ValidationError::EmptySuite]);
    }

    #[test]
    fn test_empty_workflow() {
        let suite = create_test_suite(vec![]);
        let errors = errors_of(&suite);
        assert!(matches!(&errors[0], ValidationError::EmptyWorkflow { workflow } if workflow == "wf"));
    }

    #[test]
    fn test_unsupported_spec_version() {
        let mut suite = create_test_suite(vec![create_click_step("step1")]);
        suite.spec_version = "0.2".to_string();

        let errors = errors_of(&suite);
        assert!(matches!(
            &errors[0],
            ValidationError::UnsupportedSpecVersion { version, expected }
            if version == "0.2" && expected == "0.1"
        ));
        assert_eq!(errors[0].code(), ErrorCode::UNSUPPORTED_SPEC_VERSION);
    }

    #[test]
    fn test_duplicate_and_empty_ids() {
        let suite = create_test_suite(vec![
            create_click_step("step1"),
            create_click_step("step1"),
            create_click_step("  "),
        ]);

        let errors = errors_of(&suite);
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], ValidationError::DuplicateStepId { step_id, .. } if step_id == "step1"));
        assert!(matches!(&errors[1], ValidationError::EmptyStepId { .. }));
    }

    #[test]
    fn test_element_action_without_target() {
        let mut step = create_click_step("step1");
        step.target = None;
        step.within = Some(LocatorSpec::new("modal", vec![Locator::css(".modal")]));

        let errors = errors_of(&create_test_suite(vec![step]));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].code(), ErrorCode::MISSING_TARGET);
        assert_eq!(errors[1].code(), ErrorCode::ORPHAN_SCOPE);
    }

    #[test]
    fn test_page_action_needs_no_target() {
        let mut step = create_click_step("wait");
        step.target = None;
        step.action = Action::Wait { duration_ms: 100 };
        assert!(validate_suite(&create_test_suite(vec![step]), &ExecutionLimits::default()).is_ok());
    }

    #[test]
    fn test_empty_candidates_everywhere() {
        let mut step = create_click_step("step1");
        step.target = Some(LocatorSpec::new("save", vec![]));
        step.expect = vec![Expectation::Visible {
            target: LocatorSpec::new("toast", vec![]),
        }];

        let errors = errors_of(&create_test_suite(vec![step]));
        let roles: Vec<_> = errors
            .iter()
            .filter_map(|e| match e {
                ValidationError::EmptyCandidates { role, .. } => Some(role.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(roles, vec!["save", "toast"]);
    }

    #[test]
    fn test_drag_destination_and_attribute_target_need_candidates() {
        let mut step = create_click_step("drag");
        step.action = Action::DragTo {
            target: LocatorSpec::new("canvas", vec![]),
        };
        step.expect = vec![
            Expectation::AttributeEquals {
                target: Some(LocatorSpec::new("node", vec![])),
                name: "data-state".to_string(),
                value: "placed".to_string(),
            },
            Expectation::AttributeEquals {
                target: None,
                name: "aria-grabbed".to_string(),
                value: "false".to_string(),
            },
        ];

        let errors = errors_of(&create_test_suite(vec![step]));
        let roles: Vec<_> = errors
            .iter()
            .filter_map(|e| match e {
                ValidationError::EmptyCandidates { role, .. } => Some(role.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(roles, vec!["canvas", "node"]);
    }

    #[test]
    fn test_upload_without_path() {
        let mut step = create_click_step("attach");
        step.action = Action::Upload {
            path: " ".to_string(),
        };

        let errors = errors_of(&create_test_suite(vec![step]));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), ErrorCode::EMPTY_UPLOAD_PATH);
    }

    #[test]
    fn test_invalid_retry_policy() {
        let mut step = create_click_step("step1");
        step.retry = Some(RetryPolicy {
            max_attempts: 0,
            delay_ms: 100,
            backoff_factor: -1.0,
        });

        let errors = errors_of(&create_test_suite(vec![step]));
        assert_eq!(errors.len(), 2); // max_attempts e backoff_factor
        assert!(errors.iter().all(|e| e.code() == ErrorCode::INVALID_RETRY_POLICY));
    }

    #[test]
    fn test_criterion_without_rules() {
        let mut step = create_click_step("step1");
        step.classify = Some(ClassificationCriterion::default());

        let errors = errors_of(&create_test_suite(vec![step]));
        assert!(matches!(&errors[0], ValidationError::EmptyRules { step_id } if step_id == "step1"));
    }

    #[test]
    fn test_step_limit() {
        let steps = (0..5).map(|i| create_click_step(&format!("s{}", i))).collect();
        let limits = ExecutionLimits {
            max_steps: 3,
            ..Default::default()
        };

        let errors = validate_suite(&create_test_suite(steps), &limits).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), ErrorCode::LIMIT_EXCEEDED);
    }

    #[test]
    fn test_bootstrap_is_validated() {
        let mut suite = create_test_suite(vec![create_click_step("step1")]);
        let mut login = create_click_step("login");
        login.target = None;
        suite.bootstrap = Some(Workflow {
            name: "login".to_string(),
            description: None,
            steps: vec![login],
        });

        let errors = errors_of(&suite);
        assert!(matches!(&errors[0], ValidationError::MissingTarget { step_id, .. } if step_id == "login"));
    }
}
