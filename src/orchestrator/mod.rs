//! # Orquestrador de Workflows
//!
//! Executa os steps de um workflow em sequência contra uma única sessão do
//! driver.
//!
//! ## Para todos entenderem:
//!
//! Cada step passa pelo mesmo pipeline:
//!
//! ```text
//! within (escopo) → target (resolver) → classify → ação (retry)
//!     → settle → expectativas (polling)
//! ```
//!
//! O workflow anda `Pending → Running → Completed | Failed`. Na primeira
//! falha (de um step sem `on_failure: ignore`) a execução para, um snapshot
//! da página vai para o [`DiagnosticSink`] e o chamador recebe
//! [`WorkflowFailed`] com o erro e o histórico de todos os steps.
//!
//! Não existe retry de workflow inteiro: o retry acontece só dentro da ação.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::classifier::classify_elements;
use crate::conditions::check;
use crate::context::{Context, ContextError};
use crate::diagnostics::{capture_from_driver, DiagnosticSink, NullSink};
use crate::driver::{Driver, ElementRef};
use crate::errors::{StepError, StructuredError, WorkflowFailed};
use crate::executors::{default_executors, ActionError, ActionExecutor, ActionFailed, ActionRequest};
use crate::limits::{ExecutionLimits, RetryCounter};
use crate::protocol::{
    Action, Expectation, FailurePolicy, FailureRecord, Locator, LocatorSpec, RuleKind, StepOutcome,
    StepStatus, Suite, SuiteReport, Workflow, WorkflowResult, WorkflowState, WorkflowStep,
};
use crate::resolver::resolve;

/// O que um step bem sucedido deixa registrado.
struct StepReport {
    attempts: u32,
    rule: Option<RuleKind>,
}

pub struct Orchestrator<'d> {
    driver: &'d dyn Driver,
    executors: Vec<Box<dyn ActionExecutor>>,
    limits: ExecutionLimits,
    sink: Arc<dyn DiagnosticSink>,
}

impl<'d> Orchestrator<'d> {
    /// Executores padrão sem URL base e snapshots descartados.
    pub fn new(driver: &'d dyn Driver, limits: ExecutionLimits) -> Self {
        Self {
            driver,
            executors: default_executors(None),
            limits,
            sink: Arc::new(NullSink),
        }
    }

    /// URL base para `navigate` relativo.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.executors = default_executors(base_url);
        self
    }

    pub fn with_executors(mut self, executors: Vec<Box<dyn ActionExecutor>>) -> Self {
        self.executors = executors;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    // ========================================================================
    // SUÍTE
    // ========================================================================

    /// Executa todos os workflows da suíte.
    ///
    /// Antes de cada workflow a sessão é resetada e o `bootstrap` roda. Um
    /// bootstrap que falha entra no relatório no lugar do workflow, que não
    /// é executado.
    pub async fn run_suite(&self, suite: &Suite, context: &Context) -> SuiteReport {
        let start_time = Utc::now();
        let mut workflows = Vec::with_capacity(suite.workflows.len());

        for workflow in &suite.workflows {
            if let Err(e) = self.driver.reset_session().await {
                warn!(workflow = %workflow.name, error = %e, "Falha ao resetar a sessão");
            }

            if let Some(bootstrap) = &suite.bootstrap {
                if let Err(failed) = self.run(bootstrap, context).await {
                    error!(
                        workflow = %workflow.name,
                        bootstrap = %bootstrap.name,
                        "Bootstrap falhou, workflow não executado"
                    );
                    workflows.push(failed.result);
                    continue;
                }
            }

            match self.run(workflow, context).await {
                Ok(result) => workflows.push(result),
                Err(failed) => workflows.push(failed.result),
            }
        }

        let passed = workflows.iter().all(WorkflowResult::passed);
        SuiteReport {
            suite: suite.name.clone(),
            status: if passed { "passed" } else { "failed" }.to_string(),
            start_time: start_time.to_rfc3339(),
            end_time: Utc::now().to_rfc3339(),
            workflows,
        }
    }

    // ========================================================================
    // WORKFLOW
    // ========================================================================

    /// Executa um workflow até o fim ou até a primeira falha.
    #[instrument(
        name = "workflow",
        skip(self, workflow, context),
        fields(workflow = %workflow.name, run_id = tracing::field::Empty)
    )]
    pub async fn run(
        &self,
        workflow: &Workflow,
        context: &Context,
    ) -> Result<WorkflowResult, WorkflowFailed> {
        let run_id = Uuid::new_v4().to_string();
        Span::current().record("run_id", run_id.as_str());

        let started_at = Utc::now();
        let clock = Instant::now();
        let budget = RetryCounter::new(self.limits.max_retries_total);

        let mut result = WorkflowResult {
            run_id,
            workflow: workflow.name.clone(),
            state: WorkflowState::Pending,
            steps: Vec::with_capacity(workflow.steps.len()),
            failure: None,
            started_at,
            finished_at: started_at,
            elapsed_ms: 0,
            diagnostics: Vec::new(),
        };

        result.state = WorkflowState::Running;
        info!(steps = workflow.steps.len(), "▶️  Iniciando workflow");

        for step in &workflow.steps {
            let step_clock = Instant::now();
            let elapsed = clock.elapsed();

            let outcome = if elapsed >= self.limits.max_workflow_time {
                Err(StepError::TimeBudgetExceeded {
                    elapsed_ms: elapsed.as_millis() as u64,
                    limit_ms: self.limits.max_workflow_time.as_millis() as u64,
                })
            } else {
                self.run_step(step, context, &budget).await
            };
            let duration_ms = step_clock.elapsed().as_millis() as u64;

            let error = match outcome {
                Ok(report) => {
                    info!(step_id = %step.id, attempts = report.attempts, duration_ms, "✅ Step ok");
                    result.steps.push(StepOutcome {
                        step_id: step.id.clone(),
                        role: step.target.as_ref().map(|t| t.role.clone()),
                        status: StepStatus::Passed,
                        attempts: report.attempts,
                        rule: report.rule,
                        duration_ms,
                        error: None,
                        error_code: None,
                    });
                    continue;
                }
                Err(error) => error,
            };

            let ignorable = step.on_failure == FailurePolicy::Ignore
                && !matches!(error, StepError::TimeBudgetExceeded { .. });
            let status = if ignorable {
                StepStatus::Skipped
            } else {
                StepStatus::Failed
            };

            result.steps.push(StepOutcome {
                step_id: step.id.clone(),
                role: step.target.as_ref().map(|t| t.role.clone()),
                status,
                attempts: error.attempts(),
                rule: None,
                duration_ms,
                error: Some(error.to_string()),
                error_code: Some(error.code().formatted()),
            });

            if ignorable {
                warn!(step_id = %step.id, error = %error, "⚠️  Step falhou, ignorado");
                continue;
            }

            result.failure = Some(FailureRecord {
                step_id: step.id.clone(),
                role: step.role().to_string(),
                attempts: error.attempts(),
                error_code: error.code().formatted(),
                message: error.to_string(),
            });
            result.state = WorkflowState::Failed;

            let name = format!("{}_{}", workflow.name, step.id);
            let snapshot = capture_from_driver(self.driver, &name).await;
            match self.sink.capture(&snapshot) {
                Ok(written) => result.diagnostics.extend(written),
                Err(e) => warn!(step_id = %step.id, error = %e, "Falha ao gravar diagnóstico"),
            }

            finish(&mut result, clock);
            let failed = WorkflowFailed {
                step_id: step.id.clone(),
                error,
                result,
            };
            error!(
                step_id = %step.id,
                role = %step.role(),
                "❌ {}",
                StructuredError::from(&failed).user_message()
            );
            return Err(failed);
        }

        result.state = WorkflowState::Completed;
        finish(&mut result, clock);
        info!(elapsed_ms = result.elapsed_ms, "🏁 Workflow concluído");
        Ok(result)
    }

    // ========================================================================
    // STEP
    // ========================================================================

    #[instrument(
        name = "step",
        skip(self, step, context, budget),
        fields(step_id = %step.id, role = %step.role(), action = %step.action)
    )]
    async fn run_step(
        &self,
        step: &WorkflowStep,
        context: &Context,
        budget: &RetryCounter,
    ) -> Result<StepReport, StepError> {
        let action = interpolate_action(&step.action, context)?;
        let timeout = step.timeout_ms.map(Duration::from_millis).unwrap_or(
            match (&action, step.on_failure) {
                (Action::Navigate { .. }, _) => self.limits.long_timeout,
                // Steps opcionais (banners, popups) não devem segurar o workflow.
                (_, FailurePolicy::Ignore) => self.limits.short_timeout,
                _ => self.limits.default_timeout,
            },
        );
        let poll = self.limits.poll_interval;

        let scope = match (&step.target, &step.within) {
            (Some(_), Some(within)) => {
                let within = interpolate_spec(within, context)?;
                let found = resolve(self.driver, &within, None, timeout, poll).await?;
                found.into_iter().next()
            }
            _ => None,
        };

        let mut rule = None;
        let element: Option<ElementRef> = match &step.target {
            Some(target) => {
                let target = interpolate_spec(target, context)?;
                let found = resolve(self.driver, &target, scope.as_ref(), timeout, poll).await?;
                match &step.classify {
                    Some(criterion) => {
                        let classified =
                            classify_elements(self.driver, &found, criterion, &target.role).await?;
                        info!(
                            element = %classified.element,
                            rule = %classified.rule,
                            rules_evaluated = classified.rules_evaluated,
                            "Elemento classificado"
                        );
                        rule = Some(classified.rule);
                        Some(classified.element)
                    }
                    None => found.into_iter().next(),
                }
            }
            None if action.needs_target() => {
                return Err(StepError::MissingTarget {
                    step_id: step.id.clone(),
                    action: action.name().to_string(),
                })
            }
            None => None,
        };

        // O destino de um drag costuma ficar fora do `within` (o canvas).
        let destination = match &action {
            Action::DragTo { target } => resolve(self.driver, target, None, timeout, poll)
                .await?
                .into_iter()
                .next(),
            _ => None,
        };

        let policy = step
            .retry
            .clone()
            .unwrap_or_else(|| self.limits.default_retry.clone());
        let request = ActionRequest {
            step_id: &step.id,
            element: element.as_ref(),
            destination: destination.as_ref(),
            action: &action,
            preconditions: step
                .preconditions
                .unwrap_or_else(|| action.default_preconditions()),
            policy: &policy,
            budget: Some(budget),
        };

        let executor = self
            .executors
            .iter()
            .find(|e| e.can_handle(&action))
            .ok_or_else(|| ActionFailed {
                action: action.name().to_string(),
                attempts: 0,
                last_error: ActionError::Unsupported(action.name().to_string()),
            })?;
        let ack = executor.perform(self.driver, request).await?;

        if let Some(settle_ms) = step.settle_ms {
            sleep(Duration::from_millis(settle_ms)).await;
        }

        let expectations = step
            .expect
            .iter()
            .map(|e| interpolate_expectation(e, context))
            .collect::<Result<Vec<_>, _>>()?;
        let expect_scope = scope.as_ref().filter(|_| step.scope_expectations);
        check(
            self.driver,
            &expectations,
            element.as_ref(),
            expect_scope,
            timeout,
            poll,
        )
        .await?;

        Ok(StepReport {
            attempts: ack.attempts,
            rule,
        })
    }
}

fn finish(result: &mut WorkflowResult, clock: Instant) {
    result.finished_at = Utc::now();
    result.elapsed_ms = clock.elapsed().as_millis() as u64;
}

// ============================================================================
// INTERPOLAÇÃO
// ============================================================================

fn interpolate_action(action: &Action, ctx: &Context) -> Result<Action, ContextError> {
    Ok(match action {
        Action::Type {
            text,
            clear,
            delay_ms,
        } => Action::Type {
            text: ctx.interpolate_str(text)?,
            clear: *clear,
            delay_ms: *delay_ms,
        },
        Action::Select { option } => Action::Select {
            option: ctx.interpolate_str(option)?,
        },
        Action::Navigate { url } => Action::Navigate {
            url: ctx.interpolate_str(url)?,
        },
        Action::PressKey { key } => Action::PressKey {
            key: ctx.interpolate_str(key)?,
        },
        Action::DragTo { target } => Action::DragTo {
            target: interpolate_spec(target, ctx)?,
        },
        Action::Upload { path } => Action::Upload {
            path: ctx.interpolate_str(path)?,
        },
        other => other.clone(),
    })
}

fn interpolate_locator(locator: &Locator, ctx: &Context) -> Result<Locator, ContextError> {
    Ok(match locator {
        Locator::Css { selector } => Locator::Css {
            selector: ctx.interpolate_str(selector)?,
        },
        Locator::Text { text, exact, tag } => Locator::Text {
            text: ctx.interpolate_str(text)?,
            exact: *exact,
            tag: tag.clone(),
        },
        Locator::Attribute {
            tag,
            name,
            value,
            op,
        } => Locator::Attribute {
            tag: tag.clone(),
            name: name.clone(),
            value: ctx.interpolate_str(value)?,
            op: *op,
        },
        Locator::TestId { id } => Locator::TestId {
            id: ctx.interpolate_str(id)?,
        },
    })
}

fn interpolate_spec(spec: &LocatorSpec, ctx: &Context) -> Result<LocatorSpec, ContextError> {
    Ok(LocatorSpec {
        role: spec.role.clone(),
        candidates: spec
            .candidates
            .iter()
            .map(|c| interpolate_locator(c, ctx))
            .collect::<Result<_, _>>()?,
    })
}

fn interpolate_expectation(
    expectation: &Expectation,
    ctx: &Context,
) -> Result<Expectation, ContextError> {
    Ok(match expectation {
        Expectation::Visible { target } => Expectation::Visible {
            target: interpolate_spec(target, ctx)?,
        },
        Expectation::Absent { target } => Expectation::Absent {
            target: interpolate_spec(target, ctx)?,
        },
        Expectation::TextContains { target, text } => Expectation::TextContains {
            target: interpolate_spec(target, ctx)?,
            text: ctx.interpolate_str(text)?,
        },
        Expectation::ValueEquals { value } => Expectation::ValueEquals {
            value: ctx.interpolate_str(value)?,
        },
        Expectation::AttributeEquals { target, name, value } => Expectation::AttributeEquals {
            target: target
                .as_ref()
                .map(|t| interpolate_spec(t, ctx))
                .transpose()?,
            name: name.clone(),
            value: ctx.interpolate_str(value)?,
        },
        Expectation::UrlContains { fragment } => Expectation::UrlContains {
            fragment: ctx.interpolate_str(fragment)?,
        },
    })
}

// ============================================================================
// TESTES
// ============================================================================
