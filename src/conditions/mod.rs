//! # Condições de Sucesso
//!
//! Depois da ação, o step só passa quando todas as suas expectativas são
//! verdadeiras ao mesmo tempo. A página pode demorar a reagir (um modal
//! abrindo, uma navegação), então a checagem é repetida a cada
//! `poll_interval` até o timeout do step.
//!
//! ## Tipos suportados:
//!
//! | Tipo             | Passa quando                                      |
//! |------------------|---------------------------------------------------|
//! | `visible`        | o alvo resolve para algum elemento visível        |
//! | `absent`         | o alvo não resolve para nenhum elemento visível   |
//! | `text_contains`  | algum elemento do alvo contém o texto             |
//! | `value_equals`   | o valor do elemento em que o step agiu é igual    |
//! | `attribute_equals` | o atributo do alvo (ou do elemento em que o step agiu) é igual |
//! | `url_contains`   | a URL atual contém o fragmento                    |
//!
//! Os alvos são procurados no documento todo, a menos que o step peça
//! `scope_expectations`; aí a busca fica dentro do `within` do step.

use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::driver::{Driver, ElementRef};
use crate::protocol::Expectation;
use crate::resolver::probe;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("condição '{expectation}' não satisfeita após {timeout_ms}ms: {detail}")]
pub struct ConditionFailed {
    pub expectation: String,
    /// Último estado observado.
    pub detail: String,
    pub timeout_ms: u64,
}

/// Descrição curta usada em logs e erros.
pub fn describe(expectation: &Expectation) -> String {
    match expectation {
        Expectation::Visible { target } => format!("visible({})", target.role),
        Expectation::Absent { target } => format!("absent({})", target.role),
        Expectation::TextContains { target, text } => {
            format!("text_contains({}, \"{}\")", target.role, text)
        }
        Expectation::ValueEquals { value } => format!("value_equals(\"{}\")", value),
        Expectation::AttributeEquals { target, name, value } => match target {
            Some(target) => format!("attribute_equals({}, {}=\"{}\")", target.role, name, value),
            None => format!("attribute_equals({}=\"{}\")", name, value),
        },
        Expectation::UrlContains { fragment } => format!("url_contains(\"{}\")", fragment),
    }
}

/// Avalia uma expectativa uma vez. `Err` carrega o estado observado.
async fn evaluate(
    driver: &dyn Driver,
    expectation: &Expectation,
    acted: Option<&ElementRef>,
    scope: Option<&ElementRef>,
) -> Result<(), String> {
    match expectation {
        Expectation::Visible { target } => match probe(driver, target, scope).await {
            Some(_) => Ok(()),
            None => Err(format!("'{}' não está visível", target.role)),
        },
        Expectation::Absent { target } => match probe(driver, target, scope).await {
            Some(found) => Err(format!(
                "'{}' ainda visível ({} elemento(s))",
                target.role,
                found.len()
            )),
            None => Ok(()),
        },
        Expectation::TextContains { target, text } => {
            let Some(found) = probe(driver, target, scope).await else {
                return Err(format!("'{}' não está visível", target.role));
            };
            let mut seen = Vec::new();
            for element in &found {
                if let Ok(info) = driver.describe(element).await {
                    if info.text.contains(text.as_str()) {
                        return Ok(());
                    }
                    seen.push(info.text);
                }
            }
            Err(format!("textos encontrados: {:?}", seen))
        }
        Expectation::ValueEquals { value } => {
            let Some(element) = acted else {
                return Err("step não agiu sobre nenhum elemento".to_string());
            };
            let info = driver
                .describe(element)
                .await
                .map_err(|e| format!("não foi possível ler {}: {}", element, e))?;
            match info.value {
                Some(actual) if actual == *value => Ok(()),
                actual => Err(format!("valor atual: {:?}", actual.unwrap_or_default())),
            }
        }
        Expectation::AttributeEquals { target, name, value } => {
            let found = match target {
                Some(target) => match probe(driver, target, scope).await {
                    Some(found) => found,
                    None => return Err(format!("'{}' não está visível", target.role)),
                },
                None => match acted {
                    Some(element) => vec![element.clone()],
                    None => return Err("step não agiu sobre nenhum elemento".to_string()),
                },
            };
            let mut seen = Vec::new();
            for element in &found {
                if let Ok(info) = driver.describe(element).await {
                    match info.attr(name) {
                        Some(actual) if actual == value.as_str() => return Ok(()),
                        actual => seen.push(actual.map(str::to_string)),
                    }
                }
            }
            Err(format!("{} encontrado(s): {:?}", name, seen))
        }
        Expectation::UrlContains { fragment } => {
            let url = driver
                .current_url()
                .await
                .map_err(|e| format!("não foi possível ler a URL: {}", e))?;
            if url.contains(fragment.as_str()) {
                Ok(())
            } else {
                Err(format!("URL atual: {}", url))
            }
        }
    }
}

/// Espera todas as expectativas valerem juntas.
///
/// Sempre avalia pelo menos uma vez. Sem expectativas, passa na hora.
/// Com `scope`, os alvos só são procurados dentro daquele elemento.
pub async fn check(
    driver: &dyn Driver,
    expectations: &[Expectation],
    acted: Option<&ElementRef>,
    scope: Option<&ElementRef>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), ConditionFailed> {
    if expectations.is_empty() {
        return Ok(());
    }

    let deadline = Instant::now() + timeout;

    loop {
        let mut pending = None;
        for expectation in expectations {
            if let Err(detail) = evaluate(driver, expectation, acted, scope).await {
                pending = Some((expectation, detail));
                break;
            }
        }

        let Some((expectation, detail)) = pending else {
            debug!(count = expectations.len(), "Condições satisfeitas");
            return Ok(());
        };

        if Instant::now() >= deadline {
            let failed = ConditionFailed {
                expectation: describe(expectation),
                detail,
                timeout_ms: timeout.as_millis() as u64,
            };
            warn!(error = %failed, "Condição não satisfeita");
            return Err(failed);
        }
        sleep(poll_interval.min(deadline.saturating_duration_since(Instant::now()))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{MemoryDriver, MemoryElement};
    use crate::protocol::{Locator, LocatorSpec};
    use std::sync::Arc;

    fn modal() -> LocatorSpec {
        LocatorSpec::new("modal", vec![Locator::css("div.modal")])
    }

    const POLL: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_no_expectations_pass_immediately() {
        let driver = MemoryDriver::from_elements(vec![]);
        assert!(check(&driver, &[], None, None, Duration::ZERO, POLL).await.is_ok());
    }

    #[tokio::test]
    async fn test_visible_and_text() {
        let driver = MemoryDriver::from_elements(vec![MemoryElement::new("m", "div")
            .attr("class", "modal")
            .text("Bot salvo com sucesso")]);

        let expectations = vec![
            Expectation::Visible { target: modal() },
            Expectation::TextContains {
                target: modal(),
                text: "salvo".into(),
            },
        ];
        check(&driver, &expectations, None, None, Duration::ZERO, POLL)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_absent_fails_with_detail() {
        let driver = MemoryDriver::from_elements(vec![
            MemoryElement::new("m", "div").attr("class", "modal")
        ]);

        let err = check(
            &driver,
            &[Expectation::Absent { target: modal() }],
            None,
            None,
            Duration::from_millis(30),
            POLL,
        )
        .await
        .unwrap_err();

        assert_eq!(err.expectation, "absent(modal)");
        assert_eq!(err.timeout_ms, 30);
        assert!(err.detail.contains("ainda visível"));
    }

    #[tokio::test]
    async fn test_polls_until_page_reacts() {
        let driver = Arc::new(MemoryDriver::from_elements(vec![]));
        let late = driver.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            late.insert(MemoryElement::new("m", "div").attr("class", "modal"));
        });

        check(
            driver.as_ref(),
            &[Expectation::Visible { target: modal() }],
            None,
            None,
            Duration::from_secs(2),
            POLL,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_value_and_url() {
        let driver = MemoryDriver::from_elements(vec![
            MemoryElement::new("name", "input").value("Bot 1")
        ]);
        let acted = ElementRef::new("name");

        check(
            &driver,
            &[
                Expectation::ValueEquals { value: "Bot 1".into() },
                Expectation::UrlContains { fragment: "blank".into() },
            ],
            Some(&acted),
            None,
            Duration::ZERO,
            POLL,
        )
        .await
        .unwrap();

        let err = check(
            &driver,
            &[Expectation::ValueEquals { value: "Bot 2".into() }],
            None,
            None,
            Duration::ZERO,
            POLL,
        )
        .await
        .unwrap_err();
        assert_eq!(err.expectation, "value_equals(\"Bot 2\")");
    }

    #[tokio::test]
    async fn test_attribute_equals_on_target_and_acted() {
        let driver = MemoryDriver::from_elements(vec![
            MemoryElement::new("node", "div")
                .attr("class", "node")
                .attr("data-state", "dropped"),
            MemoryElement::new("title", "input").attr("aria-invalid", "false"),
        ]);
        let node = LocatorSpec::new("node", vec![Locator::css("div.node")]);
        let acted = ElementRef::new("title");

        check(
            &driver,
            &[
                Expectation::AttributeEquals {
                    target: Some(node.clone()),
                    name: "data-state".into(),
                    value: "dropped".into(),
                },
                Expectation::AttributeEquals {
                    target: None,
                    name: "aria-invalid".into(),
                    value: "false".into(),
                },
            ],
            Some(&acted),
            None,
            Duration::ZERO,
            POLL,
        )
        .await
        .unwrap();

        let err = check(
            &driver,
            &[Expectation::AttributeEquals {
                target: Some(node),
                name: "data-state".into(),
                value: "idle".into(),
            }],
            None,
            None,
            Duration::ZERO,
            POLL,
        )
        .await
        .unwrap_err();
        assert_eq!(err.expectation, "attribute_equals(node, data-state=\"idle\")");
        assert!(err.detail.contains("dropped"));
    }

    #[tokio::test]
    async fn test_scope_limits_expectation_targets() {
        let driver = MemoryDriver::from_elements(vec![
            MemoryElement::new("editor", "div"),
            MemoryElement::new("toast", "div").attr("class", "modal"),
        ]);
        let editor = ElementRef::new("editor");
        let visible = [Expectation::Visible { target: modal() }];

        check(&driver, &visible, None, None, Duration::ZERO, POLL)
            .await
            .unwrap();

        let err = check(&driver, &visible, None, Some(&editor), Duration::ZERO, POLL)
            .await
            .unwrap_err();
        assert_eq!(err.expectation, "visible(modal)");
    }
}
