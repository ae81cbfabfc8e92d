//! # Classificador Heurístico de Campos
//!
//! Quando o resolver devolve vários elementos (por exemplo, todos os inputs
//! visíveis de um painel de configuração), o classificador escolhe qual deles
//! cumpre o papel pedido pelo step.
//!
//! ## Para todos entenderem:
//!
//! É o que uma pessoa faz olhando um formulário sem rótulos claros:
//! "o campo cujo placeholder fala em *message* deve ser a mensagem; se não
//! tiver nenhum, provavelmente é a caixa de texto maior".
//!
//! ## Prioridade das regras
//!
//! As regras rodam na ordem em que aparecem no critério. A ordem usual é:
//!
//! | Regra                 | Exemplo                                          |
//! |-----------------------|--------------------------------------------------|
//! | `exact_match`         | `name="message"`                                 |
//! | `attribute_match`     | placeholder contém "message"                     |
//! | `label_match`         | label próximo contém "display"                   |
//! | `structural`          | maior área, textarea, contenteditable, vazio     |
//! | `positional_fallback` | primeiro / último em ordem de documento          |
//!
//! A primeira regra que seleciona **exatamente um** elemento vence e as
//! seguintes não são avaliadas. Uma regra que seleciona vários estreita o
//! conjunto de trabalho (ou falha com `Ambiguous` no modo estrito); uma regra
//! que não seleciona nenhum é ignorada.

use thiserror::Error;
use tracing::debug;

use crate::driver::{Driver, ElementInfo, ElementRef};
use crate::protocol::{ClassificationCriterion, Position, Rule, RuleKind, StructuralHeuristic};

/// Atributos consultados por `exact_match`.
const IDENTITY_ATTRIBUTES: &[&str] = &["name", "id", "aria-label", "placeholder", "data-testid"];

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifyError {
    #[error("papel '{role}' ambíguo: regra {rule} casou {count} elementos")]
    Ambiguous {
        role: String,
        rule: RuleKind,
        count: usize,
    },

    #[error("nenhuma regra identificou o papel '{role}'")]
    NoMatch { role: String },
}

/// Elemento escolhido e a instrumentação da decisão.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub element: ElementRef,
    pub rule: RuleKind,
    /// Quantas regras foram avaliadas até a decisão.
    pub rules_evaluated: usize,
}

fn lower(s: &str) -> String {
    s.to_lowercase()
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = lower(haystack);
    needles.iter().any(|n| haystack.contains(&lower(n)))
}

fn rule_hits(rule: &Rule, role: &str, working: &[(usize, &ElementInfo)]) -> Vec<usize> {
    match rule {
        Rule::ExactMatch { value } => {
            let needle = lower(value.as_deref().unwrap_or(role));
            working
                .iter()
                .filter(|(_, info)| {
                    IDENTITY_ATTRIBUTES
                        .iter()
                        .filter_map(|a| info.attr(a))
                        .chain(info.label.as_deref())
                        .any(|v| lower(v.trim()) == needle)
                })
                .map(|(i, _)| *i)
                .collect()
        }
        Rule::AttributeMatch {
            attributes,
            needles,
        } => working
            .iter()
            .filter(|(_, info)| {
                attributes
                    .iter()
                    .filter_map(|a| info.attr(a))
                    .any(|v| contains_any(v, needles))
            })
            .map(|(i, _)| *i)
            .collect(),
        Rule::LabelMatch { needles } => working
            .iter()
            .filter(|(_, info)| info.label.as_deref().is_some_and(|l| contains_any(l, needles)))
            .map(|(i, _)| *i)
            .collect(),
        Rule::Structural { heuristic } => structural_hits(*heuristic, working),
        Rule::PositionalFallback { prefer } => pick(working.iter().map(|(i, _)| *i), *prefer)
            .into_iter()
            .collect(),
    }
}

fn select(working: &[(usize, &ElementInfo)], pred: impl Fn(&ElementInfo) -> bool) -> Vec<usize> {
    working
        .iter()
        .filter(|(_, info)| pred(*info))
        .map(|(i, _)| *i)
        .collect()
}

fn structural_hits(heuristic: StructuralHeuristic, working: &[(usize, &ElementInfo)]) -> Vec<usize> {
    match heuristic {
        StructuralHeuristic::LargestArea => {
            let max = working
                .iter()
                .map(|(_, info)| info.rect.area())
                .fold(0.0_f64, f64::max);
            if max <= 0.0 {
                return Vec::new();
            }
            select(working, |info| info.rect.area() >= max)
        }
        StructuralHeuristic::MultiLine => select(working, ElementInfo::is_multi_line),
        StructuralHeuristic::Editable => select(working, ElementInfo::is_editable),
        StructuralHeuristic::EmptyValue => select(working, |info| {
            let entry = matches!(info.tag.as_str(), "input" | "textarea") || info.is_editable();
            entry && info.value.as_deref().map_or(true, |v| v.is_empty())
        }),
    }
}

fn pick(mut indices: impl DoubleEndedIterator<Item = usize>, prefer: Position) -> Option<usize> {
    match prefer {
        Position::First => indices.next(),
        Position::Last => indices.next_back(),
    }
}

/// Classifica candidatos já descritos, em ordem de documento.
///
/// `role` é usado quando o critério não define o seu.
pub fn classify(
    candidates: &[(ElementRef, ElementInfo)],
    criterion: &ClassificationCriterion,
    role: &str,
) -> Result<Classified, ClassifyError> {
    let role = criterion.role.as_deref().unwrap_or(role);
    let no_match = || ClassifyError::NoMatch {
        role: role.to_string(),
    };

    if candidates.is_empty() {
        return Err(no_match());
    }

    let mut working: Vec<(usize, &ElementInfo)> =
        candidates.iter().enumerate().map(|(i, (_, info))| (i, info)).collect();
    let mut narrowed_by: Option<RuleKind> = None;

    for (position, rule) in criterion.rules.iter().enumerate() {
        let evaluated = position + 1;
        let hits = rule_hits(rule, role, &working);

        match hits.len() {
            0 => {
                debug!(role = %role, rule = %rule.kind(), "Regra sem resultado");
            }
            1 => {
                debug!(role = %role, rule = %rule.kind(), evaluated, "Elemento classificado");
                return Ok(Classified {
                    element: candidates[hits[0]].0.clone(),
                    rule: rule.kind(),
                    rules_evaluated: evaluated,
                });
            }
            count => {
                if criterion.strict {
                    return Err(ClassifyError::Ambiguous {
                        role: role.to_string(),
                        rule: rule.kind(),
                        count,
                    });
                }
                debug!(role = %role, rule = %rule.kind(), count, "Conjunto estreitado");
                working.retain(|(i, _)| hits.contains(i));
                narrowed_by = Some(rule.kind());
            }
        }
    }

    let rule = narrowed_by.ok_or_else(no_match)?;
    let chosen = pick(working.iter().map(|(i, _)| *i), criterion.prefer).ok_or_else(no_match)?;

    Ok(Classified {
        element: candidates[chosen].0.clone(),
        rule,
        rules_evaluated: criterion.rules.len(),
    })
}

/// Descreve os elementos no driver e classifica.
///
/// Elementos que saíram do DOM durante a descrição são descartados.
pub async fn classify_elements<D: Driver + ?Sized>(
    driver: &D,
    elements: &[ElementRef],
    criterion: &ClassificationCriterion,
    role: &str,
) -> Result<Classified, ClassifyError> {
    let mut described = Vec::with_capacity(elements.len());
    for element in elements {
        if let Ok(info) = driver.describe(element).await {
            described.push((element.clone(), info));
        }
    }
    classify(&described, criterion, role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Rect;

    fn field(tag: &str, attrs: &[(&str, &str)]) -> ElementInfo {
        ElementInfo {
            tag: tag.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value: Some(String::new()),
            visible: true,
            enabled: true,
            ..Default::default()
        }
    }

    fn sized(mut info: ElementInfo, width: f64, height: f64) -> ElementInfo {
        info.rect = Rect {
            x: 0.0,
            y: 0.0,
            width,
            height,
        };
        info
    }

    fn candidates(infos: Vec<ElementInfo>) -> Vec<(ElementRef, ElementInfo)> {
        infos
            .into_iter()
            .enumerate()
            .map(|(i, info)| (ElementRef::new(format!("e{}", i)), info))
            .collect()
    }

    fn criterion(rules: Vec<Rule>) -> ClassificationCriterion {
        ClassificationCriterion {
            role: Some("message".into()),
            rules,
            ..Default::default()
        }
    }

    fn needles(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_first_unique_rule_short_circuits() {
        let c = candidates(vec![
            field("input", &[("name", "title")]),
            field("textarea", &[("name", "message")]),
            field("textarea", &[("placeholder", "Message text")]),
        ]);
        let crit = criterion(vec![
            Rule::ExactMatch { value: None },
            Rule::AttributeMatch {
                attributes: needles(&["placeholder"]),
                needles: needles(&["message"]),
            },
        ]);

        let result = classify(&c, &crit, "message").unwrap();
        assert_eq!(result.element, ElementRef::new("e1"));
        assert_eq!(result.rule, RuleKind::ExactMatch);
        assert_eq!(result.rules_evaluated, 1);
    }

    #[test]
    fn test_empty_rule_is_skipped() {
        let c = candidates(vec![
            field("input", &[("placeholder", "Window title")]),
            field("textarea", &[("placeholder", "Enter the MESSAGE to display")]),
        ]);
        let crit = criterion(vec![
            Rule::ExactMatch { value: None },
            Rule::AttributeMatch {
                attributes: needles(&["placeholder", "name"]),
                needles: needles(&["message"]),
            },
        ]);

        let result = classify(&c, &crit, "message").unwrap();
        assert_eq!(result.element, ElementRef::new("e1"));
        assert_eq!(result.rule, RuleKind::AttributeMatch);
        assert_eq!(result.rules_evaluated, 2);
    }

    #[test]
    fn test_strict_mode_reports_ambiguity() {
        let c = candidates(vec![
            field("textarea", &[("placeholder", "message")]),
            field("textarea", &[("placeholder", "message body")]),
        ]);
        let mut crit = criterion(vec![Rule::AttributeMatch {
            attributes: needles(&["placeholder"]),
            needles: needles(&["message"]),
        }]);
        crit.strict = true;

        let err = classify(&c, &crit, "message").unwrap_err();
        assert_eq!(
            err,
            ClassifyError::Ambiguous {
                role: "message".into(),
                rule: RuleKind::AttributeMatch,
                count: 2
            }
        );
    }

    #[test]
    fn test_default_mode_narrows_then_structural_decides() {
        // Dois campos citam "message"; o maior é o texto livre.
        let c = candidates(vec![
            sized(field("input", &[("placeholder", "Message title")]), 200.0, 30.0),
            sized(field("input", &[("name", "lines")]), 400.0, 200.0),
            sized(field("textarea", &[("placeholder", "Message")]), 300.0, 120.0),
        ]);
        let crit = criterion(vec![
            Rule::AttributeMatch {
                attributes: needles(&["placeholder"]),
                needles: needles(&["message"]),
            },
            Rule::Structural {
                heuristic: StructuralHeuristic::LargestArea,
            },
        ]);

        let result = classify(&c, &crit, "message").unwrap();
        assert_eq!(result.element, ElementRef::new("e2"));
        assert_eq!(result.rule, RuleKind::Structural);
        assert_eq!(result.rules_evaluated, 2);
    }

    #[test]
    fn test_prefer_last_breaks_remaining_tie() {
        let c = candidates(vec![
            field("textarea", &[("placeholder", "message")]),
            field("textarea", &[("placeholder", "message")]),
            field("input", &[]),
        ]);
        let mut crit = criterion(vec![Rule::AttributeMatch {
            attributes: needles(&["placeholder"]),
            needles: needles(&["message"]),
        }]);

        let first = classify(&c, &crit, "message").unwrap();
        assert_eq!(first.element, ElementRef::new("e0"));

        crit.prefer = Position::Last;
        let last = classify(&c, &crit, "message").unwrap();
        assert_eq!(last.element, ElementRef::new("e1"));
        assert_eq!(last.rule, RuleKind::AttributeMatch);
    }

    #[test]
    fn test_positional_fallback_always_matches() {
        let c = candidates(vec![field("li", &[]), field("li", &[]), field("li", &[])]);
        let crit = criterion(vec![
            Rule::LabelMatch {
                needles: needles(&["message"]),
            },
            Rule::PositionalFallback {
                prefer: Position::Last,
            },
        ]);

        let result = classify(&c, &crit, "item").unwrap();
        assert_eq!(result.element, ElementRef::new("e2"));
        assert_eq!(result.rule, RuleKind::PositionalFallback);
    }

    #[test]
    fn test_no_rule_matches() {
        let c = candidates(vec![field("input", &[("name", "title")])]);
        let crit = criterion(vec![Rule::LabelMatch {
            needles: needles(&["message"]),
        }]);
        assert_eq!(
            classify(&c, &crit, "message").unwrap_err(),
            ClassifyError::NoMatch {
                role: "message".into()
            }
        );
        assert!(matches!(
            classify(&[], &crit, "message"),
            Err(ClassifyError::NoMatch { .. })
        ));
    }

    #[test]
    fn test_label_and_editable_rules() {
        let mut labelled = field("input", &[]);
        labelled.label = Some("Message to Display".into());
        let editable = field("div", &[("contenteditable", "true")]);

        let c = candidates(vec![field("input", &[]), labelled, editable]);

        let by_label = classify(
            &c,
            &criterion(vec![Rule::LabelMatch {
                needles: needles(&["display"]),
            }]),
            "message",
        )
        .unwrap();
        assert_eq!(by_label.element, ElementRef::new("e1"));

        let by_structure = classify(
            &c,
            &criterion(vec![Rule::Structural {
                heuristic: StructuralHeuristic::Editable,
            }]),
            "message",
        )
        .unwrap();
        assert_eq!(by_structure.element, ElementRef::new("e2"));
    }

    #[test]
    fn test_empty_value_heuristic() {
        let mut filled = field("input", &[]);
        filled.value = Some("already here".into());
        let c = candidates(vec![filled, field("input", &[])]);

        let result = classify(
            &c,
            &criterion(vec![Rule::Structural {
                heuristic: StructuralHeuristic::EmptyValue,
            }]),
            "message",
        )
        .unwrap();
        assert_eq!(result.element, ElementRef::new("e1"));
    }
}
