//! # Módulo de Protocolo - Modelo de Dados das Suítes
//!
//! Define as estruturas compartilhadas por todos os estágios do engine.
//!
//! ## Para todos entenderem:
//!
//! Uma suíte é um documento JSON. Ela contém workflows, cada workflow
//! contém steps, e cada step diz qual elemento quer usar através de um
//! [`LocatorSpec`]: uma lista ordenada de formas alternativas de achar
//! o mesmo elemento lógico na tela.
//!
//! ```text
//! Suite
//!  └── Workflow ("criar mensagem")
//!       ├── Step "open_box"    → click     no botão "Message box"
//!       ├── Step "fill_text"   → type      no campo classificado como "message"
//!       └── Step "save"        → click     + expect visible(toast)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// SUÍTE / WORKFLOW
// ============================================================================

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Suite {
    pub spec_version: String,
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Valores fixos da suíte, disponíveis como `${nome}` nos textos dos steps.
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Variáveis geradas uma vez por execução: `<prefixo>_<millis>_<rand>`.
    #[serde(default)]
    pub unique_ids: HashMap<String, String>,
    /// Executado antes de cada workflow, depois do reset da sessão.
    #[serde(default)]
    pub bootstrap: Option<Workflow>,
    pub workflows: Vec<Workflow>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

/// Unidade atômica de trabalho: resolver, classificar, agir, verificar.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target: Option<LocatorSpec>,
    /// Subárvore onde o alvo é procurado (um diálogo, um painel).
    #[serde(default)]
    pub within: Option<LocatorSpec>,
    #[serde(default)]
    pub classify: Option<ClassificationCriterion>,
    pub action: Action,
    #[serde(default)]
    pub preconditions: Option<Preconditions>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Pausa fixa após a ação, para UIs sem sinal de conclusão.
    #[serde(default)]
    pub settle_ms: Option<u64>,
    #[serde(default)]
    pub expect: Vec<Expectation>,
    /// Procura os alvos das expectativas dentro de `within`. Por padrão a
    /// busca é no documento todo (toasts e modais costumam ficar fora).
    #[serde(default)]
    pub scope_expectations: bool,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl WorkflowStep {
    /// Papel usado em logs e falhas: o role do alvo, senão o id do step.
    pub fn role(&self) -> &str {
        self.target
            .as_ref()
            .map(|t| t.role.as_str())
            .unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Interrompe o workflow na primeira falha.
    #[default]
    FailFast,
    /// Registra o step como skipped e segue em frente.
    Ignore,
}

// ============================================================================
// LOCATORS
// ============================================================================

/// Locators candidatos, em ordem de preferência, para um papel lógico da UI.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LocatorSpec {
    pub role: String,
    pub candidates: Vec<Locator>,
}

impl LocatorSpec {
    pub fn new(role: impl Into<String>, candidates: Vec<Locator>) -> Self {
        Self {
            role: role.into(),
            candidates,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchOp {
    #[default]
    Equals,
    Contains,
}

/// Uma forma de encontrar um elemento.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    Css {
        selector: String,
    },
    Text {
        text: String,
        #[serde(default)]
        exact: bool,
        #[serde(default)]
        tag: Option<String>,
    },
    Attribute {
        #[serde(default)]
        tag: Option<String>,
        name: String,
        value: String,
        #[serde(default)]
        op: MatchOp,
    },
    TestId {
        id: String,
    },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css {
            selector: selector.into(),
        }
    }

    pub fn text(text: impl Into<String>, exact: bool) -> Self {
        Self::Text {
            text: text.into(),
            exact,
            tag: None,
        }
    }

    pub fn attribute(name: impl Into<String>, value: impl Into<String>, op: MatchOp) -> Self {
        Self::Attribute {
            tag: None,
            name: name.into(),
            value: value.into(),
            op,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css { selector } => write!(f, "css={}", selector),
            Self::Text { text, exact, tag } => {
                let tag = tag.as_deref().unwrap_or("*");
                if *exact {
                    write!(f, "text={}:\"{}\"", tag, text)
                } else {
                    write!(f, "text={}:*\"{}\"", tag, text)
                }
            }
            Self::Attribute {
                tag,
                name,
                value,
                op,
            } => {
                let op = match op {
                    MatchOp::Equals => "=",
                    MatchOp::Contains => "*=",
                };
                write!(
                    f,
                    "{}[{}{}\"{}\"]",
                    tag.as_deref().unwrap_or(""),
                    name,
                    op,
                    value
                )
            }
            Self::TestId { id } => write!(f, "test_id={}", id),
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Desempate pela ordem no documento.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    #[default]
    First,
    Last,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StructuralHeuristic {
    /// Maior área renderizada indica o campo de texto livre.
    LargestArea,
    /// Textareas e outros editores multi-linha.
    MultiLine,
    /// Elementos contenteditable.
    Editable,
    /// Inputs que ainda não têm valor.
    EmptyValue,
}

/// Regras de classificação, avaliadas na ordem em que aparecem.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    ExactMatch {
        /// Padrão: o role do critério.
        #[serde(default)]
        value: Option<String>,
    },
    AttributeMatch {
        attributes: Vec<String>,
        needles: Vec<String>,
    },
    LabelMatch {
        needles: Vec<String>,
    },
    Structural {
        heuristic: StructuralHeuristic,
    },
    PositionalFallback {
        #[serde(default)]
        prefer: Position,
    },
}

impl Rule {
    pub fn kind(&self) -> RuleKind {
        match self {
            Self::ExactMatch { .. } => RuleKind::ExactMatch,
            Self::AttributeMatch { .. } => RuleKind::AttributeMatch,
            Self::LabelMatch { .. } => RuleKind::LabelMatch,
            Self::Structural { .. } => RuleKind::Structural,
            Self::PositionalFallback { .. } => RuleKind::PositionalFallback,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    ExactMatch,
    AttributeMatch,
    LabelMatch,
    Structural,
    PositionalFallback,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExactMatch => "exact_match",
            Self::AttributeMatch => "attribute_match",
            Self::LabelMatch => "label_match",
            Self::Structural => "structural",
            Self::PositionalFallback => "positional_fallback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct ClassificationCriterion {
    #[serde(default)]
    pub role: Option<String>,
    pub rules: Vec<Rule>,
    /// Falha com `Ambiguous` em vez de estreitar quando uma regra casa vários.
    #[serde(default)]
    pub strict: bool,
    /// Desempate quando as regras se esgotam.
    #[serde(default)]
    pub prefer: Position,
}

// ============================================================================
// AÇÕES
// ============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click {
        #[serde(default)]
        force: bool,
    },
    DoubleClick {
        #[serde(default)]
        force: bool,
    },
    Type {
        text: String,
        #[serde(default = "default_true")]
        clear: bool,
        #[serde(default)]
        delay_ms: Option<u64>,
    },
    Clear,
    Select {
        option: String,
    },
    Check,
    Uncheck,
    /// Arrasta o elemento do step e solta sobre `target`.
    DragTo {
        target: LocatorSpec,
    },
    /// Anexa um arquivo local a um `<input type="file">`.
    Upload {
        path: String,
    },
    Navigate {
        url: String,
    },
    Wait {
        duration_ms: u64,
    },
    PressKey {
        key: String,
    },
    /// Nenhuma ação; o step só verifica as expectativas.
    Verify,
}

impl Action {
    /// Ações de elemento precisam de alvo resolvido; ações de página não.
    pub fn needs_target(&self) -> bool {
        matches!(
            self,
            Self::Click { .. }
                | Self::DoubleClick { .. }
                | Self::Type { .. }
                | Self::Clear
                | Self::Select { .. }
                | Self::Check
                | Self::Uncheck
                | Self::DragTo { .. }
                | Self::Upload { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::DoubleClick { .. } => "double_click",
            Self::Type { .. } => "type",
            Self::Clear => "clear",
            Self::Select { .. } => "select",
            Self::Check => "check",
            Self::Uncheck => "uncheck",
            Self::DragTo { .. } => "drag_to",
            Self::Upload { .. } => "upload",
            Self::Navigate { .. } => "navigate",
            Self::Wait { .. } => "wait",
            Self::PressKey { .. } => "press_key",
            Self::Verify => "verify",
        }
    }

    /// Pré-condições padrão. Ações forçadas pulam a checagem de enabled.
    pub fn default_preconditions(&self) -> Preconditions {
        match self {
            Self::Click { force } | Self::DoubleClick { force } => Preconditions {
                visible: true,
                enabled: !force,
            },
            _ if self.needs_target() => Preconditions::default(),
            _ => Preconditions {
                visible: false,
                enabled: false,
            },
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Preconditions {
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for Preconditions {
    fn default() -> Self {
        Self {
            visible: true,
            enabled: true,
        }
    }
}

fn default_backoff_factor() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total de tentativas, incluindo a primeira.
    pub max_attempts: u32,
    /// Delay base entre tentativas, em milissegundos.
    pub delay_ms: u64,
    /// Multiplicador aplicado ao delay após cada tentativa falha.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
            backoff_factor: 1.0,
        }
    }

    /// Uma única tentativa, sem retry.
    pub fn once() -> Self {
        Self::new(1, 0)
    }
}

// ============================================================================
// EXPECTATIVAS
// ============================================================================

/// Condição de sucesso verificada após a ação do step.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expectation {
    Visible { target: LocatorSpec },
    Absent { target: LocatorSpec },
    TextContains { target: LocatorSpec, text: String },
    /// Valor do elemento sobre o qual o step agiu.
    ValueEquals { value: String },
    /// Atributo de `target`, ou do elemento sobre o qual o step agiu.
    AttributeEquals {
        #[serde(default)]
        target: Option<LocatorSpec>,
        name: String,
        value: String,
    },
    UrlContains { fragment: String },
}

// ============================================================================
// RESULTADOS
// ============================================================================

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StepOutcome {
    pub step_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub status: StepStatus,
    pub attempts: u32,
    /// Regra de classificação que escolheu o elemento, se alguma rodou.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleKind>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FailureRecord {
    pub step_id: String,
    pub role: String,
    pub attempts: u32,
    pub error_code: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkflowResult {
    pub run_id: String,
    pub workflow: String,
    pub state: WorkflowState,
    pub steps: Vec<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Identificadores dos artefatos de diagnóstico gravados nesta execução
    /// (caminhos de arquivo com `FileSink`).
    #[serde(default)]
    pub diagnostics: Vec<String>,
}

impl WorkflowResult {
    pub fn passed(&self) -> bool {
        self.state == WorkflowState::Completed
    }
}

#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub suite: String,
    pub status: String, // "passed" | "failed"
    pub start_time: String,
    pub end_time: String,
    pub workflows: Vec<WorkflowResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_deserializes_with_defaults() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "id": "fill_name",
            "target": {
                "role": "name",
                "candidates": [
                    { "by": "css", "selector": "input[name=name]" },
                    { "by": "attribute", "name": "placeholder", "value": "name", "op": "contains" }
                ]
            },
            "action": { "type": "type", "text": "${bot_name}" }
        }))
        .unwrap();

        assert_eq!(step.role(), "name");
        assert_eq!(step.on_failure, FailurePolicy::FailFast);
        assert!(step.expect.is_empty());
        match &step.action {
            Action::Type { clear, delay_ms, .. } => {
                assert!(*clear);
                assert!(delay_ms.is_none());
            }
            other => panic!("unexpected action {:?}", other),
        }
        let candidates = &step.target.as_ref().unwrap().candidates;
        assert_eq!(candidates[1], Locator::attribute("placeholder", "name", MatchOp::Contains));
    }

    #[test]
    fn test_rules_deserialize_as_tagged_variants() {
        let criterion: ClassificationCriterion = serde_json::from_value(json!({
            "role": "message",
            "rules": [
                { "rule": "exact_match" },
                { "rule": "attribute_match", "attributes": ["placeholder"], "needles": ["message"] },
                { "rule": "structural", "heuristic": "largest_area" },
                { "rule": "positional_fallback", "prefer": "last" }
            ]
        }))
        .unwrap();

        let kinds: Vec<RuleKind> = criterion.rules.iter().map(Rule::kind).collect();
        assert_eq!(
            kinds,
            vec![
                RuleKind::ExactMatch,
                RuleKind::AttributeMatch,
                RuleKind::Structural,
                RuleKind::PositionalFallback
            ]
        );
        assert!(!criterion.strict);
        assert_eq!(criterion.prefer, Position::First);
    }

    #[test]
    fn test_drag_upload_and_attribute_expectation() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "id": "drop_message_box",
            "target": { "role": "palette_item", "candidates": [{ "by": "css", "selector": "li.message-box" }] },
            "action": {
                "type": "drag_to",
                "target": { "role": "canvas", "candidates": [{ "by": "css", "selector": "#canvas" }] }
            },
            "expect": [
                { "type": "attribute_equals", "name": "data-state", "value": "dropped" }
            ]
        }))
        .unwrap();

        assert!(step.action.needs_target());
        assert_eq!(step.action.name(), "drag_to");
        match &step.expect[0] {
            Expectation::AttributeEquals { target, name, value } => {
                assert!(target.is_none());
                assert_eq!(name, "data-state");
                assert_eq!(value, "dropped");
            }
            other => panic!("unexpected expectation {:?}", other),
        }

        let upload: Action =
            serde_json::from_value(json!({ "type": "upload", "path": "fixtures/bots.csv" })).unwrap();
        assert_eq!(upload, Action::Upload { path: "fixtures/bots.csv".into() });
        assert!(upload.default_preconditions().visible);
    }

    #[test]
    fn test_forced_click_skips_enabled_precondition() {
        let forced = Action::Click { force: true }.default_preconditions();
        assert!(forced.visible);
        assert!(!forced.enabled);

        let plain = Action::Click { force: false }.default_preconditions();
        assert!(plain.enabled);

        let wait = Action::Wait { duration_ms: 10 }.default_preconditions();
        assert!(!wait.visible && !wait.enabled);
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::css("button.save").to_string(), "css=button.save");
        assert_eq!(
            Locator::attribute("placeholder", "x", MatchOp::Contains).to_string(),
            "[placeholder*=\"x\"]"
        );
        assert_eq!(Locator::text("Message box", true).to_string(), "text=*:\"Message box\"");
    }
}
