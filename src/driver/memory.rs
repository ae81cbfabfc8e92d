//! Driver em memória.
//!
//! Mantém um DOM simplificado (lista de elementos em ordem de documento, cada
//! um com um `parent` opcional) protegido por um `Mutex`. Serve de dublê nos
//! testes e permite rodar uma suíte em dry run contra um snapshot JSON
//! (`--dom page.json`).
//!
//! ## Recursos
//!
//! - Subconjunto de CSS: `tag`, `#id`, `.classe`, `[attr]`, `[attr=v]`,
//!   `[attr*=v]`, `[attr^=v]`, `[attr$=v]`, descendência por espaço e
//!   uniões com vírgula
//! - Efeitos de clique: mostrar/esconder elementos e navegar
//! - Injeção de falhas (`fail_next`, `partial_type`) para exercitar retry
//! - Log de ações e de consultas, para asserções de teste
//!
//! ## Exemplo de snapshot:
//!
//! ```json
//! {
//!   "url": "https://app.local/bots/1",
//!   "elements": [
//!     { "id": "open", "tag": "button", "text": "Message box",
//!       "on_click": { "show": ["dialog"] } },
//!     { "id": "dialog", "tag": "div", "visible": false,
//!       "attributes": { "role": "dialog" } },
//!     { "id": "msg", "tag": "textarea", "parent": "dialog",
//!       "attributes": { "placeholder": "Type your message" } }
//!   ]
//! }
//! ```

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use super::{Driver, DriverError, DriverResult, ElementInfo, ElementRef, Rect};
use crate::protocol::{Locator, MatchOp};

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\*|[A-Za-z][A-Za-z0-9-]*)").expect("valid tag regex"));

static PART_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(?:#(?P<id>[\w-]+)|\.(?P<class>[\w-]+)|\[\s*(?P<attr>[\w-]+)\s*(?:(?P<op>[*^$]?=)\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<bare>[^\]\s]*))\s*)?\])"#,
    )
    .expect("valid selector part regex")
});

// ============================================================================
// SNAPSHOT
// ============================================================================

fn default_true() -> bool {
    true
}

fn default_tag() -> String {
    "div".to_string()
}

/// Efeitos colaterais de um clique (ou de um drop, em `on_drop`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickEffect {
    #[serde(default)]
    pub show: Vec<String>,
    #[serde(default)]
    pub hide: Vec<String>,
    #[serde(default)]
    pub navigate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// Um nó do DOM em memória.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryElement {
    pub id: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub checked: Option<bool>,
    #[serde(default)]
    pub options: Vec<SelectOption>,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub on_click: Option<ClickEffect>,
    /// Efeito quando outro elemento é solto sobre este.
    #[serde(default)]
    pub on_drop: Option<ClickEffect>,
}

impl MemoryElement {
    pub fn new(id: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
            parent: None,
            attributes: HashMap::new(),
            text: String::new(),
            value: None,
            label: None,
            visible: true,
            enabled: true,
            checked: None,
            options: Vec::new(),
            rect: Rect::default(),
            on_click: None,
            on_drop: None,
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = Some(checked);
        self
    }

    pub fn size(mut self, width: f64, height: f64) -> Self {
        self.rect.width = width;
        self.rect.height = height;
        self
    }

    pub fn options(mut self, options: &[(&str, &str)]) -> Self {
        self.options = options
            .iter()
            .map(|(value, label)| SelectOption {
                value: value.to_string(),
                label: label.to_string(),
            })
            .collect();
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.on_click = Some(effect);
        self
    }

    pub fn on_drop(mut self, effect: ClickEffect) -> Self {
        self.on_drop = Some(effect);
        self
    }

    fn is_file_input(&self) -> bool {
        self.tag == "input" && self.attributes.get("type").map(String::as_str) == Some("file")
    }

    fn is_text_entry(&self) -> bool {
        self.value.is_some() || matches!(self.tag.as_str(), "input" | "textarea")
    }

    fn is_content_editable(&self) -> bool {
        matches!(
            self.attributes.get("contenteditable").map(String::as_str),
            Some("") | Some("true")
        )
    }
}

/// Página completa, como lida de um arquivo `--dom`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryPage {
    #[serde(default)]
    pub url: String,
    pub elements: Vec<MemoryElement>,
}

/// Página com estrutura inconsistente.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PageError {
    #[error("id '{0}' aparece em mais de um elemento")]
    DuplicateId(String),

    #[error("elemento '{id}' aponta para pai inexistente '{parent}'")]
    UnknownParent { id: String, parent: String },

    #[error("ciclo de parent a partir de '{0}'")]
    ParentCycle(String),
}

impl MemoryPage {
    /// Ids únicos, pais existentes e nenhuma cadeia de parent circular.
    pub fn validate(&self) -> Result<(), PageError> {
        let mut parents: HashMap<&str, Option<&str>> = HashMap::with_capacity(self.elements.len());
        for el in &self.elements {
            if parents.insert(&el.id, el.parent.as_deref()).is_some() {
                return Err(PageError::DuplicateId(el.id.clone()));
            }
        }

        for el in &self.elements {
            if let Some(parent) = &el.parent {
                if !parents.contains_key(parent.as_str()) {
                    return Err(PageError::UnknownParent {
                        id: el.id.clone(),
                        parent: parent.clone(),
                    });
                }
            }

            // Uma cadeia sem ciclo tem no máximo `len` pais.
            let mut current = el.parent.as_deref();
            let mut hops = 0;
            while let Some(id) = current {
                hops += 1;
                if id == el.id || hops > self.elements.len() {
                    return Err(PageError::ParentCycle(el.id.clone()));
                }
                current = parents.get(id).copied().flatten();
            }
        }
        Ok(())
    }
}

// ============================================================================
// SELETORES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum AttrTest {
    Present,
    Equals(String),
    Contains(String),
    Prefix(String),
    Suffix(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attrs: Vec<(String, AttrTest)>,
}

/// Sequência de compostos ligados por descendência (`form textarea`).
type Chain = Vec<Compound>;

fn parse_compound(raw: &str, selector: &str) -> DriverResult<Compound> {
    let mut compound = Compound::default();
    let mut rest = raw;

    if let Some(m) = TAG_RE.find(rest) {
        if m.as_str() != "*" {
            compound.tag = Some(m.as_str().to_ascii_lowercase());
        }
        rest = &rest[m.end()..];
    }

    while !rest.is_empty() {
        let caps = PART_RE.captures(rest).ok_or_else(|| {
            DriverError::InvalidLocator(selector.to_string(), format!("trecho '{}' não suportado", rest))
        })?;

        if let Some(id) = caps.name("id") {
            compound.ids.push(id.as_str().to_string());
        } else if let Some(class) = caps.name("class") {
            compound.classes.push(class.as_str().to_string());
        } else if let Some(attr) = caps.name("attr") {
            let value = caps
                .name("dq")
                .or_else(|| caps.name("sq"))
                .or_else(|| caps.name("bare"))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let test = match caps.name("op").map(|m| m.as_str()) {
                None => AttrTest::Present,
                Some("=") => AttrTest::Equals(value),
                Some("*=") => AttrTest::Contains(value),
                Some("^=") => AttrTest::Prefix(value),
                Some(_) => AttrTest::Suffix(value),
            };
            compound.attrs.push((attr.as_str().to_string(), test));
        }

        let consumed = caps.get(0).map(|m| m.end()).unwrap_or(rest.len());
        rest = &rest[consumed..];
    }

    Ok(compound)
}

/// Quebra uma lista `a b, c` em cadeias, respeitando espaços dentro de `[...]`.
fn parse_selector(selector: &str) -> DriverResult<Vec<Chain>> {
    let mut chains = Vec::new();

    for group in split_outside_brackets(selector, ',') {
        let group = group.trim();
        if group.is_empty() {
            return Err(DriverError::InvalidLocator(
                selector.to_string(),
                "seletor vazio".to_string(),
            ));
        }
        let chain = split_outside_brackets(group, ' ')
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .map(|part| parse_compound(part.trim(), selector))
            .collect::<DriverResult<Chain>>()?;
        chains.push(chain);
    }

    Ok(chains)
}

fn split_outside_brackets(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '"' | '\'' if quote == Some(c) => quote = None,
            '"' | '\'' if quote.is_none() && depth > 0 => quote = Some(c),
            '[' if quote.is_none() => depth += 1,
            ']' if quote.is_none() => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 && quote.is_none() => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// ESTADO
// ============================================================================

#[derive(Debug, Default)]
struct State {
    url: String,
    elements: Vec<MemoryElement>,
    failures: HashMap<String, VecDeque<DriverError>>,
    partial_types: HashMap<String, usize>,
    actions: VecDeque<String>,
    queries: VecDeque<String>,
}

/// Quantas entradas os logs de ações e consultas guardam; as mais antigas saem.
pub const LOG_CAPACITY: usize = 1024;

fn record(log: &mut VecDeque<String>, entry: String) {
    if log.len() == LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(entry);
}

impl State {
    fn index_of(&self, id: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.id == id)
    }

    fn get(&self, id: &str) -> Option<&MemoryElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    fn get_mut(&mut self, element: &ElementRef) -> DriverResult<&mut MemoryElement> {
        self.elements
            .iter_mut()
            .find(|e| e.id == element.id)
            .ok_or_else(|| DriverError::Detached(element.to_string()))
    }

    /// Cadeia de pais, limitada ao tamanho do DOM: um ciclo criado por
    /// `insert`/`update` não trava a consulta.
    fn ancestors<'a>(&'a self, element: &'a MemoryElement) -> impl Iterator<Item = &'a MemoryElement> + 'a {
        let mut current = element.parent.as_deref();
        std::iter::from_fn(move || {
            let parent = self.get(current?)?;
            current = parent.parent.as_deref();
            Some(parent)
        })
        .take(self.elements.len())
    }

    fn log_action(&mut self, entry: String) {
        record(&mut self.actions, entry);
    }

    fn is_rendered(&self, element: &MemoryElement) -> bool {
        element.visible && self.ancestors(element).all(|a| a.visible)
    }

    fn is_descendant_of(&self, element: &MemoryElement, scope: &str) -> bool {
        self.ancestors(element).any(|a| a.id == scope)
    }

    fn depth(&self, element: &MemoryElement) -> usize {
        self.ancestors(element).count()
    }

    fn take_failure(&mut self, element: &ElementRef) -> DriverResult<()> {
        if let Some(queue) = self.failures.get_mut(&element.id) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        Ok(())
    }

    fn compound_matches(&self, el: &MemoryElement, compound: &Compound) -> bool {
        if let Some(tag) = &compound.tag {
            if &el.tag != tag {
                return false;
            }
        }
        for id in &compound.ids {
            let html_id = el.attributes.get("id").map(String::as_str).unwrap_or(&el.id);
            if html_id != id {
                return false;
            }
        }
        let classes: Vec<&str> = el
            .attributes
            .get("class")
            .map(|c| c.split_whitespace().collect())
            .unwrap_or_default();
        if !compound.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
        compound.attrs.iter().all(|(name, test)| {
            let actual = match name.as_str() {
                "value" => el.value.as_deref().or(el.attributes.get("value").map(String::as_str)),
                _ => el.attributes.get(name).map(String::as_str),
            };
            match (test, actual) {
                (_, None) => false,
                (AttrTest::Present, Some(_)) => true,
                (AttrTest::Equals(v), Some(a)) => a == v,
                (AttrTest::Contains(v), Some(a)) => a.contains(v.as_str()),
                (AttrTest::Prefix(v), Some(a)) => a.starts_with(v.as_str()),
                (AttrTest::Suffix(v), Some(a)) => a.ends_with(v.as_str()),
            }
        })
    }

    fn chain_matches(&self, el: &MemoryElement, chain: &[Compound]) -> bool {
        let Some((last, init)) = chain.split_last() else {
            return false;
        };
        if !self.compound_matches(el, last) {
            return false;
        }
        // Ancestrais precisam casar o resto da cadeia, do mais próximo ao mais distante.
        let mut pending = init.iter().rev().peekable();
        for ancestor in self.ancestors(el) {
            match pending.peek() {
                Some(compound) if self.compound_matches(ancestor, compound) => {
                    pending.next();
                }
                Some(_) => {}
                None => break,
            }
        }
        pending.peek().is_none()
    }

    fn matches(&self, el: &MemoryElement, locator: &Locator, css: &[Chain]) -> bool {
        match locator {
            Locator::Css { .. } => css.iter().any(|chain| self.chain_matches(el, chain)),
            Locator::Text { text, exact, tag } => {
                if tag.as_ref().is_some_and(|t| !t.eq_ignore_ascii_case(&el.tag)) {
                    return false;
                }
                let own = normalize_ws(&el.text);
                let wanted = normalize_ws(text);
                if *exact {
                    own == wanted
                } else {
                    !wanted.is_empty() && own.contains(&wanted)
                }
            }
            Locator::Attribute {
                tag,
                name,
                value,
                op,
            } => {
                if tag.as_ref().is_some_and(|t| !t.eq_ignore_ascii_case(&el.tag)) {
                    return false;
                }
                match el.attributes.get(name) {
                    Some(actual) => match op {
                        MatchOp::Equals => actual == value,
                        MatchOp::Contains => actual.contains(value.as_str()),
                    },
                    None => false,
                }
            }
            Locator::TestId { id } => el.attributes.get("data-testid") == Some(id),
        }
    }

    fn ensure_interactable(&self, element: &ElementRef, force: bool) -> DriverResult<usize> {
        let idx = self
            .index_of(&element.id)
            .ok_or_else(|| DriverError::Detached(element.to_string()))?;
        let el = &self.elements[idx];
        if !self.is_rendered(el) {
            return Err(DriverError::NotInteractable(
                element.to_string(),
                "elemento não está visível".to_string(),
            ));
        }
        if !el.enabled && !force {
            return Err(DriverError::NotInteractable(
                element.to_string(),
                "elemento desabilitado".to_string(),
            ));
        }
        Ok(idx)
    }

    fn apply_click(&mut self, idx: usize) {
        let el = &mut self.elements[idx];
        if el.tag == "input"
            && matches!(el.attributes.get("type").map(String::as_str), Some("checkbox") | Some("radio"))
        {
            el.checked = Some(!el.checked.unwrap_or(false));
        }
        if let Some(effect) = el.on_click.clone() {
            self.apply_effect(effect);
        }
    }

    fn apply_effect(&mut self, effect: ClickEffect) {
        for id in &effect.show {
            if let Some(target) = self.elements.iter_mut().find(|e| &e.id == id) {
                target.visible = true;
            }
        }
        for id in &effect.hide {
            if let Some(target) = self.elements.iter_mut().find(|e| &e.id == id) {
                target.visible = false;
            }
        }
        if let Some(url) = effect.navigate {
            self.url = url;
        }
    }
}

// ============================================================================
// DRIVER
// ============================================================================

/// Driver sobre um DOM em memória.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    initial: MemoryPage,
    state: Mutex<State>,
}

impl MemoryDriver {
    pub fn new(page: MemoryPage) -> Self {
        let state = State {
            url: page.url.clone(),
            elements: page.elements.clone(),
            ..Default::default()
        };
        Self {
            initial: page,
            state: Mutex::new(state),
        }
    }

    pub fn from_elements(elements: Vec<MemoryElement>) -> Self {
        Self::new(MemoryPage {
            url: "about:blank".to_string(),
            elements,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Um teste que entrou em pânico segurando o lock não invalida o DOM.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Faz as próximas `times` ações no elemento falharem com `err`.
    pub fn fail_next(&self, id: &str, err: DriverError, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(id.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    /// A próxima digitação no elemento grava só `chars` caracteres e falha
    /// com `Detached`, como um re-render no meio da digitação.
    pub fn partial_type(&self, id: &str, chars: usize) {
        self.lock().partial_types.insert(id.to_string(), chars);
    }

    pub fn insert(&self, element: MemoryElement) {
        self.lock().elements.push(element);
    }

    pub fn remove(&self, id: &str) {
        self.lock().elements.retain(|e| e.id != id);
    }

    /// Altera um elemento já existente. Retorna `false` se ele não existe.
    pub fn update(&self, id: &str, f: impl FnOnce(&mut MemoryElement)) -> bool {
        let mut state = self.lock();
        match state.elements.iter_mut().find(|e| e.id == id) {
            Some(el) => {
                f(el);
                true
            }
            None => false,
        }
    }

    pub fn element(&self, id: &str) -> Option<MemoryElement> {
        self.lock().get(id).cloned()
    }

    pub fn value_of(&self, id: &str) -> Option<String> {
        self.lock().get(id).and_then(|e| e.value.clone())
    }

    /// Ações executadas, no formato `"<ação> <id>"`.
    pub fn actions(&self) -> Vec<String> {
        self.lock().actions.iter().cloned().collect()
    }

    /// Locators consultados via `find_all`, na ordem das consultas.
    pub fn queries(&self) -> Vec<String> {
        self.lock().queries.iter().cloned().collect()
    }

    pub fn url(&self) -> String {
        self.lock().url.clone()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn find_all(
        &self,
        locator: &Locator,
        scope: Option<&ElementRef>,
    ) -> DriverResult<Vec<ElementRef>> {
        let mut state = self.lock();
        record(&mut state.queries, locator.to_string());

        let css = match locator {
            Locator::Css { selector } => parse_selector(selector)?,
            _ => Vec::new(),
        };

        if let Some(scope) = scope {
            if state.index_of(&scope.id).is_none() {
                return Err(DriverError::Detached(scope.to_string()));
            }
        }

        Ok(state
            .elements
            .iter()
            .filter(|el| scope.map_or(true, |s| state.is_descendant_of(el, &s.id)))
            .filter(|el| state.matches(el, locator, &css))
            .map(|el| ElementRef::new(el.id.clone()))
            .collect())
    }

    async fn describe(&self, element: &ElementRef) -> DriverResult<ElementInfo> {
        let state = self.lock();
        let el = state
            .get(&element.id)
            .ok_or_else(|| DriverError::Detached(element.to_string()))?;
        let value = if el.is_content_editable() && el.value.is_none() {
            Some(el.text.clone())
        } else {
            el.value.clone()
        };
        Ok(ElementInfo {
            tag: el.tag.clone(),
            attributes: el.attributes.clone(),
            text: el.text.clone(),
            value,
            label: el.label.clone(),
            visible: state.is_rendered(el),
            enabled: el.enabled,
            checked: el.checked,
            selected_label: el
                .options
                .iter()
                .find(|o| Some(&o.value) == el.value.as_ref())
                .map(|o| o.label.clone()),
            rect: el.rect,
        })
    }

    async fn click(&self, element: &ElementRef, force: bool) -> DriverResult<()> {
        let mut state = self.lock();
        state.take_failure(element)?;
        let idx = state.ensure_interactable(element, force)?;
        state.apply_click(idx);
        state.log_action(format!("click {}", element.id));
        Ok(())
    }

    async fn double_click(&self, element: &ElementRef, force: bool) -> DriverResult<()> {
        let mut state = self.lock();
        state.take_failure(element)?;
        let idx = state.ensure_interactable(element, force)?;
        state.apply_click(idx);
        state.log_action(format!("double_click {}", element.id));
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> DriverResult<()> {
        let mut state = self.lock();
        state.take_failure(element)?;
        state.ensure_interactable(element, false)?;
        let el = state.get_mut(element)?;
        if el.is_content_editable() && !el.is_text_entry() {
            el.text.clear();
        } else {
            el.value = Some(String::new());
        }
        state.log_action(format!("clear {}", element.id));
        Ok(())
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> DriverResult<()> {
        let mut state = self.lock();
        state.take_failure(element)?;
        state.ensure_interactable(element, false)?;

        let partial = state.partial_types.remove(&element.id);
        let typed: String = match partial {
            Some(n) => text.chars().take(n).collect(),
            None => text.to_string(),
        };

        let el = state.get_mut(element)?;
        if el.is_content_editable() && !el.is_text_entry() {
            el.text.push_str(&typed);
        } else {
            el.value.get_or_insert_with(String::new).push_str(&typed);
        }
        state.log_action(format!("type {} {}", element.id, typed));

        if partial.is_some() {
            return Err(DriverError::Detached(element.to_string()));
        }
        Ok(())
    }

    async fn select_option(&self, element: &ElementRef, option: &str) -> DriverResult<()> {
        let mut state = self.lock();
        state.take_failure(element)?;
        state.ensure_interactable(element, false)?;
        let el = state.get_mut(element)?;
        let chosen = el
            .options
            .iter()
            .find(|o| o.value == option || o.label == option)
            .map(|o| o.value.clone())
            .ok_or_else(|| {
                DriverError::NotInteractable(
                    element.to_string(),
                    format!("opção '{}' não existe", option),
                )
            })?;
        el.value = Some(chosen);
        state.log_action(format!("select {} {}", element.id, option));
        Ok(())
    }

    async fn set_checked(&self, element: &ElementRef, checked: bool) -> DriverResult<()> {
        let mut state = self.lock();
        state.take_failure(element)?;
        state.ensure_interactable(element, false)?;
        state.get_mut(element)?.checked = Some(checked);
        let verb = if checked { "check" } else { "uncheck" };
        state.log_action(format!("{} {}", verb, element.id));
        Ok(())
    }

    async fn drag_to(&self, source: &ElementRef, destination: &ElementRef) -> DriverResult<()> {
        let mut state = self.lock();
        state.take_failure(source)?;
        state.ensure_interactable(source, false)?;
        let idx = state.ensure_interactable(destination, true)?;
        if let Some(effect) = state.elements[idx].on_drop.clone() {
            state.apply_effect(effect);
        }
        state.log_action(format!("drag {} {}", source.id, destination.id));
        Ok(())
    }

    async fn upload_file(&self, element: &ElementRef, path: &Path) -> DriverResult<()> {
        let mut state = self.lock();
        state.take_failure(element)?;
        state.ensure_interactable(element, false)?;
        let el = state.get_mut(element)?;
        if !el.is_file_input() {
            return Err(DriverError::Unsupported(format!(
                "{} não é um input de arquivo",
                element
            )));
        }
        // Como no navegador: o valor expõe só o nome do arquivo.
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        el.value = Some(name.clone());
        state.log_action(format!("upload {} {}", element.id, name));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let mut state = self.lock();
        state.url = url.to_string();
        state.log_action(format!("navigate {}", url));
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.lock().url.clone())
    }

    async fn press_key(&self, key: &str) -> DriverResult<()> {
        self.lock().log_action(format!("press_key {}", key));
        Ok(())
    }

    async fn dump_tree(&self) -> DriverResult<String> {
        let state = self.lock();
        let mut out = format!("<!-- {} -->\n", state.url);
        for el in &state.elements {
            let indent = "  ".repeat(state.depth(el));
            let mut attrs: Vec<_> = el.attributes.iter().collect();
            attrs.sort();
            let attrs: String = attrs
                .iter()
                .map(|(k, v)| format!(" {}=\"{}\"", k, v))
                .collect();
            let hidden = if state.is_rendered(el) { "" } else { " hidden" };
            out.push_str(&format!(
                "{}<{} data-ref=\"{}\"{}{}>{}\n",
                indent, el.tag, el.id, attrs, hidden, el.text
            ));
        }
        Ok(out)
    }

    async fn reset_session(&self) -> DriverResult<()> {
        let mut state = self.lock();
        state.url = self.initial.url.clone();
        state.elements = self.initial.elements.clone();
        state.log_action("reset_session".to_string());
        Ok(())
    }
}
