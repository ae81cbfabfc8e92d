//! Driver WebDriver (chromedriver, geckodriver, ...) sobre `fantoccini`.
//!
//! Compilado apenas com a feature `webdriver`.
//!
//! Os elementos do fantoccini ficam num mapa interno; o engine só enxerga
//! handles `w<n>`. O mesmo elemento do navegador (mesmo id WebDriver) recebe
//! sempre o mesmo handle. O mapa é limpo em `navigate` e `reset_session`.

use async_trait::async_trait;
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator as WdLocator};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::{Driver, DriverError, DriverResult, ElementInfo, ElementRef};
use crate::protocol::{Locator, MatchOp};

/// Snapshot de um elemento, devolvido como JSON compatível com `ElementInfo`.
const DESCRIBE_JS: &str = r#"
const el = arguments[0];
const r = el.getBoundingClientRect();
const style = window.getComputedStyle(el);
const attributes = {};
for (const a of el.attributes) { attributes[a.name] = a.value; }
let label = null;
if (el.labels && el.labels.length) {
  label = el.labels[0].innerText;
} else if (el.getAttribute('aria-label')) {
  label = el.getAttribute('aria-label');
} else if (el.closest('label')) {
  label = el.closest('label').innerText;
} else if (el.previousElementSibling && el.previousElementSibling.tagName === 'LABEL') {
  label = el.previousElementSibling.innerText;
}
let value = null;
if ('value' in el && el.tagName !== 'BUTTON' && el.tagName !== 'LI') {
  value = String(el.value);
} else if (el.isContentEditable) {
  value = el.innerText;
}
const checkable = el.type === 'checkbox' || el.type === 'radio';
const selected = el.tagName === 'SELECT' && el.selectedIndex >= 0
  ? el.options[el.selectedIndex].text.trim()
  : null;
return {
  tag: el.tagName.toLowerCase(),
  attributes,
  text: (el.innerText || el.textContent || '').trim(),
  value,
  label: label ? label.trim() : null,
  visible: r.width > 0 && r.height > 0 && style.visibility !== 'hidden' && style.display !== 'none',
  enabled: !el.disabled,
  checked: checkable ? el.checked : null,
  selected_label: selected,
  rect: { x: r.x, y: r.y, width: r.width, height: r.height }
};
"#;

const FORCE_CLICK_JS: &str = "arguments[0].click();";

const DOUBLE_CLICK_JS: &str = r#"
const el = arguments[0];
el.dispatchEvent(new MouseEvent('dblclick', { bubbles: true, cancelable: true, view: window }));
"#;

/// Eventos de mouse e de drag HTML5 da origem até o centro do destino.
const DRAG_JS: &str = r#"
const [src, dst] = arguments;
const s = src.getBoundingClientRect();
const d = dst.getBoundingClientRect();
const from = { clientX: s.left + s.width / 2, clientY: s.top + s.height / 2 };
const to = { clientX: d.left + d.width / 2, clientY: d.top + d.height / 2 };
const mouse = (el, type, at) =>
  el.dispatchEvent(new MouseEvent(type, { bubbles: true, cancelable: true, view: window, button: 0, ...at }));
const drag = (el, type, at, dataTransfer) =>
  el.dispatchEvent(new DragEvent(type, { bubbles: true, cancelable: true, dataTransfer, ...at }));
mouse(src, 'mousedown', from);
const data = new DataTransfer();
drag(src, 'dragstart', from, data);
mouse(dst, 'mousemove', to);
drag(dst, 'dragenter', to, data);
drag(dst, 'dragover', to, data);
drag(dst, 'drop', to, data);
mouse(dst, 'mouseup', to);
drag(src, 'dragend', to, data);
"#;

const CLEAR_STORAGE_JS: &str = r#"
try { window.localStorage.clear(); } catch (e) {}
try { window.sessionStorage.clear(); } catch (e) {}
"#;

/// Handles estáveis para elementos do navegador, indexados pelo id WebDriver.
#[derive(Debug)]
struct HandleRegistry<T> {
    by_wire_id: HashMap<String, String>,
    elements: HashMap<String, T>,
    next: u64,
}

impl<T: Clone> HandleRegistry<T> {
    fn new() -> Self {
        Self {
            by_wire_id: HashMap::new(),
            elements: HashMap::new(),
            next: 1,
        }
    }

    fn register(&mut self, wire_id: &str, element: T) -> ElementRef {
        if let Some(handle) = self.by_wire_id.get(wire_id) {
            return ElementRef::new(handle.clone());
        }
        let handle = format!("w{}", self.next);
        self.next += 1;
        self.by_wire_id.insert(wire_id.to_string(), handle.clone());
        self.elements.insert(handle.clone(), element);
        ElementRef::new(handle)
    }

    fn get(&self, handle: &str) -> Option<T> {
        self.elements.get(handle).cloned()
    }

    fn len(&self) -> usize {
        self.elements.len()
    }

    fn clear(&mut self) {
        self.by_wire_id.clear();
        self.elements.clear();
    }
}

/// Driver que controla um navegador real.
pub struct WebDriverDriver {
    client: Client,
    handles: Mutex<HandleRegistry<Element>>,
}

impl WebDriverDriver {
    /// Abre uma sessão no endpoint WebDriver.
    pub async fn connect(url: &str, headless: bool) -> DriverResult<Self> {
        let mut caps = serde_json::Map::new();
        if headless {
            caps.insert(
                "goog:chromeOptions".to_string(),
                json!({ "args": ["--headless=new", "--window-size=1366,900"] }),
            );
            caps.insert(
                "moz:firefoxOptions".to_string(),
                json!({ "args": ["-headless"] }),
            );
        }

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(url)
            .await
            .map_err(|e| DriverError::Backend(format!("falha ao conectar em {}: {}", url, e)))?;

        info!(endpoint = %url, headless, "Sessão WebDriver aberta");

        Ok(Self {
            client,
            handles: Mutex::new(HandleRegistry::new()),
        })
    }

    /// Encerra a sessão do navegador.
    pub async fn close(self) -> DriverResult<()> {
        self.client.close().await.map_err(map_cmd_error)
    }

    fn handles(&self) -> MutexGuard<'_, HandleRegistry<Element>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn element(&self, element: &ElementRef) -> DriverResult<Element> {
        self.handles()
            .get(&element.id)
            .ok_or_else(|| DriverError::Detached(element.to_string()))
    }

    async fn run_on(&self, element: &ElementRef, script: &str) -> DriverResult<Value> {
        let el = self.element(element)?;
        let arg = serde_json::to_value(&el)
            .map_err(|e| DriverError::Backend(format!("falha ao serializar elemento: {}", e)))?;
        self.client
            .execute(script, vec![arg])
            .await
            .map_err(map_cmd_error)
    }
}

/// Traduz erros do fantoccini para o vocabulário do engine.
fn map_cmd_error(err: CmdError) -> DriverError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("stale element") || lower.contains("no such element") {
        DriverError::Detached(message)
    } else if lower.contains("intercepted") {
        DriverError::Intercepted(message)
    } else if lower.contains("not interactable") || lower.contains("invalid element state") {
        DriverError::NotInteractable("elemento".to_string(), message)
    } else if lower.contains("timeout") || lower.contains("timed out") {
        DriverError::Timeout(message)
    } else if lower.contains("invalid selector") {
        DriverError::InvalidLocator(String::new(), message)
    } else {
        DriverError::Backend(message)
    }
}

/// Literal XPath para texto arbitrário (aspas simples e duplas).
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

fn css_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

enum Query {
    Css(String),
    XPath(String),
}

fn to_query(locator: &Locator) -> Query {
    match locator {
        Locator::Css { selector } => Query::Css(selector.clone()),
        Locator::Text { text, exact, tag } => {
            let tag = tag.as_deref().unwrap_or("*");
            let lit = xpath_literal(text);
            if *exact {
                Query::XPath(format!(".//{}[normalize-space(.)={}]", tag, lit))
            } else {
                // Só o elemento mais interno que contém o texto.
                Query::XPath(format!(
                    ".//{tag}[contains(normalize-space(.), {lit}) and not(.//*[contains(normalize-space(.), {lit})])]",
                    tag = tag,
                    lit = lit
                ))
            }
        }
        Locator::Attribute {
            tag,
            name,
            value,
            op,
        } => {
            let op = match op {
                MatchOp::Equals => "=",
                MatchOp::Contains => "*=",
            };
            Query::Css(format!(
                "{}[{}{}\"{}\"]",
                tag.as_deref().unwrap_or(""),
                name,
                op,
                css_value(value)
            ))
        }
        Locator::TestId { id } => Query::Css(format!("[data-testid=\"{}\"]", css_value(id))),
    }
}

fn key_code(key: &str) -> String {
    match key.to_ascii_lowercase().as_str() {
        "enter" | "return" => "\u{E007}".to_string(),
        "escape" | "esc" => "\u{E00C}".to_string(),
        "tab" => "\u{E004}".to_string(),
        "backspace" => "\u{E003}".to_string(),
        "delete" => "\u{E017}".to_string(),
        "arrowdown" | "down" => "\u{E015}".to_string(),
        "arrowup" | "up" => "\u{E013}".to_string(),
        "space" => " ".to_string(),
        _ => key.to_string(),
    }
}

#[async_trait]
impl Driver for WebDriverDriver {
    async fn find_all(
        &self,
        locator: &Locator,
        scope: Option<&ElementRef>,
    ) -> DriverResult<Vec<ElementRef>> {
        let query = to_query(locator);
        let found = match (&query, scope) {
            (Query::Css(css), None) => self.client.find_all(WdLocator::Css(css)).await,
            (Query::XPath(xpath), None) => self.client.find_all(WdLocator::XPath(xpath)).await,
            (Query::Css(css), Some(scope)) => {
                self.element(scope)?.find_all(WdLocator::Css(css)).await
            }
            (Query::XPath(xpath), Some(scope)) => {
                self.element(scope)?.find_all(WdLocator::XPath(xpath)).await
            }
        };

        let elements = found.map_err(|e| match map_cmd_error(e) {
            DriverError::InvalidLocator(_, msg) => DriverError::InvalidLocator(locator.to_string(), msg),
            other => other,
        })?;
        let mut handles = self.handles();
        let refs: Vec<ElementRef> = elements
            .into_iter()
            .map(|el| {
                let wire_id = el.element_id().to_string();
                handles.register(&wire_id, el)
            })
            .collect();
        debug!(locator = %locator, count = refs.len(), known = handles.len(), "find_all");
        Ok(refs)
    }

    async fn describe(&self, element: &ElementRef) -> DriverResult<ElementInfo> {
        let value = self.run_on(element, DESCRIBE_JS).await?;
        serde_json::from_value(value)
            .map_err(|e| DriverError::Backend(format!("descrição inválida de {}: {}", element, e)))
    }

    async fn click(&self, element: &ElementRef, force: bool) -> DriverResult<()> {
        if force {
            self.run_on(element, FORCE_CLICK_JS).await?;
            return Ok(());
        }
        self.element(element)?.click().await.map_err(map_cmd_error)
    }

    async fn double_click(&self, element: &ElementRef, force: bool) -> DriverResult<()> {
        if !force {
            let el = self.element(element)?;
            let enabled = el.is_enabled().await.map_err(map_cmd_error)?;
            if !enabled {
                return Err(DriverError::NotInteractable(
                    element.to_string(),
                    "elemento desabilitado".to_string(),
                ));
            }
        }
        self.run_on(element, DOUBLE_CLICK_JS).await?;
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> DriverResult<()> {
        self.element(element)?.clear().await.map_err(map_cmd_error)
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> DriverResult<()> {
        self.element(element)?
            .send_keys(text)
            .await
            .map_err(map_cmd_error)
    }

    async fn select_option(&self, element: &ElementRef, option: &str) -> DriverResult<()> {
        let el = self.element(element)?;
        match el.select_by_value(option).await {
            Ok(()) => Ok(()),
            Err(_) => el.select_by_label(option).await.map_err(map_cmd_error),
        }
    }

    async fn set_checked(&self, element: &ElementRef, checked: bool) -> DriverResult<()> {
        let el = self.element(element)?;
        let current = el.is_selected().await.map_err(map_cmd_error)?;
        if current != checked {
            el.click().await.map_err(map_cmd_error)?;
        }
        Ok(())
    }

    async fn drag_to(&self, source: &ElementRef, destination: &ElementRef) -> DriverResult<()> {
        let arg = |el: Element| {
            serde_json::to_value(el)
                .map_err(|e| DriverError::Backend(format!("falha ao serializar elemento: {}", e)))
        };
        let args = vec![arg(self.element(source)?)?, arg(self.element(destination)?)?];
        self.client
            .execute(DRAG_JS, args)
            .await
            .map_err(map_cmd_error)?;
        Ok(())
    }

    async fn upload_file(&self, element: &ElementRef, path: &Path) -> DriverResult<()> {
        // O navegador exige caminho absoluto no input de arquivo.
        let absolute = std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .map_err(|e| DriverError::Backend(format!("caminho inválido {:?}: {}", path, e)))?;
        self.element(element)?
            .send_keys(&absolute.to_string_lossy())
            .await
            .map_err(map_cmd_error)
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.client.goto(url).await.map_err(map_cmd_error)?;
        // Elementos da página anterior não existem mais.
        self.handles().clear();
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.client
            .current_url()
            .await
            .map(|url| url.to_string())
            .map_err(map_cmd_error)
    }

    async fn press_key(&self, key: &str) -> DriverResult<()> {
        let active = self.client.active_element().await.map_err(map_cmd_error)?;
        active.send_keys(&key_code(key)).await.map_err(map_cmd_error)
    }

    async fn dump_tree(&self) -> DriverResult<String> {
        self.client.source().await.map_err(map_cmd_error)
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.client.screenshot().await.map_err(map_cmd_error)
    }

    async fn reset_session(&self) -> DriverResult<()> {
        self.client.delete_all_cookies().await.map_err(map_cmd_error)?;
        // about:blank não tem storage; erro aqui é esperado na primeira sessão.
        let _ = self.client.execute(CLEAR_STORAGE_JS, vec![]).await;
        self.handles().clear();
        Ok(())
    }
}
