//! # Módulo de Driver - Fronteira com o navegador
//!
//! O engine nunca fala diretamente com um navegador. Toda consulta ao DOM e
//! toda ação passam pelo trait [`Driver`], o que permite:
//!
//! - Rodar a suíte contra um navegador real via WebDriver (feature `webdriver`)
//! - Rodar contra um DOM em memória ([`MemoryDriver`]) em testes e dry runs
//!
//! ## Para todos entenderem:
//!
//! O driver é o "controle remoto" da página. O engine decide *o que* fazer
//! (qual elemento, qual ação, quantas tentativas); o driver só sabe *como*
//! apertar os botões.
//!
//! Os handles ([`ElementRef`]) emitidos pelo driver são válidos apenas
//! durante o step atual. Cada step resolve seus elementos de novo.

pub mod memory;
#[cfg(feature = "webdriver")]
pub mod webdriver;

pub use memory::MemoryDriver;
#[cfg(feature = "webdriver")]
pub use webdriver::WebDriverDriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::protocol::Locator;

// ============================================================================
// HANDLES E DESCRIÇÕES
// ============================================================================

/// Handle opaco para um elemento vivo, emitido pelo driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    pub id: String,
}

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.id)
    }
}

/// Retângulo renderizado do elemento, em pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Fotografia de um elemento num instante, usada pelo classificador
/// e pelas checagens de pré-condição.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub text: String,
    /// Valor atual de inputs/textareas/selects.
    #[serde(default)]
    pub value: Option<String>,
    /// Texto do label associado (ou o mais próximo).
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub checked: Option<bool>,
    /// Label da opção selecionada, em selects.
    #[serde(default)]
    pub selected_label: Option<String>,
    #[serde(default)]
    pub rect: Rect,
}

impl ElementInfo {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is_editable(&self) -> bool {
        matches!(self.attr("contenteditable"), Some("") | Some("true"))
    }

    pub fn is_multi_line(&self) -> bool {
        self.tag == "textarea" || self.is_editable()
    }
}

// ============================================================================
// ERROS DO DRIVER
// ============================================================================

/// Falhas reportadas pelo driver.
///
/// As variantes transitórias (o elemento saiu do DOM, está coberto, ainda
/// não é interagível, o driver demorou) são retentadas pelo executor.
/// As demais interrompem o step imediatamente.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DriverError {
    #[error("elemento {0} não está mais anexado ao DOM")]
    Detached(String),

    #[error("elemento {0} não é interagível: {1}")]
    NotInteractable(String, String),

    #[error("clique em {0} interceptado por outro elemento")]
    Intercepted(String),

    #[error("timeout do driver: {0}")]
    Timeout(String),

    #[error("operação não suportada pelo driver: {0}")]
    Unsupported(String),

    #[error("locator inválido '{0}': {1}")]
    InvalidLocator(String, String),

    #[error("erro do backend: {0}")]
    Backend(String),
}

impl DriverError {
    /// Indica se vale a pena tentar de novo.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Detached(_) | Self::NotInteractable(..) | Self::Intercepted(_) | Self::Timeout(_)
        )
    }
}

pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// TRAIT
// ============================================================================

/// Contrato de qualquer backend capaz de consultar e manipular a página.
///
/// Todos os métodos recebem `&self`: implementações usam mutabilidade
/// interior, o que permite que closures de retry capturem o driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Todos os elementos que casam com o locator, em ordem de documento.
    /// Com `scope`, apenas descendentes daquele elemento.
    async fn find_all(
        &self,
        locator: &Locator,
        scope: Option<&ElementRef>,
    ) -> DriverResult<Vec<ElementRef>>;

    /// Descrição atual do elemento.
    async fn describe(&self, element: &ElementRef) -> DriverResult<ElementInfo>;

    async fn click(&self, element: &ElementRef, force: bool) -> DriverResult<()>;

    async fn double_click(&self, element: &ElementRef, force: bool) -> DriverResult<()>;

    async fn clear(&self, element: &ElementRef) -> DriverResult<()>;

    /// Digita `text` no fim do valor atual do elemento.
    async fn type_text(&self, element: &ElementRef, text: &str) -> DriverResult<()>;

    /// Seleciona a opção cujo valor ou texto é `option`.
    async fn select_option(&self, element: &ElementRef, option: &str) -> DriverResult<()>;

    async fn set_checked(&self, element: &ElementRef, checked: bool) -> DriverResult<()>;

    /// Arrasta `source` e solta sobre o centro de `destination`.
    async fn drag_to(&self, source: &ElementRef, destination: &ElementRef) -> DriverResult<()>;

    /// Anexa o arquivo em `path` a um `<input type="file">`.
    async fn upload_file(&self, element: &ElementRef, path: &Path) -> DriverResult<()>;

    async fn navigate(&self, url: &str) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    /// Pressiona uma tecla nomeada (Enter, Escape, Tab...) no elemento focado.
    async fn press_key(&self, key: &str) -> DriverResult<()>;

    /// Dump textual do DOM atual, para diagnóstico.
    async fn dump_tree(&self) -> DriverResult<String>;

    /// Screenshot PNG da página. Nem todo driver suporta.
    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        Err(DriverError::Unsupported("screenshot".to_string()))
    }

    /// Limpa cookies e storage, deixando a sessão pronta para o bootstrap.
    async fn reset_session(&self) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DriverError::Detached("e1".into()).is_transient());
        assert!(DriverError::Intercepted("e1".into()).is_transient());
        assert!(DriverError::NotInteractable("e1".into(), "hidden".into()).is_transient());
        assert!(!DriverError::Backend("boom".into()).is_transient());
        assert!(!DriverError::InvalidLocator("x".into(), "y".into()).is_transient());
    }

    #[test]
    fn test_element_info_helpers() {
        let mut info = ElementInfo {
            tag: "div".into(),
            ..Default::default()
        };
        assert!(!info.is_multi_line());

        info.attributes.insert("contenteditable".into(), "true".into());
        assert!(info.is_editable());
        assert!(info.is_multi_line());

        let rect = Rect {
            x: 0.0,
            y: 0.0,
            width: 300.0,
            height: 120.0,
        };
        assert_eq!(rect.area(), 36000.0);
    }
}
