//! # Módulo de Carregamento - Leitura de Suítes e Páginas
//!
//! Este módulo é responsável por **ler e parsear** arquivos JSON do disco:
//!
//! - a suíte de workflows (`--suite`)
//! - o snapshot de página usado pelo driver em memória (`--dom`)
//!
//! ## Exemplo de uso:
//!
//! ```ignore
//! use ui_runner::loader::load_suite_from_file;
//!
//! let suite = load_suite_from_file("./suites/bots.json")?;
//! println!("Suíte carregada: {}", suite.name);
//! ```

use crate::driver::memory::MemoryPage;
use crate::protocol::Suite;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

fn load_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    // `with_context` adiciona o caminho ao erro se falhar.
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file {:?}", what, path))?;

    serde_json::from_str(&content).with_context(|| format!("Failed to parse {} JSON {:?}", what, path))
}

/// Carrega uma suíte de um arquivo JSON.
///
/// ## Exemplos de erro:
/// - "Failed to read suite file" → Arquivo não existe ou sem permissão
/// - "Failed to parse suite JSON" → JSON malformado ou estrutura inválida
pub fn load_suite_from_file<P: AsRef<Path>>(path: P) -> Result<Suite> {
    load_json(path.as_ref(), "suite")
}

/// Carrega um snapshot de página para o [`MemoryDriver`](crate::driver::memory::MemoryDriver).
///
/// A estrutura é validada na carga: ids duplicados, pais inexistentes ou
/// cadeias de parent circulares são rejeitados.
pub fn load_page_from_file<P: AsRef<Path>>(path: P) -> Result<MemoryPage> {
    let path = path.as_ref();
    let page: MemoryPage = load_json(path, "page")?;
    page.validate()
        .with_context(|| format!("Invalid page structure {:?}", path))?;
    Ok(page)
}
