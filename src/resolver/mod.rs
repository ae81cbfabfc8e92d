//! # Resolver de Candidatos
//!
//! Transforma um [`LocatorSpec`] (várias formas alternativas de achar o
//! mesmo elemento lógico) em elementos vivos.
//!
//! ## Para todos entenderem:
//!
//! Páginas geradas dinamicamente raramente têm um `id` estável. Em vez de
//! apostar num único seletor, o step lista vários, do mais confiável para o
//! mais genérico:
//!
//! ```text
//! role "message":
//!   1. textarea[name=message]          ← preferido
//!   2. [placeholder*="message"]        ← fallback
//!   3. [contenteditable=true]          ← último recurso
//! ```
//!
//! Cada rodada consulta os candidatos em ordem e para no primeiro que
//! encontrar pelo menos um elemento visível. Não é uma união: os candidatos
//! seguintes nem são consultados. Se nenhum achar nada, a rodada se repete
//! a cada `poll_interval` até o timeout.

use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::driver::{Driver, ElementRef};
use crate::protocol::LocatorSpec;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    #[error("elemento '{role}' não encontrado após {timeout_ms}ms (tentados: {})", .tried.join(", "))]
    ElementNotFound {
        role: String,
        /// Todos os candidatos consultados, em ordem.
        tried: Vec<String>,
        timeout_ms: u64,
    },
}

/// Uma rodada: elementos visíveis do primeiro candidato que tiver algum.
async fn round<D: Driver + ?Sized>(
    driver: &D,
    spec: &LocatorSpec,
    scope: Option<&ElementRef>,
) -> Option<Vec<ElementRef>> {
    for (index, candidate) in spec.candidates.iter().enumerate() {
        let found = match driver.find_all(candidate, scope).await {
            Ok(found) => found,
            Err(e) => {
                warn!(role = %spec.role, candidate = %candidate, error = %e, "Candidato ignorado");
                continue;
            }
        };

        let mut visible = Vec::with_capacity(found.len());
        for element in found {
            // Elemento que sumiu entre a consulta e a descrição não conta.
            if let Ok(info) = driver.describe(&element).await {
                if info.visible {
                    visible.push(element);
                }
            }
        }

        if !visible.is_empty() {
            debug!(
                role = %spec.role,
                candidate = %candidate,
                index,
                count = visible.len(),
                "Candidato resolvido"
            );
            return Some(visible);
        }
    }
    None
}

/// Resolve o spec, repetindo rodadas até `timeout`.
///
/// Sempre executa pelo menos uma rodada, mesmo com timeout zero.
pub async fn resolve<D: Driver + ?Sized>(
    driver: &D,
    spec: &LocatorSpec,
    scope: Option<&ElementRef>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<ElementRef>, ResolveError> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(found) = round(driver, spec, scope).await {
            return Ok(found);
        }
        if Instant::now() >= deadline {
            break;
        }
        sleep(poll_interval.min(deadline.saturating_duration_since(Instant::now()))).await;
    }

    Err(ResolveError::ElementNotFound {
        role: spec.role.clone(),
        tried: spec.candidates.iter().map(ToString::to_string).collect(),
        timeout_ms: timeout.as_millis() as u64,
    })
}

/// Uma única rodada, sem esperar. Útil para "se existir, faça".
pub async fn probe<D: Driver + ?Sized>(
    driver: &D,
    spec: &LocatorSpec,
    scope: Option<&ElementRef>,
) -> Option<Vec<ElementRef>> {
    round(driver, spec, scope).await
}
