//! # ui-runner
//!
//! Engine de workflows de UI para páginas geradas dinamicamente:
//! resolução por candidatos em ordem, classificação heurística de campos,
//! ações com retry e execução fail-fast com snapshot de diagnóstico.
//!
//! ```text
//! Suite JSON ─► loader ─► validation ─► orchestrator
//!                                        │
//!             resolver ◄─────────────────┤
//!             classifier ◄───────────────┤
//!             executors (retry) ◄────────┤
//!             conditions ◄───────────────┤
//!             diagnostics ◄── falha ─────┘
//!                     │
//!                   driver (memória | WebDriver)
//! ```

pub mod classifier;
pub mod conditions;
pub mod context;
pub mod diagnostics;
pub mod driver;
pub mod errors;
pub mod executors;
pub mod limits;
pub mod loader;
pub mod orchestrator;
pub mod protocol;
pub mod resolver;
pub mod retry;
pub mod telemetry;
pub mod validation;
