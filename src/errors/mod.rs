//! # Módulo de Códigos de Erro Estruturados
//!
//! Define códigos de erro padronizados e os erros agregados de step e de
//! workflow que o orquestrador devolve.
//!
//! ## Para todos entenderem:
//!
//! Quando algo dá errado, este módulo fornece códigos únicos
//! que identificam exatamente o que aconteceu.
//!
//! É como ter um "número do erro" que você pode pesquisar
//! na documentação ou filtrar num relatório de CI.
//!
//! ## Categorias de Erro
//!
//! | Faixa  | Categoria       | Descrição                               |
//! |--------|-----------------|-----------------------------------------|
//! | E1xxx  | Validação       | Erro no arquivo da suíte                |
//! | E2xxx  | Resolução       | Elemento não encontrado / ambíguo       |
//! | E3xxx  | Ação            | Ação ou condição de sucesso falhou      |
//! | E4xxx  | Configuração    | Problema de setup/ambiente              |
//! | E5xxx  | Interno         | Bug no próprio Runner ou no driver      |
//!
//! ## Exemplo:
//!
//! ```text
//! Error E2001: Elemento 'message' não encontrado após 10000ms
//!   Tentados: css=textarea, [placeholder*="message"]
//!   Step: fill_message
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

use crate::classifier::ClassifyError;
use crate::conditions::ConditionFailed;
use crate::context::ContextError;
use crate::driver::memory::PageError;
use crate::driver::DriverError;
use crate::executors::{ActionError, ActionFailed};
use crate::protocol::WorkflowResult;
use crate::resolver::ResolveError;

// ============================================================================
// CÓDIGO DE ERRO
// ============================================================================

/// Código de erro estruturado com categoria e número.
///
/// O código é um número de 4 dígitos onde:
/// - Primeiro dígito: categoria (1-5)
/// - Últimos 3 dígitos: erro específico (001-999)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // ========================================================================
    // E1xxx: Validação da suíte
    // ========================================================================
    // Erros que acontecem antes de executar qualquer coisa.

    /// Suíte sem workflows.
    pub const EMPTY_SUITE: Self = Self(1001);

    /// Versão de spec não suportada.
    /// Causa: spec_version no arquivo não é "0.1".
    pub const UNSUPPORTED_SPEC_VERSION: Self = Self(1002);

    /// Workflow sem steps.
    pub const EMPTY_WORKFLOW: Self = Self(1003);

    /// Ação de elemento sem `target`.
    /// Causa: click/type/select/... precisam saber em qual elemento agir.
    pub const MISSING_TARGET: Self = Self(1004);

    /// Dois steps com o mesmo id no mesmo workflow.
    pub const DUPLICATE_STEP_ID: Self = Self(1005);

    /// LocatorSpec sem nenhum candidato.
    pub const EMPTY_CANDIDATES: Self = Self(1006);

    /// RetryPolicy com max_attempts = 0 ou backoff negativo.
    pub const INVALID_RETRY_POLICY: Self = Self(1007);

    /// ID de step vazio.
    pub const EMPTY_STEP_ID: Self = Self(1008);

    /// JSON malformado ou estrutura inválida (suíte ou página `--dom`).
    pub const INVALID_FILE_FORMAT: Self = Self(1009);

    /// Critério de classificação sem regras.
    pub const EMPTY_RULES: Self = Self(1010);

    /// `within` informado num step sem `target`.
    pub const ORPHAN_SCOPE: Self = Self(1011);

    /// `upload` com caminho vazio.
    pub const EMPTY_UPLOAD_PATH: Self = Self(1012);

    // ========================================================================
    // E2xxx: Resolução / Classificação
    // ========================================================================

    /// Nenhum candidato encontrou elemento visível dentro do timeout.
    pub const ELEMENT_NOT_FOUND: Self = Self(2001);

    /// Classificação estrita encontrou mais de um elemento.
    pub const AMBIGUOUS_ELEMENT: Self = Self(2002);

    /// Nenhuma regra de classificação casou com os candidatos.
    pub const NO_CLASSIFICATION_MATCH: Self = Self(2003);

    // ========================================================================
    // E3xxx: Ações e condições
    // ========================================================================

    /// Ação falhou após todas as tentativas.
    pub const ACTION_FAILED: Self = Self(3001);

    /// Elemento nunca ficou visível/habilitado.
    pub const PRECONDITION_NOT_MET: Self = Self(3002);

    /// Condição de sucesso do step não foi atingida.
    pub const CONDITION_FAILED: Self = Self(3003);

    // ========================================================================
    // E4xxx: Configuração/Ambiente
    // ========================================================================

    /// Variável de ambiente não definida.
    /// Causa: ${ENV_VAR} usada mas VAR não existe.
    pub const ENV_VAR_NOT_FOUND: Self = Self(4001);

    /// Variável de contexto não encontrada.
    /// Causa: ${nome} usada mas não existe em variables/unique_ids.
    pub const CONTEXT_VAR_NOT_FOUND: Self = Self(4002);

    /// Arquivo não encontrado: suíte, página ou arquivo de `upload`.
    pub const FILE_NOT_FOUND: Self = Self(4003);

    /// Erro de permissão ao acessar arquivo.
    pub const FILE_PERMISSION_ERROR: Self = Self(4004);

    /// Orçamento de tempo ou de steps do workflow estourado.
    pub const LIMIT_EXCEEDED: Self = Self(4005);

    // ========================================================================
    // E5xxx: Erros Internos
    // ========================================================================

    /// Erro interno inesperado.
    pub const INTERNAL_ERROR: Self = Self(5001);

    /// Driver indisponível ou com erro de backend.
    pub const DRIVER_ERROR: Self = Self(5002);

    /// Falha ao serializar o relatório.
    pub const SERIALIZATION_ERROR: Self = Self(5003);

    // ========================================================================
    // MÉTODOS
    // ========================================================================

    /// Retorna o código numérico.
    pub fn code(&self) -> u16 {
        self.0
    }

    /// Retorna o código formatado com prefixo "E".
    ///
    /// Exemplo: ErrorCode::EMPTY_SUITE.formatted() == "E1001"
    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    /// Retorna a categoria do erro baseado no primeiro dígito.
    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Validation,
            2 => ErrorCategory::Resolution,
            3 => ErrorCategory::Action,
            4 => ErrorCategory::Configuration,
            5 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Retorna uma descrição curta do erro.
    pub fn description(&self) -> &'static str {
        match self.0 {
            1001 => "Suíte vazia",
            1002 => "Versão de spec não suportada",
            1003 => "Workflow vazio",
            1004 => "Ação de elemento sem target",
            1005 => "ID de step duplicado",
            1006 => "Locator sem candidatos",
            1007 => "Política de retry inválida",
            1008 => "ID de step vazio",
            1009 => "Formato de arquivo inválido",
            1010 => "Critério de classificação sem regras",
            1011 => "Escopo sem target",
            1012 => "Upload sem caminho",
            2001 => "Elemento não encontrado",
            2002 => "Elemento ambíguo",
            2003 => "Nenhuma regra de classificação casou",
            3001 => "Ação falhou",
            3002 => "Pré-condição não atendida",
            3003 => "Condição de sucesso falhou",
            4001 => "Variável de ambiente não definida",
            4002 => "Variável de contexto não encontrada",
            4003 => "Arquivo não encontrado",
            4004 => "Erro de permissão",
            4005 => "Limite de execução excedido",
            5001 => "Erro interno",
            5002 => "Erro do driver",
            5003 => "Erro de serialização",
            _ => "Erro desconhecido",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

// ============================================================================
// CATEGORIA DE ERRO
// ============================================================================

/// Categoria de erro baseada no primeiro dígito do código.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Erros de validação da suíte (E1xxx).
    Validation,
    /// Elemento não encontrado ou não classificável (E2xxx).
    Resolution,
    /// Ação ou condição falhou (E3xxx).
    Action,
    /// Erros de configuração/ambiente (E4xxx).
    Configuration,
    /// Erros internos (E5xxx).
    Internal,
    /// Código fora das faixas conhecidas.
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "Validação"),
            Self::Resolution => write!(f, "Resolução"),
            Self::Action => write!(f, "Ação"),
            Self::Configuration => write!(f, "Configuração"),
            Self::Internal => write!(f, "Interno"),
            Self::Unknown => write!(f, "Desconhecido"),
        }
    }
}

// ============================================================================
// ERRO DE STEP / WORKFLOW
// ============================================================================

/// Falha de um step, agregando o erro do estágio que falhou.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Action(#[from] ActionFailed),

    #[error(transparent)]
    Condition(#[from] ConditionFailed),

    #[error(transparent)]
    Context(#[from] ContextError),

    /// Ação de elemento chegou na execução sem target.
    #[error("step '{step_id}': ação '{action}' exige um target")]
    MissingTarget { step_id: String, action: String },

    /// Orçamento de tempo do workflow estourado antes do step.
    #[error("orçamento de tempo esgotado ({elapsed_ms}ms de {limit_ms}ms)")]
    TimeBudgetExceeded { elapsed_ms: u64, limit_ms: u64 },
}

impl StepError {
    /// Código estruturado correspondente ao erro.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Resolve(_) => ErrorCode::ELEMENT_NOT_FOUND,
            Self::Classify(ClassifyError::Ambiguous { .. }) => ErrorCode::AMBIGUOUS_ELEMENT,
            Self::Classify(ClassifyError::NoMatch { .. }) => ErrorCode::NO_CLASSIFICATION_MATCH,
            Self::Action(failed) => match &failed.last_error {
                ActionError::PreconditionNotMet(_) => ErrorCode::PRECONDITION_NOT_MET,
                ActionError::MissingFile(_) => ErrorCode::FILE_NOT_FOUND,
                ActionError::Driver(e) if !e.is_transient() => ErrorCode::DRIVER_ERROR,
                _ => ErrorCode::ACTION_FAILED,
            },
            Self::Condition(_) => ErrorCode::CONDITION_FAILED,
            Self::Context(ContextError::MissingEnv(_)) => ErrorCode::ENV_VAR_NOT_FOUND,
            Self::Context(ContextError::MissingVariable(_)) => ErrorCode::CONTEXT_VAR_NOT_FOUND,
            Self::MissingTarget { .. } => ErrorCode::MISSING_TARGET,
            Self::TimeBudgetExceeded { .. } => ErrorCode::LIMIT_EXCEEDED,
        }
    }

    /// Número de tentativas consumidas pelo estágio que falhou.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Action(failed) => failed.attempts,
            _ => 0,
        }
    }
}

/// Workflow interrompido: a primeira falha e o histórico completo.
#[derive(Debug, Error)]
#[error("workflow '{}' falhou no step '{step_id}': {error}", .result.workflow)]
pub struct WorkflowFailed {
    pub step_id: String,
    pub error: StepError,
    /// Resultado final, com todos os steps executados até a falha.
    pub result: WorkflowResult,
}

// ============================================================================
// ERRO ESTRUTURADO (SAÍDA DA CLI)
// ============================================================================

/// Erro estruturado com código, mensagem e contexto.
#[derive(Debug)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<ErrorContext>,
}

/// Contexto adicional do erro.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// ID do step onde ocorreu o erro.
    pub step_id: Option<String>,
    /// Workflow do step.
    pub workflow: Option<String>,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Adiciona step_id ao contexto.
    pub fn with_step_id(mut self, step_id: impl Into<String>) -> Self {
        let ctx = self.context.get_or_insert_with(ErrorContext::default);
        ctx.step_id = Some(step_id.into());
        self
    }

    /// Formata o erro para exibição ao usuário.
    pub fn user_message(&self) -> String {
        let mut msg = format!("[{}] {}", self.code, self.message);

        if let Some(ctx) = &self.context {
            if let Some(workflow) = &ctx.workflow {
                msg.push_str(&format!(" (workflow: {})", workflow));
            }
            if let Some(step_id) = &ctx.step_id {
                msg.push_str(&format!(" (step: {})", step_id));
            }
            if let (Some(expected), Some(actual)) = (&ctx.expected, &ctx.actual) {
                msg.push_str(&format!(" [esperado: {}, obtido: {}]", expected, actual));
            }
        }

        msg
    }
}

impl From<&WorkflowFailed> for StructuredError {
    fn from(failed: &WorkflowFailed) -> Self {
        StructuredError::new(failed.error.code(), failed.error.to_string()).with_context(
            ErrorContext {
                step_id: Some(failed.step_id.clone()),
                workflow: Some(failed.result.workflow.clone()),
                ..Default::default()
            },
        )
    }
}

/// Código para falhas da borda (carga de arquivos, CLI), que chegam como
/// `anyhow::Error`. A primeira causa reconhecida na cadeia decide.
pub fn code_for(err: &anyhow::Error) -> ErrorCode {
    for cause in err.chain() {
        if let Some(structured) = cause.downcast_ref::<StructuredError>() {
            return structured.code;
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::NotFound => ErrorCode::FILE_NOT_FOUND,
                io::ErrorKind::PermissionDenied => ErrorCode::FILE_PERMISSION_ERROR,
                _ => ErrorCode::INTERNAL_ERROR,
            };
        }
        if cause.is::<serde_json::Error>() || cause.is::<PageError>() {
            return ErrorCode::INVALID_FILE_FORMAT;
        }
        if cause.is::<DriverError>() {
            return ErrorCode::DRIVER_ERROR;
        }
    }
    ErrorCode::INTERNAL_ERROR
}

impl From<&anyhow::Error> for StructuredError {
    fn from(err: &anyhow::Error) -> Self {
        StructuredError::new(code_for(err), format!("{:#}", err))
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for StructuredError {}
