//! # Módulo de Códigos de Erro Estruturados
//!
//! Define códigos de erro padronizados para melhor UX e integração
//! com sistemas externos (CI/CD, dashboards, alertas).
//!
//! ## Categorias de erro
//!
//! Os códigos seguem a taxonomia do motor:
//!
//! | Faixa  | Categoria     | Descrição                                |
//! |--------|---------------|------------------------------------------|
//! | E1xxx  | Validação     | Documento de suíte malformado            |
//! | E2xxx  | Dependência   | Grafo: ciclo, referência não resolvida   |
//! | E3xxx  | Interpolação  | Placeholder sem resolução, estratégia    |
//! | E4xxx  | Transporte    | HTTP: rede, timeout, TLS                 |
//! | E5xxx  | Assertion     | Validação da resposta não se sustentou   |
//! | E6xxx  | Captura       | Expressão de extração falhou             |
//! | E7xxx  | Script        | Pré/pós-script falhou                    |
//! | E8xxx  | Interno       | Bug no próprio motor                     |
//!
//! ## Exemplo:
//!
//! ```text
//! Error E2001: Circular dependencies detected: a → b → a
//! ```
//!
//! Com o código E2001 um pipeline de CI sabe, sem parsear a mensagem,
//! que o run abortou por ciclo no grafo.

use std::fmt;
use thiserror::Error;

// ============================================================================
// CÓDIGO DE ERRO
// ============================================================================

/// Código de erro estruturado com categoria e número.
///
/// O código é um número de 4 dígitos onde o primeiro dígito é a
/// categoria (1-8) e os três últimos identificam o erro específico.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // ========================================================================
    // E1xxx: Validação
    // ========================================================================

    /// Documento sem `suite_name`.
    pub const MISSING_SUITE_NAME: Self = Self(1001);

    /// Suíte sem nenhum step.
    pub const EMPTY_SUITE: Self = Self(1002);

    /// Step sem exatamente um de `{request, input, call}`.
    pub const AMBIGUOUS_STEP_ACTION: Self = Self(1003);

    /// Configuração de iteração inválida (range malformado, `a > b`).
    pub const INVALID_ITERATION: Self = Self(1004);

    /// Step interativo em modo paralelo.
    pub const INPUT_IN_PARALLEL: Self = Self(1005);

    /// Documento não conforma ao schema de suíte.
    pub const INVALID_DOCUMENT: Self = Self(1006);

    /// Dependência declarada sem `node_id` nem `path`.
    pub const EMPTY_DEPENDS_REF: Self = Self(1007);

    // ========================================================================
    // E2xxx: Dependências
    // ========================================================================

    /// Ciclo no grafo de dependências.
    pub const CIRCULAR_DEPENDENCY: Self = Self(2001);

    /// Dependência declarada não resolveu para nenhum nó.
    pub const UNRESOLVED_DEPENDENCY: Self = Self(2002);

    // ========================================================================
    // E3xxx: Interpolação
    // ========================================================================

    /// Variável referenciada não existe em nenhum escopo.
    pub const UNRESOLVED_PLACEHOLDER: Self = Self(3001);

    /// Estratégia de interpolação falhou (faker, js).
    pub const STRATEGY_FAILURE: Self = Self(3002);

    /// Profundidade máxima de re-interpolação excedida.
    pub const MAX_DEPTH_EXCEEDED: Self = Self(3003);

    // ========================================================================
    // E4xxx: Transporte HTTP
    // ========================================================================

    /// Timeout na requisição.
    pub const HTTP_TIMEOUT: Self = Self(4001);

    /// Erro de conexão (DNS, rede).
    pub const HTTP_CONNECTION: Self = Self(4002);

    /// Falha de TLS.
    pub const HTTP_TLS: Self = Self(4003);

    /// Método ou URL inválidos após interpolação.
    pub const HTTP_BAD_REQUEST_SPEC: Self = Self(4004);

    // ========================================================================
    // E5xxx: Assertions
    // ========================================================================

    /// Uma ou mais assertions do step falharam.
    pub const ASSERTIONS_FAILED: Self = Self(5001);

    /// Condição custom não se sustentou.
    pub const CUSTOM_CHECK_FAILED: Self = Self(5002);

    // ========================================================================
    // E6xxx: Capturas
    // ========================================================================

    /// Expressão de captura não produziu valor.
    pub const CAPTURE_EMPTY: Self = Self(6001);

    /// Expressão de captura inválida.
    pub const CAPTURE_INVALID: Self = Self(6002);

    // ========================================================================
    // E7xxx: Scripts
    // ========================================================================

    /// Script pré/pós-step falhou.
    pub const SCRIPT_FAILURE: Self = Self(7001);

    /// Nenhum engine de script configurado.
    pub const SCRIPT_ENGINE_MISSING: Self = Self(7002);

    // ========================================================================
    // E8xxx: Interno
    // ========================================================================

    /// Estado inconsistente do motor.
    pub const INTERNAL: Self = Self(8001);

    /// Categoria do código (1-8).
    pub fn category(&self) -> u16 {
        self.0 / 1000
    }

    /// Nome da categoria, para logs.
    pub fn category_name(&self) -> &'static str {
        match self.category() {
            1 => "validation",
            2 => "dependency",
            3 => "interpolation",
            4 => "transport",
            5 => "assertion",
            6 => "capture",
            7 => "script",
            _ => "internal",
        }
    }

    /// Forma textual `E<código>`, usada em relatórios e eventos.
    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.0)
    }
}

// ============================================================================
// ERROS DO MOTOR
// ============================================================================

/// Erros fatais do motor: apenas validação e ciclo de dependência
/// abortam um run; todo o resto é recuperado localmente e registrado
/// nos resultados.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Ciclo no grafo de dependências. A mensagem lista os caminhos
    /// dos ciclos unidos por `→`.
    #[error("Circular dependencies detected: {cycles}")]
    CircularDependency { cycles: String },

    /// Documento de suíte inválido, detectado antes de qualquer step.
    #[error("Suite validation failed for '{node_id}': {reason}")]
    Validation { node_id: String, reason: String },

    /// Configuração de execução inválida (ex.: input interativo em
    /// modo paralelo).
    #[error("{0}")]
    Configuration(String),

    /// Falha interna que não deveria acontecer.
    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Código estruturado correspondente.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::CircularDependency { .. } => ErrorCode::CIRCULAR_DEPENDENCY,
            EngineError::Validation { .. } => ErrorCode::INVALID_DOCUMENT,
            EngineError::Configuration(_) => ErrorCode::INPUT_IN_PARALLEL,
            EngineError::Internal(_) => ErrorCode::INTERNAL,
        }
    }
}
