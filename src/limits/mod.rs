//! # Módulo de Limites de Execução
//!
//! Guardas contra suítes degeneradas: um documento gerado ou editado à mão
//! pode declarar milhares de steps ou uma iteração gigante, e é melhor
//! falhar cedo com uma mensagem clara do que descobrir no meio do run.
//!
//! | Limite                  | Padrão | Variável de ambiente            |
//! |-------------------------|--------|---------------------------------|
//! | max_steps_per_suite     | 200    | TESTFLOW_MAX_STEPS              |
//! | max_iterations_per_step | 1000   | TESTFLOW_MAX_ITERATIONS         |
//! | max_parallel_cap        | 32     | TESTFLOW_MAX_PARALLEL_CAP       |

use crate::protocol::SuiteDocument;

/// Limites de execução configuráveis.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    /// Máximo de steps declarados em uma suíte.
    pub max_steps_per_suite: usize,

    /// Máximo de expansões de uma iteração (`over` ou `range`).
    pub max_iterations_per_step: usize,

    /// Teto absoluto de `max_parallel`, independente da configuração.
    pub max_parallel_cap: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps_per_suite: 200,
            max_iterations_per_step: 1000,
            max_parallel_cap: 32,
        }
    }
}

impl ExecutionLimits {
    /// Lê limites das variáveis de ambiente, mantendo os defaults
    /// para valores ausentes ou não parseáveis.
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Ok(value) = std::env::var("TESTFLOW_MAX_STEPS") {
            if let Ok(parsed) = value.parse::<usize>() {
                limits.max_steps_per_suite = parsed;
            }
        }
        if let Ok(value) = std::env::var("TESTFLOW_MAX_ITERATIONS") {
            if let Ok(parsed) = value.parse::<usize>() {
                limits.max_iterations_per_step = parsed;
            }
        }
        if let Ok(value) = std::env::var("TESTFLOW_MAX_PARALLEL_CAP") {
            if let Ok(parsed) = value.parse::<usize>() {
                limits.max_parallel_cap = parsed;
            }
        }

        limits
    }
}

/// Violação de um limite, com mensagem pronta para exibição.
#[derive(Debug, Clone)]
pub struct LimitViolation {
    pub limit: String,
    pub message: String,
}

/// Resultado da checagem de limites.
#[derive(Debug, Clone)]
pub struct LimitCheck {
    pub passed: bool,
    pub violations: Vec<LimitViolation>,
}

/// Valida uma suíte contra os limites antes de qualquer execução.
pub fn check_suite(doc: &SuiteDocument, limits: &ExecutionLimits) -> LimitCheck {
    let mut violations = Vec::new();

    if doc.steps.len() > limits.max_steps_per_suite {
        violations.push(LimitViolation {
            limit: "max_steps_per_suite".to_string(),
            message: format!(
                "suite '{}' declares {} steps (limit {})",
                doc.node_id,
                doc.steps.len(),
                limits.max_steps_per_suite
            ),
        });
    }

    LimitCheck {
        passed: violations.is_empty(),
        violations,
    }
}

/// Valida o tamanho de uma expansão de iteração no momento em que ela
/// é conhecida (após interpolar `over` ou parsear `range`).
pub fn check_iteration(count: usize, limits: &ExecutionLimits) -> Result<(), LimitViolation> {
    if count > limits.max_iterations_per_step {
        return Err(LimitViolation {
            limit: "max_iterations_per_step".to_string(),
            message: format!(
                "iteration expands to {} executions (limit {})",
                count, limits.max_iterations_per_step
            ),
        });
    }
    Ok(())
}
