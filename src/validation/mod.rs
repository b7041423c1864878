//! # Módulo de Validação de Suítes
//!
//! Valida documentos de suíte **antes** de qualquer step executar.
//! Erros daqui viram resultados de suíte com status `failure` e
//! `error_message`, nunca panics no meio do run.
//!
//! ## Validações realizadas:
//!
//! 1. `suite_name` e `node_id` não vazios
//! 2. Pelo menos um step
//! 3. Cada step com exatamente uma ação (`request`/`input`/`call`),
//!    ou nenhuma quando houver cenários com requests próprios
//! 4. Configuração de iteração válida (`range: "a..b"` com `a ≤ b`,
//!    binding não vazio)
//! 5. Dependências com pelo menos um de `node_id`/`path`
//! 6. Modo paralelo sem steps interativos

use crate::errors::ErrorCode;
use crate::protocol::{IterationSpec, Step, SuiteDocument};
use thiserror::Error;

/// Erros de validação de um documento de suíte.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("suite_name is missing or empty")]
    MissingSuiteName,

    #[error("node_id is missing or empty")]
    MissingNodeId,

    #[error("suite '{0}' declares no steps")]
    NoSteps(String),

    #[error("step '{step}' must declare exactly one of request/input/call (found {found})")]
    AmbiguousAction { step: String, found: usize },

    #[error("step '{step}' declares no action and no scenario provides a request")]
    NoAction { step: String },

    #[error("step '{step}' has invalid iteration: {reason}")]
    InvalidIteration { step: String, reason: String },

    #[error("dependency entry {index} declares neither node_id nor path")]
    EmptyDependsRef { index: usize },

    #[error("Interactive input steps detected in parallel execution mode: {steps}")]
    InputInParallel { steps: String },
}

impl ValidationError {
    /// Código estruturado correspondente (faixa E1xxx).
    pub fn code(&self) -> ErrorCode {
        match self {
            ValidationError::MissingSuiteName => ErrorCode::MISSING_SUITE_NAME,
            ValidationError::MissingNodeId => ErrorCode::INVALID_DOCUMENT,
            ValidationError::NoSteps(_) => ErrorCode::EMPTY_SUITE,
            ValidationError::AmbiguousAction { .. } | ValidationError::NoAction { .. } => {
                ErrorCode::AMBIGUOUS_STEP_ACTION
            }
            ValidationError::InvalidIteration { .. } => ErrorCode::INVALID_ITERATION,
            ValidationError::EmptyDependsRef { .. } => ErrorCode::EMPTY_DEPENDS_REF,
            ValidationError::InputInParallel { .. } => ErrorCode::INPUT_IN_PARALLEL,
        }
    }
}

/// Valida um documento completo. Devolve todas as violações encontradas.
pub fn validate_suite(doc: &SuiteDocument) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if doc.suite_name.trim().is_empty() {
        errors.push(ValidationError::MissingSuiteName);
    }
    if doc.node_id.trim().is_empty() {
        errors.push(ValidationError::MissingNodeId);
    }
    if doc.steps.is_empty() {
        errors.push(ValidationError::NoSteps(doc.node_id.clone()));
    }

    for (index, dep) in doc.depends.iter().enumerate() {
        if dep.node_id.is_none() && dep.path.is_none() {
            errors.push(ValidationError::EmptyDependsRef { index });
        }
    }

    for step in &doc.steps {
        validate_step(step, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_step(step: &Step, errors: &mut Vec<ValidationError>) {
    let actions = step.action_count();
    if actions > 1 {
        errors.push(ValidationError::AmbiguousAction {
            step: step.name.clone(),
            found: actions,
        });
    }
    if actions == 0 {
        // Forma sem request: cenários decidem; precisa de pelo menos um
        // cenário com request próprio no then.
        let scenario_provides_request = step.scenarios.iter().any(|scenario| {
            scenario
                .then
                .as_ref()
                .map(|block| block.request.is_some())
                .unwrap_or(false)
        });
        if !scenario_provides_request {
            errors.push(ValidationError::NoAction {
                step: step.name.clone(),
            });
        }
    }

    if let Some(iterate) = &step.iterate {
        if iterate.binding().trim().is_empty() {
            errors.push(ValidationError::InvalidIteration {
                step: step.name.clone(),
                reason: "binding name ('as') is empty".to_string(),
            });
        }
        if let IterationSpec::Range { range, .. } = iterate {
            // Templates são resolvidos na execução; só validamos ranges
            // literais aqui.
            if !range.contains("{{") {
                if let Err(reason) = parse_range(range) {
                    errors.push(ValidationError::InvalidIteration {
                        step: step.name.clone(),
                        reason,
                    });
                }
            }
        }
    }
}

/// Parseia um range inclusivo `"a..b"` com `a ≤ b`.
pub fn parse_range(range: &str) -> Result<(i64, i64), String> {
    let (start, end) = range
        .split_once("..")
        .ok_or_else(|| format!("range '{}' must use the form 'a..b'", range))?;
    let start: i64 = start
        .trim()
        .parse()
        .map_err(|_| format!("range start '{}' is not an integer", start))?;
    let end: i64 = end
        .trim()
        .parse()
        .map_err(|_| format!("range end '{}' is not an integer", end))?;
    if start > end {
        return Err(format!("range '{}..{}' is inverted", start, end));
    }
    Ok((start, end))
}

/// Checagem para o modo paralelo: steps interativos abortam a execução
/// na validação, antes de qualquer step rodar.
pub fn check_parallel_compatibility(suites: &[SuiteDocument]) -> Result<(), ValidationError> {
    let mut offending = Vec::new();
    for doc in suites {
        for step in &doc.steps {
            if step.input.is_some() {
                offending.push(format!("{}::{}", doc.node_id, step.name));
            }
        }
    }
    if offending.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::InputInParallel {
            steps: offending.join(", "),
        })
    }
}
