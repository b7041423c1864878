//! # Módulo de Input Interativo
//!
//! Colaborador de entrada interativa: pede um valor ao operador durante
//! um step e o grava no escopo runtime.
//!
//! ## Dois providers embutidos:
//!
//! - **`TerminalInput`**: prompts de terminal via `dialoguer`; entradas
//!   mascaradas usam o prompt de senha (sem eco). O bloqueio de stdin
//!   roda em `spawn_blocking` para não travar os workers assíncronos.
//! - **`QueuedInput`**: respostas pré-enfileiradas, para testes e runs
//!   não interativos.
//!
//! Steps interativos são incompatíveis com execução paralela: a
//! validação rejeita a combinação antes de qualquer step rodar.

use crate::protocol::InputSpec;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Colaborador de entrada interativa.
#[async_trait]
pub trait InputProvider: Send + Sync {
    /// Resolve um step de input para um valor. O prompt chega já
    /// interpolado.
    async fn prompt(&self, spec: &InputSpec) -> Result<Value>;
}

/// Provider de terminal sobre `dialoguer`. Inputs mascarados usam o
/// prompt de senha (sem eco).
#[derive(Debug, Default)]
pub struct TerminalInput;

#[async_trait]
impl InputProvider for TerminalInput {
    async fn prompt(&self, spec: &InputSpec) -> Result<Value> {
        let prompt = spec.prompt.clone();
        let masked = spec.masked;
        let default = spec.default.clone();

        // dialoguer bloqueia em stdin; fora dos workers assíncronos.
        let answer = tokio::task::spawn_blocking(move || -> Result<String> {
            if masked {
                dialoguer::Password::new()
                    .with_prompt(&prompt)
                    .allow_empty_password(default.is_some())
                    .interact()
                    .map_err(|e| anyhow!("input prompt failed: {}", e))
            } else {
                dialoguer::Input::<String>::new()
                    .with_prompt(&prompt)
                    .allow_empty(default.is_some())
                    .interact_text()
                    .map_err(|e| anyhow!("input prompt failed: {}", e))
            }
        })
        .await
        .map_err(|e| anyhow!("input task failed: {}", e))??;

        if answer.is_empty() {
            if let Some(default) = &spec.default {
                return Ok(default.clone());
            }
        }
        Ok(Value::String(answer))
    }
}

/// Provider com respostas pré-enfileiradas, para testes e execuções
/// não interativas.
#[derive(Debug, Default)]
pub struct QueuedInput {
    answers: Mutex<VecDeque<Value>>,
}

impl QueuedInput {
    pub fn new(answers: Vec<Value>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
        }
    }
}

#[async_trait]
impl InputProvider for QueuedInput {
    async fn prompt(&self, spec: &InputSpec) -> Result<Value> {
        let next = self
            .answers
            .lock()
            .map_err(|_| anyhow!("queued input poisoned"))?
            .pop_front();
        match next {
            Some(answer) => Ok(answer),
            None => spec
                .default
                .clone()
                .ok_or_else(|| anyhow!("no queued answer for input '{}'", spec.variable)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: serde_json::Value) -> InputSpec {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_queued_input_pops_in_order() {
        let provider = QueuedInput::new(vec![json!("first"), json!(2)]);
        let input = spec(json!({ "prompt": "?", "variable": "v" }));

        assert_eq!(provider.prompt(&input).await.unwrap(), json!("first"));
        assert_eq!(provider.prompt(&input).await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_queued_input_falls_back_to_default() {
        let provider = QueuedInput::new(vec![]);
        let input = spec(json!({ "prompt": "?", "variable": "v", "default": "fallback" }));
        assert_eq!(provider.prompt(&input).await.unwrap(), json!("fallback"));
    }

    #[tokio::test]
    async fn test_queued_input_exhausted_without_default() {
        let provider = QueuedInput::new(vec![]);
        let input = spec(json!({ "prompt": "?", "variable": "token" }));
        let error = provider.prompt(&input).await.unwrap_err();
        assert!(error.to_string().contains("token"));
    }
}
