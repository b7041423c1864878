//! # Módulo de Hooks de Ciclo de Vida
//!
//! Callbacks fornecidos pelo chamador e aguardados em ordem pelo motor
//! nas fronteiras do run:
//!
//! | Hook                  | Momento                                   |
//! |-----------------------|-------------------------------------------|
//! | `on_execution_start`  | Antes da primeira suíte                   |
//! | `on_execution_end`    | Depois de todos os resultados             |
//! | `on_suite_start/end`  | Em volta de cada suíte                    |
//! | `on_step_start/end`   | Em volta de cada step                     |
//!
//! Todos os métodos são assíncronos e opcionais (default no-op), então
//! uma implementação declara só o que lhe interessa.

use crate::protocol::{ExecutionStats, Step, StepResult, SuiteDocument, SuiteResult};
use async_trait::async_trait;

/// Hooks de ciclo de vida aguardados pelo motor em cada fronteira.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_execution_start(&self, _stats: &ExecutionStats) {}

    async fn on_execution_end(&self, _results: &[SuiteResult]) {}

    async fn on_suite_start(&self, _suite: &SuiteDocument) {}

    async fn on_suite_end(&self, _suite: &SuiteDocument, _result: &SuiteResult) {}

    async fn on_step_start(&self, _node_id: &str, _step: &Step) {}

    async fn on_step_end(&self, _node_id: &str, _step: &Step, _result: &StepResult) {}
}

/// Implementação vazia, usada quando o chamador não fornece hooks.
#[derive(Debug, Default)]
pub struct NoopHooks;

#[async_trait]
impl LifecycleHooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHooks {
        step_starts: AtomicUsize,
    }

    #[async_trait]
    impl LifecycleHooks for CountingHooks {
        async fn on_step_start(&self, _node_id: &str, _step: &Step) {
            self.step_starts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_default_methods_are_noops() {
        let hooks = NoopHooks;
        hooks.on_execution_start(&ExecutionStats::default()).await;
        hooks.on_execution_end(&[]).await;
    }

    #[tokio::test]
    async fn test_overridden_hook_runs() {
        let hooks = CountingHooks {
            step_starts: AtomicUsize::new(0),
        };
        let step: Step = serde_json::from_value(json!({
            "name": "go",
            "request": { "method": "GET", "url": "/x" }
        }))
        .unwrap();

        hooks.on_step_start("auth", &step).await;
        hooks.on_step_start("auth", &step).await;
        assert_eq!(hooks.step_starts.load(Ordering::SeqCst), 2);
    }
}
