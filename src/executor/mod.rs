//! # Módulo Executor de Steps
//!
//! Máquina de estados por step:
//!
//! ```text
//! PENDING → INTERPOLATED → (DELAYED) → DISPATCHED → RESPONDED →
//!    (SCENARIOS) → ASSERTED → CAPTURED → COMPLETE | FAILED | SKIPPED
//! ```
//!
//! 1. **INTERPOLATED**: a requisição (e `input`/`call`/`delay`/`assert`)
//!    é interpolada em profundidade contra a visão mesclada de variáveis;
//!    `step_id` e `qualified_step_id` (`<node_id>::<step_id>`) são
//!    calculados, com prefixo de índice em colisões de slug.
//! 2. **Filtro**: com filtro de steps configurado, o step só roda se
//!    casar com o conjunto de ids simples ou qualificados (`::` ou `:`).
//! 3. **DELAYED**: pausa fixa ou aleatória `{min, max}` (ver `delay.rs`).
//! 4. **Cenários sem request**: primeira condição que casa executa seu
//!    `then` (request própria); nenhum match → `skipped` com meta.
//! 5. **DISPATCHED/RESPONDED**: a requisição interpolada vai ao
//!    colaborador HTTP; um registro compacto entra no log de performance.
//! 6. **SCENARIOS**: com request, todos os ramos aplicáveis acumulam
//!    assertions, capturas e variáveis sobre o mesmo resultado.
//! 7. **ASSERTED**: falhas viram `"N assertion(s) failed"`.
//! 8. **CAPTURED**: capturas entram no runtime **antes do próximo step**.
//! 9. **Iterações**: o fluxo inteiro roda uma vez por expansão, com
//!    snapshot/restore de variáveis e capturas sufixadas
//!    `_iteration_<n>`.
//!
//! Scripts pré/pós-step rodam no colaborador de scripting; variáveis
//! declaradas via `set_variable` entram no runtime. Hooks
//! `on_step_start`/`on_step_end` são aguardados em ordem.

mod delay;
mod iterate;

use crate::captures;
use crate::events::{EventKind, EventLevel, EventStream};
use crate::hooks::LifecycleHooks;
use crate::http::HttpClient;
use crate::input::InputProvider;
use crate::interpolation::Interpolator;
use crate::limits::ExecutionLimits;
use crate::loader;
use crate::perf::{PerfRecord, PerformanceLog};
use crate::protocol::{
    step_slug, AssertionSpec, CallSpec, InputSpec, IterationRecord, RequestSpec, ResponseContext,
    RunStatus, ScenarioBlock, Step, StepResult,
};
use crate::scenarios;
use crate::scripting::{ScriptContext, ScriptEngine};
use crate::variables::VariableService;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use delay::resolve_delay;

// ============================================================================
// FILTRO DE STEPS
// ============================================================================

/// Filtro de execução por id de step. Tokens qualificados usam `::`
/// (ou um único `:`, normalizado aqui).
#[derive(Debug, Clone, Default)]
pub struct StepFilter {
    simple: HashSet<String>,
    qualified: HashSet<String>,
}

impl StepFilter {
    pub fn new(tokens: &[String]) -> Self {
        let mut filter = StepFilter::default();
        for token in tokens {
            if token.contains("::") {
                filter.qualified.insert(token.clone());
            } else if token.contains(':') {
                filter.qualified.insert(token.replacen(':', "::", 1));
            } else {
                filter.simple.insert(token.clone());
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.simple.is_empty() && self.qualified.is_empty()
    }

    pub fn matches(&self, step_id: &str, qualified_id: &str) -> bool {
        self.is_empty()
            || self.simple.contains(step_id)
            || self.qualified.contains(qualified_id)
    }
}

// ============================================================================
// EXECUTOR
// ============================================================================

/// Executor de steps de uma suíte. Construído por suíte pelo
/// orquestrador, com os colaboradores e o contexto daquela execução.
pub struct StepExecutor {
    pub node_id: String,
    pub suite_steps: Vec<Step>,
    pub http: Arc<dyn HttpClient>,
    pub input: Arc<dyn InputProvider>,
    pub script: Arc<dyn ScriptEngine>,
    pub interpolator: Arc<Interpolator>,
    pub events: Arc<EventStream>,
    pub hooks: Arc<dyn LifecycleHooks>,
    pub perf: Arc<PerformanceLog>,
    pub limits: ExecutionLimits,
    pub filter: StepFilter,
    pub script_timeout_ms: u64,
    pub test_root: PathBuf,
}

impl StepExecutor {
    /// Executa um step completo (com iterações, filtro, hooks e eventos).
    pub async fn execute_step(
        &self,
        step: &Step,
        index: usize,
        vars: &mut VariableService,
        used_ids: &mut HashSet<String>,
    ) -> StepResult {
        let (step_id, qualified_id) = self.compute_ids(step, index, used_ids);

        if !self.filter.matches(&step_id, &qualified_id) {
            debug!(step_id = %step_id, "Step filtered out");
            let mut result =
                StepResult::shell(&step.name, Some(step_id), Some(qualified_id));
            result.status = RunStatus::Skipped;
            return result;
        }

        self.events.emit(
            EventLevel::Info,
            EventKind::StepStarted,
            Some(qualified_id.clone()),
            None,
        );
        self.hooks.on_step_start(&self.node_id, step).await;

        let result = match &step.iterate {
            Some(_) => self.run_iterations(step, &step_id, &qualified_id, vars).await,
            None => {
                self.run_single(step, &step_id, &qualified_id, vars)
                    .await
            }
        };

        let level = match result.status {
            RunStatus::Failure => EventLevel::Error,
            _ => EventLevel::Info,
        };
        self.events.emit(
            level,
            EventKind::StepCompleted,
            Some(qualified_id),
            Some(json!({
                "status": result.status,
                "duration_ms": result.duration_ms,
                "error": result.error_message,
            })),
        );
        self.hooks.on_step_end(&self.node_id, step, &result).await;

        result
    }

    /// `step_id` explícito ou slug do nome; colisões ganham o índice
    /// como prefixo.
    fn compute_ids(
        &self,
        step: &Step,
        index: usize,
        used_ids: &mut HashSet<String>,
    ) -> (String, String) {
        let base = step
            .step_id
            .clone()
            .unwrap_or_else(|| step_slug(&step.name));
        let step_id = if used_ids.contains(&base) {
            format!("{}-{}", index, base)
        } else {
            base
        };
        used_ids.insert(step_id.clone());
        let qualified = format!("{}::{}", self.node_id, step_id);
        (step_id, qualified)
    }

    // ========================================================================
    // ITERAÇÕES
    // ========================================================================

    async fn run_iterations(
        &self,
        step: &Step,
        step_id: &str,
        qualified_id: &str,
        vars: &mut VariableService,
    ) -> StepResult {
        let iterate = step.iterate.as_ref().expect("caller checked iterate");
        let mut result =
            StepResult::shell(&step.name, Some(step_id.to_string()), Some(qualified_id.to_string()));

        let values = match iterate::expand(iterate, vars, &self.interpolator, &self.limits) {
            Ok(values) => values,
            Err(reason) => {
                result.status = RunStatus::Failure;
                result.error_message = Some(format!("invalid iteration: {}", reason));
                return result;
            }
        };

        // Zero expansões: sucesso sem nenhuma requisição.
        if values.is_empty() {
            result.status = RunStatus::Success;
            result.iteration_results = Some(Vec::new());
            return result;
        }

        let binding = iterate.binding().to_string();
        let total = values.len();
        let mut records = Vec::with_capacity(total);
        let mut aggregated: IndexMap<String, Value> = IndexMap::new();
        let mut total_duration = 0u64;
        let mut all_ok = true;

        for (iteration, value) in values.into_iter().enumerate() {
            let snapshot = vars.create_snapshot();

            vars.set_runtime(binding.clone(), value.clone());
            vars.set_runtime("index", json!(iteration));
            vars.set_runtime("isFirst", json!(iteration == 0));
            vars.set_runtime("isLast", json!(iteration + 1 == total));

            let iteration_result = self.run_single(step, step_id, qualified_id, vars).await;

            total_duration += iteration_result.duration_ms;
            if iteration_result.status != RunStatus::Success {
                all_ok = false;
            }
            records.push(IterationRecord {
                index: iteration,
                value: value.clone(),
                status: iteration_result.status,
                duration_ms: iteration_result.duration_ms,
                error_message: iteration_result.error_message.clone(),
            });

            // Capturas sufixadas para não colidir entre iterações.
            if let Some(captured) = &iteration_result.captured_variables {
                for (name, captured_value) in captured {
                    aggregated.insert(
                        format!("{}_iteration_{}", name, iteration),
                        captured_value.clone(),
                    );
                }
            }

            vars.restore(snapshot);
        }

        for (name, value) in &aggregated {
            vars.set_runtime(name.clone(), value.clone());
        }

        result.status = if all_ok || step.continue_on_failure {
            RunStatus::Success
        } else {
            RunStatus::Failure
        };
        if result.status == RunStatus::Failure {
            let failed = records
                .iter()
                .filter(|record| record.status == RunStatus::Failure)
                .count();
            result.error_message = Some(format!("{} iteration(s) failed", failed));
        }
        result.duration_ms = total_duration;
        result.iteration_results = Some(records);
        result.captured_variables = if aggregated.is_empty() {
            None
        } else {
            Some(aggregated)
        };
        result
    }

    // ========================================================================
    // FLUXO DE UM STEP
    // ========================================================================

    fn run_single<'a>(
        &'a self,
        step: &'a Step,
        step_id: &'a str,
        qualified_id: &'a str,
        vars: &'a mut VariableService,
    ) -> Pin<Box<dyn Future<Output = StepResult> + Send + 'a>> {
        Box::pin(self.run_single_inner(step, step_id, qualified_id, vars))
    }

    async fn run_single_inner(
        &self,
        step: &Step,
        step_id: &str,
        qualified_id: &str,
        vars: &mut VariableService,
    ) -> StepResult {
        let start = Instant::now();
        let mut result = StepResult::shell(
            &step.name,
            Some(step_id.to_string()),
            Some(qualified_id.to_string()),
        );

        // DELAYED
        if let Some(raw_delay) = &step.delay {
            if let Some(ms) = delay::resolve_delay(raw_delay, vars, &self.interpolator) {
                debug!(step = %step.name, delay_ms = ms, "Delaying step");
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
            }
        }

        // Pré-script (pode definir variáveis usadas na interpolação).
        if let Some(spec) = &step.pre_script {
            if let Err(message) = self.run_script_spec(spec, vars, None, None) {
                result.status = RunStatus::Failure;
                result.error_message = Some(message);
                result.duration_ms = start.elapsed().as_millis() as u64;
                return result;
            }
        }

        if let Some(input) = &step.input {
            self.run_input(input, vars, &mut result).await;
        } else if let Some(call) = &step.call {
            self.run_call(call, vars, &mut result).await;
        } else if let Some(request) = &step.request {
            self.run_request(step, request, vars, &mut result).await;
        } else if !step.scenarios.is_empty() {
            self.run_scenarios_without_request(step, vars, &mut result)
                .await;
        } else {
            result.status = RunStatus::Failure;
            result.error_message = Some("step declares no action".to_string());
        }

        // Pós-script (vê a resposta quando houver).
        if result.status != RunStatus::Skipped {
            if let Some(spec) = &step.post_script {
                let request_value = result
                    .request_details
                    .as_ref()
                    .and_then(|details| serde_json::to_value(details).ok());
                let response_value = result
                    .response_details
                    .as_ref()
                    .and_then(|details| serde_json::to_value(details).ok());
                if let Err(message) =
                    self.run_script_spec(spec, vars, request_value, response_value)
                {
                    result.status = RunStatus::Failure;
                    result.error_message = Some(message);
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    // ========================================================================
    // AÇÕES
    // ========================================================================

    async fn run_input(
        &self,
        input: &InputSpec,
        vars: &mut VariableService,
        result: &mut StepResult,
    ) {
        let interpolated: InputSpec = match self.reshape(input, vars) {
            Ok(spec) => spec,
            Err(message) => {
                result.status = RunStatus::Failure;
                result.error_message = Some(message);
                return;
            }
        };

        match self.input.prompt(&interpolated).await {
            Ok(answer) => {
                vars.set_runtime(interpolated.variable.clone(), answer.clone());
                let mut captured = IndexMap::new();
                captured.insert(interpolated.variable.clone(), answer);
                result.captured_variables = Some(captured);
                result.status = RunStatus::Success;
            }
            Err(error) => {
                result.status = RunStatus::Failure;
                result.error_message = Some(format!("input failed: {}", error));
            }
        }
    }

    async fn run_call(
        &self,
        call: &CallSpec,
        vars: &mut VariableService,
        result: &mut StepResult,
    ) {
        let call: CallSpec = match self.reshape(call, vars) {
            Ok(spec) => spec,
            Err(message) => {
                result.status = RunStatus::Failure;
                result.error_message = Some(message);
                return;
            }
        };

        for (name, value) in &call.variables {
            let resolved = self.interpolator.interpolate(value, vars);
            vars.set_runtime(name.clone(), resolved);
        }

        let target_steps: Vec<Step> = match &call.suite {
            None => self.suite_steps.clone(),
            Some(path) => {
                let full_path = self.test_root.join(path);
                match loader::load_suite_from_file(&full_path) {
                    Ok(loaded) => loaded.document.steps,
                    Err(error) => {
                        result.status = RunStatus::Failure;
                        result.error_message =
                            Some(format!("call failed to load suite '{}': {}", path, error));
                        return;
                    }
                }
            }
        };

        let target = target_steps.iter().find(|candidate| {
            candidate.step_id.as_deref() == Some(call.step.as_str())
                || step_slug(&candidate.name) == call.step
        });

        let Some(target_step) = target else {
            result.status = RunStatus::Failure;
            result.error_message = Some(format!("call target step '{}' not found", call.step));
            return;
        };

        // Alvo que re-invoca o mesmo step criaria recursão infinita.
        if call.suite.is_none() {
            if let Some(nested_call) = &target_step.call {
                if nested_call.suite.is_none() && nested_call.step == call.step {
                    result.status = RunStatus::Failure;
                    result.error_message =
                        Some(format!("call target '{}' invokes itself", call.step));
                    return;
                }
            }
        }

        info!(target = %call.step, suite = ?call.suite, "Invoking call target");

        let nested_id = target_step
            .step_id
            .clone()
            .unwrap_or_else(|| step_slug(&target_step.name));
        let nested_qualified = format!("{}::{}", self.node_id, nested_id);

        // run_single já devolve um futuro boxed (quebra o ciclo de recursão async: call → step → call).
        let nested_result = self
            .run_single(target_step, &nested_id, &nested_qualified, vars)
            .await;

        result.status = nested_result.status;
        result.error_message = nested_result.error_message;
        result.request_details = nested_result.request_details;
        result.response_details = nested_result.response_details;
        result.assertions_results = nested_result.assertions_results;
        result.captured_variables = nested_result.captured_variables;
    }

    async fn run_request(
        &self,
        step: &Step,
        request: &RequestSpec,
        vars: &mut VariableService,
        result: &mut StepResult,
    ) {
        // INTERPOLATED
        let request: RequestSpec = match self.reshape(request, vars) {
            Ok(spec) => spec,
            Err(message) => {
                result.status = RunStatus::Failure;
                result.error_message = Some(message);
                return;
            }
        };

        // DISPATCHED / RESPONDED
        let exchange = self.http.execute_request(&step.name, &request).await;

        self.perf.append(PerfRecord {
            node_id: self.node_id.clone(),
            step_name: step.name.clone(),
            method: exchange.request_details.method.clone(),
            url: exchange.request_details.url.clone(),
            status_code: exchange
                .response_details
                .as_ref()
                .map(|details| details.status_code),
            duration_ms: exchange.duration_ms,
            size_bytes: exchange
                .response_details
                .as_ref()
                .map(|details| details.size_bytes)
                .unwrap_or(0),
        });

        result.request_details = Some(exchange.request_details.clone());
        result.response_details = exchange.response_details.clone();
        result.status = exchange.status;
        result.error_message = exchange.error_message.clone();

        let ctx = ResponseContext::from_exchange(&exchange, result.status);

        // SCENARIOS (forma cumulativa): acumula assertions, capturas e
        // variáveis de todos os ramos aplicáveis.
        let mut effective_assert = step.assert.clone().unwrap_or_default();
        let mut effective_captures = step.capture.clone().unwrap_or_default();
        let mut scenario_variables: IndexMap<String, Value> = IndexMap::new();

        if !step.scenarios.is_empty() {
            let context_value = ctx.to_value();
            let (hits, meta) = scenarios::matching_branches(&step.scenarios, &context_value);
            for hit in hits {
                self.apply_block(
                    hit.block,
                    vars,
                    &mut effective_assert,
                    &mut effective_captures,
                    &mut scenario_variables,
                );
            }
            result.scenarios_meta = Some(meta);
        }

        // ASSERTED
        if !effective_assert.is_empty() {
            let assert_spec: AssertionSpec = match self.reshape(&effective_assert, vars) {
                Ok(spec) => spec,
                Err(_) => effective_assert.clone(),
            };
            let outcomes = crate::assertions::evaluate(&assert_spec, &ctx);
            let failed = outcomes.iter().filter(|outcome| !outcome.passed).count();
            if failed > 0 {
                warn!(
                    code = %crate::errors::ErrorCode::ASSERTIONS_FAILED,
                    step = %step.name,
                    failed,
                    "Assertions failed"
                );
                result.status = RunStatus::Failure;
                result.error_message = Some(format!("{} assertion(s) failed", failed));
            }
            result.assertions_results = Some(outcomes);
        }

        // CAPTURED (apenas com resposta; capturas entram no runtime
        // antes do próximo step).
        let mut captured_all = scenario_variables;
        if exchange.status == RunStatus::Success && !effective_captures.is_empty() {
            let captured = captures::evaluate(
                &effective_captures,
                &ctx,
                vars,
                &self.interpolator,
                &self.script,
                self.script_timeout_ms,
            );
            for (name, value) in &captured {
                vars.set_runtime(name.clone(), value.clone());
            }
            captured_all.extend(captured);
        }
        if !captured_all.is_empty() {
            result.captured_variables = Some(captured_all);
        }
    }

    async fn run_scenarios_without_request(
        &self,
        step: &Step,
        vars: &mut VariableService,
        result: &mut StepResult,
    ) {
        // Sem resposta ainda: o contexto expõe as variáveis correntes.
        let mut context_value = ResponseContext::empty(RunStatus::Success).to_value();
        context_value["variables"] = json!(vars.all());

        let (chosen, meta) = scenarios::first_match(&step.scenarios, &context_value);
        result.scenarios_meta = Some(meta);

        let Some(hit) = chosen else {
            debug!(step = %step.name, "No scenario matched; skipping step");
            result.status = RunStatus::Skipped;
            return;
        };

        let mut effective_assert = AssertionSpec::default();
        let mut effective_captures: IndexMap<String, Value> = IndexMap::new();
        let mut scenario_variables: IndexMap<String, Value> = IndexMap::new();
        self.apply_block(
            hit.block,
            vars,
            &mut effective_assert,
            &mut effective_captures,
            &mut scenario_variables,
        );

        if let Some(request) = &hit.block.request {
            let request_spec = request.clone();
            let mut synthetic = step.clone();
            synthetic.scenarios = Vec::new();
            synthetic.request = Some(request_spec.clone());
            synthetic.assert = if effective_assert.is_empty() {
                None
            } else {
                Some(effective_assert)
            };
            synthetic.capture = if effective_captures.is_empty() {
                None
            } else {
                Some(effective_captures)
            };
            synthetic.pre_script = None;
            synthetic.post_script = None;
            synthetic.delay = None;

            // O step sintético não tem cenários, então o meta do
            // first_match gravado acima permanece intacto.
            self.run_request(&synthetic, &request_spec, vars, result).await;
        } else {
            // Ramo sem request: só variáveis/capturas estáticas.
            result.status = RunStatus::Success;
        }

        if !scenario_variables.is_empty() {
            let mut captured = result.captured_variables.take().unwrap_or_default();
            for (name, value) in scenario_variables {
                captured.insert(name, value);
            }
            result.captured_variables = Some(captured);
        }
    }

    /// Aplica um ramo de cenário: assertions e capturas acumulam,
    /// variáveis estáticas entram no runtime imediatamente.
    fn apply_block(
        &self,
        block: &ScenarioBlock,
        vars: &mut VariableService,
        effective_assert: &mut AssertionSpec,
        effective_captures: &mut IndexMap<String, Value>,
        scenario_variables: &mut IndexMap<String, Value>,
    ) {
        if let Some(assert) = &block.assert {
            effective_assert.merge(assert);
        }
        if let Some(capture) = &block.capture {
            for (name, expression) in capture {
                effective_captures.insert(name.clone(), expression.clone());
            }
        }
        for (name, value) in &block.variables {
            let resolved = self.interpolator.interpolate(value, vars);
            vars.set_runtime(name.clone(), resolved.clone());
            scenario_variables.insert(name.clone(), resolved);
        }
    }

    // ========================================================================
    // SCRIPTS E HELPERS
    // ========================================================================

    /// Roda um script pré/pós-step. `Err` = o step deve falhar.
    fn run_script_spec(
        &self,
        spec: &crate::protocol::ScriptSpec,
        vars: &mut VariableService,
        request: Option<Value>,
        response: Option<Value>,
    ) -> Result<(), String> {
        let detail = spec.detail();
        let code = match (&detail.code, &detail.script_file) {
            (Some(code), _) => code.clone(),
            (None, Some(file)) => {
                let path = self.test_root.join(file);
                match std::fs::read_to_string(&path) {
                    Ok(code) => code,
                    Err(error) => {
                        let message =
                            format!("failed to read script_file '{}': {}", file, error);
                        return if detail.continue_on_error {
                            warn!(error = %message, "Script skipped");
                            Ok(())
                        } else {
                            Err(message)
                        };
                    }
                }
            }
            (None, None) => {
                return Err("script declares neither code nor script_file".to_string());
            }
        };

        let mut ctx = ScriptContext::new(vars.all());
        ctx.request = request;
        ctx.response = response;

        let timeout = detail.timeout_ms.unwrap_or(self.script_timeout_ms);
        match self.script.execute(&code, &mut ctx, true, timeout) {
            Ok(_) => {
                for (name, value) in ctx.into_exported() {
                    vars.set_runtime(name, value);
                }
                Ok(())
            }
            Err(error) => {
                if detail.continue_on_error {
                    warn!(
                        code = %crate::errors::ErrorCode::SCRIPT_FAILURE,
                        error = %error,
                        "Script failed; continue_on_error set"
                    );
                    Ok(())
                } else {
                    Err(format!("script failed: {}", error))
                }
            }
        }
    }

    /// Interpola uma spec serde em profundidade e a re-materializa.
    fn reshape<T>(&self, spec: &T, vars: &VariableService) -> Result<T, String>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let raw = serde_json::to_value(spec)
            .map_err(|error| format!("failed to serialize spec: {}", error))?;
        let interpolated = self.interpolator.interpolate(&raw, vars);
        serde_json::from_value(interpolated)
            .map_err(|error| format!("interpolation produced an invalid spec: {}", error))
    }
}

// ============================================================================
// TESTES
// ============================================================================
