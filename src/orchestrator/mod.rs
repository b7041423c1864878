//! # Módulo Orquestrador de Execução
//!
//! Coordena o run completo: constrói o grafo de dependências, registra
//! exports, calcula a ordem topológica e executa as suítes em modo
//! sequencial ou paralelo em lotes.
//!
//! ## Por suíte, na ordem:
//!
//! 1. Anuncia `current_test` e invoca o callback de estatísticas
//! 2. Cache hit: restaura os exports no registro e produz um resultado
//!    sintético (`duration_ms = 0`, `steps_executed = 1`,
//!    `success_rate = 100`)
//! 3. Sem cache: `mark_executing`, limpa escopos não-globais, aplica
//!    variáveis de suíte e dependências, interpola e religa a
//!    `base_url`, itera os steps pelo executor
//! 4. Publica os exports declarados (warning para obrigatório ausente,
//!    silêncio para opcional), `mark_resolved` com o resultado real
//! 5. Atualiza estatísticas; falha em suíte requerida interrompe o run
//!    (os resultados já coletados ainda são devolvidos)
//!
//! ## Modo paralelo
//!
//! As suítes são agrupadas por camadas de profundidade do grafo (duas
//! suítes na mesma camada nunca têm aresta entre si) e cada camada roda
//! em lotes de `max_parallel` com semântica all-settled. Steps
//! interativos são incompatíveis e abortam na validação, antes de
//! qualquer step.

use crate::config::{EngineConfig, ExecutionMode};
use crate::errors::EngineError;
use crate::events::{self, EventFilter, EventKind, EventLevel, EventStream};
use crate::executor::{StepExecutor, StepFilter};
use crate::faker::{BuiltinFaker, FakeDataProvider};
use crate::hooks::{LifecycleHooks, NoopHooks};
use crate::http::{HttpClient, HttpClientConfig, ReqwestClient};
use crate::input::{InputProvider, TerminalInput};
use crate::interpolation::{InterpolationOptions, Interpolator};
use crate::limits::{self, ExecutionLimits};
use crate::loader::{self, LoadedSuite};
use crate::perf::PerformanceLog;
use crate::protocol::{
    DiscoveredSuite, ExecutionStats, RunStatus, StepResult, SuiteResult,
};
use crate::registry::{self, SharedRegistry};
use crate::resolver::{CachedResult, DependencyGraph};
use crate::scripting::{NullScriptEngine, ScriptEngine};
use crate::validation;
use crate::variables::{Scope, VariableService};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Callback de progresso invocado a cada atualização de estatísticas.
pub type StatsCallback = dyn Fn(&ExecutionStats) + Send + Sync;

// ============================================================================
// ORQUESTRADOR
// ============================================================================

/// Orquestrador de um run. O stream de eventos é injetado (ou criado na
/// construção): múltiplos motores convivem no mesmo processo.
pub struct Orchestrator {
    config: EngineConfig,
    graph: DependencyGraph,
    registry: SharedRegistry,
    events: Arc<EventStream>,
    hooks: Arc<dyn LifecycleHooks>,
    http: Arc<dyn HttpClient>,
    input: Arc<dyn InputProvider>,
    script: Arc<dyn ScriptEngine>,
    faker: Arc<dyn FakeDataProvider>,
    perf: Arc<PerformanceLog>,
    limits: ExecutionLimits,
    stats: ExecutionStats,
    abort: Arc<AtomicBool>,
    preloaded: HashMap<String, LoadedSuite>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Self {
        let events = EventStream::new(config.event_buffer_size);
        let graph = DependencyGraph::new(config.test_root.clone());
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(HttpClientConfig::new(
            config.request_timeout_ms,
        )));
        Self {
            graph,
            registry: registry::shared(),
            events,
            hooks: Arc::new(NoopHooks),
            http,
            input: Arc::new(TerminalInput),
            script: Arc::new(NullScriptEngine),
            faker: Arc::new(BuiltinFaker::new()),
            perf: Arc::new(PerformanceLog::new()),
            limits: ExecutionLimits::from_env(),
            stats: ExecutionStats::default(),
            abort: Arc::new(AtomicBool::new(false)),
            preloaded: HashMap::new(),
            config,
        }
    }

    // Colaboradores injetáveis (transporte, input, scripting, fake data,
    // hooks, eventos).

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    pub fn with_input(mut self, input: Arc<dyn InputProvider>) -> Self {
        self.input = input;
        self
    }

    pub fn with_script(mut self, script: Arc<dyn ScriptEngine>) -> Self {
        self.script = script;
        self
    }

    pub fn with_faker(mut self, faker: Arc<dyn FakeDataProvider>) -> Self {
        self.faker = faker;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_events(mut self, events: Arc<EventStream>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> Arc<EventStream> {
        Arc::clone(&self.events)
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    pub fn perf(&self) -> Arc<PerformanceLog> {
        Arc::clone(&self.perf)
    }

    /// Handle de cancelamento: o run é checado entre suítes e entre
    /// steps; I/O em voo é cancelado em melhor esforço.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Pré-carrega um documento (testes e embutidores programáticos).
    pub fn preload(&mut self, node_id: impl Into<String>, loaded: LoadedSuite) {
        self.preloaded.insert(node_id.into(), loaded);
    }

    /// Últimos eventos do buffer, para inspeção.
    pub fn recent_events(&self, limit: usize) -> Vec<events::RunEvent> {
        self.events.query(&EventFilter::default(), limit)
    }

    // ========================================================================
    // EXECUÇÃO
    // ========================================================================

    /// Executa o conjunto descoberto e devolve os resultados na ordem
    /// de execução. Erros fatais: ciclo de dependência e configuração
    /// inválida (ex.: input interativo em modo paralelo).
    pub async fn execute_tests(
        &mut self,
        mut tests: Vec<DiscoveredSuite>,
        on_stats: Option<&StatsCallback>,
    ) -> Result<Vec<SuiteResult>, EngineError> {
        self.stats = ExecutionStats {
            discovered: tests.len(),
            ..ExecutionStats::default()
        };
        self.events
            .emit(EventLevel::Info, EventKind::RunStarted, None, Some(json!({
                "discovered": tests.len(),
                "mode": format!("{:?}", self.config.execution_mode),
            })));
        self.hooks.on_execution_start(&self.stats).await;

        // Grafo + registro de exports declarados.
        self.graph.set_cache_enabled(self.config.cache_enabled);
        self.graph.build(&mut tests);
        {
            let mut registry = self
                .registry
                .write()
                .map_err(|_| EngineError::Internal("registry lock poisoned".to_string()))?;
            for test in &tests {
                let mut declared = test.exports.clone();
                declared.extend(test.exports_optional.iter().cloned());
                registry.register_node(
                    &test.node_id,
                    &test.suite_name,
                    &declared,
                    Some(test.file_path.clone()),
                );
            }
        }

        let order = match self.graph.execution_order(&tests) {
            Ok(order) => order,
            Err(error) => {
                self.events.emit(
                    EventLevel::Error,
                    EventKind::RunError,
                    None,
                    Some(json!({ "error": error.to_string() })),
                );
                return Err(error);
            }
        };

        // Documentos carregados de uma vez: o modo paralelo precisa
        // inspecionar steps antes de qualquer execução.
        let mut documents: HashMap<String, Result<LoadedSuite, String>> = HashMap::new();
        for test in &order {
            let loaded = match self.preloaded.get(&test.node_id) {
                Some(preloaded) => Ok(preloaded.clone()),
                None => loader::load_suite_from_file(&test.file_path)
                    .map_err(|error| error.to_string()),
            };
            documents.insert(test.node_id.clone(), loaded);
        }

        if self.config.execution_mode == ExecutionMode::Parallel {
            let docs: Vec<_> = documents
                .values()
                .filter_map(|loaded| loaded.as_ref().ok())
                .map(|loaded| loaded.document.clone())
                .collect();
            if let Err(error) = validation::check_parallel_compatibility(&docs) {
                let message = error.to_string();
                self.events.emit(
                    EventLevel::Error,
                    EventKind::RunError,
                    None,
                    Some(json!({ "error": message })),
                );
                return Err(EngineError::Configuration(message));
            }
        }

        let results = match self.config.execution_mode {
            ExecutionMode::Sequential => {
                self.run_sequential(&order, &documents, on_stats).await
            }
            ExecutionMode::Parallel => self.run_parallel(&order, &documents, on_stats).await,
        };

        self.stats.current_test = None;
        notify(on_stats, &self.stats);
        self.events.emit(
            EventLevel::Info,
            EventKind::RunCompleted,
            None,
            Some(json!({
                "completed": self.stats.completed,
                "successful": self.stats.successful,
                "failed": self.stats.failed,
            })),
        );
        self.hooks.on_execution_end(&results).await;

        Ok(results)
    }

    // ========================================================================
    // MODO SEQUENCIAL
    // ========================================================================

    async fn run_sequential(
        &mut self,
        order: &[DiscoveredSuite],
        documents: &HashMap<String, Result<LoadedSuite, String>>,
        on_stats: Option<&StatsCallback>,
    ) -> Vec<SuiteResult> {
        let mut results = Vec::with_capacity(order.len());

        for (position, test) in order.iter().enumerate() {
            if self.abort.load(Ordering::SeqCst) {
                warn!("Run aborted by caller; remaining suites skipped");
                self.stats.skipped += order.len() - position;
                break;
            }

            self.stats.current_test = Some(test.suite_name.clone());
            notify(on_stats, &self.stats);

            if let Some(result) = self.try_cache_hit(test) {
                results.push(result);
                notify(on_stats, &self.stats);
                continue;
            }

            self.graph.mark_executing(&test.node_id);
            let job = self.make_job(test, documents);
            let (result, runtime_scope) = run_suite(job).await;

            let halt = self.finish_suite(test, result, runtime_scope, &mut results);
            notify(on_stats, &self.stats);
            if halt {
                self.stats.skipped += order.len() - position - 1;
                break;
            }
        }

        results
    }

    // ========================================================================
    // MODO PARALELO
    // ========================================================================

    async fn run_parallel(
        &mut self,
        order: &[DiscoveredSuite],
        documents: &HashMap<String, Result<LoadedSuite, String>>,
        on_stats: Option<&StatsCallback>,
    ) -> Vec<SuiteResult> {
        // Camadas por profundidade: dentro de uma camada não há arestas.
        let mut layers: Vec<Vec<DiscoveredSuite>> = Vec::new();
        for test in order {
            let depth = self.graph.depth_of(&test.node_id);
            while layers.len() <= depth {
                layers.push(Vec::new());
            }
            layers[depth].push(test.clone());
        }

        let max_parallel = self
            .config
            .max_parallel
            .min(self.limits.max_parallel_cap)
            .max(1);
        let mut results = Vec::with_capacity(order.len());
        let mut halted = false;

        'layers: for layer in &layers {
            for batch in layer.chunks(max_parallel) {
                if self.abort.load(Ordering::SeqCst) || halted {
                    break 'layers;
                }

                let mut join_set: JoinSet<(String, SuiteResult, HashMap<String, Value>)> =
                    JoinSet::new();
                let mut batch_order: Vec<String> = Vec::with_capacity(batch.len());

                for test in batch {
                    batch_order.push(test.node_id.clone());

                    if let Some(result) = self.try_cache_hit(test) {
                        results.push(result);
                        continue;
                    }

                    self.graph.mark_executing(&test.node_id);
                    self.stats.current_test = Some(test.suite_name.clone());
                    notify(on_stats, &self.stats);

                    let job = self.make_job(test, documents);
                    let node_id = test.node_id.clone();
                    join_set.spawn(async move {
                        let (result, runtime_scope) = run_suite(job).await;
                        (node_id, result, runtime_scope)
                    });
                }

                // Semântica all-settled: todos os resultados do lote são
                // coletados, panics viram falhas.
                let mut settled: HashMap<String, (SuiteResult, HashMap<String, Value>)> =
                    HashMap::new();
                while let Some(joined) = join_set.join_next().await {
                    match joined {
                        Ok((node_id, result, runtime_scope)) => {
                            settled.insert(node_id, (result, runtime_scope));
                        }
                        Err(join_error) => {
                            error!(error = %join_error, "Suite task failed to join");
                        }
                    }
                }

                // Publicação na ordem do lote: single-writer por suíte,
                // antes de qualquer dependente da próxima camada.
                for node_id in batch_order {
                    let Some((result, runtime_scope)) = settled.remove(&node_id) else {
                        continue;
                    };
                    let Some(test) = batch.iter().find(|test| test.node_id == node_id) else {
                        continue;
                    };
                    if self.finish_suite(test, result, runtime_scope, &mut results) {
                        halted = true;
                    }
                    notify(on_stats, &self.stats);
                }
            }
        }

        results
    }

    // ========================================================================
    // CICLO DE VIDA POR SUÍTE
    // ========================================================================

    /// Resultado sintético para um hit de cache.
    fn try_cache_hit(&mut self, test: &DiscoveredSuite) -> Option<SuiteResult> {
        let cached = self.graph.get_cached(&test.node_id)?.clone();

        info!(node_id = %test.node_id, "Cache hit; restoring exported variables");
        if let Ok(mut registry) = self.registry.write() {
            for (name, value) in &cached.exported_variables {
                registry.set_exported(&test.node_id, name, value.clone());
            }
        }
        self.graph.mark_resolved(&test.node_id, None);

        let now = Utc::now().to_rfc3339();
        let result = SuiteResult {
            node_id: test.node_id.clone(),
            suite_name: test.suite_name.clone(),
            file_path: test.file_path.display().to_string(),
            start_time: now.clone(),
            end_time: now,
            duration_ms: 0,
            status: RunStatus::Success,
            steps_executed: 1,
            steps_successful: 1,
            steps_failed: 0,
            success_rate: 100.0,
            steps_results: Vec::new(),
            variables_captured: cached.exported_variables.clone(),
            available_variables: None,
            error_message: None,
            suite_yaml_content: None,
        };

        self.stats.completed += 1;
        self.stats.successful += 1;
        self.events.emit(
            EventLevel::Info,
            EventKind::SuiteCompleted,
            Some(test.node_id.clone()),
            Some(json!({ "cache_hit": true })),
        );

        Some(result)
    }

    /// Publica exports, resolve o nó, atualiza estatísticas e eventos.
    /// Retorna true quando o run deve parar (falha em suíte requerida).
    fn finish_suite(
        &mut self,
        test: &DiscoveredSuite,
        result: SuiteResult,
        runtime_scope: HashMap<String, Value>,
        results: &mut Vec<SuiteResult>,
    ) -> bool {
        let succeeded = result.status == RunStatus::Success;
        let mut exported = HashMap::new();

        if succeeded {
            if let Ok(mut registry) = self.registry.write() {
                for name in &test.exports {
                    match runtime_scope.get(name) {
                        Some(value) => {
                            registry.set_exported(&test.node_id, name, value.clone());
                            exported.insert(name.clone(), value.clone());
                        }
                        None => {
                            warn!(
                                node_id = %test.node_id,
                                export = %name,
                                "Declared export missing from runtime scope"
                            );
                        }
                    }
                }
                // Opcionais: melhor esforço, sem warnings.
                for name in &test.exports_optional {
                    if let Some(value) = runtime_scope.get(name) {
                        registry.set_exported(&test.node_id, name, value.clone());
                        exported.insert(name.clone(), value.clone());
                    }
                }
            }
        }

        self.graph.mark_resolved(
            &test.node_id,
            Some(CachedResult {
                success: succeeded,
                exported_variables: exported,
                execution_time_ms: result.duration_ms,
            }),
        );

        self.stats.completed += 1;
        if succeeded {
            self.stats.successful += 1;
        } else if result.status == RunStatus::Skipped {
            self.stats.skipped += 1;
        } else {
            self.stats.failed += 1;
        }
        self.stats.requests_made = self.perf.len();
        self.stats.total_response_time_ms = self
            .perf
            .snapshot()
            .iter()
            .map(|record| record.duration_ms)
            .sum();

        let level = if succeeded {
            EventLevel::Info
        } else {
            EventLevel::Error
        };
        self.events.emit(
            level,
            EventKind::SuiteCompleted,
            Some(test.node_id.clone()),
            Some(json!({
                "status": result.status,
                "duration_ms": result.duration_ms,
                "success_rate": result.success_rate,
            })),
        );

        let required = self.config.required_suites.contains(&test.node_id);
        let halt = !succeeded && required;
        if halt {
            error!(
                node_id = %test.node_id,
                "Required suite failed; halting execution"
            );
            self.events.emit(
                EventLevel::Error,
                EventKind::RunError,
                Some(test.node_id.clone()),
                Some(json!({ "error": "required suite failed" })),
            );
        }

        results.push(result);
        halt
    }

    /// Monta o job auto-contido de uma suíte (necessário para o spawn
    /// no modo paralelo).
    fn make_job(
        &self,
        test: &DiscoveredSuite,
        documents: &HashMap<String, Result<LoadedSuite, String>>,
    ) -> SuiteJob {
        SuiteJob {
            discovered: test.clone(),
            loaded: documents
                .get(&test.node_id)
                .cloned()
                .unwrap_or_else(|| Err("suite document not loaded".to_string())),
            deps: self.graph.deps_of(&test.node_id),
            registry: Arc::clone(&self.registry),
            events: Arc::clone(&self.events),
            hooks: Arc::clone(&self.hooks),
            http: Arc::clone(&self.http),
            input: Arc::clone(&self.input),
            script: Arc::clone(&self.script),
            faker: Arc::clone(&self.faker),
            perf: Arc::clone(&self.perf),
            limits: self.limits.clone(),
            abort: Arc::clone(&self.abort),
            globals: self.config.globals.clone(),
            env_file: self.config.env_file.clone(),
            suppress_warnings: self.config.suppress_interpolation_warnings,
            interpolation_max_depth: self.config.interpolation_max_depth,
            script_timeout_ms: self.config.script_timeout_ms,
            step_filter: self.config.step_filter.clone(),
            test_root: self.config.test_root.clone(),
        }
    }
}

fn notify(on_stats: Option<&StatsCallback>, stats: &ExecutionStats) {
    if let Some(callback) = on_stats {
        callback(stats);
    }
}

// ============================================================================
// EXECUÇÃO DE UMA SUÍTE
// ============================================================================

/// Tudo que uma suíte precisa para executar de forma auto-contida.
struct SuiteJob {
    discovered: DiscoveredSuite,
    loaded: Result<LoadedSuite, String>,
    deps: Vec<String>,
    registry: SharedRegistry,
    events: Arc<EventStream>,
    hooks: Arc<dyn LifecycleHooks>,
    http: Arc<dyn HttpClient>,
    input: Arc<dyn InputProvider>,
    script: Arc<dyn ScriptEngine>,
    faker: Arc<dyn FakeDataProvider>,
    perf: Arc<PerformanceLog>,
    limits: ExecutionLimits,
    abort: Arc<AtomicBool>,
    globals: HashMap<String, Value>,
    env_file: Option<PathBuf>,
    suppress_warnings: bool,
    interpolation_max_depth: usize,
    script_timeout_ms: u64,
    step_filter: Vec<String>,
    test_root: PathBuf,
}

/// Executa uma suíte do início ao fim, devolvendo o resultado e o
/// escopo runtime final (fonte da publicação de exports).
async fn run_suite(job: SuiteJob) -> (SuiteResult, HashMap<String, Value>) {
    let start = std::time::Instant::now();
    let start_time = Utc::now().to_rfc3339();
    let file_path = job.discovered.file_path.display().to_string();

    let mut result = SuiteResult {
        node_id: job.discovered.node_id.clone(),
        suite_name: job.discovered.suite_name.clone(),
        file_path,
        start_time,
        end_time: Utc::now().to_rfc3339(),
        duration_ms: 0,
        status: RunStatus::Success,
        steps_executed: 0,
        steps_successful: 0,
        steps_failed: 0,
        success_rate: 100.0,
        steps_results: Vec::new(),
        variables_captured: HashMap::new(),
        available_variables: None,
        error_message: None,
        suite_yaml_content: None,
    };

    job.events.emit(
        EventLevel::Info,
        EventKind::SuiteStarted,
        Some(job.discovered.node_id.clone()),
        None,
    );

    // Documento carregado?
    let loaded = match &job.loaded {
        Ok(loaded) => loaded,
        Err(message) => {
            result.status = RunStatus::Failure;
            result.error_message = Some(message.clone());
            result.end_time = Utc::now().to_rfc3339();
            return (result, HashMap::new());
        }
    };
    let doc = &loaded.document;
    result.suite_yaml_content = Some(loaded.raw_content.clone());

    job.hooks.on_suite_start(doc).await;

    // Validação antes de qualquer step.
    if let Err(errors) = validation::validate_suite(doc) {
        let codes: Vec<String> = errors.iter().map(|error| error.code().formatted()).collect();
        let joined = errors
            .iter()
            .map(|error| error.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        job.events.emit(
            EventLevel::Error,
            EventKind::Log,
            Some(doc.node_id.clone()),
            Some(json!({ "validation_codes": codes, "error": joined.clone() })),
        );
        result.status = RunStatus::Failure;
        result.error_message = Some(joined);
        result.end_time = Utc::now().to_rfc3339();
        job.hooks.on_suite_end(doc, &result).await;
        return (result, HashMap::new());
    }

    let limit_check = limits::check_suite(doc, &job.limits);
    if !limit_check.passed {
        let joined = limit_check
            .violations
            .iter()
            .map(|violation| violation.message.clone())
            .collect::<Vec<_>>()
            .join("; ");
        result.status = RunStatus::Failure;
        result.error_message = Some(joined);
        result.end_time = Utc::now().to_rfc3339();
        job.hooks.on_suite_end(doc, &result).await;
        return (result, HashMap::new());
    }

    // Escopos da suíte: frescos por execução (isolamento no paralelo).
    let mut vars = VariableService::with_config(
        &job.globals,
        job.env_file.as_deref(),
        Some(Arc::clone(&job.registry)),
    );
    vars.clear_all_non_global();
    vars.set_suite_variables(&doc.variables);
    vars.set_dependencies(job.deps.clone());

    let interpolator = Arc::new(Interpolator::new(
        Arc::clone(&job.faker),
        Arc::clone(&job.script),
        InterpolationOptions {
            max_depth: job.interpolation_max_depth,
            suppress_warnings: job.suppress_warnings,
            script_timeout_ms: job.script_timeout_ms,
        },
    ));

    // Base URL da suíte: interpolada e religada no cliente HTTP.
    let http = match &doc.base_url {
        Some(template) => {
            let resolved = interpolator.interpolate_template(template, &vars);
            let base = match resolved {
                Value::String(url) => url,
                other => other.to_string(),
            };
            job.http.with_base_url(Some(base))
        }
        None => Arc::clone(&job.http),
    };

    let executor = StepExecutor {
        node_id: doc.node_id.clone(),
        suite_steps: doc.steps.clone(),
        http,
        input: Arc::clone(&job.input),
        script: Arc::clone(&job.script),
        interpolator,
        events: Arc::clone(&job.events),
        hooks: Arc::clone(&job.hooks),
        perf: Arc::clone(&job.perf),
        limits: job.limits.clone(),
        filter: StepFilter::new(&job.step_filter),
        script_timeout_ms: job.script_timeout_ms,
        test_root: job.test_root.clone(),
    };

    let mut used_ids = HashSet::new();
    let mut suite_failed = false;
    let mut halt_reason: Option<String> = None;

    for (index, step) in doc.steps.iter().enumerate() {
        if job.abort.load(Ordering::SeqCst) {
            halt_reason = Some("run aborted".to_string());
            break;
        }
        if suite_failed {
            // Step anterior falhou sem continue_on_failure: os
            // restantes são registrados como skipped.
            let mut skipped = StepResult::shell(&step.name, None, None);
            skipped.status = RunStatus::Skipped;
            result.steps_results.push(skipped);
            continue;
        }

        let step_result = executor
            .execute_step(step, index, &mut vars, &mut used_ids)
            .await;

        if step_result.status == RunStatus::Failure && !step.continue_on_failure {
            suite_failed = true;
        }
        if let Some(captured) = &step_result.captured_variables {
            for (name, value) in captured {
                result
                    .variables_captured
                    .insert(name.clone(), value.clone());
            }
        }
        result.steps_results.push(step_result);
    }

    // Totais e taxa de sucesso (2 casas).
    let executed = result
        .steps_results
        .iter()
        .filter(|step| step.status != RunStatus::Skipped)
        .count();
    let successful = result
        .steps_results
        .iter()
        .filter(|step| step.status == RunStatus::Success)
        .count();
    let failed = result
        .steps_results
        .iter()
        .filter(|step| step.status == RunStatus::Failure)
        .count();

    result.steps_executed = executed;
    result.steps_successful = successful;
    result.steps_failed = failed;
    result.success_rate = if executed == 0 {
        100.0
    } else {
        ((successful as f64 / executed as f64) * 100.0 * 100.0).round() / 100.0
    };
    result.status = if let Some(reason) = halt_reason {
        result.error_message = Some(reason);
        RunStatus::Failure
    } else if suite_failed {
        let fallback = result.error_message.take();
        result.error_message = result
            .steps_results
            .iter()
            .rev()
            .find_map(|step| step.error_message.clone())
            .or(fallback);
        RunStatus::Failure
    } else {
        RunStatus::Success
    };

    // Variáveis disponíveis, sem nomes derivados do ambiente; nomes
    // qualificados só entram quando presentes no registro.
    let env_names: HashSet<String> = vars.by_scope(Scope::Environment).into_keys().collect();
    let mut available = HashMap::new();
    if let Ok(registry) = job.registry.read() {
        for (name, value) in vars.all() {
            if env_names.contains(&name) {
                continue;
            }
            if name.contains('.') && !registry.has_exported(&name) {
                continue;
            }
            available.insert(name, value);
        }
    }
    result.available_variables = Some(available);

    result.duration_ms = start.elapsed().as_millis() as u64;
    result.end_time = Utc::now().to_rfc3339();

    job.hooks.on_suite_end(doc, &result).await;

    let runtime_scope = vars.by_scope(Scope::Runtime);
    (result, runtime_scope)
}

// ============================================================================
// TESTES
// ============================================================================
