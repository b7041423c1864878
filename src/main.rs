//! # testflow - Motor de Testes de Integração HTTP Declarativos
//!
//! Ponto de entrada do binário. O trabalho de verdade mora nos módulos:
//! aqui fica só o wiring de parse de argumentos, telemetria, carga dos
//! documentos, execução e relatório.
//!
//! ## Exemplo de uso:
//!
//! ```bash
//! # Executa duas suítes em sequência
//! testflow run tests/auth.yaml tests/users.yaml
//!
//! # Paralelo com relatório em arquivo e log de eventos JSONL
//! testflow run tests/*.yaml --parallel --output report.json \
//!     --event-log events.jsonl
//! ```
//!
//! ## Arquitetura:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         main.rs                             │
//! │            (CLI, telemetria, relatório final)               │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            │
//!        ┌───────────────────┼───────────────────────┐
//!        ▼                   ▼                       ▼
//!  ┌──────────┐       ┌──────────────┐        ┌────────────┐
//!  │ loader/  │       │ orchestrator/│        │  events/   │
//!  │ (YAML/   │       │ (grafo, ordem│        │ (stream +  │
//!  │  JSON)   │       │  e execução) │        │  JSONL)    │
//!  └──────────┘       └──────┬───────┘        └────────────┘
//!                            │
//!              ┌─────────────┼─────────────┐
//!              ▼             ▼             ▼
//!        ┌──────────┐  ┌───────────┐ ┌──────────┐
//!        │ executor/│  │ variables/│ │ registry/│
//!        │ (steps)  │  │ + interp. │ │ (exports)│
//!        └──────────┘  └───────────┘ └──────────┘
//! ```

mod assertions;
mod captures;
mod config;
mod errors;
mod events;
mod executor;
mod faker;
mod hooks;
mod http;
mod input;
mod interpolation;
mod limits;
mod loader;
mod orchestrator;
mod perf;
mod protocol;
mod query;
mod registry;
mod resolver;
mod scenarios;
mod scripting;
mod telemetry;
mod validation;
mod variables;

use clap::{Parser, Subcommand};
use config::{EngineConfig, ExecutionMode};
use orchestrator::Orchestrator;
use protocol::{DiscoveredSuite, RunStatus};
use std::path::PathBuf;
use telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "testflow")]
#[command(about = "Declarative HTTP integration test engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Executa um conjunto de suítes de teste.
    Run {
        /// Arquivos de suíte (YAML ou JSON), em qualquer ordem; a ordem
        /// real vem do grafo de dependências.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Executa suítes independentes em paralelo.
        #[arg(long, default_value = "false")]
        parallel: bool,

        /// Máximo de suítes concorrentes no modo paralelo.
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Salva o relatório JSON neste arquivo (senão, stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Grava o stream de eventos em JSONL.
        #[arg(long)]
        event_log: Option<PathBuf>,

        /// Executa apenas os steps listados (id ou suite::id).
        #[arg(long = "step")]
        step_filter: Vec<String>,

        /// Habilita o cache de resultados de suítes.
        #[arg(long, default_value = "false")]
        cache: bool,

        /// Suítes requeridas: falha interrompe o run.
        #[arg(long = "required")]
        required: Vec<String>,

        /// Arquivo .env somado ao ambiente do processo.
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Raiz dos testes (resolução de paths absolutos de deps).
        #[arg(long)]
        test_root: Option<PathBuf>,

        /// Exporta traces OpenTelemetry.
        #[arg(long, default_value = "false")]
        otel: bool,

        /// Endpoint do collector OTLP.
        #[arg(long)]
        otel_endpoint: Option<String>,

        /// Apenas erros no stderr.
        #[arg(long, short = 's', default_value = "false")]
        silent: bool,

        /// Logs detalhados de debug.
        #[arg(long, short = 'v', default_value = "false")]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            files,
            parallel,
            max_parallel,
            output,
            event_log,
            step_filter,
            cache,
            required,
            env_file,
            test_root,
            otel,
            otel_endpoint,
            silent,
            verbose,
        } => {
            let mut telemetry_config = TelemetryConfig::from_env();
            telemetry_config.log_level = if silent {
                Level::ERROR
            } else if verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };
            if otel {
                if let Some(endpoint) = &otel_endpoint {
                    telemetry_config.otlp_endpoint = Some(endpoint.clone());
                } else if telemetry_config.otlp_endpoint.is_none() {
                    telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
                }
            }
            if let Err(error) = init_telemetry(telemetry_config) {
                eprintln!("Warning: failed to initialize telemetry: {}", error);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                    .try_init();
            }

            let exit_code = run(
                files,
                parallel,
                max_parallel,
                output,
                event_log,
                step_filter,
                cache,
                required,
                env_file,
                test_root,
                silent,
            )
            .await;

            shutdown_telemetry();
            std::process::exit(exit_code);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    files: Vec<PathBuf>,
    parallel: bool,
    max_parallel: Option<usize>,
    output: Option<PathBuf>,
    event_log: Option<PathBuf>,
    step_filter: Vec<String>,
    cache: bool,
    required: Vec<String>,
    env_file: Option<PathBuf>,
    test_root: Option<PathBuf>,
    silent: bool,
) -> i32 {
    // Configuração explícita via builder.
    let mut builder = EngineConfig::builder()
        .execution_mode(if parallel {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        })
        .cache_enabled(cache)
        .step_filter(step_filter);
    if let Some(max) = max_parallel {
        builder = builder.max_parallel(max);
    }
    if let Some(root) = test_root {
        builder = builder.test_root(root);
    }
    if let Some(env_file) = env_file {
        builder = builder.env_file(env_file);
    }
    for node_id in required {
        builder = builder.required_suite(node_id);
    }
    if let Some(path) = &event_log {
        builder = builder.event_log_path(path.clone());
    }

    let config = match builder.build() {
        Ok(config) => config,
        Err(message) => {
            error!(error = %message, "Invalid configuration");
            return 1;
        }
    };

    // Carrega e registra cada documento informado.
    let mut orchestrator = Orchestrator::new(config);
    let mut tests: Vec<DiscoveredSuite> = Vec::new();
    for file in &files {
        match loader::load_suite_from_file(file) {
            Ok(loaded) => {
                let discovered = loader::discovered_from_loaded(&loaded, file);
                orchestrator.preload(discovered.node_id.clone(), loaded);
                tests.push(discovered);
            }
            Err(load_error) => {
                error!(file = %file.display(), error = %load_error, "Failed to load suite");
                return 1;
            }
        }
    }

    if !silent {
        info!(suites = tests.len(), "Suites loaded");
    }

    // Log de eventos JSONL opcional.
    let writer = event_log
        .as_ref()
        .map(|path| events::spawn_jsonl_writer(&orchestrator.events(), path.clone()));

    let progress = |stats: &protocol::ExecutionStats| {
        if let Some(current) = &stats.current_test {
            info!(
                current = %current,
                completed = stats.completed,
                failed = stats.failed,
                "Progress"
            );
        }
    };
    let on_stats: Option<&orchestrator::StatsCallback> =
        if silent { None } else { Some(&progress) };

    let results = match orchestrator.execute_tests(tests, on_stats).await {
        Ok(results) => results,
        Err(engine_error) => {
            error!(code = %engine_error.code(), error = %engine_error, "Run aborted");
            return 1;
        }
    };

    if let Some(handle) = writer {
        // O stream vive no orquestrador; dá um instante para o flush.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();
    }

    // Relatório final.
    let all_ok = results
        .iter()
        .all(|result| result.status != RunStatus::Failure);
    let report = serde_json::json!({
        "suites": results,
        "performance": orchestrator.perf().snapshot(),
    });

    match output {
        Some(path) => match serde_json::to_string_pretty(&report) {
            Ok(rendered) => {
                if let Err(write_error) = std::fs::write(&path, rendered) {
                    error!(path = %path.display(), error = %write_error, "Failed to write report");
                    return 1;
                }
                if !silent {
                    info!(path = %path.display(), "Report saved");
                }
            }
            Err(serialize_error) => {
                error!(error = %serialize_error, "Failed to serialize report");
                return 1;
            }
        },
        None => {
            if !silent {
                match serde_json::to_string_pretty(&report) {
                    Ok(rendered) => println!("{}", rendered),
                    Err(serialize_error) => {
                        error!(error = %serialize_error, "Failed to serialize report");
                        return 1;
                    }
                }
            }
        }
    }

    if all_ok {
        0
    } else {
        1
    }
}
