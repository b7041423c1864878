//! # Módulo de Configuração do Motor
//!
//! Configuração explícita e enumerada: cada opção reconhecida é um campo
//! tipado, e documentos de configuração com chaves desconhecidas são
//! rejeitados com erro claro em vez de ignorados em silêncio.
//!
//! A construção programática usa o builder (`EngineConfig::builder()`),
//! que valida os valores no `build()`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

/// Modo de execução entre suítes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Uma suíte por vez, na ordem topológica.
    #[default]
    Sequential,
    /// Lotes de até `max_parallel` suítes, respeitando camadas de
    /// dependência entre lotes.
    Parallel,
}

/// Configuração completa do motor de execução.
///
/// `deny_unknown_fields`: uma chave não reconhecida em um documento de
/// configuração é erro de parse, nunca um no-op silencioso.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Raiz dos arquivos de teste; base da resolução de paths absolutos
    /// de dependências.
    pub test_root: PathBuf,

    /// Modo de execução entre suítes.
    pub execution_mode: ExecutionMode,

    /// Máximo de suítes concorrentes no modo paralelo.
    pub max_parallel: usize,

    /// Timeout padrão de requisição, em ms (precedência mais baixa).
    pub request_timeout_ms: u64,

    /// Timeout padrão de scripts pré/pós-step, em ms.
    pub script_timeout_ms: u64,

    /// Cache de resultados de suítes (hits produzem resultado sintético).
    pub cache_enabled: bool,

    /// Suítes cuja falha interrompe o run (fail-fast em requeridas).
    pub required_suites: Vec<String>,

    /// Variáveis do escopo global (configuração).
    pub globals: HashMap<String, Value>,

    /// Arquivo `.env` opcional somado ao ambiente do processo.
    pub env_file: Option<PathBuf>,

    /// Suprime warnings de placeholders não resolvidos.
    pub suppress_interpolation_warnings: bool,

    /// Profundidade máxima de re-interpolação.
    pub interpolation_max_depth: usize,

    /// Capacidade do buffer circular de eventos.
    pub event_buffer_size: usize,

    /// Arquivo JSONL opcional para o log de eventos.
    pub event_log_path: Option<PathBuf>,

    /// Filtro de steps: ids simples ou qualificados (`suite::step`).
    pub step_filter: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            test_root: PathBuf::from("."),
            execution_mode: ExecutionMode::Sequential,
            max_parallel: 5,
            request_timeout_ms: 30_000,
            script_timeout_ms: 5_000,
            cache_enabled: false,
            required_suites: Vec::new(),
            globals: HashMap::new(),
            env_file: None,
            suppress_interpolation_warnings: false,
            interpolation_max_depth: 10,
            event_buffer_size: 500,
            event_log_path: None,
            step_filter: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Novo builder com os defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: EngineConfig::default(),
        }
    }
}

/// Builder de `EngineConfig`. Valida no `build()`.
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn test_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.test_root = root.into();
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.config.execution_mode = mode;
        self
    }

    pub fn max_parallel(mut self, max: usize) -> Self {
        self.config.max_parallel = max;
        self
    }

    pub fn request_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.request_timeout_ms = timeout;
        self
    }

    pub fn script_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.script_timeout_ms = timeout;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    pub fn required_suite(mut self, node_id: impl Into<String>) -> Self {
        self.config.required_suites.push(node_id.into());
        self
    }

    pub fn global(mut self, name: impl Into<String>, value: Value) -> Self {
        self.config.globals.insert(name.into(), value);
        self
    }

    pub fn env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.env_file = Some(path.into());
        self
    }

    pub fn suppress_interpolation_warnings(mut self, suppress: bool) -> Self {
        self.config.suppress_interpolation_warnings = suppress;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_buffer_size = size;
        self
    }

    pub fn event_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.event_log_path = Some(path.into());
        self
    }

    pub fn step_filter(mut self, ids: Vec<String>) -> Self {
        self.config.step_filter = ids;
        self
    }

    /// Valida e devolve a configuração.
    ///
    /// `max_parallel = 0` e buffers vazios são rejeitados aqui para que
    /// nenhum componente precise tratar esses casos degenerados.
    pub fn build(self) -> Result<EngineConfig, String> {
        if self.config.max_parallel == 0 {
            return Err("max_parallel must be at least 1".to_string());
        }
        if self.config.event_buffer_size == 0 {
            return Err("event_buffer_size must be at least 1".to_string());
        }
        if self.config.interpolation_max_depth == 0 {
            return Err("interpolation_max_depth must be at least 1".to_string());
        }
        Ok(self.config)
    }
}
