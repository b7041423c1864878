//! # Módulo do Serviço de Variáveis
//!
//! Armazena e resolve variáveis em cinco escopos com precedência fixa:
//!
//! ```text
//! runtime → imported → suite → global → environment
//! ```
//!
//! - **runtime**: capturas de steps e bindings de iteração
//! - **imported**: nomes qualificados (`node.variavel`) vindos das
//!   dependências, lidos sob demanda do registro global de exports
//! - **suite**: bloco `variables` do documento da suíte
//! - **global**: configuração do motor
//! - **environment**: ambiente do processo + chaves de um `.env` opcional
//!
//! A precedência é determinística e o ambiente nunca sombreia variáveis
//! de suíte ou de runtime com o mesmo nome.
//!
//! Toda mutação incrementa um contador de geração; o cache de
//! interpolação usa esse contador como parte da chave, então qualquer
//! escrita invalida implicitamente resultados anteriores.

use crate::registry::SharedRegistry;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Escopos reconhecidos, em ordem de precedência decrescente.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Runtime,
    Imported,
    Suite,
    Global,
    Environment,
}

/// Snapshot dos escopos mutáveis, restaurável via `restore`.
///
/// Global e environment não entram: são imutáveis durante um run.
#[derive(Debug, Clone)]
pub struct VariableSnapshot {
    suite: HashMap<String, Value>,
    runtime: HashMap<String, Value>,
    dependencies: HashSet<String>,
}

/// Serviço de variáveis de uma suíte em execução.
#[derive(Debug)]
pub struct VariableService {
    global: HashMap<String, Value>,
    environment: HashMap<String, Value>,
    suite: HashMap<String, Value>,
    runtime: HashMap<String, Value>,
    dependencies: HashSet<String>,
    registry: Option<SharedRegistry>,
    generation: u64,
}

impl VariableService {
    /// Serviço vazio, sem globais nem registro (útil em testes).
    pub fn new() -> Self {
        Self {
            global: HashMap::new(),
            environment: HashMap::new(),
            suite: HashMap::new(),
            runtime: HashMap::new(),
            dependencies: HashSet::new(),
            registry: None,
            generation: 0,
        }
    }

    /// Serviço inicializado com os globais da configuração, o ambiente
    /// do processo (mais `.env` opcional) e o registro compartilhado.
    pub fn with_config(
        globals: &HashMap<String, Value>,
        env_file: Option<&Path>,
        registry: Option<SharedRegistry>,
    ) -> Self {
        let mut service = Self::new();
        service.global = globals.clone();
        service.environment = load_environment(env_file);
        service.registry = registry;
        service
    }

    /// Geração atual; muda a cada mutação de escopo.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    // ========================================================================
    // LEITURA
    // ========================================================================

    /// Resolve um nome pela ordem de precedência. Sem navegação por
    /// pontos aqui: o valor do primeiro escopo que conhecer o nome é
    /// devolvido como está.
    pub fn get(&self, name: &str) -> Option<Value> {
        if name.is_empty() {
            return None;
        }
        if let Some(value) = self.runtime.get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.get_imported(name) {
            return Some(value);
        }
        if let Some(value) = self.suite.get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.global.get(name) {
            return Some(value.clone());
        }
        self.environment.get(name).cloned()
    }

    /// Leitura lazy do escopo imported: apenas nomes qualificados de
    /// dependências declaradas chegam ao registro.
    fn get_imported(&self, name: &str) -> Option<Value> {
        let registry = self.registry.as_ref()?;
        let (node_id, _) = name.split_once('.')?;
        if !self.dependencies.contains(node_id) {
            return None;
        }
        registry.read().ok()?.get_exported(name)
    }

    /// Leitura direta do escopo environment (estratégia `$env.`).
    pub fn environment_value(&self, name: &str) -> Option<Value> {
        self.environment.get(name).cloned()
    }

    /// True quando o nome resolve em algum escopo.
    pub fn has(&self, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        self.get(name).is_some()
    }

    /// Cópia rasa de um escopo nomeado.
    pub fn by_scope(&self, scope: Scope) -> HashMap<String, Value> {
        match scope {
            Scope::Runtime => self.runtime.clone(),
            Scope::Suite => self.suite.clone(),
            Scope::Global => self.global.clone(),
            Scope::Environment => self.environment.clone(),
            Scope::Imported => self.imported_view(),
        }
    }

    /// Materializa a visão do escopo imported a partir do registro.
    fn imported_view(&self) -> HashMap<String, Value> {
        let mut view = HashMap::new();
        if let Some(registry) = &self.registry {
            if let Ok(registry) = registry.read() {
                for node_id in &self.dependencies {
                    for (name, value) in registry.for_suite(node_id) {
                        view.insert(format!("{}.{}", node_id, name), value);
                    }
                }
            }
        }
        view
    }

    /// Visão mesclada de todos os escopos, com a precedência aplicada.
    pub fn all(&self) -> HashMap<String, Value> {
        let mut merged = self.environment.clone();
        for (name, value) in &self.global {
            merged.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.suite {
            merged.insert(name.clone(), value.clone());
        }
        for (name, value) in self.imported_view() {
            merged.insert(name, value);
        }
        for (name, value) in &self.runtime {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    /// Dependências declaradas (node_ids), para leitura do escopo imported.
    pub fn dependencies(&self) -> &HashSet<String> {
        &self.dependencies
    }

    // ========================================================================
    // ESCRITA
    // ========================================================================

    /// Grava uma variável no escopo dado (runtime por padrão nos chamadores).
    pub fn set(&mut self, name: impl Into<String>, value: Value, scope: Scope) {
        let name = name.into();
        match scope {
            Scope::Runtime => {
                self.runtime.insert(name, value);
            }
            Scope::Suite => {
                self.suite.insert(name, value);
            }
            Scope::Global => {
                self.global.insert(name, value);
            }
            Scope::Environment => {
                self.environment.insert(name, value);
            }
            Scope::Imported => {
                warn!(variable = %name, "Imported scope is registry-backed; ignoring direct write");
            }
        }
        self.bump();
    }

    /// Atalho para o escopo runtime.
    pub fn set_runtime(&mut self, name: impl Into<String>, value: Value) {
        self.set(name, value, Scope::Runtime);
    }

    /// Grava várias variáveis de uma vez no mesmo escopo.
    pub fn set_many(&mut self, entries: &HashMap<String, Value>, scope: Scope) {
        for (name, value) in entries {
            self.set(name.clone(), value.clone(), scope);
        }
    }

    /// Substitui o escopo de suíte por completo.
    pub fn set_suite_variables(&mut self, variables: &HashMap<String, Value>) {
        self.suite = variables.clone();
        self.bump();
    }

    /// Atualiza o conjunto de dependências visíveis no escopo imported.
    /// Invalida o cache de interpolação (via geração).
    pub fn set_dependencies(&mut self, node_ids: Vec<String>) {
        self.dependencies = node_ids.into_iter().collect();
        self.bump();
        debug!(count = self.dependencies.len(), "Dependency set updated");
    }

    /// Limpa o escopo runtime.
    pub fn clear_runtime(&mut self) {
        self.runtime.clear();
        self.bump();
    }

    /// Limpa o escopo de suíte.
    pub fn clear_suite(&mut self) {
        self.suite.clear();
        self.bump();
    }

    /// Limpa tudo exceto global e environment.
    pub fn clear_all_non_global(&mut self) {
        self.runtime.clear();
        self.suite.clear();
        self.dependencies.clear();
        self.bump();
    }

    // ========================================================================
    // INTERPOLAÇÃO
    // ========================================================================

    /// Interpola um template contra este serviço com um motor de
    /// interpolação padrão (sem colaboradores de faker/script: esses
    /// placeholders ficam literais). O executor usa um `Interpolator`
    /// completo; este atalho atende leitores avulsos do serviço.
    pub fn interpolate(&self, template: &Value) -> Value {
        use crate::faker::BuiltinFaker;
        use crate::interpolation::{InterpolationOptions, Interpolator};
        use crate::scripting::NullScriptEngine;
        use std::sync::Arc;

        let interpolator = Interpolator::new(
            Arc::new(BuiltinFaker::new()),
            Arc::new(NullScriptEngine),
            InterpolationOptions::default(),
        );
        interpolator.interpolate(template, self)
    }

    // ========================================================================
    // SNAPSHOT / RESTORE
    // ========================================================================

    /// Captura os escopos mutáveis. A restauração é perfeitamente
    /// simétrica: estado pré-snapshot == estado pós-restore.
    pub fn create_snapshot(&self) -> VariableSnapshot {
        VariableSnapshot {
            suite: self.suite.clone(),
            runtime: self.runtime.clone(),
            dependencies: self.dependencies.clone(),
        }
    }

    /// Restaura um snapshot capturado por `create_snapshot`.
    pub fn restore(&mut self, snapshot: VariableSnapshot) {
        self.suite = snapshot.suite;
        self.runtime = snapshot.runtime;
        self.dependencies = snapshot.dependencies;
        self.bump();
    }
}

impl Default for VariableService {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// AMBIENTE
// ============================================================================

/// Ambiente do processo somado às chaves de um `.env` opcional.
/// Em conflito, o ambiente do processo vence.
fn load_environment(env_file: Option<&Path>) -> HashMap<String, Value> {
    let mut environment = HashMap::new();

    if let Some(path) = env_file {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                for line in content.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((key, value)) = line.split_once('=') {
                        let key = key.trim();
                        let value = value.trim().trim_matches('"').trim_matches('\'');
                        if !key.is_empty() {
                            environment
                                .insert(key.to_string(), Value::String(value.to_string()));
                        }
                    }
                }
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Failed to read .env file");
            }
        }
    }

    for (key, value) in std::env::vars() {
        environment.insert(key, Value::String(value));
    }

    environment
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence_runtime_wins() {
        let mut service = VariableService::new();
        service.set("name", json!("env"), Scope::Environment);
        service.set("name", json!("global"), Scope::Global);
        service.set("name", json!("suite"), Scope::Suite);
        service.set("name", json!("runtime"), Scope::Runtime);

        assert_eq!(service.get("name"), Some(json!("runtime")));
    }

    #[test]
    fn test_env_never_shadows_suite_or_runtime() {
        let mut service = VariableService::new();
        service.set("token", json!("from-env"), Scope::Environment);
        service.set("token", json!("from-suite"), Scope::Suite);
        assert_eq!(service.get("token"), Some(json!("from-suite")));

        service.set("token", json!("from-runtime"), Scope::Runtime);
        assert_eq!(service.get("token"), Some(json!("from-runtime")));
    }

    #[test]
    fn test_get_returns_value_as_is_without_navigation() {
        let mut service = VariableService::new();
        service.set_runtime("user", json!({ "name": "ana" }));
        // get não navega em "user.name": o nome inteiro não existe.
        assert_eq!(service.get("user.name"), None);
        assert_eq!(service.get("user"), Some(json!({ "name": "ana" })));
    }

    #[test]
    fn test_has_empty_name_is_false() {
        let service = VariableService::new();
        assert!(!service.has(""));
    }

    #[test]
    fn test_set_many_and_by_scope() {
        let mut service = VariableService::new();
        let entries = HashMap::from([
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(2)),
        ]);
        service.set_many(&entries, Scope::Runtime);

        let runtime = service.by_scope(Scope::Runtime);
        assert_eq!(runtime.len(), 2);
        assert_eq!(runtime["a"], json!(1));
    }

    #[test]
    fn test_set_suite_variables_replaces_scope() {
        let mut service = VariableService::new();
        service.set("old", json!(true), Scope::Suite);
        service.set_suite_variables(&HashMap::from([("new".to_string(), json!(1))]));

        assert_eq!(service.get("old"), None);
        assert_eq!(service.get("new"), Some(json!(1)));
    }

    #[test]
    fn test_clear_all_non_global_preserves_global_and_env() {
        let mut service = VariableService::new();
        service.set("g", json!("global"), Scope::Global);
        service.set("e", json!("env"), Scope::Environment);
        service.set("s", json!("suite"), Scope::Suite);
        service.set("r", json!("runtime"), Scope::Runtime);

        service.clear_all_non_global();

        assert_eq!(service.get("g"), Some(json!("global")));
        assert_eq!(service.get("e"), Some(json!("env")));
        assert_eq!(service.get("s"), None);
        assert_eq!(service.get("r"), None);
    }

    #[test]
    fn test_snapshot_restore_symmetry() {
        let mut service = VariableService::new();
        service.set("keep", json!(1), Scope::Runtime);
        service.set("suite_var", json!("x"), Scope::Suite);
        service.set_dependencies(vec!["auth".to_string()]);

        let before_runtime = service.by_scope(Scope::Runtime);
        let before_suite = service.by_scope(Scope::Suite);
        let snapshot = service.create_snapshot();

        service.set("keep", json!(999), Scope::Runtime);
        service.set("extra", json!(true), Scope::Runtime);
        service.clear_suite();
        service.set_dependencies(vec![]);

        service.restore(snapshot);

        assert_eq!(service.by_scope(Scope::Runtime), before_runtime);
        assert_eq!(service.by_scope(Scope::Suite), before_suite);
        assert!(service.dependencies().contains("auth"));
    }

    #[test]
    fn test_generation_changes_on_every_mutation() {
        let mut service = VariableService::new();
        let g0 = service.generation();
        service.set("a", json!(1), Scope::Runtime);
        let g1 = service.generation();
        assert_ne!(g0, g1);

        service.clear_runtime();
        assert_ne!(g1, service.generation());

        service.set_dependencies(vec!["x".to_string()]);
        assert_ne!(g1, service.generation());
    }

    #[test]
    fn test_imported_scope_reads_registry() {
        let registry = crate::registry::shared();
        {
            let mut guard = registry.write().unwrap();
            guard.register_node("auth", "Auth", &["token".to_string()], None);
            guard.set_exported("auth", "token", json!("abc"));
        }

        let mut service =
            VariableService::with_config(&HashMap::new(), None, Some(registry.clone()));

        // Sem dependência declarada: o nome qualificado não resolve.
        assert_eq!(service.get("auth.token"), None);

        service.set_dependencies(vec!["auth".to_string()]);
        assert_eq!(service.get("auth.token"), Some(json!("abc")));

        let imported = service.by_scope(Scope::Imported);
        assert_eq!(imported["auth.token"], json!("abc"));
    }

    #[test]
    fn test_all_merged_view_applies_precedence() {
        let mut service = VariableService::new();
        service.set("shared", json!("env"), Scope::Environment);
        service.set("shared", json!("runtime"), Scope::Runtime);
        service.set("only_env", json!("e"), Scope::Environment);

        let all = service.all();
        assert_eq!(all["shared"], json!("runtime"));
        assert_eq!(all["only_env"], json!("e"));
    }

    #[test]
    fn test_interpolate_shortcut() {
        let mut service = VariableService::new();
        service.set("name", json!("ana"), Scope::Runtime);
        assert_eq!(
            service.interpolate(&json!("hello {{name}}")),
            json!("hello ana")
        );
        assert_eq!(service.interpolate(&json!({ "user": "{{name}}" })), json!({ "user": "ana" }));
    }

    #[test]
    fn test_env_file_loading() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "API_KEY=\"secret\"").unwrap();
        writeln!(file, "EMPTY_LINE_BELOW=1").unwrap();
        writeln!(file).unwrap();

        let service = VariableService::with_config(&HashMap::new(), Some(file.path()), None);
        assert_eq!(service.get("API_KEY"), Some(json!("secret")));
        assert_eq!(service.get("EMPTY_LINE_BELOW"), Some(json!("1")));
    }
}
