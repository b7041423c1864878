//! # Módulo do Registro Global de Exports
//!
//! Namespace compartilhado entre suítes: quando uma suíte termina com
//! sucesso, as variáveis declaradas em `exports` são publicadas aqui sob
//! o nome qualificado `node_id.variavel`, e suítes dependentes as leem
//! através do escopo `imported` do serviço de variáveis.
//!
//! ## Estrutura interna:
//!
//! ```text
//! nodes:            node_id → { exports[], variables{}, last_updated }
//! qualified_index:  "node_id.variavel" → node_id   (lookup O(1))
//! ```
//!
//! O índice reverso e o armazenamento primário são mantidos consistentes
//! por toda mutação pública; `validate_integrity` verifica essa relação.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Registro compartilhado entre o orquestrador e os serviços de variáveis
/// das suítes (inclusive em execução paralela).
pub type SharedRegistry = Arc<RwLock<ExportRegistry>>;

/// Cria um registro compartilhado vazio.
pub fn shared() -> SharedRegistry {
    Arc::new(RwLock::new(ExportRegistry::new()))
}

/// Entrada de um nó registrado.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    /// Nome legível da suíte.
    pub suite_name: String,

    /// Exports declarados (obrigatórios + opcionais).
    pub exports: Vec<String>,

    /// Caminho do arquivo de origem, quando conhecido.
    pub file_path: Option<PathBuf>,

    /// Valores efetivamente publicados.
    pub variables: HashMap<String, Value>,

    /// Última publicação neste nó.
    pub last_updated: Option<DateTime<Utc>>,
}

/// Estatísticas do registro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub nodes: usize,
    pub exported_values: usize,
    pub index_entries: usize,
}

/// Snapshot profundo do registro, restaurável via `restore`.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    nodes: HashMap<String, NodeEntry>,
    qualified_index: HashMap<String, String>,
}

/// Registro global de exports entre suítes.
#[derive(Debug, Default)]
pub struct ExportRegistry {
    nodes: HashMap<String, NodeEntry>,
    qualified_index: HashMap<String, String>,
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra um nó e indexa seus exports declarados.
    ///
    /// Registrar novamente o mesmo `node_id` substitui a declaração mas
    /// preserva valores já publicados.
    pub fn register_node(
        &mut self,
        node_id: &str,
        suite_name: &str,
        exports: &[String],
        file_path: Option<PathBuf>,
    ) {
        let existing_vars = self
            .nodes
            .get(node_id)
            .map(|entry| entry.variables.clone())
            .unwrap_or_default();

        for name in exports {
            self.qualified_index
                .insert(format!("{}.{}", node_id, name), node_id.to_string());
        }
        // Valores previamente publicados continuam indexados.
        for name in existing_vars.keys() {
            self.qualified_index
                .insert(format!("{}.{}", node_id, name), node_id.to_string());
        }

        self.nodes.insert(
            node_id.to_string(),
            NodeEntry {
                suite_name: suite_name.to_string(),
                exports: exports.to_vec(),
                file_path,
                variables: existing_vars,
                last_updated: None,
            },
        );

        debug!(node_id = %node_id, exports = exports.len(), "Node registered in export registry");
    }

    /// Publica um valor sob `node_id.name`.
    ///
    /// Publicar um nome fora da lista declarada gera warning mas o valor
    /// é armazenado mesmo assim.
    pub fn set_exported(&mut self, node_id: &str, name: &str, value: Value) {
        let entry = self
            .nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeEntry {
                suite_name: node_id.to_string(),
                exports: Vec::new(),
                file_path: None,
                variables: HashMap::new(),
                last_updated: None,
            });

        if !entry.exports.iter().any(|declared| declared == name) {
            warn!(
                node_id = %node_id,
                variable = %name,
                "Variable exported without declaration; storing anyway"
            );
        }

        entry.variables.insert(name.to_string(), value);
        entry.last_updated = Some(Utc::now());
        self.qualified_index
            .insert(format!("{}.{}", node_id, name), node_id.to_string());
    }

    /// Busca por nome qualificado `node_id.name`.
    pub fn get_exported(&self, qualified: &str) -> Option<Value> {
        let node_id = match self.qualified_index.get(qualified) {
            Some(node_id) => node_id.clone(),
            // Fallback para nomes publicados antes do registro do nó.
            None => qualified.split_once('.')?.0.to_string(),
        };
        let name = qualified.strip_prefix(&format!("{}.", node_id))?;
        self.nodes
            .get(&node_id)
            .and_then(|entry| entry.variables.get(name))
            .cloned()
    }

    /// True quando `node_id.name` tem valor publicado.
    pub fn has_exported(&self, qualified: &str) -> bool {
        self.get_exported(qualified).is_some()
    }

    /// Visão plana de todos os valores publicados, por nome qualificado.
    pub fn all_exported(&self) -> HashMap<String, Value> {
        let mut flat = HashMap::new();
        for (node_id, entry) in &self.nodes {
            for (name, value) in &entry.variables {
                flat.insert(format!("{}.{}", node_id, name), value.clone());
            }
        }
        flat
    }

    /// Valores publicados por uma suíte específica.
    pub fn for_suite(&self, node_id: &str) -> HashMap<String, Value> {
        self.nodes
            .get(node_id)
            .map(|entry| entry.variables.clone())
            .unwrap_or_default()
    }

    /// Exports declarados por uma suíte registrada.
    pub fn declared_exports(&self, node_id: &str) -> Vec<String> {
        self.nodes
            .get(node_id)
            .map(|entry| entry.exports.clone())
            .unwrap_or_default()
    }

    /// Remove um nó e todas as suas entradas de índice, atomicamente.
    pub fn unregister(&mut self, node_id: &str) {
        self.nodes.remove(node_id);
        let prefix = format!("{}.", node_id);
        self.qualified_index
            .retain(|qualified, _| !qualified.starts_with(&prefix));
    }

    /// Limpa os valores publicados de um nó, mantendo a declaração.
    pub fn clear_suite(&mut self, node_id: &str) {
        if let Some(entry) = self.nodes.get_mut(node_id) {
            let declared: Vec<String> = entry.exports.clone();
            entry.variables.clear();
            entry.last_updated = None;
            let prefix = format!("{}.", node_id);
            self.qualified_index.retain(|qualified, _| {
                if !qualified.starts_with(&prefix) {
                    return true;
                }
                // Entradas de exports declarados permanecem.
                declared
                    .iter()
                    .any(|name| qualified == &format!("{}.{}", node_id, name))
            });
        }
    }

    /// Esvazia o registro por completo.
    pub fn clear_all(&mut self) {
        self.nodes.clear();
        self.qualified_index.clear();
    }

    /// Contadores do registro.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            nodes: self.nodes.len(),
            exported_values: self
                .nodes
                .values()
                .map(|entry| entry.variables.len())
                .sum(),
            index_entries: self.qualified_index.len(),
        }
    }

    /// Clone profundo do estado atual.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            nodes: self.nodes.clone(),
            qualified_index: self.qualified_index.clone(),
        }
    }

    /// Restaura um snapshot previamente capturado.
    pub fn restore(&mut self, snapshot: RegistrySnapshot) {
        self.nodes = snapshot.nodes;
        self.qualified_index = snapshot.qualified_index;
    }

    /// Verifica a consistência índice ↔ armazenamento.
    ///
    /// Retorna a lista de inconsistências encontradas (vazia = íntegro).
    pub fn validate_integrity(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for (qualified, node_id) in &self.qualified_index {
            match self.nodes.get(node_id) {
                None => problems.push(format!(
                    "index entry '{}' points to unknown node '{}'",
                    qualified, node_id
                )),
                Some(entry) => {
                    let name = qualified
                        .strip_prefix(&format!("{}.", node_id))
                        .unwrap_or_default();
                    let declared = entry.exports.iter().any(|export| export == name);
                    let stored = entry.variables.contains_key(name);
                    if !declared && !stored {
                        problems.push(format!(
                            "index entry '{}' has neither declaration nor value",
                            qualified
                        ));
                    }
                }
            }
        }

        for (node_id, entry) in &self.nodes {
            for name in entry.variables.keys() {
                let qualified = format!("{}.{}", node_id, name);
                if !self.qualified_index.contains_key(&qualified) {
                    problems.push(format!("stored value '{}' missing from index", qualified));
                }
            }
        }

        problems
    }
}
