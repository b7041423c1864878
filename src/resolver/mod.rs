//! # Módulo de Resolução de Dependências
//!
//! Constrói o grafo de dependências entre suítes, detecta ciclos,
//! produz a ordem topológica de execução e mantém o cache de resultados
//! por nó.
//!
//! ## Arena de nós
//!
//! O grafo é uma arena: nós vivem em um `Vec`, arestas são conjuntos de
//! índices. Sem ponteiros cíclicos, sem ambiguidade de ownership, e um
//! snapshot é uma cópia do vetor.
//!
//! ## Ordem de resolução de uma dependência
//!
//! 1. **Match exato** de `node_id`
//! 2. **Resolução por path**: `path_type = absolute` resolve contra a
//!    raiz de testes configurada; relativo resolve contra o diretório
//!    da suíte de origem e contra o cwd do processo; os caminhos são
//!    normalizados e comparados com o caminho de cada nó
//! 3. **Heurística de basename**: remove os sufixos `-flow`, `-test`,
//!    `-spec` (nesta ordem), normaliza `_` e `.` para `-` e compara
//!    basenames (um match por heurística gera log de debug)
//! 4. **Substring** sobre os node_ids
//!
//! Dependências sem resolução geram **warning** e nunca abortam o build;
//! ciclos são erro duro na ordenação.

use crate::errors::EngineError;
use crate::protocol::{DiscoveredSuite, PathKind};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// TIPOS
// ============================================================================

/// Nó da arena.
#[derive(Debug, Clone)]
struct GraphNode {
    node_id: String,
    file_path: PathBuf,
    deps: BTreeSet<usize>,
    dependents: BTreeSet<usize>,
    resolved: bool,
    executing: bool,
}

/// Resultado cacheado de uma suíte bem-sucedida.
#[derive(Debug, Clone)]
pub struct CachedResult {
    pub success: bool,
    pub exported_variables: HashMap<String, Value>,
    pub execution_time_ms: u64,
}

/// Estatísticas do grafo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStats {
    pub total: usize,
    pub with_deps: usize,
    pub with_dependents: usize,
    pub max_depth: usize,
    pub total_edges: usize,
}

/// Grafo de dependências com cache de resultados.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    cache: HashMap<String, CachedResult>,
    cache_enabled: bool,
    test_root: PathBuf,
}

impl DependencyGraph {
    pub fn new(test_root: PathBuf) -> Self {
        Self {
            test_root,
            ..Self::default()
        }
    }

    // ========================================================================
    // BUILD
    // ========================================================================

    /// Ingere o conjunto descoberto: limpa o grafo anterior, cria um nó
    /// por `node_id` e conecta as arestas em uma segunda passada.
    ///
    /// Referências resolvidas têm o `node_id` reescrito in place para a
    /// forma canônica, para que leituras posteriores não repitam a
    /// heurística. Nunca lança por dependência ausente.
    pub fn build(&mut self, tests: &mut [DiscoveredSuite]) {
        self.nodes.clear();
        self.index.clear();

        // Primeira passada: um nó por suíte.
        for test in tests.iter() {
            if self.index.contains_key(&test.node_id) {
                warn!(node_id = %test.node_id, "Duplicate node_id; keeping the first occurrence");
                continue;
            }
            let idx = self.nodes.len();
            self.nodes.push(GraphNode {
                node_id: test.node_id.clone(),
                file_path: test.file_path.clone(),
                deps: BTreeSet::new(),
                dependents: BTreeSet::new(),
                resolved: false,
                executing: false,
            });
            self.index.insert(test.node_id.clone(), idx);
        }

        // Segunda passada: arestas.
        for test in tests.iter_mut() {
            let Some(&from) = self.index.get(&test.node_id) else {
                continue;
            };
            for dep in &mut test.depends {
                match self.resolve_reference(dep.node_id.as_deref(), dep.path.as_deref(), dep.path_type, &self.nodes[from].file_path) {
                    Some(target) => {
                        if target == from {
                            // Auto-dependência entra como aresta e cai na
                            // detecção de ciclos.
                            debug!(node_id = %test.node_id, "Self-dependency declared");
                        }
                        let canonical = self.nodes[target].node_id.clone();
                        dep.node_id = Some(canonical);
                        self.nodes[from].deps.insert(target);
                        self.nodes[target].dependents.insert(from);
                    }
                    None => {
                        warn!(
                            code = %crate::errors::ErrorCode::UNRESOLVED_DEPENDENCY,
                            node_id = %test.node_id,
                            dep_node_id = ?dep.node_id,
                            dep_path = ?dep.path,
                            "Dependency did not resolve to any discovered node"
                        );
                    }
                }
            }
        }

        info!(
            nodes = self.nodes.len(),
            edges = self.total_edges(),
            "Dependency graph built"
        );
    }

    /// Resolve uma referência pela ordem documentada.
    fn resolve_reference(
        &self,
        node_id: Option<&str>,
        path: Option<&str>,
        path_type: PathKind,
        source_file: &Path,
    ) -> Option<usize> {
        // (i) match exato de node_id.
        if let Some(id) = node_id {
            if let Some(&idx) = self.index.get(id) {
                return Some(idx);
            }
        }

        // (ii) resolução por path.
        if let Some(raw_path) = path {
            let mut candidates: Vec<PathBuf> = Vec::new();
            match path_type {
                PathKind::Absolute => {
                    candidates.push(self.test_root.join(raw_path));
                }
                PathKind::Relative => {
                    if let Some(dir) = source_file.parent() {
                        candidates.push(dir.join(raw_path));
                    }
                    if let Ok(cwd) = std::env::current_dir() {
                        candidates.push(cwd.join(raw_path));
                    }
                }
            }

            for candidate in candidates {
                let normalized = normalize_path(&candidate);
                let mut matches = self.nodes.iter().enumerate().filter(|(_, node)| {
                    let node_path = normalize_path(&node.file_path);
                    node_path == normalized
                        || node_path.ends_with(&normalized)
                        || normalized.ends_with(&node_path)
                });
                if let Some((idx, node)) = matches.next() {
                    if matches.next().is_some() {
                        info!(
                            path = %raw_path,
                            chosen = %node.node_id,
                            "Path matched multiple nodes; picking the first normalized match"
                        );
                    }
                    return Some(idx);
                }
            }
        }

        // (iii) heurística de basename com remoção de sufixos.
        let hint = path
            .map(|p| {
                Path::new(p)
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or(p)
                    .to_string()
            })
            .or_else(|| node_id.map(str::to_string));

        if let Some(hint) = hint {
            let wanted = normalize_basename(&hint);
            for (idx, node) in self.nodes.iter().enumerate() {
                let node_stem = node
                    .file_path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or(&node.node_id);
                if normalize_basename(node_stem) == wanted
                    || normalize_basename(&node.node_id) == wanted
                {
                    debug!(
                        hint = %hint,
                        resolved = %node.node_id,
                        "Dependency resolved by filename heuristic"
                    );
                    return Some(idx);
                }
            }

            // (iv) substring sobre os node_ids.
            if let Some((idx, node)) = self
                .nodes
                .iter()
                .enumerate()
                .find(|(_, node)| node.node_id.contains(hint.as_str()))
            {
                debug!(
                    hint = %hint,
                    resolved = %node.node_id,
                    "Dependency resolved by node_id substring"
                );
                return Some(idx);
            }
        }

        None
    }

    // ========================================================================
    // CICLOS E ORDENAÇÃO
    // ========================================================================

    /// Detecta ciclos com marcação em três cores. Lista vazia = DAG.
    /// Cada ciclo vem como caminho legível unido por `→`.
    pub fn detect_cycles(&self) -> Vec<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors = vec![Color::White; self.nodes.len()];
        let mut cycles = Vec::new();

        fn visit(
            graph: &DependencyGraph,
            idx: usize,
            colors: &mut [Color],
            stack: &mut Vec<usize>,
            cycles: &mut Vec<String>,
        ) {
            colors[idx] = Color::Gray;
            stack.push(idx);

            for &dep in &graph.nodes[idx].deps {
                match colors[dep] {
                    Color::White => visit(graph, dep, colors, stack, cycles),
                    Color::Gray => {
                        // Ciclo: do ponto em que `dep` entrou na pilha até o topo.
                        let start = stack
                            .iter()
                            .position(|&on_stack| on_stack == dep)
                            .unwrap_or(0);
                        let mut path: Vec<&str> = stack[start..]
                            .iter()
                            .map(|&i| graph.nodes[i].node_id.as_str())
                            .collect();
                        path.push(graph.nodes[dep].node_id.as_str());
                        cycles.push(path.join(" → "));
                    }
                    Color::Black => {}
                }
            }

            stack.pop();
            colors[idx] = Color::Black;
        }

        let mut stack = Vec::new();
        for idx in 0..self.nodes.len() {
            if colors[idx] == Color::White {
                visit(self, idx, &mut colors, &mut stack, &mut cycles);
            }
        }

        cycles
    }

    /// Ordenação topológica por busca em profundidade: toda suíte vem
    /// depois de todas as suas dependências. Ciclos são erro duro.
    pub fn execution_order(
        &self,
        tests: &[DiscoveredSuite],
    ) -> Result<Vec<DiscoveredSuite>, EngineError> {
        let cycles = self.detect_cycles();
        if !cycles.is_empty() {
            return Err(EngineError::CircularDependency {
                cycles: cycles.join("; "),
            });
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut order_indexes = Vec::with_capacity(self.nodes.len());

        fn visit(
            graph: &DependencyGraph,
            idx: usize,
            visited: &mut [bool],
            order: &mut Vec<usize>,
        ) {
            if visited[idx] {
                return;
            }
            visited[idx] = true;
            for &dep in &graph.nodes[idx].deps {
                visit(graph, dep, visited, order);
            }
            order.push(idx);
        }

        // Ordem de entrada preservada para nós independentes.
        for test in tests {
            if let Some(&idx) = self.index.get(&test.node_id) {
                visit(self, idx, &mut visited, &mut order_indexes);
            }
        }

        let by_id: HashMap<&str, &DiscoveredSuite> = tests
            .iter()
            .map(|test| (test.node_id.as_str(), test))
            .collect();

        Ok(order_indexes
            .into_iter()
            .filter_map(|idx| by_id.get(self.nodes[idx].node_id.as_str()).map(|t| (*t).clone()))
            .collect())
    }

    /// Profundidade de um nó: 0 para folhas (sem deps), senão
    /// 1 + max(profundidade das deps). Usada para formar as camadas do
    /// modo paralelo e para as estatísticas.
    pub fn depth_of(&self, node_id: &str) -> usize {
        fn depth(
            graph: &DependencyGraph,
            idx: usize,
            memo: &mut HashMap<usize, usize>,
            visiting: &mut BTreeSet<usize>,
        ) -> usize {
            if let Some(&known) = memo.get(&idx) {
                return known;
            }
            // Guarda contra ciclos: nó revisitado conta como 0.
            if !visiting.insert(idx) {
                return 0;
            }
            let value = graph.nodes[idx]
                .deps
                .iter()
                .map(|&dep| depth(graph, dep, memo, visiting) + 1)
                .max()
                .unwrap_or(0);
            visiting.remove(&idx);
            memo.insert(idx, value);
            value
        }

        let Some(&idx) = self.index.get(node_id) else {
            return 0;
        };
        let mut memo = HashMap::new();
        let mut visiting = BTreeSet::new();
        depth(self, idx, &mut memo, &mut visiting)
    }

    // ========================================================================
    // ESTADO DE EXECUÇÃO
    // ========================================================================

    /// True quando todas as dependências diretas estão resolvidas.
    pub fn can_execute(&self, node_id: &str) -> bool {
        match self.index.get(node_id) {
            Some(&idx) => self.nodes[idx]
                .deps
                .iter()
                .all(|&dep| self.nodes[dep].resolved),
            None => false,
        }
    }

    pub fn mark_executing(&mut self, node_id: &str) {
        if let Some(&idx) = self.index.get(node_id) {
            self.nodes[idx].executing = true;
        }
    }

    /// Marca o nó como resolvido. Com cache habilitado e resultado de
    /// sucesso, o resultado fica guardado para hits futuros.
    pub fn mark_resolved(&mut self, node_id: &str, result: Option<CachedResult>) {
        if let Some(&idx) = self.index.get(node_id) {
            self.nodes[idx].resolved = true;
            self.nodes[idx].executing = false;
        }
        if self.cache_enabled {
            if let Some(result) = result {
                if result.success {
                    self.cache.insert(node_id.to_string(), result);
                }
            }
        }
    }

    pub fn get_cached(&self, node_id: &str) -> Option<&CachedResult> {
        if !self.cache_enabled {
            return None;
        }
        self.cache.get(node_id)
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Volta todos os nós para pendente sem derrubar o grafo.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.resolved = false;
            node.executing = false;
        }
    }

    /// Descarta o grafo (o cache tem ciclo de vida próprio).
    pub fn clear_graph(&mut self) {
        self.nodes.clear();
        self.index.clear();
    }

    fn total_edges(&self) -> usize {
        self.nodes.iter().map(|node| node.deps.len()).sum()
    }

    /// Estatísticas do grafo corrente.
    pub fn stats(&self) -> GraphStats {
        let max_depth = self
            .nodes
            .iter()
            .map(|node| self.depth_of(&node.node_id))
            .max()
            .unwrap_or(0);
        GraphStats {
            total: self.nodes.len(),
            with_deps: self.nodes.iter().filter(|node| !node.deps.is_empty()).count(),
            with_dependents: self
                .nodes
                .iter()
                .filter(|node| !node.dependents.is_empty())
                .count(),
            max_depth,
            total_edges: self.total_edges(),
        }
    }

    /// Dependências diretas canônicas de um nó.
    pub fn deps_of(&self, node_id: &str) -> Vec<String> {
        match self.index.get(node_id) {
            Some(&idx) => self.nodes[idx]
                .deps
                .iter()
                .map(|&dep| self.nodes[dep].node_id.clone())
                .collect(),
            None => Vec::new(),
        }
    }
}

// ============================================================================
// NORMALIZAÇÃO DE CAMINHOS
// ============================================================================

/// Normalização lexical: remove `.` e resolve `..` sem tocar o
/// filesystem (os arquivos podem nem existir durante o build do grafo).
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Normalização de basename para a heurística: sufixos `-flow`,
/// `-test`, `-spec` removidos nesta ordem; `_` e `.` viram `-`.
fn normalize_basename(name: &str) -> String {
    let mut base = name.to_ascii_lowercase().replace(['_', '.'], "-");
    for suffix in ["-flow", "-test", "-spec"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped.to_string();
        }
    }
    base
}

// ============================================================================
// TESTES
// ============================================================================
