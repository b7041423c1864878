//! # Módulo de Interpolação - Resolução de Templates
//!
//! Resolve placeholders `{{…}}` em strings, objetos e arrays, despachando
//! cada expressão para uma estratégia conforme o token inicial:
//!
//! | Prefixo            | Estratégia                                        |
//! |--------------------|---------------------------------------------------|
//! | `$env.NOME`        | Ambiente do processo (+ `.env`). Maior prioridade |
//! | `$faker.X`/`faker.X` | Colaborador de dados falsos                     |
//! | `$js:EXPR`/`js:EXPR` | Expressão única via colaborador de script       |
//! | `$js.BLOCO`        | Bloco multi-linha (`return` obrigatório)          |
//! | qualquer outro     | Caminho de variável: nome resolvido por escopo,   |
//! |                    | segmentos restantes navegam no valor              |
//!
//! ## Comportamentos de template:
//!
//! - Template que é **exatamente** um placeholder preserva o tipo do
//!   valor resolvido (objeto, array, número, bool, null).
//! - Template misto sempre stringifica os valores resolvidos.
//! - `$env` ausente → `null` (placeholder único) ou substituição vazia
//!   (template misto).
//! - Variável ausente → placeholder fica literal e um warning é emitido
//!   (a menos que suprimido).
//! - Erros de estratégia são isolados por placeholder: um `$faker`
//!   desconhecido nunca derruba o step inteiro.
//! - Cadeias de template auto-referentes viram `"[Circular Reference]"`;
//!   `max_depth` limita a re-interpolação de valores resolvidos.
//!
//! O cache é chaveado por (digest do template, geração do serviço de
//! variáveis): qualquer mutação de escopo muda a geração e invalida
//! implicitamente tudo. Templates com `js`/`faker` nunca são cacheados.

use crate::errors::ErrorCode;
use crate::faker::FakeDataProvider;
use crate::query;
use crate::scripting::{ScriptContext, ScriptEngine};
use crate::variables::VariableService;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid placeholder regex"));

/// Sentinela para cadeias de resolução auto-referentes.
pub const CIRCULAR_SENTINEL: &str = "[Circular Reference]";

/// Limite de entradas do cache antes de um clear integral.
const CACHE_CAPACITY: usize = 1024;

/// Opções de interpolação.
#[derive(Debug, Clone)]
pub struct InterpolationOptions {
    /// Profundidade máxima de re-interpolação de valores resolvidos.
    pub max_depth: usize,

    /// Suprime warnings de placeholders não resolvidos.
    pub suppress_warnings: bool,

    /// Timeout repassado ao colaborador de script.
    pub script_timeout_ms: u64,
}

impl Default for InterpolationOptions {
    fn default() -> Self {
        Self {
            max_depth: 10,
            suppress_warnings: false,
            script_timeout_ms: 5_000,
        }
    }
}

/// Resultado interno da resolução de um placeholder.
enum Resolution {
    /// Valor resolvido.
    Value(Value),
    /// Deixar o placeholder literal no template.
    Literal,
    /// `$env` ausente: null em placeholder único, vazio em template misto.
    EmptyEnv,
}

/// Motor de interpolação. Um por suíte em execução; o serviço de
/// variáveis é passado por chamada para que snapshots de iteração
/// enxerguem sempre o estado corrente.
pub struct Interpolator {
    faker: Arc<dyn FakeDataProvider>,
    script: Arc<dyn ScriptEngine>,
    options: InterpolationOptions,
    cache: Mutex<HashMap<(String, u64), Value>>,
}

impl Interpolator {
    pub fn new(
        faker: Arc<dyn FakeDataProvider>,
        script: Arc<dyn ScriptEngine>,
        options: InterpolationOptions,
    ) -> Self {
        Self {
            faker,
            script,
            options,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Limpa o cache explicitamente (as gerações já invalidam de forma
    /// implícita; isto existe para liberar memória entre suítes).
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    // ========================================================================
    // ENTRADA PRINCIPAL
    // ========================================================================

    /// Interpola recursivamente um valor JSON: strings resolvem
    /// placeholders, objetos e arrays descem na estrutura, escalares
    /// passam intactos.
    pub fn interpolate(&self, input: &Value, vars: &VariableService) -> Value {
        match input {
            Value::String(template) => self.interpolate_template(template, vars),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.interpolate(item, vars))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), self.interpolate(value, vars));
                }
                Value::Object(resolved)
            }
            scalar => scalar.clone(),
        }
    }

    /// Interpola um template string. Preserva o tipo quando o template
    /// é exatamente um placeholder.
    pub fn interpolate_template(&self, template: &str, vars: &VariableService) -> Value {
        let cacheable = !PLACEHOLDER_RE.is_match(template) || is_deterministic(template);

        if cacheable {
            let key = (template_digest(template), vars.generation());
            if let Ok(cache) = self.cache.lock() {
                if let Some(hit) = cache.get(&key) {
                    return hit.clone();
                }
            }
            let resolved = self.resolve_template(template, vars, 0, &mut Vec::new());
            if let Ok(mut cache) = self.cache.lock() {
                if cache.len() >= CACHE_CAPACITY {
                    cache.clear();
                }
                cache.insert(key, resolved.clone());
            }
            resolved
        } else {
            self.resolve_template(template, vars, 0, &mut Vec::new())
        }
    }

    // ========================================================================
    // RESOLUÇÃO
    // ========================================================================

    fn resolve_template(
        &self,
        template: &str,
        vars: &VariableService,
        depth: usize,
        resolving: &mut Vec<String>,
    ) -> Value {
        if depth >= self.options.max_depth {
            if !self.options.suppress_warnings {
                warn!(
                    code = %ErrorCode::MAX_DEPTH_EXCEEDED,
                    template = %template,
                    max_depth = self.options.max_depth,
                    "Interpolation depth exceeded; leaving remaining placeholders literal"
                );
            }
            return Value::String(template.to_string());
        }

        // Placeholder único: preserva o tipo do valor resolvido.
        if let Some(expression) = single_placeholder(template) {
            return match self.resolve_expression(expression, vars, depth, resolving) {
                Resolution::Value(value) => value,
                Resolution::EmptyEnv => Value::Null,
                Resolution::Literal => Value::String(template.to_string()),
            };
        }

        if !PLACEHOLDER_RE.is_match(template) {
            return Value::String(template.to_string());
        }

        // Template misto: tudo vira string.
        let mut output = String::new();
        let mut cursor = 0;
        for capture in PLACEHOLDER_RE.captures_iter(template) {
            let whole = capture.get(0).expect("capture group 0 always present");
            let expression = capture.get(1).expect("capture group 1 always present");
            output.push_str(&template[cursor..whole.start()]);

            match self.resolve_expression(expression.as_str(), vars, depth, resolving) {
                Resolution::Value(value) => output.push_str(&stringify(&value)),
                Resolution::EmptyEnv => {}
                Resolution::Literal => output.push_str(whole.as_str()),
            }
            cursor = whole.end();
        }
        output.push_str(&template[cursor..]);
        Value::String(output)
    }

    /// Despacho de estratégia sobre a expressão de um placeholder.
    fn resolve_expression(
        &self,
        raw: &str,
        vars: &VariableService,
        depth: usize,
        resolving: &mut Vec<String>,
    ) -> Resolution {
        let expression = raw.trim();

        if let Some(name) = expression.strip_prefix("$env.") {
            return match vars.environment_value(name.trim()) {
                Some(value) => Resolution::Value(value),
                None => {
                    if !self.options.suppress_warnings {
                        warn!(variable = %name, "Environment variable not set");
                    }
                    Resolution::EmptyEnv
                }
            };
        }

        if let Some(fake_expr) = expression
            .strip_prefix("$faker.")
            .or_else(|| expression.strip_prefix("faker."))
        {
            return match self.faker.parse(fake_expr) {
                Ok(value) => Resolution::Value(value),
                Err(error) => {
                    if !self.options.suppress_warnings {
                        warn!(
                            code = %ErrorCode::STRATEGY_FAILURE,
                            expression = %fake_expr,
                            error = %error,
                            "Fake-data expression failed"
                        );
                    }
                    Resolution::Literal
                }
            };
        }

        // Bloco multi-linha vem antes da expressão: "$js." também casa
        // com o começo de "$js:..." apenas se testado na ordem errada.
        if let Some(code) = expression.strip_prefix("$js.") {
            return self.run_script(code, vars, true);
        }
        if let Some(code) = expression
            .strip_prefix("$js:")
            .or_else(|| expression.strip_prefix("js:"))
        {
            return self.run_script(code, vars, false);
        }

        self.resolve_variable_path(expression, vars, depth, resolving)
    }

    fn run_script(&self, code: &str, vars: &VariableService, is_block: bool) -> Resolution {
        let mut ctx = ScriptContext::new(vars.all());
        match self
            .script
            .execute(code, &mut ctx, is_block, self.options.script_timeout_ms)
        {
            Ok(value) => Resolution::Value(value),
            Err(error) => {
                if !self.options.suppress_warnings {
                    warn!(error = %error, "Script placeholder failed; leaving literal");
                }
                Resolution::Literal
            }
        }
    }

    /// Caminho de variável: tenta o nome mais longo primeiro (para nomes
    /// qualificados como `auth.token`), depois navega os segmentos
    /// restantes com `.`/`[n]`, com fallback JMESPath para caudas
    /// complexas.
    fn resolve_variable_path(
        &self,
        expression: &str,
        vars: &VariableService,
        depth: usize,
        resolving: &mut Vec<String>,
    ) -> Resolution {
        if resolving.iter().any(|seen| seen == expression) {
            debug!(expression = %expression, "Self-referential template chain");
            return Resolution::Value(Value::String(CIRCULAR_SENTINEL.to_string()));
        }

        let segments = split_path(expression);
        for take in (1..=segments.len()).rev() {
            let candidate = segments[..take].join(".");
            let Some(root) = vars.get(&candidate) else {
                continue;
            };

            let mut value = root;
            let remainder = &segments[take..];
            if !remainder.is_empty() {
                match navigate(&value, remainder) {
                    Some(navigated) => value = navigated,
                    None => {
                        // Fallback: a cauda pode ser JMESPath (filtros,
                        // projeções) em vez de navegação simples.
                        let tail = remainder.join(".");
                        match query::search(&tail, &value) {
                            Ok(found) if !found.is_null() => value = found,
                            _ => {
                                self.warn_unresolved(expression);
                                return Resolution::Literal;
                            }
                        }
                    }
                }
            }

            return self.finish_variable_value(value, expression, vars, depth, resolving);
        }

        // Nenhum prefixo pontilhado resolveu: se o identificador inicial
        // é uma variável, a expressão inteira é tratada como JMESPath
        // sobre ela (`items[?active].id | [0]`).
        if let Some(identifier) = leading_identifier(expression) {
            if identifier.len() < expression.len() {
                if let Some(root) = vars.get(identifier) {
                    let mut scoped = Map::new();
                    scoped.insert(identifier.to_string(), root);
                    let scoped = Value::Object(scoped);
                    if let Ok(found) = query::search(expression, &scoped) {
                        if !found.is_null() {
                            return self.finish_variable_value(
                                found, expression, vars, depth, resolving,
                            );
                        }
                    }
                }
            }
        }

        self.warn_unresolved(expression);
        Resolution::Literal
    }

    /// Pós-processamento comum: valores string podem conter novos
    /// placeholders e passam por re-interpolação limitada por `max_depth`.
    fn finish_variable_value(
        &self,
        value: Value,
        expression: &str,
        vars: &VariableService,
        depth: usize,
        resolving: &mut Vec<String>,
    ) -> Resolution {
        if let Value::String(inner) = &value {
            if PLACEHOLDER_RE.is_match(inner) {
                resolving.push(expression.to_string());
                let resolved = self.resolve_template(inner, vars, depth + 1, resolving);
                resolving.pop();
                return Resolution::Value(resolved);
            }
        }
        Resolution::Value(value)
    }

    fn warn_unresolved(&self, expression: &str) {
        if !self.options.suppress_warnings {
            warn!(
                code = %ErrorCode::UNRESOLVED_PLACEHOLDER,
                expression = %expression,
                "Unresolved placeholder; leaving literal"
            );
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Se o template inteiro é um único placeholder, devolve sua expressão.
fn single_placeholder(template: &str) -> Option<&str> {
    let captures = PLACEHOLDER_RE.captures(template)?;
    let whole = captures.get(0)?;
    if whole.start() == 0 && whole.end() == template.len() {
        Some(captures.get(1)?.as_str())
    } else {
        None
    }
}

/// Forma string de um valor resolvido em template misto.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Identificador inicial de uma expressão: letras, dígitos, `_` e `-`.
fn leading_identifier(expression: &str) -> Option<&str> {
    let end = expression
        .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_' && ch != '-')
        .unwrap_or(expression.len());
    if end == 0 {
        None
    } else {
        Some(&expression[..end])
    }
}

/// Divide um caminho em segmentos, mantendo índices junto ao segmento
/// (`items[0]` é um segmento só).
fn split_path(expression: &str) -> Vec<String> {
    expression
        .split('.')
        .map(|segment| segment.to_string())
        .collect()
}

/// Navegação simples por segmentos `chave` e `chave[n]`.
fn navigate(value: &Value, segments: &[String]) -> Option<Value> {
    let mut current = value.clone();
    for segment in segments {
        let (key, indexes) = parse_segment(segment)?;
        if !key.is_empty() {
            current = current.get(key)?.clone();
        }
        for index in indexes {
            current = current.get(index)?.clone();
        }
    }
    Some(current)
}

/// Separa `chave[1][2]` em ("chave", [1, 2]). Sintaxe inválida → None.
fn parse_segment(segment: &str) -> Option<(&str, Vec<usize>)> {
    match segment.find('[') {
        None => Some((segment, Vec::new())),
        Some(open) => {
            let key = &segment[..open];
            let mut indexes = Vec::new();
            let mut rest = &segment[open..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']')?;
                let index: usize = stripped[..close].parse().ok()?;
                indexes.push(index);
                rest = &stripped[close + 1..];
            }
            if rest.is_empty() {
                Some((key, indexes))
            } else {
                None
            }
        }
    }
}

/// True quando nenhum placeholder do template usa estratégia
/// não determinística (faker/js).
fn is_deterministic(template: &str) -> bool {
    for capture in PLACEHOLDER_RE.captures_iter(template) {
        let expr = capture
            .get(1)
            .expect("capture group 1 always present")
            .as_str()
            .trim();
        if expr.starts_with("$faker.")
            || expr.starts_with("faker.")
            || expr.starts_with("$js")
            || expr.starts_with("js:")
        {
            return false;
        }
    }
    true
}

fn template_digest(template: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faker::BuiltinFaker;
    use crate::scripting::NullScriptEngine;
    use crate::variables::Scope;
    use anyhow::Result;
    use serde_json::json;
    use std::collections::HashMap;

    fn interpolator() -> Interpolator {
        Interpolator::new(
            Arc::new(BuiltinFaker::new()),
            Arc::new(NullScriptEngine),
            InterpolationOptions::default(),
        )
    }

    fn service_with(entries: &[(&str, Value)]) -> VariableService {
        let mut service = VariableService::new();
        for (name, value) in entries {
            service.set(name.to_string(), value.clone(), Scope::Runtime);
        }
        service
    }

    #[test]
    fn test_simple_substitution() {
        let vars = service_with(&[("name", json!("ana"))]);
        let result = interpolator().interpolate_template("hello {{name}}!", &vars);
        assert_eq!(result, json!("hello ana!"));
    }

    #[test]
    fn test_single_placeholder_preserves_type() {
        let vars = service_with(&[
            ("count", json!(42)),
            ("flag", json!(true)),
            ("user", json!({ "id": 1 })),
            ("items", json!([1, 2])),
            ("nothing", json!(null)),
        ]);
        let engine = interpolator();

        assert_eq!(engine.interpolate_template("{{count}}", &vars), json!(42));
        assert_eq!(engine.interpolate_template("{{flag}}", &vars), json!(true));
        assert_eq!(
            engine.interpolate_template("{{user}}", &vars),
            json!({ "id": 1 })
        );
        assert_eq!(engine.interpolate_template("{{items}}", &vars), json!([1, 2]));
        assert_eq!(engine.interpolate_template("{{nothing}}", &vars), json!(null));
    }

    #[test]
    fn test_mixed_template_stringifies() {
        let vars = service_with(&[("count", json!(42)), ("user", json!({ "id": 1 }))]);
        let engine = interpolator();

        assert_eq!(
            engine.interpolate_template("n={{count}}", &vars),
            json!("n=42")
        );
        assert_eq!(
            engine.interpolate_template("u={{user}}", &vars),
            json!("u={\"id\":1}")
        );
    }

    #[test]
    fn test_missing_variable_leaves_literal() {
        let vars = VariableService::new();
        let engine = interpolator();
        assert_eq!(
            engine.interpolate_template("{{missing}}", &vars),
            json!("{{missing}}")
        );
        assert_eq!(
            engine.interpolate_template("x {{missing}} y", &vars),
            json!("x {{missing}} y")
        );
    }

    #[test]
    fn test_dotted_navigation_and_index() {
        let vars = service_with(&[(
            "user",
            json!({ "profile": { "name": "ana" }, "roles": ["admin", "dev"] }),
        )]);
        let engine = interpolator();

        assert_eq!(
            engine.interpolate_template("{{user.profile.name}}", &vars),
            json!("ana")
        );
        assert_eq!(
            engine.interpolate_template("{{user.roles[1]}}", &vars),
            json!("dev")
        );
    }

    #[test]
    fn test_qualified_import_style_name_resolves_longest_prefix() {
        // "auth.token" é o nome inteiro da variável, não navegação.
        let vars = service_with(&[("auth.token", json!("abc"))]);
        let engine = interpolator();
        assert_eq!(
            engine.interpolate_template("{{auth.token}}", &vars),
            json!("abc")
        );
    }

    #[test]
    fn test_env_strategy() {
        std::env::set_var("TESTFLOW_INTERP_TEST", "from-env");
        let vars = VariableService::with_config(&HashMap::new(), None, None);
        let engine = interpolator();

        assert_eq!(
            engine.interpolate_template("{{$env.TESTFLOW_INTERP_TEST}}", &vars),
            json!("from-env")
        );
        // Ausente: null em placeholder único, vazio em template misto.
        assert_eq!(
            engine.interpolate_template("{{$env.TESTFLOW_DOES_NOT_EXIST_42}}", &vars),
            json!(null)
        );
        assert_eq!(
            engine.interpolate_template("x={{$env.TESTFLOW_DOES_NOT_EXIST_42}}", &vars),
            json!("x=")
        );
    }

    #[test]
    fn test_faker_strategy_resolves() {
        let vars = VariableService::new();
        let engine = interpolator();
        let value = engine.interpolate_template("{{$faker.string.uuid}}", &vars);
        assert_eq!(value.as_str().unwrap().len(), 36);
    }

    #[test]
    fn test_faker_error_leaves_literal() {
        let vars = VariableService::new();
        let engine = interpolator();
        assert_eq!(
            engine.interpolate_template("{{$faker.galaxy.planet}}", &vars),
            json!("{{$faker.galaxy.planet}}")
        );
    }

    #[test]
    fn test_js_without_engine_leaves_literal() {
        let vars = VariableService::new();
        let engine = interpolator();
        assert_eq!(
            engine.interpolate_template("{{$js: 1 + 1}}", &vars),
            json!("{{$js: 1 + 1}}")
        );
    }

    #[test]
    fn test_js_with_stub_engine() {
        struct StubEngine;
        impl ScriptEngine for StubEngine {
            fn execute(
                &self,
                code: &str,
                _ctx: &mut ScriptContext,
                is_block: bool,
                _timeout_ms: u64,
            ) -> Result<Value> {
                Ok(json!({ "code": code.trim(), "block": is_block }))
            }
        }

        let engine = Interpolator::new(
            Arc::new(BuiltinFaker::new()),
            Arc::new(StubEngine),
            InterpolationOptions::default(),
        );
        let vars = VariableService::new();

        let expr = engine.interpolate_template("{{$js: 1 + 1}}", &vars);
        assert_eq!(expr["code"], json!("1 + 1"));
        assert_eq!(expr["block"], json!(false));

        let block = engine.interpolate_template("{{$js.return 2}}", &vars);
        assert_eq!(block["block"], json!(true));
    }

    #[test]
    fn test_recursive_object_interpolation() {
        let vars = service_with(&[("host", json!("example.com")), ("port", json!(8080))]);
        let engine = interpolator();

        let input = json!({
            "url": "https://{{host}}:{{port}}/api",
            "nested": { "list": ["{{host}}", 1] }
        });
        let resolved = engine.interpolate(&input, &vars);
        assert_eq!(resolved["url"], json!("https://example.com:8080/api"));
        assert_eq!(resolved["nested"]["list"][0], json!("example.com"));
    }

    #[test]
    fn test_nested_template_resolution() {
        let vars = service_with(&[
            ("greeting", json!("hello {{name}}")),
            ("name", json!("ana")),
        ]);
        let engine = interpolator();
        assert_eq!(
            engine.interpolate_template("{{greeting}}", &vars),
            json!("hello ana")
        );
    }

    #[test]
    fn test_circular_reference_sentinel() {
        let vars = service_with(&[("a", json!("{{b}}")), ("b", json!("{{a}}"))]);
        let engine = interpolator();
        let resolved = engine.interpolate_template("{{a}}", &vars);
        assert!(
            resolved.to_string().contains("[Circular Reference]"),
            "got {:?}",
            resolved
        );
    }

    #[test]
    fn test_idempotence_for_variable_templates() {
        let vars = service_with(&[("name", json!("ana")), ("n", json!(3))]);
        let engine = interpolator();

        let once = engine.interpolate_template("{{name}} has {{n}}", &vars);
        let twice = engine.interpolate(&once, &vars);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_cache_respects_generation() {
        let mut vars = service_with(&[("v", json!("one"))]);
        let engine = interpolator();

        assert_eq!(engine.interpolate_template("{{v}}", &vars), json!("one"));
        vars.set("v", json!("two"), Scope::Runtime);
        assert_eq!(engine.interpolate_template("{{v}}", &vars), json!("two"));
    }

    #[test]
    fn test_jmespath_fallback_on_complex_tail() {
        let vars = service_with(&[(
            "users",
            json!([{ "name": "ana", "admin": true }, { "name": "bia", "admin": false }]),
        )]);
        let engine = interpolator();
        let resolved = engine.interpolate_template("{{users[?admin].name | [0]}}", &vars);
        assert_eq!(resolved, json!("ana"));
    }
}
