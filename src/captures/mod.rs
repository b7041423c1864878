//! # Módulo de Capturas - Extração de Dados das Respostas
//!
//! Avalia o bloco `capture` de um step: cada entrada associa um nome de
//! variável a uma expressão de extração, avaliada contra o contexto da
//! resposta. Os valores capturados entram no escopo runtime **antes do
//! próximo step**.
//!
//! ## Formas de expressão aceitas:
//!
//! | Expressão                    | Semântica                            |
//! |------------------------------|--------------------------------------|
//! | `body.data.token`            | JMESPath sobre o contexto da resposta|
//! | `status_code`                | Campo direto do contexto             |
//! | `'literal'` / `"literal"`    | String literal (sem avaliação)       |
//! | `{{$js: ...}}` / `{{js: ...}}` | Script com o contexto da resposta  |
//! | `{{variavel}}`               | Valor interpolado das variáveis      |
//! | `https://...`                | String url-like literal              |
//! | `true` / `123` / `null`      | Literal JSON (valor não-string)      |
//!
//! Falhas são **por variável**: uma expressão inválida é logada e a
//! variável simplesmente não é definida; as demais capturas seguem.

use crate::errors::ErrorCode;
use crate::interpolation::Interpolator;
use crate::protocol::ResponseContext;
use crate::query;
use crate::scripting::{ScriptContext, ScriptEngine};
use crate::variables::VariableService;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Avalia o mapa de capturas. Devolve apenas as que produziram valor.
pub fn evaluate(
    captures: &IndexMap<String, Value>,
    ctx: &ResponseContext,
    vars: &VariableService,
    interpolator: &Interpolator,
    script: &Arc<dyn ScriptEngine>,
    script_timeout_ms: u64,
) -> IndexMap<String, Value> {
    let mut captured = IndexMap::new();
    let context_value = ctx.to_value();

    for (name, expression) in captures {
        match evaluate_expression(
            expression,
            &context_value,
            vars,
            interpolator,
            script,
            script_timeout_ms,
        ) {
            Some(value) => {
                debug!(variable = %name, "Captured variable");
                captured.insert(name.clone(), value);
            }
            None => {
                warn!(
                    code = %ErrorCode::CAPTURE_EMPTY,
                    variable = %name,
                    expression = %expression,
                    "Capture produced no value; variable not set"
                );
            }
        }
    }

    captured
}

fn evaluate_expression(
    expression: &Value,
    context_value: &Value,
    vars: &VariableService,
    interpolator: &Interpolator,
    script: &Arc<dyn ScriptEngine>,
    script_timeout_ms: u64,
) -> Option<Value> {
    let Value::String(raw) = expression else {
        // Literal não-string (bool/número/null/array/objeto): strings
        // internas ainda passam por interpolação.
        return Some(interpolator.interpolate(expression, vars));
    };

    let trimmed = raw.trim();

    // Script embutido: "{{$js: ...}}" ou "{{js: ...}}".
    if let Some(code) = embedded_script(trimmed) {
        let mut script_ctx = ScriptContext::new(vars.all());
        script_ctx.response = Some(context_value.clone());
        return match script.execute(code, &mut script_ctx, false, script_timeout_ms) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(error = %error, "Capture script failed");
                None
            }
        };
    }

    // Template com placeholders: o valor interpolado é o capturado.
    if trimmed.contains("{{") {
        let resolved = interpolator.interpolate_template(trimmed, vars);
        if let Value::String(text) = &resolved {
            if text.contains("{{") {
                // Placeholder não resolvido: captura falha.
                return None;
            }
        }
        return Some(resolved);
    }

    // String literal com aspas.
    if (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
        || (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
    {
        return Some(Value::String(trimmed[1..trimmed.len() - 1].to_string()));
    }

    // URL literal.
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Some(Value::String(trimmed.to_string()));
    }

    // Expressão JMESPath sobre o contexto da resposta.
    match query::search(trimmed, context_value) {
        Ok(Value::Null) => None,
        Ok(found) => Some(found),
        Err(error) => {
            warn!(
                code = %ErrorCode::CAPTURE_INVALID,
                expression = %trimmed,
                error = %error,
                "Capture expression failed"
            );
            None
        }
    }
}

/// Extrai o código de um placeholder de script único.
fn embedded_script(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix("{{")?.strip_suffix("}}")?.trim();
    inner
        .strip_prefix("$js:")
        .or_else(|| inner.strip_prefix("js:"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faker::BuiltinFaker;
    use crate::interpolation::InterpolationOptions;
    use crate::protocol::RunStatus;
    use crate::scripting::NullScriptEngine;
    use crate::variables::Scope;
    use anyhow::Result;
    use serde_json::json;
    use std::collections::HashMap;

    fn fixture() -> (ResponseContext, VariableService, Interpolator) {
        let ctx = ResponseContext {
            status_code: 201,
            headers: HashMap::from([("x-request-id".to_string(), "req-9".to_string())]),
            body: json!({ "data": { "token": "abc", "ids": [1, 2, 3] } }),
            duration_ms: 120,
            size_bytes: 64,
            step_status: RunStatus::Success,
        };
        let mut vars = VariableService::new();
        vars.set("env_name", json!("staging"), Scope::Runtime);
        let interpolator = Interpolator::new(
            Arc::new(BuiltinFaker::new()),
            Arc::new(NullScriptEngine),
            InterpolationOptions::default(),
        );
        (ctx, vars, interpolator)
    }

    fn run(captures: Value) -> IndexMap<String, Value> {
        let (ctx, vars, interpolator) = fixture();
        let captures: IndexMap<String, Value> = serde_json::from_value(captures).unwrap();
        let engine: Arc<dyn ScriptEngine> = Arc::new(NullScriptEngine);
        evaluate(&captures, &ctx, &vars, &interpolator, &engine, 5000)
    }

    #[test]
    fn test_jmespath_capture() {
        let captured = run(json!({
            "token": "body.data.token",
            "second_id": "body.data.ids[1]",
            "code": "status_code"
        }));
        assert_eq!(captured["token"], json!("abc"));
        assert_eq!(captured["second_id"], json!(2));
        assert_eq!(captured["code"], json!(201));
    }

    #[test]
    fn test_header_capture_via_context() {
        let captured = run(json!({ "request_id": "headers.\"x-request-id\"" }));
        assert_eq!(captured["request_id"], json!("req-9"));
    }

    #[test]
    fn test_quoted_literal() {
        let captured = run(json!({ "fixed": "'plain value'" }));
        assert_eq!(captured["fixed"], json!("plain value"));
    }

    #[test]
    fn test_url_like_literal() {
        let captured = run(json!({ "endpoint": "https://api.example.com/v1" }));
        assert_eq!(captured["endpoint"], json!("https://api.example.com/v1"));
    }

    #[test]
    fn test_non_string_literals() {
        let captured = run(json!({ "flag": true, "count": 5, "nothing": null }));
        assert_eq!(captured["flag"], json!(true));
        assert_eq!(captured["count"], json!(5));
        assert_eq!(captured["nothing"], json!(null));
    }

    #[test]
    fn test_template_capture_uses_variables() {
        let captured = run(json!({ "env_copy": "{{env_name}}" }));
        assert_eq!(captured["env_copy"], json!("staging"));
    }

    #[test]
    fn test_failed_capture_is_skipped() {
        let captured = run(json!({
            "ok": "body.data.token",
            "missing": "body.data.absent",
            "broken": "[bad expr"
        }));
        assert_eq!(captured.len(), 1);
        assert!(captured.contains_key("ok"));
    }

    #[test]
    fn test_embedded_script_capture() {
        struct DoubleEngine;
        impl ScriptEngine for DoubleEngine {
            fn execute(
                &self,
                _code: &str,
                ctx: &mut ScriptContext,
                _is_block: bool,
                _timeout_ms: u64,
            ) -> Result<Value> {
                let status = ctx
                    .response
                    .as_ref()
                    .and_then(|response| response.get("status_code"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                Ok(json!(status * 2))
            }
        }

        let (ctx, vars, interpolator) = fixture();
        let captures: IndexMap<String, Value> =
            serde_json::from_value(json!({ "doubled": "{{$js: status_code * 2}}" })).unwrap();
        let engine: Arc<dyn ScriptEngine> = Arc::new(DoubleEngine);
        let captured = evaluate(&captures, &ctx, &vars, &interpolator, &engine, 5000);
        assert_eq!(captured["doubled"], json!(402));
    }
}
