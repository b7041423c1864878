//! # Módulo de Assertions - Validação de Respostas
//!
//! Avalia o bloco `assert` de um step contra o contexto da resposta.
//! Cada check presente no conjunto de um campo gera um resultado
//! individual `{field, expected, actual, passed, message}`; o step só
//! falha se algum resultado reprovar, e a lista completa é retida no
//! relatório.
//!
//! ## Caminhos de campo reconhecidos:
//!
//! | Caminho              | Valor                                        |
//! |----------------------|----------------------------------------------|
//! | `status_code`        | Código HTTP                                  |
//! | `response_time_ms`   | Duração da requisição                        |
//! | `size_bytes`         | Tamanho do body em bytes                     |
//! | `headers.<nome>`     | Header (lookup case-insensitive)             |
//! | `body` / `body.<q>`  | Body inteiro ou resultado JMESPath           |

use crate::protocol::{AssertionOutcome, AssertionSpec, CheckSet, ResponseContext, ValueType};
use crate::query;
use crate::scenarios;
use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

// ============================================================================
// AVALIAÇÃO
// ============================================================================

/// Avalia todas as assertions do bloco contra o contexto da resposta.
pub fn evaluate(spec: &AssertionSpec, ctx: &ResponseContext) -> Vec<AssertionOutcome> {
    let mut outcomes = Vec::new();

    for (field, check) in &spec.checks {
        let set = check.as_set();
        let actual = resolve_field(field, ctx);
        evaluate_check_set(field, &set, actual.as_ref(), &mut outcomes);
    }

    if !spec.custom.is_empty() {
        let context_value = ctx.to_value();
        for custom in &spec.custom {
            let passed = scenarios::evaluate_condition(&custom.condition, &context_value)
                .unwrap_or_else(|error| {
                    warn!(
                        name = %custom.name,
                        condition = %custom.condition,
                        error = %error,
                        "Custom assertion condition failed to evaluate"
                    );
                    false
                });
            outcomes.push(AssertionOutcome {
                field: format!("custom.{}", custom.name),
                expected: json!(custom.condition),
                actual: json!(passed),
                passed,
                message: if passed {
                    None
                } else {
                    Some(
                        custom
                            .message
                            .clone()
                            .unwrap_or_else(|| format!("custom check '{}' failed", custom.name)),
                    )
                },
            });
        }
    }

    outcomes
}

/// Resolve um caminho de campo no contexto. `None` = campo ausente.
fn resolve_field(field: &str, ctx: &ResponseContext) -> Option<Value> {
    match field {
        "status_code" => Some(json!(ctx.status_code)),
        "response_time_ms" | "duration_ms" => Some(json!(ctx.duration_ms)),
        "size_bytes" => Some(json!(ctx.size_bytes)),
        "body" => Some(ctx.body.clone()),
        _ => {
            if let Some(header_name) = field.strip_prefix("headers.") {
                let wanted = header_name.to_ascii_lowercase();
                return ctx
                    .headers
                    .iter()
                    .find(|(name, _)| name.to_ascii_lowercase() == wanted)
                    .map(|(_, value)| json!(value));
            }
            if let Some(path) = field.strip_prefix("body.") {
                return match query::search(path, &ctx.body) {
                    Ok(Value::Null) => None,
                    Ok(found) => Some(found),
                    Err(error) => {
                        warn!(field = %field, error = %error, "Assertion field query failed");
                        None
                    }
                };
            }
            warn!(field = %field, "Unknown assertion field path");
            None
        }
    }
}

/// Avalia cada check presente no conjunto, anexando os resultados.
fn evaluate_check_set(
    field: &str,
    set: &CheckSet,
    actual: Option<&Value>,
    outcomes: &mut Vec<AssertionOutcome>,
) {
    let absent = json!(null);
    let actual_or_null = actual.unwrap_or(&absent);

    if let Some(expected) = &set.equals {
        let passed = actual.map(|value| loose_equals(value, expected)) == Some(true);
        outcomes.push(outcome(
            field,
            "equals",
            expected.clone(),
            actual_or_null.clone(),
            passed,
        ));
    }

    if let Some(expected) = &set.not_equals {
        let passed = match actual {
            Some(value) => !loose_equals(value, expected),
            None => true,
        };
        outcomes.push(outcome(
            field,
            "not_equals",
            expected.clone(),
            actual_or_null.clone(),
            passed,
        ));
    }

    if let Some(needle) = &set.contains {
        let passed = actual.map(|value| contains(value, needle)) == Some(true);
        outcomes.push(outcome(
            field,
            "contains",
            needle.clone(),
            actual_or_null.clone(),
            passed,
        ));
    }

    if let Some(pattern) = &set.regex {
        let passed = match (actual, Regex::new(pattern)) {
            (Some(value), Ok(re)) => re.is_match(&string_form(value)),
            (_, Err(error)) => {
                warn!(pattern = %pattern, error = %error, "Invalid regex in assertion");
                false
            }
            (None, _) => false,
        };
        outcomes.push(outcome(
            field,
            "regex",
            json!(pattern),
            actual_or_null.clone(),
            passed,
        ));
    }

    if let Some(threshold) = set.greater_than {
        let passed = numeric(actual_or_null)
            .map(|n| n > threshold)
            .unwrap_or(false);
        outcomes.push(outcome(
            field,
            "greater_than",
            json!(threshold),
            actual_or_null.clone(),
            passed,
        ));
    }

    if let Some(threshold) = set.less_than {
        let passed = numeric(actual_or_null)
            .map(|n| n < threshold)
            .unwrap_or(false);
        outcomes.push(outcome(
            field,
            "less_than",
            json!(threshold),
            actual_or_null.clone(),
            passed,
        ));
    }

    if let Some(expected_type) = &set.value_type {
        let passed = actual
            .map(|value| ValueType::from_value(value).name() == expected_type)
            .unwrap_or(false);
        outcomes.push(outcome(
            field,
            "type",
            json!(expected_type),
            actual_or_null.clone(),
            passed,
        ));
    }

    if let Some(length_spec) = &set.length {
        let check = length_spec.as_check();
        let measured = actual.and_then(length_of);

        if let Some(expected) = check.equals {
            let passed = measured == Some(expected);
            outcomes.push(outcome(
                field,
                "length.equals",
                json!(expected),
                json!(measured),
                passed,
            ));
        }
        if let Some(expected) = check.greater_than {
            let passed = measured.map(|len| len > expected).unwrap_or(false);
            outcomes.push(outcome(
                field,
                "length.greater_than",
                json!(expected),
                json!(measured),
                passed,
            ));
        }
        if let Some(expected) = check.less_than {
            let passed = measured.map(|len| len < expected).unwrap_or(false);
            outcomes.push(outcome(
                field,
                "length.less_than",
                json!(expected),
                json!(measured),
                passed,
            ));
        }
    }

    if let Some(should_exist) = set.exists {
        let exists = actual.is_some();
        let passed = exists == should_exist;
        outcomes.push(outcome(
            field,
            "exists",
            json!(should_exist),
            json!(exists),
            passed,
        ));
    }
}

fn outcome(field: &str, check: &str, expected: Value, actual: Value, passed: bool) -> AssertionOutcome {
    let message = if passed {
        None
    } else {
        Some(format!(
            "{}.{}: expected {}, got {}",
            field, check, expected, actual
        ))
    };
    AssertionOutcome {
        field: format!("{}.{}", field, check),
        expected,
        actual,
        passed,
        message,
    }
}

// ============================================================================
// COMPARAÇÕES
// ============================================================================

/// Igualdade com coerção numérica: `1 == 1.0`.
fn loose_equals(actual: &Value, expected: &Value) -> bool {
    if let (Value::Number(a), Value::Number(b)) = (actual, expected) {
        if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
            return a == b;
        }
    }
    actual == expected
}

/// `contains` por tipo: substring, elemento de array ou chave de objeto.
fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::String(haystack) => haystack.contains(&string_form(needle)),
        Value::Array(items) => items.iter().any(|item| loose_equals(item, needle)),
        Value::Object(map) => needle
            .as_str()
            .map(|key| map.contains_key(key))
            .unwrap_or(false),
        _ => false,
    }
}

/// Forma string para regex/contains.
fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Valor numérico, aceitando strings numéricas.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Comprimento por tipo: chars, elementos ou chaves.
fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RunStatus;
    use std::collections::HashMap;

    fn context() -> ResponseContext {
        ResponseContext {
            status_code: 200,
            headers: HashMap::from([(
                "Content-Type".to_string(),
                "application/json; charset=utf-8".to_string(),
            )]),
            body: json!({
                "token": "abc-123",
                "user": { "id": 7, "roles": ["admin", "dev"] },
                "count": 2
            }),
            duration_ms: 150,
            size_bytes: 96,
            step_status: RunStatus::Success,
        }
    }

    fn spec(value: Value) -> AssertionSpec {
        serde_json::from_value(value).unwrap()
    }

    fn failed(outcomes: &[AssertionOutcome]) -> usize {
        outcomes.iter().filter(|outcome| !outcome.passed).count()
    }

    #[test]
    fn test_bare_scalar_equals() {
        let outcomes = evaluate(&spec(json!({ "status_code": 200 })), &context());
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].passed);
        assert_eq!(outcomes[0].field, "status_code.equals");
    }

    #[test]
    fn test_failed_assertion_has_message() {
        let outcomes = evaluate(&spec(json!({ "status_code": 404 })), &context());
        assert_eq!(failed(&outcomes), 1);
        let message = outcomes[0].message.as_ref().unwrap();
        assert!(message.contains("404"));
        assert!(message.contains("200"));
    }

    #[test]
    fn test_body_jmespath_field() {
        let outcomes = evaluate(
            &spec(json!({
                "body.token": { "regex": "^abc-\\d+$" },
                "body.user.id": { "greater_than": 5.0, "less_than": 10.0 },
                "body.user.roles": { "length": 2, "contains": "admin" }
            })),
            &context(),
        );
        assert_eq!(failed(&outcomes), 0, "outcomes: {:?}", outcomes);
    }

    #[test]
    fn test_headers_case_insensitive() {
        let outcomes = evaluate(
            &spec(json!({ "headers.content-type": { "contains": "application/json" } })),
            &context(),
        );
        assert_eq!(failed(&outcomes), 0);
    }

    #[test]
    fn test_exists_check() {
        let outcomes = evaluate(
            &spec(json!({
                "body.token": { "exists": true },
                "body.missing": { "exists": false }
            })),
            &context(),
        );
        assert_eq!(failed(&outcomes), 0);

        let outcomes = evaluate(&spec(json!({ "body.missing": { "exists": true } })), &context());
        assert_eq!(failed(&outcomes), 1);
    }

    #[test]
    fn test_type_check() {
        let outcomes = evaluate(
            &spec(json!({
                "body.user": { "type": "object" },
                "body.count": { "type": "number" },
                "body.token": { "type": "string" }
            })),
            &context(),
        );
        assert_eq!(failed(&outcomes), 0);

        let outcomes = evaluate(&spec(json!({ "body.count": { "type": "string" } })), &context());
        assert_eq!(failed(&outcomes), 1);
    }

    #[test]
    fn test_numeric_coercion_in_equals() {
        let outcomes = evaluate(&spec(json!({ "body.count": 2.0 })), &context());
        assert_eq!(failed(&outcomes), 0);
    }

    #[test]
    fn test_response_time_field() {
        let outcomes = evaluate(
            &spec(json!({ "response_time_ms": { "less_than": 1000.0 } })),
            &context(),
        );
        assert_eq!(failed(&outcomes), 0);
    }

    #[test]
    fn test_not_equals_on_missing_field_passes() {
        let outcomes = evaluate(
            &spec(json!({ "body.missing": { "not_equals": "x" } })),
            &context(),
        );
        assert_eq!(failed(&outcomes), 0);
    }

    #[test]
    fn test_multiple_checks_produce_individual_outcomes() {
        let outcomes = evaluate(
            &spec(json!({
                "status_code": { "greater_than": 199.0, "less_than": 300.0, "type": "number" }
            })),
            &context(),
        );
        assert_eq!(outcomes.len(), 3);
        assert_eq!(failed(&outcomes), 0);
    }

    #[test]
    fn test_custom_condition() {
        let outcomes = evaluate(
            &spec(json!({
                "custom": [
                    { "name": "fast", "condition": "duration_ms < 500", "message": "too slow" },
                    { "name": "never", "condition": "status_code == 999" }
                ]
            })),
            &context(),
        );
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].passed);
        assert!(!outcomes[1].passed);
        assert!(outcomes[1]
            .message
            .as_ref()
            .unwrap()
            .contains("never"));
    }

    #[test]
    fn test_invalid_regex_fails_check() {
        let outcomes = evaluate(
            &spec(json!({ "body.token": { "regex": "([broken" } })),
            &context(),
        );
        assert_eq!(failed(&outcomes), 1);
    }

    #[test]
    fn test_length_variants() {
        let outcomes = evaluate(
            &spec(json!({
                "body.token": { "length": { "greater_than": 3, "less_than": 10 } }
            })),
            &context(),
        );
        assert_eq!(outcomes.len(), 2);
        assert_eq!(failed(&outcomes), 0);
    }
}
