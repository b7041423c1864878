//! # Módulo de Consulta JMESPath
//!
//! Avaliação de expressões JMESPath compartilhada por capturas,
//! assertions e condições de cenário.
//!
//! ## Exemplos de expressão:
//!
//! | Expressão                 | Resultado sobre o contexto          |
//! |---------------------------|-------------------------------------|
//! | `body.data.token`         | Valor aninhado do body              |
//! | `body.items[0].id`        | Índice em array                     |
//! | `body.items[*].id`        | Projeção (lista de ids)             |
//! | `status_code == \`200\``  | Comparação com literal              |
//!
//! As expressões são compiladas por chamada: os tipos internos da crate
//! `jmespath` usam `Rc` e não podem atravessar threads nem awaits, então
//! um cache global de compilação não é seguro aqui.

use anyhow::{anyhow, Result};
use serde_json::Value;

/// Compila e executa uma expressão JMESPath sobre um valor JSON.
///
/// Devolve `Value::Null` tanto para um null explícito quanto para
/// caminhos inexistentes; quem precisa distinguir existência deve
/// sondar o contêiner pai.
pub fn search(expression: &str, data: &Value) -> Result<Value> {
    let compiled = jmespath::compile(expression)
        .map_err(|e| anyhow!("invalid JMESPath expression '{}': {}", expression, e))?;

    // Variable::from_json é o ponto de entrada estável para dados serde.
    let haystack = jmespath::Variable::from_json(&data.to_string())
        .map_err(|e| anyhow!("failed to convert data for JMESPath search: {}", e))?;

    let result = compiled
        .search(haystack)
        .map_err(|e| anyhow!("JMESPath search '{}' failed: {}", expression, e))?;

    serde_json::to_value(result.as_ref())
        .map_err(|e| anyhow!("failed to convert JMESPath result: {}", e))
}

/// Truthiness JMESPath: null, false, string vazia, array vazio e objeto
/// vazio são falsos; todo número (inclusive 0) é verdadeiro.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => true,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_simple_path() {
        let data = json!({ "body": { "token": "abc" } });
        assert_eq!(search("body.token", &data).unwrap(), json!("abc"));
    }

    #[test]
    fn test_search_missing_path_is_null() {
        let data = json!({ "body": {} });
        assert_eq!(search("body.token", &data).unwrap(), json!(null));
    }

    #[test]
    fn test_search_comparison_with_literal() {
        let data = json!({ "status_code": 200 });
        assert_eq!(search("status_code == `200`", &data).unwrap(), json!(true));
        assert_eq!(search("status_code == `500`", &data).unwrap(), json!(false));
    }

    #[test]
    fn test_search_array_projection() {
        let data = json!({ "items": [{ "id": 1 }, { "id": 2 }] });
        assert_eq!(search("items[*].id", &data).unwrap(), json!([1, 2]));
        assert_eq!(search("items[1].id", &data).unwrap(), json!(2));
    }

    #[test]
    fn test_search_invalid_expression() {
        let data = json!({});
        assert!(search("[invalid", &data).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(!is_truthy(&json!({})));
        assert!(is_truthy(&json!(0)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([1])));
    }
}
