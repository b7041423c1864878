//! # Expansão de Iterações
//!
//! Transforma o bloco `iterate` de um step na lista concreta de valores
//! do binding:
//!
//! - `over`: array literal ou template que resolve para array; cada
//!   elemento vira uma execução. `over: []` expande para **zero**
//!   execuções e o step reporta sucesso sem nenhuma requisição.
//! - `range: "a..b"`: range numérico **inclusivo** com `a ≤ b`;
//!   `range: "5..5"` expande para exatamente uma execução com valor 5.
//!
//! O tamanho da expansão é validado contra os limites de execução no
//! momento em que é conhecido (depois de interpolar `over` ou parsear
//! o range).

use crate::interpolation::Interpolator;
use crate::limits::ExecutionLimits;
use crate::protocol::IterationSpec;
use crate::validation;
use crate::variables::VariableService;
use serde_json::Value;

/// Expande a iteração para a lista de valores do binding.
pub fn expand(
    iterate: &IterationSpec,
    vars: &VariableService,
    interpolator: &Interpolator,
    limits: &ExecutionLimits,
) -> Result<Vec<Value>, String> {
    let values = match iterate {
        IterationSpec::Over { over, .. } => {
            let resolved = interpolator.interpolate(over, vars);
            match resolved {
                Value::Array(items) => items,
                other => {
                    return Err(format!(
                        "iteration 'over' must resolve to an array, got {}",
                        type_name(&other)
                    ));
                }
            }
        }
        IterationSpec::Range { range, .. } => {
            let resolved = interpolator.interpolate_template(range, vars);
            let range_text = match &resolved {
                Value::String(text) => text.clone(),
                Value::Number(_) => resolved.to_string(),
                other => {
                    return Err(format!(
                        "iteration 'range' must resolve to a string, got {}",
                        type_name(other)
                    ));
                }
            };
            let (start, end) = validation::parse_range(&range_text)?;
            (start..=end).map(|n| Value::from(n)).collect()
        }
    };

    crate::limits::check_iteration(values.len(), limits)
        .map_err(|violation| violation.message)?;

    Ok(values)
}

fn type_name(value: &Value) -> &'static str {
    crate::protocol::ValueType::from_value(value).name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faker::BuiltinFaker;
    use crate::interpolation::InterpolationOptions;
    use crate::scripting::NullScriptEngine;
    use crate::variables::Scope;
    use serde_json::json;
    use std::sync::Arc;

    fn fixture() -> (VariableService, Interpolator, ExecutionLimits) {
        let mut vars = VariableService::new();
        vars.set("items", json!(["a", "b"]), Scope::Runtime);
        vars.set("last", json!(3), Scope::Runtime);
        let interpolator = Interpolator::new(
            Arc::new(BuiltinFaker::new()),
            Arc::new(NullScriptEngine),
            InterpolationOptions::default(),
        );
        (vars, interpolator, ExecutionLimits::default())
    }

    fn iterate(value: serde_json::Value) -> IterationSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_range_inclusive() {
        let (vars, interp, limits) = fixture();
        let values = expand(
            &iterate(json!({ "range": "1..3", "as": "i" })),
            &vars,
            &interp,
            &limits,
        )
        .unwrap();
        assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_degenerate_range_single_value() {
        let (vars, interp, limits) = fixture();
        let values = expand(
            &iterate(json!({ "range": "5..5", "as": "i" })),
            &vars,
            &interp,
            &limits,
        )
        .unwrap();
        assert_eq!(values, vec![json!(5)]);
    }

    #[test]
    fn test_range_with_template() {
        let (vars, interp, limits) = fixture();
        let values = expand(
            &iterate(json!({ "range": "1..{{last}}", "as": "i" })),
            &vars,
            &interp,
            &limits,
        )
        .unwrap();
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_over_literal_array() {
        let (vars, interp, limits) = fixture();
        let values = expand(
            &iterate(json!({ "over": [1, 2], "as": "item" })),
            &vars,
            &interp,
            &limits,
        )
        .unwrap();
        assert_eq!(values, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_over_template_array() {
        let (vars, interp, limits) = fixture();
        let values = expand(
            &iterate(json!({ "over": "{{items}}", "as": "item" })),
            &vars,
            &interp,
            &limits,
        )
        .unwrap();
        assert_eq!(values, vec![json!("a"), json!("b")]);
    }

    #[test]
    fn test_over_empty_array_is_zero_iterations() {
        let (vars, interp, limits) = fixture();
        let values = expand(
            &iterate(json!({ "over": [], "as": "item" })),
            &vars,
            &interp,
            &limits,
        )
        .unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_over_non_array_is_error() {
        let (vars, interp, limits) = fixture();
        let error = expand(
            &iterate(json!({ "over": "not an array", "as": "item" })),
            &vars,
            &interp,
            &limits,
        )
        .unwrap_err();
        assert!(error.contains("array"));
    }

    #[test]
    fn test_inverted_range_is_error() {
        let (vars, interp, limits) = fixture();
        let error = expand(
            &iterate(json!({ "range": "9..1", "as": "i" })),
            &vars,
            &interp,
            &limits,
        )
        .unwrap_err();
        assert!(error.contains("inverted"));
    }

    #[test]
    fn test_limit_enforced() {
        let (vars, interp, _) = fixture();
        let limits = ExecutionLimits {
            max_iterations_per_step: 2,
            ..ExecutionLimits::default()
        };
        let error = expand(
            &iterate(json!({ "range": "1..5", "as": "i" })),
            &vars,
            &interp,
            &limits,
        )
        .unwrap_err();
        assert!(error.contains("limit 2"));
    }
}
