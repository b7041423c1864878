//! # Resolução de Delay (fase DELAYED)
//!
//! Converte o campo `delay` de um step em uma duração de pausa.
//!
//! ## Formas aceitas (após interpolação):
//!
//! | Forma                          | Semântica                        |
//! |--------------------------------|----------------------------------|
//! | `delay: 250`                   | Pausa fixa em ms                 |
//! | `delay: "250"`                 | Pausa fixa (string numérica)     |
//! | `delay: "{{pausa}}"`           | Template para qualquer forma     |
//! | `delay: { delay: "250" }`      | Forma embrulhada                 |
//! | `delay: { min: 100, max: 300 }`| Aleatória uniforme em [min, max] |
//!
//! Valores inválidos ou negativos geram warning e a pausa é pulada,
//! nunca uma falha do step.

use crate::interpolation::Interpolator;
use crate::variables::VariableService;
use rand::Rng;
use serde_json::Value;
use tracing::warn;

/// Resolve o campo `delay` de um step para uma duração em ms.
/// `None` = sem pausa (ausente ou inválido).
pub fn resolve_delay(
    raw: &Value,
    vars: &VariableService,
    interpolator: &Interpolator,
) -> Option<u64> {
    let resolved = interpolator.interpolate(raw, vars);
    delay_from_value(&resolved)
}

fn delay_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => {
            let ms = number.as_f64().unwrap_or(-1.0);
            if ms > 0.0 {
                Some(ms as u64)
            } else {
                warn!(delay = %value, "Delay must be a positive number; skipping");
                None
            }
        }
        Value::String(text) => match text.trim().parse::<f64>() {
            Ok(ms) if ms > 0.0 => Some(ms as u64),
            _ => {
                warn!(delay = %text, "Delay string did not resolve to a positive number; skipping");
                None
            }
        },
        Value::Object(map) => {
            // Forma embrulhada: { delay: "<ms>" }.
            if let Some(inner) = map.get("delay") {
                return delay_from_value(inner);
            }

            // Forma aleatória: { min, max } com 0 <= min <= max.
            let min = map.get("min").and_then(numeric);
            let max = map.get("max").and_then(numeric);
            match (min, max) {
                (Some(min), Some(max)) if min >= 0.0 && min <= max => {
                    let min = min as u64;
                    let max = max as u64;
                    Some(rand::thread_rng().gen_range(min..=max))
                }
                _ => {
                    warn!(delay = %value, "Random delay requires 0 <= min <= max; skipping");
                    None
                }
            }
        }
        _ => {
            warn!(delay = %value, "Unsupported delay shape; skipping");
            None
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
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

    fn fixture() -> (VariableService, Interpolator) {
        let mut vars = VariableService::new();
        vars.set("pause", json!(120), Scope::Runtime);
        let interpolator = Interpolator::new(
            Arc::new(BuiltinFaker::new()),
            Arc::new(NullScriptEngine),
            InterpolationOptions::default(),
        );
        (vars, interpolator)
    }

    #[test]
    fn test_fixed_number() {
        let (vars, interp) = fixture();
        assert_eq!(resolve_delay(&json!(250), &vars, &interp), Some(250));
    }

    #[test]
    fn test_numeric_string() {
        let (vars, interp) = fixture();
        assert_eq!(resolve_delay(&json!("300"), &vars, &interp), Some(300));
    }

    #[test]
    fn test_template_resolves_to_number() {
        let (vars, interp) = fixture();
        assert_eq!(resolve_delay(&json!("{{pause}}"), &vars, &interp), Some(120));
    }

    #[test]
    fn test_wrapped_delay_object() {
        let (vars, interp) = fixture();
        assert_eq!(
            resolve_delay(&json!({ "delay": "90" }), &vars, &interp),
            Some(90)
        );
    }

    #[test]
    fn test_random_range() {
        let (vars, interp) = fixture();
        for _ in 0..20 {
            let ms = resolve_delay(&json!({ "min": 10, "max": 20 }), &vars, &interp).unwrap();
            assert!((10..=20).contains(&ms));
        }
    }

    #[test]
    fn test_degenerate_range_is_exact() {
        let (vars, interp) = fixture();
        assert_eq!(
            resolve_delay(&json!({ "min": 50, "max": 50 }), &vars, &interp),
            Some(50)
        );
    }

    #[test]
    fn test_invalid_values_skip() {
        let (vars, interp) = fixture();
        assert_eq!(resolve_delay(&json!(-5), &vars, &interp), None);
        assert_eq!(resolve_delay(&json!(0), &vars, &interp), None);
        assert_eq!(resolve_delay(&json!("abc"), &vars, &interp), None);
        assert_eq!(
            resolve_delay(&json!({ "min": 30, "max": 10 }), &vars, &interp),
            None
        );
        assert_eq!(
            resolve_delay(&json!({ "min": -1, "max": 10 }), &vars, &interp),
            None
        );
        assert_eq!(resolve_delay(&json!([1, 2]), &vars, &interp), None);
    }
}
