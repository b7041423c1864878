//! # Módulo de Cenários - Ramos Condicionais
//!
//! Avalia as condições dos cenários de um step contra o contexto da
//! resposta e devolve os blocos (`then`/`else`) que devem executar.
//!
//! ## Duas formas de avaliação:
//!
//! - **Com request no step** (`matching_branches`): todos os cenários são
//!   avaliados em ordem e TODOS os ramos aplicáveis executam
//!   cumulativamente sobre o mesmo resultado: `then` quando a condição
//!   casa, `else` quando não casa.
//! - **Sem request no step** (`first_match`): o primeiro cenário cuja
//!   condição casa executa seu `then` (com request próprio); nenhum
//!   match → step `skipped`. Exatamente um ramo roda nessa forma.
//!
//! ## Pré-processamento de condição
//!
//! As condições são JMESPath, mas aceitam sintaxe mais frouxa: literais
//! numéricos, booleanos e `null` sem crases são envolvidos
//! automaticamente (`status_code == 200` → ``status_code == `200` ``).
//! Índices (`items[0]`) e fatias são preservados.

use crate::protocol::{ScenarioBlock, ScenarioEvaluation, ScenarioSpec, ScenariosMeta};
use crate::query;
use anyhow::Result;
use serde_json::Value;
use tracing::warn;

// ============================================================================
// PRÉ-PROCESSAMENTO
// ============================================================================

/// Converte a sintaxe frouxa aceita nos documentos para JMESPath estrito.
pub fn preprocess_condition(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len() + 8);
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    let mut in_backtick = false;
    let mut in_single = false;
    let mut in_double = false;

    while i < chars.len() {
        let ch = chars[i];

        if in_backtick {
            output.push(ch);
            if ch == '`' {
                in_backtick = false;
            }
            i += 1;
            continue;
        }
        if in_single {
            output.push(ch);
            if ch == '\'' {
                in_single = false;
            }
            i += 1;
            continue;
        }
        if in_double {
            output.push(ch);
            if ch == '"' {
                in_double = false;
            }
            i += 1;
            continue;
        }

        match ch {
            '`' => {
                in_backtick = true;
                output.push(ch);
                i += 1;
            }
            '\'' => {
                in_single = true;
                output.push(ch);
                i += 1;
            }
            '"' => {
                in_double = true;
                output.push(ch);
                i += 1;
            }
            _ if ch.is_ascii_digit()
                || (ch == '-' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) =>
            {
                // Token numérico completo.
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let token: String = chars[start..i].iter().collect();

                // Número colado em identificador (ex.: "2xx") não é literal.
                let prev = previous_meaningful(&output);
                let next = chars.get(i).copied();
                let glued_to_ident = prev
                    .map(|p| p.is_ascii_alphanumeric() || p == '_')
                    .unwrap_or(false)
                    || next
                        .map(|n| n.is_ascii_alphanumeric() || n == '_')
                        .unwrap_or(false);

                if glued_to_ident || is_index_position(prev, next) {
                    output.push_str(&token);
                } else {
                    output.push('`');
                    output.push_str(&token);
                    output.push('`');
                }
            }
            _ if ch.is_ascii_alphabetic() || ch == '_' => {
                // Palavra: identificador ou literal true/false/null.
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let prev = previous_meaningful(&output);
                let part_of_path = prev == Some('.') || chars.get(i).copied() == Some('.');

                if !part_of_path && matches!(word.as_str(), "true" | "false" | "null") {
                    output.push('`');
                    output.push_str(&word);
                    output.push('`');
                } else {
                    output.push_str(&word);
                }
            }
            _ => {
                output.push(ch);
                i += 1;
            }
        }
    }

    output
}

/// Último caractere não-espaço já emitido.
fn previous_meaningful(output: &str) -> Option<char> {
    output.chars().rev().find(|ch| !ch.is_whitespace())
}

/// Números em posição de índice/fatia (`[0]`, `[0:2]`) ficam sem crases.
fn is_index_position(prev: Option<char>, next: Option<char>) -> bool {
    let opens = matches!(prev, Some('[') | Some(':'));
    let closes = matches!(next, Some(']') | Some(':'));
    opens && closes
}

/// Avalia uma condição (pré-processada aqui) contra um contexto JSON,
/// com truthiness JMESPath.
pub fn evaluate_condition(raw: &str, context: &Value) -> Result<bool> {
    let strict = preprocess_condition(raw);
    let result = query::search(&strict, context)?;
    Ok(query::is_truthy(&result))
}

// ============================================================================
// AVALIAÇÃO DE CENÁRIOS
// ============================================================================

/// Ramo selecionado durante a avaliação.
#[derive(Debug)]
pub struct BranchHit<'a> {
    pub index: usize,
    pub branch: &'static str,
    pub block: &'a ScenarioBlock,
}

/// Forma cumulativa (step com request): todos os cenários avaliam; cada
/// condição que casa executa `then`, cada uma que não casa executa
/// `else` quando presente.
pub fn matching_branches<'a>(
    scenarios: &'a [ScenarioSpec],
    context: &Value,
) -> (Vec<BranchHit<'a>>, ScenariosMeta) {
    let mut hits = Vec::new();
    let mut evaluations = Vec::new();

    for (index, scenario) in scenarios.iter().enumerate() {
        let matched = match evaluate_condition(&scenario.condition, context) {
            Ok(matched) => matched,
            Err(error) => {
                warn!(
                    condition = %scenario.condition,
                    error = %error,
                    "Scenario condition failed to evaluate; treating as no match"
                );
                false
            }
        };

        let block = if matched {
            scenario.then.as_ref().map(|block| ("then", block))
        } else {
            scenario.otherwise.as_ref().map(|block| ("else", block))
        };

        let (branch, executed) = match block {
            Some((branch, block)) => {
                hits.push(BranchHit {
                    index,
                    branch,
                    block,
                });
                (Some(branch.to_string()), true)
            }
            None => (None, false),
        };

        evaluations.push(ScenarioEvaluation {
            index,
            condition: scenario.condition.clone(),
            matched,
            branch,
            executed,
        });
    }

    let executed_count = hits.len();
    (
        hits,
        ScenariosMeta {
            evaluations,
            executed_count,
        },
    )
}

/// Forma exclusiva (step sem request): o primeiro `then` cuja condição
/// casa executa; os demais cenários ainda são avaliados para o meta.
pub fn first_match<'a>(
    scenarios: &'a [ScenarioSpec],
    context: &Value,
) -> (Option<BranchHit<'a>>, ScenariosMeta) {
    let mut chosen: Option<BranchHit<'a>> = None;
    let mut evaluations = Vec::new();

    for (index, scenario) in scenarios.iter().enumerate() {
        let matched = match evaluate_condition(&scenario.condition, context) {
            Ok(matched) => matched,
            Err(error) => {
                warn!(
                    condition = %scenario.condition,
                    error = %error,
                    "Scenario condition failed to evaluate; treating as no match"
                );
                false
            }
        };

        let mut executes = false;
        if matched && chosen.is_none() {
            if let Some(block) = &scenario.then {
                chosen = Some(BranchHit {
                    index,
                    branch: "then",
                    block,
                });
                executes = true;
            }
        }

        evaluations.push(ScenarioEvaluation {
            index,
            condition: scenario.condition.clone(),
            matched,
            branch: executes.then(|| "then".to_string()),
            executed: executes,
        });
    }

    let executed_count = usize::from(chosen.is_some());
    (
        chosen,
        ScenariosMeta {
            evaluations,
            executed_count,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_preprocess_wraps_bare_numbers() {
        assert_eq!(
            preprocess_condition("status_code == 200"),
            "status_code == `200`"
        );
        assert_eq!(
            preprocess_condition("duration_ms < 1500 && size_bytes > 10"),
            "duration_ms < `1500` && size_bytes > `10`"
        );
    }

    #[test]
    fn test_preprocess_keeps_backticked_literals() {
        assert_eq!(
            preprocess_condition("status_code == `200`"),
            "status_code == `200`"
        );
    }

    #[test]
    fn test_preprocess_keeps_indexes_and_strings() {
        assert_eq!(
            preprocess_condition("body.items[0].id == 7"),
            "body.items[0].id == `7`"
        );
        assert_eq!(
            preprocess_condition("body.name == 'ana 200'"),
            "body.name == 'ana 200'"
        );
    }

    #[test]
    fn test_preprocess_wraps_booleans_and_null() {
        assert_eq!(preprocess_condition("body.ok == true"), "body.ok == `true`");
        assert_eq!(
            preprocess_condition("body.deleted == null"),
            "body.deleted == `null`"
        );
        // "true" como segmento de caminho não é literal.
        assert_eq!(preprocess_condition("body.true.x"), "body.true.x");
    }

    #[test]
    fn test_evaluate_condition_loose_syntax() {
        let context = json!({ "status_code": 200, "body": { "ok": true } });
        assert!(evaluate_condition("status_code == 200", &context).unwrap());
        assert!(!evaluate_condition("status_code == 500", &context).unwrap());
        assert!(evaluate_condition("body.ok == true && status_code >= 200", &context).unwrap());
    }

    fn scenarios_fixture() -> Vec<ScenarioSpec> {
        serde_json::from_value(json!([
            {
                "condition": "status_code == `200`",
                "then": { "variables": { "ok": true } }
            },
            {
                "condition": "status_code == `500`",
                "else": { "variables": { "fallback": true } }
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_matching_branches_cumulative() {
        let context = json!({ "status_code": 200 });
        let fixture = scenarios_fixture();
        let (hits, meta) = matching_branches(&fixture, &context);

        // Cenário 0 casa (then); cenário 1 não casa (else executa).
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].branch, "then");
        assert_eq!(hits[1].branch, "else");
        assert_eq!(meta.executed_count, 2);
        assert!(meta.evaluations[0].matched);
        assert!(!meta.evaluations[1].matched);
        assert!(meta.evaluations[1].executed);
    }

    #[test]
    fn test_matching_branches_no_else_block() {
        let scenarios: Vec<ScenarioSpec> = serde_json::from_value(json!([
            { "condition": "status_code == `500`", "then": { "variables": { "x": 1 } } }
        ]))
        .unwrap();
        let (hits, meta) = matching_branches(&scenarios, &json!({ "status_code": 200 }));
        assert!(hits.is_empty());
        assert_eq!(meta.executed_count, 0);
        assert!(!meta.evaluations[0].matched);
        assert!(!meta.evaluations[0].executed);
    }

    #[test]
    fn test_matching_branches_invalid_condition_is_no_match() {
        let scenarios: Vec<ScenarioSpec> = serde_json::from_value(json!([
            { "condition": "[broken", "then": { "variables": { "x": 1 } } }
        ]))
        .unwrap();
        let (hits, meta) = matching_branches(&scenarios, &json!({}));
        assert!(hits.is_empty());
        assert!(!meta.evaluations[0].matched);
    }

    #[test]
    fn test_first_match_exclusive() {
        let scenarios: Vec<ScenarioSpec> = serde_json::from_value(json!([
            { "condition": "variables.mode == 'a'", "then": { "variables": { "first": true } } },
            { "condition": "variables.mode == 'a'", "then": { "variables": { "second": true } } }
        ]))
        .unwrap();
        let context = json!({ "variables": { "mode": "a" } });

        let (chosen, meta) = first_match(&scenarios, &context);
        let chosen = chosen.unwrap();
        assert_eq!(chosen.index, 0);
        // Apenas um ramo executa, mesmo com duas condições verdadeiras.
        assert_eq!(meta.executed_count, 1);
        assert!(meta.evaluations[1].matched);
        assert!(!meta.evaluations[1].executed);
    }

    #[test]
    fn test_first_match_none() {
        let fixture = scenarios_fixture();
        let (chosen, meta) = first_match(&fixture, &json!({ "status_code": 404 }));
        assert!(chosen.is_none());
        assert_eq!(meta.executed_count, 0);
        assert_eq!(meta.evaluations.len(), 2);
    }
}
