//! # Módulo de Carregamento de Documentos
//!
//! Contrato de parsing dos documentos de suíte mais os dois sabores
//! embutidos (JSON e YAML). O parsing fica atrás do trait `SuiteLoader`
//! para que outros formatos possam ser plugados de fora.
//!
//! ## Fluxo de carga:
//!
//! ```text
//! arquivo → texto → árvore JSON → schema check → SuiteDocument
//! ```
//!
//! A checagem de forma usa um schema embutido e agrega as violações em
//! uma mensagem única; a validação fina (exatamente uma ação por step,
//! ranges de iteração) fica no módulo de validação. O texto original é
//! preservado em `LoadedSuite` e anexado aos resultados como
//! `suite_yaml_content`.

use crate::protocol::{DiscoveredSuite, SuiteDocument};
use anyhow::{anyhow, Context, Result};
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::path::Path;

/// Documento carregado: a árvore tipada mais o texto original
/// (anexado aos resultados como `suite_yaml_content`).
#[derive(Debug, Clone)]
pub struct LoadedSuite {
    pub document: SuiteDocument,
    pub raw_content: String,
}

/// Contrato do colaborador de parsing de documentos de suíte.
pub trait SuiteLoader: Send + Sync {
    /// Converte o texto de um documento na árvore de suíte.
    fn load(&self, content: &str) -> Result<SuiteDocument>;
}

/// Loader do formato JSON.
#[derive(Debug, Default)]
pub struct JsonSuiteLoader;

impl SuiteLoader for JsonSuiteLoader {
    fn load(&self, content: &str) -> Result<SuiteDocument> {
        let tree: Value =
            serde_json::from_str(content).context("failed to parse suite document as JSON")?;
        document_from_tree(tree)
    }
}

/// Loader do formato YAML.
#[derive(Debug, Default)]
pub struct YamlSuiteLoader;

impl SuiteLoader for YamlSuiteLoader {
    fn load(&self, content: &str) -> Result<SuiteDocument> {
        let tree: Value =
            serde_yaml::from_str(content).context("failed to parse suite document as YAML")?;
        document_from_tree(tree)
    }
}

/// Schema estrutural mínimo dos documentos de suíte. A validação fina
/// (exatamente uma ação por step, ranges de iteração) fica no módulo de
/// validação; aqui barramos documentos com o formato errado cedo e com
/// mensagens agregadas.
static SUITE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["node_id", "suite_name", "steps"],
        "properties": {
            "node_id": { "type": "string", "minLength": 1 },
            "suite_name": { "type": "string", "minLength": 1 },
            "base_url": { "type": "string" },
            "variables": { "type": "object" },
            "depends": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "node_id": { "type": "string" },
                        "path": { "type": "string" },
                        "path_type": { "enum": ["relative", "absolute"] }
                    }
                }
            },
            "exports": { "type": "array", "items": { "type": "string" } },
            "exports_optional": { "type": "array", "items": { "type": "string" } },
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": { "type": "string", "minLength": 1 }
                    }
                }
            }
        }
    })
});

/// Valida a árvore contra o schema e então a deserializa.
fn document_from_tree(tree: Value) -> Result<SuiteDocument> {
    let schema = JSONSchema::compile(&SUITE_SCHEMA)
        .map_err(|e| anyhow!("internal suite schema is invalid: {}", e))?;

    if let Err(errors) = schema.validate(&tree) {
        let messages: Vec<String> = errors
            .map(|error| format!("{} at {}", error, error.instance_path))
            .take(5)
            .collect();
        return Err(anyhow!(
            "suite document failed schema validation: [{}]",
            messages.join("; ")
        ));
    }

    serde_json::from_value(tree).context("failed to deserialize suite document")
}

/// Carrega um documento do disco, escolhendo o loader pela extensão
/// (`.json` → JSON; qualquer outra → YAML).
pub fn load_suite_from_file(path: &Path) -> Result<LoadedSuite> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read suite file '{}'", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let document = if is_json {
        JsonSuiteLoader.load(&content)?
    } else {
        YamlSuiteLoader.load(&content)?
    };

    Ok(LoadedSuite {
        document,
        raw_content: content,
    })
}

/// Deriva o registro de descoberta de um documento carregado.
pub fn discovered_from_loaded(loaded: &LoadedSuite, path: &Path) -> DiscoveredSuite {
    DiscoveredSuite {
        node_id: loaded.document.node_id.clone(),
        suite_name: loaded.document.suite_name.clone(),
        file_path: path.to_path_buf(),
        exports: loaded.document.exports.clone(),
        exports_optional: loaded.document.exports_optional.clone(),
        priority: None,
        depends: loaded.document.depends.clone(),
        estimated_duration: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML_SUITE: &str = r#"
node_id: auth
suite_name: "Auth Flow"
base_url: "http://localhost:8080"
exports: [token]
steps:
  - name: "Login"
    request:
      method: POST
      url: "/login"
    capture:
      token: "body.token"
"#;

    #[test]
    fn test_yaml_loader() {
        let document = YamlSuiteLoader.load(YAML_SUITE).unwrap();
        assert_eq!(document.node_id, "auth");
        assert_eq!(document.steps.len(), 1);
        assert_eq!(document.exports, vec!["token".to_string()]);
    }

    #[test]
    fn test_json_loader() {
        let content = serde_json::to_string(&json!({
            "node_id": "users",
            "suite_name": "Users",
            "steps": [{ "name": "List", "request": { "method": "GET", "url": "/users" } }]
        }))
        .unwrap();
        let document = JsonSuiteLoader.load(&content).unwrap();
        assert_eq!(document.node_id, "users");
    }

    #[test]
    fn test_schema_rejects_missing_fields() {
        let error = JsonSuiteLoader
            .load(r#"{ "suite_name": "No Node", "steps": [] }"#)
            .unwrap_err();
        assert!(error.to_string().contains("schema validation"));
    }

    #[test]
    fn test_schema_rejects_step_without_name() {
        let error = JsonSuiteLoader
            .load(r#"{ "node_id": "x", "suite_name": "X", "steps": [{}] }"#)
            .unwrap_err();
        assert!(error.to_string().contains("schema validation"));
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let error = YamlSuiteLoader.load(": not yaml: [").unwrap_err();
        assert!(error.to_string().contains("YAML"));
    }

    #[test]
    fn test_load_from_file_by_extension() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        file.write_all(YAML_SUITE.as_bytes()).unwrap();

        let loaded = load_suite_from_file(file.path()).unwrap();
        assert_eq!(loaded.document.node_id, "auth");
        assert!(loaded.raw_content.contains("Auth Flow"));

        let discovered = discovered_from_loaded(&loaded, file.path());
        assert_eq!(discovered.node_id, "auth");
        assert_eq!(discovered.exports, vec!["token".to_string()]);
    }
}
