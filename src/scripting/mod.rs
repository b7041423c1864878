//! # Módulo de Scripting
//!
//! Contrato do colaborador que executa expressões e blocos de script
//! (`{{$js:…}}`, `{{$js.…}}` e `pre_script`/`post_script`), mais o
//! contexto exposto aos scripts e os helpers de host (`crypto`,
//! `btoa`/`atob`).
//!
//! O motor **não embute** um interpretador: o contrato existe para que
//! um runtime sandboxed (sem acesso a processo, sistema de arquivos ou
//! rede) seja plugado de fora. O engine padrão (`NullScriptEngine`)
//! recusa qualquer execução com erro estruturado, e a interpolação deixa
//! o placeholder literal: um documento com scripts continua executável,
//! só sem essas substituições.

use crate::errors::ErrorCode;
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// CONTEXTO
// ============================================================================

/// Contexto entregue a um script.
///
/// `set_variable` é a única capability de escrita: os nomes gravados
/// aqui são mesclados ao escopo runtime pelo executor após o script.
#[derive(Debug, Default)]
pub struct ScriptContext {
    /// Detalhes da requisição interpolada (pre e post).
    pub request: Option<Value>,

    /// Detalhes da resposta (apenas post).
    pub response: Option<Value>,

    /// Visão mesclada das variáveis no momento da execução.
    pub variables: HashMap<String, Value>,

    exported: HashMap<String, Value>,
}

impl ScriptContext {
    pub fn new(variables: HashMap<String, Value>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    /// Capability de escrita exposta ao script.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.exported.insert(name.into(), value);
    }

    /// Variáveis gravadas pelo script, consumidas pelo executor.
    pub fn exported(&self) -> &HashMap<String, Value> {
        &self.exported
    }

    /// Consome o contexto devolvendo as variáveis gravadas.
    pub fn into_exported(self) -> HashMap<String, Value> {
        self.exported
    }
}

// ============================================================================
// CONTRATO
// ============================================================================

/// Colaborador de execução de scripts.
///
/// `is_block = false`: expressão única, sem `return`.
/// `is_block = true`: bloco multi-linha, `return` obrigatório.
/// O engine deve honrar `timeout_ms` internamente.
pub trait ScriptEngine: Send + Sync {
    fn execute(
        &self,
        code: &str,
        ctx: &mut ScriptContext,
        is_block: bool,
        timeout_ms: u64,
    ) -> Result<Value>;
}

/// Engine padrão: recusa execução.
///
/// A mensagem carrega o código estruturado para que relatórios e eventos
/// consigam classificar a falha sem parsear o texto.
#[derive(Debug, Default)]
pub struct NullScriptEngine;

impl ScriptEngine for NullScriptEngine {
    fn execute(
        &self,
        _code: &str,
        _ctx: &mut ScriptContext,
        _is_block: bool,
        _timeout_ms: u64,
    ) -> Result<Value> {
        Err(anyhow!(
            "{}: no script engine configured",
            ErrorCode::SCRIPT_ENGINE_MISSING
        ))
    }
}

// ============================================================================
// HELPERS DE HOST
// ============================================================================

/// Helpers expostos aos engines como namespaces de host (`crypto`,
/// `btoa`, `atob`). Também usados diretamente pelo motor.
pub mod helpers {
    use anyhow::{anyhow, Result};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use sha2::{Digest, Sha256};

    /// SHA-256 em hex minúsculo.
    pub fn sha256_hex(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{:02x}", byte)).collect()
    }

    /// Codifica em base64 (equivalente ao `btoa` de navegadores).
    pub fn btoa(data: &str) -> String {
        STANDARD.encode(data.as_bytes())
    }

    /// Decodifica base64 para string UTF-8.
    pub fn atob(data: &str) -> Result<String> {
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| anyhow!("invalid base64: {}", e))?;
        String::from_utf8(bytes).map_err(|e| anyhow!("decoded bytes are not UTF-8: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_engine_refuses() {
        let engine = NullScriptEngine;
        let mut ctx = ScriptContext::default();
        let result = engine.execute("return 1", &mut ctx, true, 5000);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("E7002"));
    }

    #[test]
    fn test_context_set_variable() {
        let mut ctx = ScriptContext::new(HashMap::from([("a".to_string(), json!(1))]));
        ctx.set_variable("token", json!("xyz"));
        assert_eq!(ctx.exported()["token"], json!("xyz"));
        assert_eq!(ctx.variables["a"], json!(1));

        let exported = ctx.into_exported();
        assert_eq!(exported.len(), 1);
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256("abc")
        assert_eq!(
            helpers::sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_base64_round_trip() {
        let encoded = helpers::btoa("user:pass");
        assert_eq!(encoded, "dXNlcjpwYXNz");
        assert_eq!(helpers::atob(&encoded).unwrap(), "user:pass");
    }

    #[test]
    fn test_atob_invalid_input() {
        assert!(helpers::atob("not base64!!").is_err());
    }
}
