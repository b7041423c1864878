//! # Módulo de Dados Falsos
//!
//! Contrato do colaborador de geração de dados (`{{$faker.…}}`) e um
//! provider embutido cobrindo os namespaces mais usados em suítes.
//!
//! O contrato é **síncrono** e com semântica de erro explícita: uma
//! expressão desconhecida retorna `Err`, e a interpolação deixa o
//! placeholder literal no template (nunca aborta o step).
//!
//! ## Expressões suportadas pelo provider embutido:
//!
//! | Expressão               | Exemplo de valor          |
//! |-------------------------|---------------------------|
//! | `person.firstName`      | "Maria"                   |
//! | `person.lastName`       | "Souza"                   |
//! | `person.fullName`       | "Maria Souza"             |
//! | `internet.email`        | "maria@example.com"       |
//! | `internet.userName`     | "maria_souza"             |
//! | `internet.ip`           | "192.168.0.10"            |
//! | `string.uuid`           | UUID v4                   |
//! | `string.alphanumeric`   | "x7Kp2"                   |
//! | `number.int`            | 0..=999                   |
//! | `number.int(min,max)`   | min..=max                 |
//! | `lorem.word`            | "dolor"                   |
//! | `lorem.sentence`        | "Lorem ipsum dolor."      |
//! | `company.name`          | "Acme Ltda"               |

use anyhow::{anyhow, Result};
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::{IPv4, SafeEmail, Username};
use fake::faker::lorem::en::{Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::Fake;
use rand::Rng;
use serde_json::{json, Value};

/// Colaborador de geração de dados falsos.
///
/// `parse` recebe a expressão sem o prefixo `$faker.` (ex.:
/// `person.firstName`) e devolve o valor gerado.
pub trait FakeDataProvider: Send + Sync {
    fn parse(&self, expression: &str) -> Result<Value>;
}

/// Provider embutido baseado na crate `fake`.
#[derive(Debug, Default)]
pub struct BuiltinFaker;

impl BuiltinFaker {
    pub fn new() -> Self {
        Self
    }
}

/// Separa `namespace.method(args)` em partes.
fn split_expression(expression: &str) -> (&str, Option<&str>) {
    match expression.find('(') {
        Some(open) if expression.ends_with(')') => {
            let args = &expression[open + 1..expression.len() - 1];
            (&expression[..open], Some(args))
        }
        _ => (expression, None),
    }
}

impl FakeDataProvider for BuiltinFaker {
    fn parse(&self, expression: &str) -> Result<Value> {
        let (name, args) = split_expression(expression.trim());

        let value = match name {
            "person.firstName" => json!(FirstName().fake::<String>()),
            "person.lastName" => json!(LastName().fake::<String>()),
            "person.fullName" | "person.name" => json!(Name().fake::<String>()),
            "internet.email" => json!(SafeEmail().fake::<String>()),
            "internet.userName" | "internet.username" => json!(Username().fake::<String>()),
            "internet.ip" => json!(IPv4().fake::<String>()),
            "string.uuid" | "datatype.uuid" => json!(uuid::Uuid::new_v4().to_string()),
            "string.alphanumeric" => {
                let length = args
                    .and_then(|raw| raw.trim().parse::<usize>().ok())
                    .unwrap_or(8);
                let mut rng = rand::thread_rng();
                let alphabet: Vec<char> = ('a'..='z').chain('A'..='Z').chain('0'..='9').collect();
                let generated: String = (0..length)
                    .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                    .collect();
                json!(generated)
            }
            "number.int" | "datatype.number" => {
                let (min, max) = parse_int_range(args)?;
                json!(rand::thread_rng().gen_range(min..=max))
            }
            "lorem.word" => json!(Word().fake::<String>()),
            "lorem.sentence" => json!(Sentence(3..8).fake::<String>()),
            "company.name" => json!(CompanyName().fake::<String>()),
            other => {
                return Err(anyhow!("unknown fake-data expression '{}'", other));
            }
        };

        Ok(value)
    }
}

/// Parseia `min,max` (default `0,999`). `min > max` é erro.
fn parse_int_range(args: Option<&str>) -> Result<(i64, i64)> {
    let Some(raw) = args else {
        return Ok((0, 999));
    };
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 2 {
        return Err(anyhow!("number.int expects 'min,max', got '{}'", raw));
    }
    let min: i64 = parts[0]
        .parse()
        .map_err(|_| anyhow!("invalid min '{}'", parts[0]))?;
    let max: i64 = parts[1]
        .parse()
        .map_err(|_| anyhow!("invalid max '{}'", parts[1]))?;
    if min > max {
        return Err(anyhow!("number.int range is inverted: {} > {}", min, max));
    }
    Ok((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_namespace() {
        let faker = BuiltinFaker::new();
        let first = faker.parse("person.firstName").unwrap();
        assert!(first.as_str().map(|s| !s.is_empty()).unwrap_or(false));

        let full = faker.parse("person.fullName").unwrap();
        assert!(full.as_str().unwrap().contains(' '));
    }

    #[test]
    fn test_email_shape() {
        let faker = BuiltinFaker::new();
        let email = faker.parse("internet.email").unwrap();
        assert!(email.as_str().unwrap().contains('@'));
    }

    #[test]
    fn test_uuid_shape() {
        let faker = BuiltinFaker::new();
        let id = faker.parse("string.uuid").unwrap();
        let id = id.as_str().unwrap();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }

    #[test]
    fn test_number_int_default_and_ranged() {
        let faker = BuiltinFaker::new();
        let n = faker.parse("number.int").unwrap();
        let n = n.as_i64().unwrap();
        assert!((0..=999).contains(&n));

        for _ in 0..20 {
            let n = faker.parse("number.int(5,7)").unwrap().as_i64().unwrap();
            assert!((5..=7).contains(&n));
        }
    }

    #[test]
    fn test_number_int_inverted_range_fails() {
        let faker = BuiltinFaker::new();
        assert!(faker.parse("number.int(10,1)").is_err());
    }

    #[test]
    fn test_alphanumeric_length() {
        let faker = BuiltinFaker::new();
        let value = faker.parse("string.alphanumeric(12)").unwrap();
        assert_eq!(value.as_str().unwrap().len(), 12);
    }

    #[test]
    fn test_unknown_expression_is_error() {
        let faker = BuiltinFaker::new();
        assert!(faker.parse("galaxy.planet").is_err());
    }
}
