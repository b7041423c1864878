//! # Módulo de Protocolo - Estruturas de Dados das Suítes
//!
//! Este módulo define todas as **estruturas de dados** que representam
//! uma suíte de testes declarativa e os resultados da sua execução.
//!
//! ## O que é uma suíte?
//!
//! Uma suíte é um documento estruturado (YAML ou JSON) que descreve:
//! - **O quê** testar (requisições HTTP, entradas interativas)
//! - **Como** validar (assertions sobre a resposta)
//! - **O que** capturar (variáveis para steps e suítes seguintes)
//! - **De quem** depende (outras suítes, por `node_id` ou caminho)
//!
//! ## Estrutura de uma suíte:
//!
//! ```yaml
//! node_id: auth
//! suite_name: "Authentication Flow"
//! base_url: "https://api.example.com"
//! variables:
//!   username: admin
//! exports: [token]
//! depends:
//!   - node_id: setup
//! steps:
//!   - name: "Login"
//!     request:
//!       method: POST
//!       url: "/login"
//!       body: { "user": "{{username}}" }
//!     assert:
//!       status_code: 200
//!     capture:
//!       token: "body.token"
//! ```
//!
//! ## Hierarquia de tipos:
//!
//! ```text
//! SuiteDocument
//! ├── DependsRef[] (dependências entre suítes)
//! └── Step[] (lista de passos)
//!     ├── RequestSpec | InputSpec | CallSpec (exatamente um)
//!     ├── AssertionSpec (validações)
//!     ├── capture (extração de dados)
//!     ├── ScenarioSpec[] (ramos condicionais)
//!     └── IterationSpec (expansão por array ou range)
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

// ============================================================================
// DOCUMENTO DE SUÍTE
// ============================================================================

/// Documento completo de uma suíte de testes.
///
/// Esta é a estrutura raiz ingerida pelo loader. Corresponde ao conteúdo
/// integral do arquivo `.yaml`/`.json` da suíte. Imutável durante um run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuiteDocument {
    /// Identificador estável e único da suíte dentro de um run.
    ///
    /// Usado como nó no grafo de dependências e como namespace
    /// dos exports (`node_id.variavel`).
    pub node_id: String,

    /// Nome legível da suíte, usado em logs e relatórios.
    pub suite_name: String,

    /// URL base para requisições com caminho relativo.
    ///
    /// Pode conter placeholders (`{{api_host}}`), interpolados
    /// no início da execução da suíte.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Variáveis de escopo da suíte.
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Dependências declaradas (por `node_id` ou por caminho de arquivo).
    #[serde(default)]
    pub depends: Vec<DependsRef>,

    /// Nomes de variáveis publicadas no registro global após sucesso.
    ///
    /// Um export declarado mas ausente do runtime gera warning.
    #[serde(default)]
    pub exports: Vec<String>,

    /// Exports opcionais: publicados se presentes, ignorados em silêncio
    /// caso contrário.
    #[serde(default)]
    pub exports_optional: Vec<String>,

    /// Passos executados em ordem de declaração.
    pub steps: Vec<Step>,
}

/// Referência de dependência entre suítes.
///
/// Pelo menos um de `node_id`/`path` deve estar presente. Após a resolução
/// pelo grafo, `node_id` é reescrito para a forma canônica.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DependsRef {
    /// Identificador do nó alvo (resolução exata).
    #[serde(default)]
    pub node_id: Option<String>,

    /// Caminho do arquivo da suíte alvo (resolução por path).
    #[serde(default)]
    pub path: Option<String>,

    /// Como interpretar `path`: relativo ao diretório da suíte de origem
    /// ou absoluto em relação à raiz de testes configurada.
    #[serde(default)]
    pub path_type: PathKind,
}

/// Interpretação do campo `path` de uma dependência.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    /// Relativo ao diretório da suíte que declara a dependência.
    #[default]
    Relative,
    /// Resolvido contra a raiz de testes configurada.
    Absolute,
}

/// Registro de uma suíte descoberta, como entregue pelo colaborador
/// de discovery. É a unidade que o orquestrador recebe.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveredSuite {
    /// Identificador estável do nó.
    pub node_id: String,

    /// Nome legível.
    pub suite_name: String,

    /// Caminho do arquivo de origem.
    pub file_path: PathBuf,

    /// Exports declarados (usados para registrar o nó antes de executar).
    #[serde(default)]
    pub exports: Vec<String>,

    /// Exports opcionais declarados.
    #[serde(default)]
    pub exports_optional: Vec<String>,

    /// Prioridade opcional informada pelo discovery.
    #[serde(default)]
    pub priority: Option<i32>,

    /// Dependências declaradas. O resolver canonicaliza `node_id` in place.
    #[serde(default)]
    pub depends: Vec<DependsRef>,

    /// Estimativa de duração em ms, quando o discovery a conhece.
    #[serde(default)]
    pub estimated_duration: Option<u64>,
}

// ============================================================================
// STEP
// ============================================================================

/// Um passo de execução dentro de uma suíte.
///
/// Cada step carrega **exatamente um** de `{request, input, call}`
/// (validado antes da execução), mais validações, capturas, cenários,
/// iteração e scripts opcionais.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Step {
    /// Nome legível do step. Base do `step_id` derivado quando o campo
    /// explícito está ausente.
    pub name: String,

    /// Identificador estável opcional. Quando ausente, o executor deriva
    /// um slug normalizado do nome (prefixado pelo índice em colisões).
    #[serde(default)]
    pub step_id: Option<String>,

    /// Requisição HTTP a executar.
    #[serde(default)]
    pub request: Option<RequestSpec>,

    /// Entrada interativa (incompatível com execução paralela).
    #[serde(default)]
    pub input: Option<InputSpec>,

    /// Invocação de outro step (da própria suíte ou de outro documento).
    #[serde(default)]
    pub call: Option<CallSpec>,

    /// Validações sobre a resposta.
    #[serde(default)]
    pub assert: Option<AssertionSpec>,

    /// Capturas: nome da variável → expressão de extração.
    #[serde(default)]
    pub capture: Option<IndexMap<String, Value>>,

    /// Ramos condicionais avaliados contra o contexto da resposta.
    #[serde(default)]
    pub scenarios: Vec<ScenarioSpec>,

    /// Expansão do step por array ou range numérico.
    #[serde(default)]
    pub iterate: Option<IterationSpec>,

    /// Pausa antes do dispatch: número de ms, template, ou `{min, max}`.
    #[serde(default)]
    pub delay: Option<Value>,

    /// Se true, uma falha deste step não derruba a suíte.
    #[serde(default)]
    pub continue_on_failure: bool,

    /// Script executado antes do dispatch.
    #[serde(default)]
    pub pre_script: Option<ScriptSpec>,

    /// Script executado após a resposta.
    #[serde(default)]
    pub post_script: Option<ScriptSpec>,
}

impl Step {
    /// Retorna quantos tipos de ação (`request`/`input`/`call`) o step
    /// declara. O valor válido é exatamente 1 (ou 0 quando há cenários
    /// com requisições próprias).
    pub fn action_count(&self) -> usize {
        [
            self.request.is_some(),
            self.input.is_some(),
            self.call.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// Slug normalizado de um nome de step: minúsculas, alfanuméricos ASCII
/// preservados, qualquer outra sequência vira um único `-`.
pub fn step_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("step");
    }
    slug
}

// ============================================================================
// REQUISIÇÃO HTTP
// ============================================================================

/// Especificação de uma requisição HTTP.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestSpec {
    /// Método HTTP (GET, POST, PUT, DELETE, PATCH, ...).
    pub method: String,

    /// URL absoluta, ou caminho relativo concatenado à `base_url` da suíte.
    pub url: String,

    /// Headers da requisição. Valores passam por interpolação.
    #[serde(default)]
    pub headers: IndexMap<String, Value>,

    /// Body da requisição: JSON, formulário ou texto cru.
    #[serde(default)]
    pub body: Option<BodySpec>,

    /// Parâmetros de query anexados à URL (URL-encoded).
    #[serde(default)]
    pub query_params: IndexMap<String, Value>,

    /// Timeout específico deste step, em ms. Precedência:
    /// step > suíte > configuração.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Nome do certificado TLS a usar, resolvido pelo cliente HTTP
    /// contra os certificados registrados na configuração.
    #[serde(default)]
    pub certificate: Option<String>,

    /// Autenticação embutida.
    #[serde(default)]
    pub auth: Option<AuthSpec>,
}

/// Body de requisição em um dos três formatos aceitos.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BodySpec {
    /// `body: { form: {campo: valor} }` → application/x-www-form-urlencoded
    Form { form: IndexMap<String, Value> },
    /// `body: { raw: "texto" }` → enviado como está
    Raw { raw: String },
    /// Qualquer outro valor JSON → application/json
    Json(Value),
}

/// Autenticação declarada na requisição.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthSpec {
    /// Basic auth: header `Authorization: Basic base64(user:pass)`.
    #[serde(default)]
    pub basic: Option<BasicAuth>,

    /// Bearer token: header `Authorization: Bearer <token>`.
    #[serde(default)]
    pub bearer: Option<String>,
}

/// Credenciais de basic auth.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

// ============================================================================
// INPUT INTERATIVO E CALL
// ============================================================================

/// Entrada interativa solicitada ao operador durante a execução.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputSpec {
    /// Texto exibido ao operador. Passa por interpolação.
    pub prompt: String,

    /// Nome da variável de runtime que recebe o valor informado.
    pub variable: String,

    /// Se true, o valor é lido sem eco (senhas, tokens).
    #[serde(default)]
    pub masked: bool,

    /// Valor usado quando o operador confirma sem digitar nada.
    #[serde(default)]
    pub default: Option<Value>,
}

/// Invocação de um step nomeado, da própria suíte ou de outro documento.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallSpec {
    /// Caminho de outro documento de suíte. Ausente = suíte corrente.
    #[serde(default)]
    pub suite: Option<String>,

    /// `step_id` (ou slug do nome) do step alvo.
    pub step: String,

    /// Variáveis sobrepostas ao runtime antes da invocação.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

// ============================================================================
// SCRIPTS
// ============================================================================

/// Script pré/pós-step: código inline ou arquivo.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ScriptSpec {
    /// Forma curta: o próprio código.
    Inline(String),
    /// Forma completa com opções.
    Detailed(ScriptDetail),
}

/// Forma detalhada de um script de step.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptDetail {
    /// Código inline. Exclusivo com `script_file`.
    #[serde(default)]
    pub code: Option<String>,

    /// Caminho de arquivo com o código. Exclusivo com `code`.
    #[serde(default)]
    pub script_file: Option<String>,

    /// Se true, uma falha do script não falha o step.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Timeout específico deste script, em ms.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ScriptSpec {
    /// Normaliza a forma curta para a detalhada.
    pub fn detail(&self) -> ScriptDetail {
        match self {
            ScriptSpec::Inline(code) => ScriptDetail {
                code: Some(code.clone()),
                script_file: None,
                continue_on_error: false,
                timeout_ms: None,
            },
            ScriptSpec::Detailed(detail) => detail.clone(),
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

/// Bloco `assert` de um step ou de um ramo de cenário.
///
/// O mapeamento associa um caminho de campo (`status_code`,
/// `response_time_ms`, `size_bytes`, `headers.<nome>`, `body.<jmespath>`)
/// a um conjunto de checks. `custom` carrega condições nomeadas avaliadas
/// como expressões de cenário.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AssertionSpec {
    /// Condições nomeadas: `{name, condition, message}`.
    #[serde(default)]
    pub custom: Vec<CustomCheck>,

    /// Campo → checks. Um escalar puro é açúcar para `{equals: escalar}`.
    #[serde(flatten)]
    pub checks: IndexMap<String, CheckSpec>,
}

impl AssertionSpec {
    /// True quando não há nenhum check nem condição custom.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty() && self.custom.is_empty()
    }

    /// Mescla outro bloco neste (checks e customs anexados ao final).
    /// Usado pela acumulação de cenários.
    pub fn merge(&mut self, other: &AssertionSpec) {
        for (field, check) in &other.checks {
            self.checks.insert(field.clone(), check.clone());
        }
        self.custom.extend(other.custom.iter().cloned());
    }
}

/// Check de um campo: conjunto explícito ou escalar (açúcar de `equals`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CheckSpec {
    /// Conjunto de checks: `{equals: ..., type: ..., length: ...}`.
    Set(CheckSet),
    /// Escalar puro: `status_code: 200` ≡ `status_code: {equals: 200}`.
    Bare(Value),
}

impl CheckSpec {
    /// Normaliza o açúcar sintático para um `CheckSet`.
    pub fn as_set(&self) -> CheckSet {
        match self {
            CheckSpec::Set(set) => set.clone(),
            CheckSpec::Bare(value) => CheckSet {
                equals: Some(value.clone()),
                ..CheckSet::default()
            },
        }
    }
}

/// Conjunto de checks aplicáveis a um campo.
///
/// Qualquer subconjunto pode estar presente; todos os presentes são
/// avaliados e cada um gera um resultado individual.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CheckSet {
    #[serde(default)]
    pub equals: Option<Value>,

    #[serde(default)]
    pub not_equals: Option<Value>,

    /// Substring (strings), elemento (arrays) ou chave (objetos).
    #[serde(default)]
    pub contains: Option<Value>,

    /// Expressão regular aplicada à forma string do valor.
    #[serde(default)]
    pub regex: Option<String>,

    #[serde(default)]
    pub greater_than: Option<f64>,

    #[serde(default)]
    pub less_than: Option<f64>,

    /// Tipo esperado: string|number|boolean|array|object|null.
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,

    /// Checks sobre o comprimento (strings, arrays, objetos).
    #[serde(default)]
    pub length: Option<LengthSpec>,

    /// Existência do campo (true = deve existir, false = não deve).
    #[serde(default)]
    pub exists: Option<bool>,
}

/// Check de comprimento: número puro (igualdade) ou conjunto.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum LengthSpec {
    Checks(LengthCheck),
    Exact(usize),
}

/// Conjunto de comparações de comprimento.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LengthCheck {
    #[serde(default)]
    pub equals: Option<usize>,

    #[serde(default)]
    pub greater_than: Option<usize>,

    #[serde(default)]
    pub less_than: Option<usize>,
}

impl LengthSpec {
    /// Normaliza a forma curta para `LengthCheck`.
    pub fn as_check(&self) -> LengthCheck {
        match self {
            LengthSpec::Exact(n) => LengthCheck {
                equals: Some(*n),
                ..LengthCheck::default()
            },
            LengthSpec::Checks(check) => check.clone(),
        }
    }
}

/// Condição nomeada avaliada contra o contexto da resposta.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomCheck {
    pub name: String,

    /// Expressão no mesmo dialeto das condições de cenário.
    pub condition: String,

    /// Mensagem exibida quando a condição não se sustenta.
    #[serde(default)]
    pub message: Option<String>,
}

// ============================================================================
// CENÁRIOS
// ============================================================================

/// Ramo condicional de um step.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioSpec {
    /// Predicado avaliado contra o contexto da resposta.
    pub condition: String,

    /// Bloco executado quando a condição é verdadeira.
    #[serde(default)]
    pub then: Option<ScenarioBlock>,

    /// Bloco executado quando a condição é falsa.
    #[serde(default, rename = "else")]
    pub otherwise: Option<ScenarioBlock>,
}

/// Conteúdo de um ramo de cenário.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScenarioBlock {
    /// Requisição própria do ramo (apenas na forma sem request no step).
    #[serde(default)]
    pub request: Option<RequestSpec>,

    /// Assertions adicionais mescladas às do step.
    #[serde(default)]
    pub assert: Option<AssertionSpec>,

    /// Capturas adicionais mescladas às do step.
    #[serde(default)]
    pub capture: Option<IndexMap<String, Value>>,

    /// Variáveis estáticas gravadas no runtime.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

// ============================================================================
// ITERAÇÕES
// ============================================================================

/// Expansão de um step em múltiplas execuções.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum IterationSpec {
    /// Itera sobre um array (valor literal ou template que resolve
    /// para array).
    Over {
        over: Value,
        #[serde(rename = "as")]
        binding: String,
    },
    /// Range numérico inclusivo `"a..b"` com `a ≤ b`.
    Range {
        range: String,
        #[serde(rename = "as")]
        binding: String,
    },
}

impl IterationSpec {
    /// Nome da variável de iteração.
    pub fn binding(&self) -> &str {
        match self {
            IterationSpec::Over { binding, .. } => binding,
            IterationSpec::Range { binding, .. } => binding,
        }
    }
}

// ============================================================================
// TIPOS DE VALOR
// ============================================================================

/// Tipo de um valor JSON, para o check `type` e para relatórios.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl ValueType {
    /// Detecta o tipo de um `serde_json::Value`.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(_) => ValueType::String,
            Value::Number(_) => ValueType::Number,
            Value::Bool(_) => ValueType::Boolean,
            Value::Array(_) => ValueType::Array,
            Value::Object(_) => ValueType::Object,
            Value::Null => ValueType::Null,
        }
    }

    /// Nome canônico usado nos documentos de suíte.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Null => "null",
        }
    }
}

// ============================================================================
// RESULTADOS
// ============================================================================

/// Status final de um step ou de uma suíte.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Tudo executou e todas as validações passaram.
    Success,
    /// Erro de execução ou validação que não se sustentou.
    Failure,
    /// Não executado (filtro de steps, cenário sem match, dependência).
    Skipped,
}

/// Detalhes da requisição efetivamente enviada.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestDetails {
    pub method: String,

    /// URL efetiva após join com a base e query params.
    pub url: String,

    /// Template de URL antes do join com a `base_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_url: Option<String>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Detalhes da resposta recebida.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponseDetails {
    pub status_code: u16,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Body parseado como JSON quando o content-type permite;
    /// caso contrário, a string crua.
    pub body: Value,

    /// Tamanho do body em bytes.
    pub size_bytes: u64,
}

/// Resultado da troca HTTP, como devolvido pelo colaborador de transporte.
#[derive(Debug, Clone, Serialize)]
pub struct HttpExchange {
    pub request_details: RequestDetails,

    /// Presente mesmo em falhas parciais (ex.: status 500 recebido).
    pub response_details: Option<ResponseDetails>,

    pub duration_ms: u64,

    pub status: RunStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Resultado individual de um check de assertion.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssertionOutcome {
    /// Campo validado, com o check anexado (`status_code.equals`).
    pub field: String,

    pub expected: Value,

    pub actual: Value,

    pub passed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Registro de avaliação de um cenário.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioEvaluation {
    pub index: usize,

    pub condition: String,

    /// Resultado do predicado.
    pub matched: bool,

    /// Ramo executado: "then", "else" ou nenhum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    pub executed: bool,
}

/// Meta-registro dos cenários de um step.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenariosMeta {
    pub evaluations: Vec<ScenarioEvaluation>,

    /// Quantos ramos efetivamente executaram.
    pub executed_count: usize,
}

/// Resultado de uma iteração individual de um step expandido.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IterationRecord {
    pub index: usize,

    /// Valor do binding nesta iteração.
    pub value: Value,

    pub status: RunStatus,

    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Resultado da execução de um step.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepResult {
    pub step_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,

    /// `<node_id>::<step_id>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_step_id: Option<String>,

    pub status: RunStatus,

    pub duration_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_details: Option<RequestDetails>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_details: Option<ResponseDetails>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertions_results: Option<Vec<AssertionOutcome>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_variables: Option<IndexMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenarios_meta: Option<ScenariosMeta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_results: Option<Vec<IterationRecord>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StepResult {
    /// Esqueleto de resultado com os identificadores preenchidos.
    pub fn shell(step_name: &str, step_id: Option<String>, qualified: Option<String>) -> Self {
        Self {
            step_name: step_name.to_string(),
            step_id,
            qualified_step_id: qualified,
            status: RunStatus::Success,
            duration_ms: 0,
            request_details: None,
            response_details: None,
            assertions_results: None,
            captured_variables: None,
            scenarios_meta: None,
            iteration_results: None,
            error_message: None,
        }
    }
}

/// Resultado da execução de uma suíte completa.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuiteResult {
    pub node_id: String,

    pub suite_name: String,

    pub file_path: String,

    /// Início em RFC3339.
    pub start_time: String,

    /// Fim em RFC3339.
    pub end_time: String,

    pub duration_ms: u64,

    pub status: RunStatus,

    pub steps_executed: usize,

    pub steps_successful: usize,

    pub steps_failed: usize,

    /// successful/total × 100, arredondado a 2 casas.
    pub success_rate: f64,

    pub steps_results: Vec<StepResult>,

    /// Variáveis capturadas durante a suíte.
    #[serde(default)]
    pub variables_captured: HashMap<String, Value>,

    /// Visão filtrada das variáveis disponíveis ao fim da suíte
    /// (sem nomes derivados do ambiente).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_variables: Option<HashMap<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Conteúdo cru do documento, quando o loader o fornece.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_yaml_content: Option<String>,
}

/// Contadores agregados de um run, atualizados pelo orquestrador.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExecutionStats {
    pub discovered: usize,
    pub completed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub requests_made: usize,
    pub total_response_time_ms: u64,

    /// Suíte em execução no momento, para UIs de progresso.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_test: Option<String>,
}

// ============================================================================
// CONTEXTO DE RESPOSTA
// ============================================================================

/// Contexto contra o qual capturas, assertions e condições de cenário
/// são avaliadas.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub duration_ms: u64,
    pub size_bytes: u64,
    pub step_status: RunStatus,
}

impl ResponseContext {
    /// Constrói o contexto a partir de uma troca HTTP.
    pub fn from_exchange(exchange: &HttpExchange, step_status: RunStatus) -> Self {
        let (status_code, headers, body, size_bytes) = match &exchange.response_details {
            Some(resp) => (
                resp.status_code,
                resp.headers.clone(),
                resp.body.clone(),
                resp.size_bytes,
            ),
            None => (0, HashMap::new(), Value::Null, 0),
        };
        Self {
            status_code,
            headers,
            body,
            duration_ms: exchange.duration_ms,
            size_bytes,
            step_status,
        }
    }

    /// Contexto vazio, para steps sem requisição.
    pub fn empty(step_status: RunStatus) -> Self {
        Self {
            status_code: 0,
            headers: HashMap::new(),
            body: Value::Null,
            duration_ms: 0,
            size_bytes: 0,
            step_status,
        }
    }

    /// Representação JSON usada pelas expressões JMESPath.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "status_code": self.status_code,
            "headers": self.headers,
            "body": self.body,
            "duration_ms": self.duration_ms,
            "response_time_ms": self.duration_ms,
            "size_bytes": self.size_bytes,
            "step_status": match self.step_status {
                RunStatus::Success => "success",
                RunStatus::Failure => "failure",
                RunStatus::Skipped => "skipped",
            },
        })
    }
}

// ============================================================================
// TESTES
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_suite_document_minimal() {
        let doc: SuiteDocument = serde_json::from_value(json!({
            "node_id": "auth",
            "suite_name": "Auth Flow",
            "steps": [
                { "name": "Login", "request": { "method": "POST", "url": "/login" } }
            ]
        }))
        .unwrap();

        assert_eq!(doc.node_id, "auth");
        assert!(doc.base_url.is_none());
        assert!(doc.depends.is_empty());
        assert_eq!(doc.steps.len(), 1);
        assert_eq!(doc.steps[0].action_count(), 1);
    }

    #[test]
    fn test_depends_ref_path_type_default() {
        let dep: DependsRef = serde_json::from_value(json!({ "path": "../setup.yaml" })).unwrap();
        assert_eq!(dep.path_type, PathKind::Relative);

        let dep: DependsRef =
            serde_json::from_value(json!({ "path": "setup.yaml", "path_type": "absolute" }))
                .unwrap();
        assert_eq!(dep.path_type, PathKind::Absolute);
    }

    #[test]
    fn test_check_spec_bare_scalar_is_equals_sugar() {
        let spec: CheckSpec = serde_json::from_value(json!(200)).unwrap();
        let set = spec.as_set();
        assert_eq!(set.equals, Some(json!(200)));
        assert!(set.not_equals.is_none());
    }

    #[test]
    fn test_check_spec_full_set() {
        let spec: CheckSpec = serde_json::from_value(json!({
            "not_equals": 500,
            "greater_than": 199.0,
            "less_than": 300.0,
            "type": "number"
        }))
        .unwrap();
        let set = spec.as_set();
        assert_eq!(set.not_equals, Some(json!(500)));
        assert_eq!(set.greater_than, Some(199.0));
        assert_eq!(set.value_type.as_deref(), Some("number"));
    }

    #[test]
    fn test_length_spec_exact_sugar() {
        let spec: LengthSpec = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(spec.as_check().equals, Some(3));

        let spec: LengthSpec = serde_json::from_value(json!({ "greater_than": 1 })).unwrap();
        let check = spec.as_check();
        assert!(check.equals.is_none());
        assert_eq!(check.greater_than, Some(1));
    }

    #[test]
    fn test_assertion_spec_flatten_with_custom() {
        let spec: AssertionSpec = serde_json::from_value(json!({
            "status_code": 200,
            "body.token": { "exists": true },
            "custom": [
                { "name": "fast", "condition": "duration_ms < `500`", "message": "too slow" }
            ]
        }))
        .unwrap();

        assert_eq!(spec.checks.len(), 2);
        assert_eq!(spec.custom.len(), 1);
        assert_eq!(spec.custom[0].name, "fast");
    }

    #[test]
    fn test_body_spec_variants() {
        let body: BodySpec = serde_json::from_value(json!({ "form": { "a": "1" } })).unwrap();
        assert!(matches!(body, BodySpec::Form { .. }));

        let body: BodySpec = serde_json::from_value(json!({ "raw": "plain text" })).unwrap();
        assert!(matches!(body, BodySpec::Raw { .. }));

        let body: BodySpec = serde_json::from_value(json!({ "user": "ana" })).unwrap();
        assert!(matches!(body, BodySpec::Json(_)));
    }

    #[test]
    fn test_iteration_spec_variants() {
        let it: IterationSpec =
            serde_json::from_value(json!({ "range": "1..3", "as": "i" })).unwrap();
        assert!(matches!(it, IterationSpec::Range { .. }));
        assert_eq!(it.binding(), "i");

        let it: IterationSpec =
            serde_json::from_value(json!({ "over": "{{items}}", "as": "item" })).unwrap();
        assert!(matches!(it, IterationSpec::Over { .. }));
        assert_eq!(it.binding(), "item");
    }

    #[test]
    fn test_scenario_else_rename() {
        let scenario: ScenarioSpec = serde_json::from_value(json!({
            "condition": "status_code == `200`",
            "then": { "variables": { "ok": true } },
            "else": { "variables": { "fallback": true } }
        }))
        .unwrap();

        assert!(scenario.then.is_some());
        assert!(scenario.otherwise.is_some());
    }

    #[test]
    fn test_step_slug_normalization() {
        assert_eq!(step_slug("Login com sucesso"), "login-com-sucesso");
        assert_eq!(step_slug("  GET /users?id=1  "), "get-users-id-1");
        assert_eq!(step_slug("***"), "step");
    }

    #[test]
    fn test_step_action_count() {
        let step: Step = serde_json::from_value(json!({
            "name": "ask",
            "input": { "prompt": "Token?", "variable": "token" }
        }))
        .unwrap();
        assert_eq!(step.action_count(), 1);

        let step: Step = serde_json::from_value(json!({ "name": "empty" })).unwrap();
        assert_eq!(step.action_count(), 0);
    }

    #[test]
    fn test_suite_result_round_trip() {
        let result = SuiteResult {
            node_id: "a".into(),
            suite_name: "A".into(),
            file_path: "a.yaml".into(),
            start_time: "2026-01-01T00:00:00Z".into(),
            end_time: "2026-01-01T00:00:01Z".into(),
            duration_ms: 1000,
            status: RunStatus::Success,
            steps_executed: 2,
            steps_successful: 2,
            steps_failed: 0,
            success_rate: 100.0,
            steps_results: vec![],
            variables_captured: HashMap::from([("token".to_string(), json!("abc"))]),
            available_variables: None,
            error_message: None,
            suite_yaml_content: None,
        };

        let text = serde_json::to_string(&result).unwrap();
        let parsed: SuiteResult = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.node_id, result.node_id);
        assert_eq!(parsed.success_rate, result.success_rate);
        assert_eq!(parsed.variables_captured["token"], json!("abc"));
    }

    #[test]
    fn test_response_context_to_value() {
        let ctx = ResponseContext {
            status_code: 200,
            headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: json!({ "ok": true }),
            duration_ms: 42,
            size_bytes: 11,
            step_status: RunStatus::Success,
        };

        let value = ctx.to_value();
        assert_eq!(value["status_code"], json!(200));
        assert_eq!(value["body"]["ok"], json!(true));
        assert_eq!(value["duration_ms"], json!(42));
        assert_eq!(value["step_status"], json!("success"));
    }

    #[test]
    fn test_value_type_detection() {
        assert_eq!(ValueType::from_value(&json!("x")), ValueType::String);
        assert_eq!(ValueType::from_value(&json!(1.5)), ValueType::Number);
        assert_eq!(ValueType::from_value(&json!([1])), ValueType::Array);
        assert_eq!(ValueType::from_value(&json!(null)), ValueType::Null);
        assert_eq!(ValueType::Boolean.name(), "boolean");
    }
}
