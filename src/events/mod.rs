//! # Módulo de Eventos - Stream em Tempo Real
//!
//! Barramento de eventos **injetado** (nunca um singleton de processo):
//! o orquestrador recebe um handle na construção, e múltiplos motores
//! podem coexistir no mesmo processo com streams independentes.
//!
//! ## Estrutura:
//!
//! - **Buffer circular** limitado (padrão 500 eventos) para consulta
//!   retrospectiva com limite
//! - **Fan-out** via `tokio::sync::broadcast` para assinantes ao vivo
//!   (assinantes lentos perdem eventos, nunca bloqueiam o motor)
//! - **Sessões por run-id**: todo evento carrega o run que o emitiu
//! - **Sanitização**: metadados são clonados em profundidade e erros
//!   viram `{message, stack}` serializáveis
//! - **Saída JSONL** opcional: um objeto JSON por linha
//!
//! Eventos: `run_started`, `run_completed`, `run_error`, `suite_*`,
//! `step_*` e `log`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Capacidade padrão do buffer circular.
pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

/// Severidade de um evento.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Tipo de evento do ciclo de vida.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    RunCompleted,
    RunError,
    SuiteStarted,
    SuiteCompleted,
    StepStarted,
    StepCompleted,
    Log,
}

/// Evento estruturado emitido pelo motor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Identificador único do evento.
    pub id: String,

    /// Sequência monotônica dentro do stream.
    pub sequence: u64,

    /// Instante de emissão em RFC3339.
    pub timestamp: String,

    pub level: EventLevel,

    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Run que emitiu o evento.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,

    /// Contexto (suíte/step) do evento.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Metadados sanitizados.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// Filtro de consulta/assinatura.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restringe a um run específico.
    pub run_id: Option<String>,

    /// Severidade mínima.
    pub min_level: Option<EventLevel>,
}

impl EventFilter {
    pub fn matches(&self, event: &RunEvent) -> bool {
        if let Some(run_id) = &self.run_id {
            if event.run.as_deref() != Some(run_id.as_str()) {
                return false;
            }
        }
        if let Some(min_level) = self.min_level {
            if event.level < min_level {
                return false;
            }
        }
        true
    }
}

/// Stream de eventos de um run.
pub struct EventStream {
    run_id: String,
    capacity: usize,
    buffer: Mutex<VecDeque<RunEvent>>,
    sender: broadcast::Sender<RunEvent>,
    sequence: AtomicU64,
}

impl EventStream {
    /// Novo stream com run-id gerado.
    pub fn new(capacity: usize) -> Arc<Self> {
        Self::with_run_id(Uuid::new_v4().to_string(), capacity)
    }

    pub fn with_run_id(run_id: String, capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Arc::new(Self {
            run_id,
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            sender,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emite um evento: entra no buffer circular e no fan-out.
    pub fn emit(
        &self,
        level: EventLevel,
        kind: EventKind,
        context: Option<String>,
        extra: Option<Value>,
    ) {
        let event = RunEvent {
            id: Uuid::new_v4().to_string(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now().to_rfc3339(),
            level,
            kind,
            run: Some(self.run_id.clone()),
            context,
            extra: extra.map(sanitize),
        };

        if let Ok(mut buffer) = self.buffer.lock() {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }

        // Sem assinantes não é erro.
        let _ = self.sender.send(event);
    }

    /// Assinatura ao vivo (sem filtro; o filtro aplica-se no consumo).
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }

    /// Consulta retrospectiva: os últimos `limit` eventos que casam
    /// com o filtro, em ordem de emissão.
    pub fn query(&self, filter: &EventFilter, limit: usize) -> Vec<RunEvent> {
        let buffer = match self.buffer.lock() {
            Ok(buffer) => buffer,
            Err(_) => return Vec::new(),
        };
        let matched: Vec<RunEvent> = buffer
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        let skip = matched.len().saturating_sub(limit);
        matched.into_iter().skip(skip).collect()
    }
}

// ============================================================================
// SANITIZAÇÃO
// ============================================================================

/// Clona metadados em profundidade, limitando strings gigantes para que
/// o buffer não retenha bodies inteiros.
pub fn sanitize(value: Value) -> Value {
    const MAX_STRING: usize = 4096;
    match value {
        Value::String(s) if s.len() > MAX_STRING => {
            let mut truncated: String = s.chars().take(MAX_STRING).collect();
            truncated.push_str("…[truncated]");
            Value::String(truncated)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, sanitize(value)))
                .collect(),
        ),
        other => other,
    }
}

/// Normaliza um erro para a forma serializável `{message, stack}`.
pub fn error_value(error: &anyhow::Error) -> Value {
    serde_json::json!({
        "message": error.to_string(),
        "stack": format!("{:#}", error),
    })
}

// ============================================================================
// SAÍDA JSONL
// ============================================================================

/// Escreve eventos assinados em um arquivo JSONL (um objeto por linha).
/// Roda até o stream fechar; perdas por lag são registradas e a escrita
/// continua.
pub fn spawn_jsonl_writer(
    stream: &Arc<EventStream>,
    path: PathBuf,
) -> tokio::task::JoinHandle<()> {
    let mut receiver = stream.subscribe();
    tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Failed to open event log");
                return;
            }
        };

        loop {
            match receiver.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => {
                        if file.write_all(line.as_bytes()).await.is_err() {
                            break;
                        }
                        if file.write_all(b"\n").await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(error = %error, "Failed to serialize event");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event log writer lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        let _ = file.flush().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emit_and_query() {
        let stream = EventStream::with_run_id("run-1".to_string(), 10);
        stream.emit(EventLevel::Info, EventKind::RunStarted, None, None);
        stream.emit(
            EventLevel::Info,
            EventKind::SuiteStarted,
            Some("auth".to_string()),
            None,
        );

        let events = stream.query(&EventFilter::default(), 10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::RunStarted);
        assert_eq!(events[0].sequence, 0);
        assert_eq!(events[1].sequence, 1);
        assert_eq!(events[1].context.as_deref(), Some("auth"));
        assert_eq!(events[1].run.as_deref(), Some("run-1"));
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let stream = EventStream::with_run_id("run-1".to_string(), 3);
        for _ in 0..5 {
            stream.emit(EventLevel::Info, EventKind::Log, None, None);
        }
        let events = stream.query(&EventFilter::default(), 10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 2);
    }

    #[test]
    fn test_query_limit_returns_latest() {
        let stream = EventStream::with_run_id("run-1".to_string(), 10);
        for _ in 0..5 {
            stream.emit(EventLevel::Info, EventKind::Log, None, None);
        }
        let events = stream.query(&EventFilter::default(), 2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 3);
        assert_eq!(events[1].sequence, 4);
    }

    #[test]
    fn test_filter_by_level_and_run() {
        let stream = EventStream::with_run_id("run-1".to_string(), 10);
        stream.emit(EventLevel::Debug, EventKind::Log, None, None);
        stream.emit(EventLevel::Error, EventKind::RunError, None, None);

        let errors = stream.query(
            &EventFilter {
                min_level: Some(EventLevel::Warn),
                ..EventFilter::default()
            },
            10,
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, EventKind::RunError);

        let other_run = stream.query(
            &EventFilter {
                run_id: Some("other".to_string()),
                ..EventFilter::default()
            },
            10,
        );
        assert!(other_run.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_receives_live_events() {
        let stream = EventStream::with_run_id("run-1".to_string(), 10);
        let mut receiver = stream.subscribe();

        stream.emit(
            EventLevel::Info,
            EventKind::StepStarted,
            Some("auth::login".to_string()),
            Some(json!({ "index": 0 })),
        );

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::StepStarted);
        assert_eq!(event.extra.unwrap()["index"], json!(0));
    }

    #[test]
    fn test_jsonl_line_parseable() {
        let stream = EventStream::with_run_id("run-1".to_string(), 10);
        stream.emit(
            EventLevel::Warn,
            EventKind::Log,
            Some("auth".to_string()),
            Some(json!({ "note": "x" })),
        );
        let events = stream.query(&EventFilter::default(), 1);
        let line = serde_json::to_string(&events[0]).unwrap();

        // Cada linha JSONL deve ser parseável de forma independente.
        let parsed: RunEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.kind, EventKind::Log);
        assert_eq!(parsed.level, EventLevel::Warn);
    }

    #[test]
    fn test_sanitize_truncates_huge_strings() {
        let huge = "x".repeat(10_000);
        let sanitized = sanitize(json!({ "body": huge }));
        let body = sanitized["body"].as_str().unwrap();
        assert!(body.len() < 5_000);
        assert!(body.ends_with("…[truncated]"));
    }

    #[test]
    fn test_error_value_shape() {
        let error = anyhow::anyhow!("boom").context("while testing");
        let value = error_value(&error);
        assert_eq!(value["message"], json!("while testing"));
        assert!(value["stack"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_jsonl_writer_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let stream = EventStream::with_run_id("run-1".to_string(), 10);
        let handle = spawn_jsonl_writer(&stream, path.clone());

        stream.emit(EventLevel::Info, EventKind::RunStarted, None, None);
        stream.emit(EventLevel::Info, EventKind::RunCompleted, None, None);

        // Dá tempo ao writer e encerra o canal.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        drop(stream);
        let _ = handle.await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: RunEvent = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.run.as_deref(), Some("run-1"));
        }
    }
}
