//! # Módulo de Log de Performance
//!
//! Log append-only por run: um registro compacto por dispatch HTTP,
//! mantido em memória para os relatórios. Os appends são sincronizados
//! e o log nunca é truncado durante um run.
//!
//! ## O que cada registro carrega:
//!
//! | Campo         | Conteúdo                          |
//! |---------------|-----------------------------------|
//! | `node_id`     | Suíte que fez a requisição        |
//! | `step_name`   | Step de origem                    |
//! | `method`/`url`| Requisição efetiva                |
//! | `status_code` | Resposta (ausente em erro de rede)|
//! | `duration_ms` | Latência observada                |
//! | `size_bytes`  | Tamanho do body da resposta       |

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// Registro compacto de um dispatch HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct PerfRecord {
    pub node_id: String,
    pub step_name: String,
    pub method: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub size_bytes: u64,
}

/// Log de performance de um run.
#[derive(Debug)]
pub struct PerformanceLog {
    run_started_at: DateTime<Utc>,
    records: Mutex<Vec<PerfRecord>>,
}

impl PerformanceLog {
    pub fn new() -> Self {
        Self {
            run_started_at: Utc::now(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn run_started_at(&self) -> DateTime<Utc> {
        self.run_started_at
    }

    /// Anexa um registro. Lock envenenado significa uma thread de teste
    /// em panic; perder o registro é preferível a propagar o panic.
    pub fn append(&self, record: PerfRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    /// Snapshot de todos os registros até aqui.
    pub fn snapshot(&self) -> Vec<PerfRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PerformanceLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(step: &str, duration_ms: u64) -> PerfRecord {
        PerfRecord {
            node_id: "auth".to_string(),
            step_name: step.to_string(),
            method: "GET".to_string(),
            url: "http://localhost/x".to_string(),
            status_code: Some(200),
            duration_ms,
            size_bytes: 10,
        }
    }

    #[test]
    fn test_append_and_snapshot() {
        let log = PerformanceLog::new();
        assert!(log.is_empty());

        log.append(record("a", 10));
        log.append(record("b", 20));

        let snapshot = log.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].step_name, "a");
        assert_eq!(snapshot[1].duration_ms, 20);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_concurrent_appends() {
        use std::sync::Arc;
        let log = Arc::new(PerformanceLog::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = Arc::clone(&log);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    log.append(record("t", i));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 400);
    }
}
