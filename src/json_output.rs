//! # JSON Output Module
//!
//! Eventi di un'esecuzione, pubblicati dall'orchestratore e serializzabili
//! come JSON lines per consumatori esterni (GUI, script).
//!
//! ## Responsabilità:
//! - `RunEvent`: enum taggato (`"type"`) con tutti gli eventi di stato
//! - `emit()`: una riga JSON su stdout per evento
//!
//! ## Tipi di messaggi:
//! - `started`: inizio esecuzione
//! - `file_started` / `file_finished`: ciclo di vita di un file
//! - `progress`: avanzamento dopo ogni file
//! - `paused` / `resumed` / `stopping`: comandi recepiti dallo scheduler
//! - `finished`: riepilogo finale
//! - `error`: errore che interrompe l'esecuzione

use crate::model::MediaStatus;
use crate::orchestrator::run_stats::{ProgressSnapshot, RunSummary};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        source_dir: PathBuf,
        target_dir: PathBuf,
        total_files: usize,
        workers: usize,
    },

    FileStarted {
        index: usize,
        path: PathBuf,
    },

    FileFinished {
        index: usize,
        path: PathBuf,
        status: MediaStatus,
        original_size: u64,
        actual_size: u64,
        encoder: Option<String>,
        error: Option<String>,
    },

    Progress(ProgressSnapshot),

    Paused {
        checkpoint: Option<PathBuf>,
    },

    Resumed {
        paused_seconds: f64,
    },

    Stopping,

    Finished(RunSummary),

    Error {
        message: String,
    },
}

impl RunEvent {
    /// Write the event as one JSON line on stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
