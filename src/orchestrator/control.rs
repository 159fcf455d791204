//! # Run Control Module
//!
//! Pausa e stop cooperativi, osservati dai worker solo tra un file e l'altro.
//!
//! ## Responsabilità:
//! - `Command`: comandi accodati verso lo scheduler (`pause`, `resume`, `stop`)
//! - `RunControl`: lato scheduler, imposta i flag
//! - `PauseGate`: lato worker, attende senza polling finché la pausa non termina
//!
//! Lo stop ha sempre priorità sulla pausa: un worker in attesa di `resume`
//! viene svegliato dallo stop.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Requests posted to the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    Stop,
}

impl std::str::FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" | "p" => Ok(Self::Pause),
            "resume" | "r" => Ok(Self::Resume),
            "stop" | "s" | "q" => Ok(Self::Stop),
            other => Err(format!("unknown command: {}", other)),
        }
    }
}

/// Scheduler-side pause and stop flags
#[derive(Debug)]
pub struct RunControl {
    paused: watch::Sender<bool>,
    stop: CancellationToken,
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused,
            stop: CancellationToken::new(),
        }
    }

    /// Returns `false` if already paused or stopping
    pub fn pause(&self) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.paused.send_if_modified(|paused| !std::mem::replace(paused, true))
    }

    /// Returns `false` if not paused
    pub fn resume(&self) -> bool {
        self.paused.send_if_modified(|paused| std::mem::replace(paused, false))
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Handle for one worker
    pub fn gate(&self) -> PauseGate {
        PauseGate {
            paused: self.paused.subscribe(),
            stop: self.stop.clone(),
        }
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-side view of the flags
#[derive(Debug, Clone)]
pub struct PauseGate {
    paused: watch::Receiver<bool>,
    stop: CancellationToken,
}

impl PauseGate {
    /// Wait at a file boundary. `true` means take the next file, `false` means stop.
    pub async fn wait_turn(&mut self) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }

        tokio::select! {
            biased;
            _ = self.stop.cancelled() => false,
            resumed = self.paused.wait_for(|paused| !*paused) => {
                resumed.is_ok() && !self.stop.is_cancelled()
            }
        }
    }
}
