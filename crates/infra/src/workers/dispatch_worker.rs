use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::ProjectionEngine;
use crate::event_store::EventStore;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn dispatch worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Poke,
    Shutdown,
}

/// Polling loop that keeps projections caught up in the background.
///
/// - runs one dispatch cycle every `poll_interval`
/// - `poke()` requests a cycle right away (e.g. after an append)
/// - failed cycles are logged; the next tick retries them
/// - `shutdown()` stops after the cycle in flight
#[derive(Debug)]
pub struct DispatchWorker {
    signals: mpsc::Sender<Signal>,
    join: Option<thread::JoinHandle<()>>,
}

impl DispatchWorker {
    pub fn spawn<E>(engine: Arc<ProjectionEngine<E>>, config: &EngineConfig) -> Result<Self, WorkerError>
    where
        E: EventStore + 'static,
    {
        let (signals, rx) = mpsc::channel::<Signal>();
        let tick = config.poll_interval;

        let join = thread::Builder::new()
            .name("projector-dispatch".to_string())
            .spawn(move || worker_loop(&engine, &rx, tick))?;

        info!(poll_interval_ms = tick.as_millis() as u64, "dispatch worker started");
        Ok(Self {
            signals,
            join: Some(join),
        })
    }

    /// Request a cycle without waiting for the next tick.
    pub fn poke(&self) {
        let _ = self.signals.send(Signal::Poke);
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.signals.send(Signal::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
            info!("dispatch worker stopped");
        }
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<E: EventStore>(engine: &ProjectionEngine<E>, rx: &mpsc::Receiver<Signal>, tick: Duration) {
    loop {
        match rx.recv_timeout(tick) {
            Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Signal::Poke) => debug!("dispatch worker poked"),
            Err(RecvTimeoutError::Timeout) => {}
        }

        match engine.run_cycle() {
            Ok(report) if !report.is_ok() => {
                for cycle in report.projections.iter().filter(|p| !p.is_ok()) {
                    if let Some(err) = &cycle.error {
                        warn!(projection = %cycle.projection, position = %cycle.to, error = %err, "dispatch worker cycle failed");
                    }
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "dispatch worker could not read the event store"),
        }
    }
}
