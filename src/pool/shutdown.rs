// ABOUTME: Teardown paths for the client registry
//
// Three ways to empty the pool:
// - stop_all: caller-initiated, stops clients one after another
// - shutdown_gracefully: signal-driven, stops clients concurrently and
//   reports every outcome; never exits the process
// - shutdown_now: immediate exit, synchronous force_stop with no scheduler
//   (also chained into the panic hook by shutdown_on_panic)

use futures_util::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::client::{ClientError, ClientFactory, PoolClient};
use super::entry::PoolKey;
use super::registry::{stop_quietly, ClientRegistry};

/// Outcome of a graceful shutdown
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Clients stopped cleanly
    pub stopped: usize,
    /// Clients whose stop failed, with the error
    pub failed: Vec<(PoolKey, String)>,
}

impl ShutdownReport {
    /// Total number of clients the shutdown touched
    pub fn total(&self) -> usize {
        self.stopped + self.failed.len()
    }

    /// Whether every client stopped cleanly
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<F: ClientFactory> ClientRegistry<F> {
    /// Stop every client and empty the pool
    ///
    /// The pool is emptied and the sweeper cancelled first, then each client
    /// is stopped in turn. Stop failures are logged. The registry stays
    /// usable; the next acquisition starts fresh.
    pub async fn stop_all(&self) {
        let drained = self.inner.drain();
        info!(count = drained.len(), "Stopping all pooled clients");

        for (key, client) in drained {
            stop_quietly(&key, client.as_ref()).await;
        }
    }

    /// Signal-path teardown: stop every client concurrently and report
    ///
    /// One failing stop never prevents the others from running. Does not
    /// exit the process.
    pub async fn shutdown_gracefully(&self) -> ShutdownReport {
        let drained = self.inner.drain();
        info!(count = drained.len(), "Shutting down client pool");

        let outcomes: Vec<Result<(), ClientError>> =
            join_all(drained.iter().map(|(_, client)| client.stop())).await;

        let mut report = ShutdownReport::default();
        for ((key, _), outcome) in drained.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.stopped += 1,
                Err(e) => {
                    warn!(key = %key, error = %e, "Client failed to stop during shutdown");
                    report.failed.push((key.clone(), e.to_string()));
                }
            }
        }

        info!(
            stopped = report.stopped,
            failed = report.failed.len(),
            "Client pool shutdown complete"
        );
        report
    }

    /// Immediate-exit teardown: force-stop every client without awaiting
    ///
    /// Safe to call right before `std::process::exit`, from a panic hook, or
    /// outside any runtime. Dropping the last registry handle does the same,
    /// but exits that skip destructors need an explicit call; hosts must
    /// make it themselves or install `shutdown_on_panic`.
    pub fn shutdown_now(&self) {
        let drained = self.inner.drain();
        if drained.is_empty() {
            return;
        }

        info!(count = drained.len(), "Force-stopping pooled clients");
        for (_, client) in drained {
            client.force_stop();
        }
    }

    /// Run `shutdown_gracefully` when SIGINT or SIGTERM arrives
    ///
    /// The listeners are registered before this returns, so a signal
    /// delivered right afterwards still reaches the teardown. The returned
    /// handle resolves with the shutdown report. Exiting the process
    /// afterwards is left to the caller. Must be called inside a tokio
    /// runtime.
    pub fn install_signal_handlers(&self) -> JoinHandle<ShutdownReport> {
        let termination = Termination::register();
        let registry = self.clone();
        tokio::spawn(async move {
            termination.wait().await;
            registry.shutdown_gracefully().await
        })
    }

    /// Force-stop every client if the process panics
    ///
    /// Chains onto the current panic hook. A panic inside a task or a call
    /// to `std::process::exit` never drops the registry, so hosts that can
    /// leave that way should install this (or call `shutdown_now`
    /// themselves) to avoid orphaned servers.
    pub fn shutdown_on_panic(&self) {
        let registry = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            registry.shutdown_now();
            previous(info);
        }));
    }
}

/// Termination listeners, registered up front
enum Termination {
    #[cfg(unix)]
    Signals {
        sigterm: tokio::signal::unix::Signal,
        sigint: tokio::signal::unix::Signal,
    },
    CtrlC,
}

impl Termination {
    fn register() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => return Self::Signals { sigterm, sigint },
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to register signal handlers, falling back to Ctrl-C");
                }
            }
        }

        Self::CtrlC
    }

    /// Wait for SIGINT or SIGTERM (Ctrl-C elsewhere)
    async fn wait(self) {
        match self {
            #[cfg(unix)]
            Self::Signals {
                mut sigterm,
                mut sigint,
            } => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            Self::CtrlC => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
                info!("Received Ctrl-C");
            }
        }
    }
}
