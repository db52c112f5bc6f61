use crate::lifecycle::LifecycleManager;
use futures::stream::{Stream, StreamExt};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    TimedOut,
}

/// Turns the first interrupt into a bounded graceful shutdown.
pub struct ShutdownBridge;

impl ShutdownBridge {
    /// Registers the signal handlers and spawns the listener task. Call after
    /// the server has started.
    pub fn spawn(
        manager: &'static LifecycleManager,
        deadline: Duration,
    ) -> std::io::Result<JoinHandle<ShutdownOutcome>> {
        #[cfg(unix)]
        let signals = {
            use signal_hook::consts::{SIGINT, SIGTERM};
            signal_hook_tokio::Signals::new([SIGINT, SIGTERM])?
        };

        #[cfg(not(unix))]
        let signals = futures::stream::once(async {
            let _ = tokio::signal::ctrl_c().await;
            2
        })
        .boxed();

        Ok(tokio::spawn(Self::run(signals, manager, deadline)))
    }

    /// Waits for the first signal on `signals`, shuts `manager` down within
    /// `deadline` and reports the outcome. Later signals are logged while the
    /// shutdown keeps running.
    pub async fn run<S>(
        mut signals: S,
        manager: &LifecycleManager,
        deadline: Duration,
    ) -> ShutdownOutcome
    where
        S: Stream<Item = i32> + Unpin,
    {
        match signals.next().await {
            Some(signal) => info!("Received signal {}, initiating graceful shutdown", signal),
            None => warn!("Signal stream closed, shutting down"),
        }

        println!("\nStopping http server...");

        let shutdown = manager.shutdown(deadline);
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                result = &mut shutdown => break result,
                Some(signal) = signals.next() => {
                    warn!("Received signal {} while stopping, still waiting for shutdown", signal);
                }
            }
        };

        match result {
            Ok(()) => {
                println!("Server stopped");
                ShutdownOutcome::Graceful
            }
            Err(e) => {
                println!("{}", e);
                ShutdownOutcome::TimedOut
            }
        }
    }
}
