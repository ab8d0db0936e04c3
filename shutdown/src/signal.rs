//! OS signal listener. Forwards the first termination signal into
//! [`Shutdown`] through the same close path as an explicit call.

use serde::Deserialize;
use std::fmt;
use std::panic::Location;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::diagnostic::CloseReason;
use crate::error::{Result, ShutdownError};
use crate::shutdown::Shutdown;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
    Quit,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
            ShutdownSignal::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// Install handlers for `signals` and spawn a task that closes `shutdown`
/// on the first one received. The task exits on its own if the coordinator
/// closes by another path first.
///
/// Must be called from within a Tokio runtime.
#[track_caller]
pub fn listen(shutdown: &Shutdown, signals: &[ShutdownSignal]) -> Result<JoinHandle<()>> {
    if signals.is_empty() {
        return Err(ShutdownError::NoSignals);
    }
    let location = Location::caller();
    let received = install(signals)?;
    let shutdown = shutdown.clone();

    debug!(signals = ?signals, "listen for shutdown signals");
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.closed() => {
                debug!("shutdown closed before any signal, stop listening");
            }
            signal = received => {
                debug!(signal = %signal, "received shutdown signal");
                shutdown.request_close(CloseReason::Signal(signal), location);
            }
        }
    }))
}

#[cfg(unix)]
fn install(
    signals: &[ShutdownSignal],
) -> Result<impl std::future::Future<Output = ShutdownSignal>> {
    use futures::future::select_all;
    use tokio::signal::unix::{signal, SignalKind};

    let mut streams = Vec::with_capacity(signals.len());
    for &kind in signals {
        let stream = signal(match kind {
            ShutdownSignal::Interrupt => SignalKind::interrupt(),
            ShutdownSignal::Terminate => SignalKind::terminate(),
            ShutdownSignal::Quit => SignalKind::quit(),
        })
        .map_err(|source| ShutdownError::SignalHandler {
            signal: kind,
            source,
        })?;
        streams.push((kind, stream));
    }

    Ok(async move {
        let waits = streams.iter_mut().map(|(kind, stream)| {
            let kind = *kind;
            Box::pin(async move {
                stream.recv().await;
                kind
            })
        });
        let (kind, _, _) = select_all(waits).await;
        kind
    })
}

// only Ctrl+C exists here; other configured signals are ignored
#[cfg(not(unix))]
fn install(
    signals: &[ShutdownSignal],
) -> Result<impl std::future::Future<Output = ShutdownSignal>> {
    if !signals.contains(&ShutdownSignal::Interrupt) {
        return Err(ShutdownError::UnsupportedSignal(signals[0]));
    }
    let mut ctrl_c =
        tokio::signal::windows::ctrl_c().map_err(|source| ShutdownError::SignalHandler {
            signal: ShutdownSignal::Interrupt,
            source,
        })?;
    Ok(async move {
        ctrl_c.recv().await;
        ShutdownSignal::Interrupt
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listen_rejects_empty_signal_list() {
        let shutdown = Shutdown::new();
        let result = listen(&shutdown, &[]);
        assert!(matches!(result, Err(ShutdownError::NoSignals)));
    }

    #[tokio::test]
    async fn test_listener_exits_when_closed_elsewhere() {
        let shutdown = Shutdown::new();
        let handle = listen(&shutdown, &[ShutdownSignal::Interrupt]).unwrap();

        shutdown.close();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "listener should stop after close");
    }

    #[cfg(not(unix))]
    #[tokio::test]
    async fn test_listen_rejects_signal_without_ctrl_c() {
        let shutdown = Shutdown::new();
        let result = listen(&shutdown, &[ShutdownSignal::Terminate]);
        assert!(matches!(
            result,
            Err(ShutdownError::UnsupportedSignal(ShutdownSignal::Terminate))
        ));
        assert!(!shutdown.is_closed());
    }

    #[test]
    fn test_unsupported_signal_message() {
        let err = ShutdownError::UnsupportedSignal(ShutdownSignal::Quit);
        assert_eq!(err.to_string(), "SIGQUIT is not supported on this platform");
    }
}
