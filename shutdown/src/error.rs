use thiserror::Error;

use crate::signal::ShutdownSignal;

#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("fail install {signal} handler: {source}")]
    SignalHandler {
        signal: ShutdownSignal,
        #[source]
        source: std::io::Error,
    },
    #[error("no shutdown signals configured")]
    NoSignals,
    #[error("{0} is not supported on this platform")]
    UnsupportedSignal(ShutdownSignal),
}

pub type Result<T, E = ShutdownError> = std::result::Result<T, E>;
