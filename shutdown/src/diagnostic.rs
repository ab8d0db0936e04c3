use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use tracing::{debug, info};

use crate::signal::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `Shutdown::close` was called directly
    Requested,
    /// the signal listener received an OS signal
    Signal(ShutdownSignal),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "close requested"),
            CloseReason::Signal(signal) => write!(f, "received {}", signal),
        }
    }
}

/// Where and why a close was requested. Handed to the close hook on every
/// request, including ones that arrive after the coordinator already closed.
#[derive(Debug)]
pub struct CloseOrigin {
    pub reason: CloseReason,
    pub location: &'static Location<'static>,
    pub backtrace: Option<Backtrace>,
    /// false when another request already started the close sequence
    pub first: bool,
}

pub type CloseHook = Arc<dyn Fn(&CloseOrigin) + Send + Sync>;

impl CloseOrigin {
    pub(crate) fn new(
        reason: CloseReason,
        location: &'static Location<'static>,
        capture_backtrace: bool,
        first: bool,
    ) -> Self {
        Self {
            reason,
            location,
            backtrace: capture_backtrace.then(Backtrace::force_capture),
            first,
        }
    }

    pub(crate) fn log(&self) {
        info!(
            reason = %self.reason,
            location = %self.location,
            first = self.first,
            "shutdown requested"
        );
        if let Some(backtrace) = &self.backtrace {
            debug!("close requested at:\n{}", backtrace);
        }
    }
}
