use serde::Deserialize;
use std::time::Duration;

use crate::signal::ShutdownSignal;

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ShutdownConfig {
    /// signals the listener turns into a close request
    #[serde(default = "signals_default")]
    pub signals: Vec<ShutdownSignal>,
    /// capture the full backtrace of every close request
    #[serde(default)]
    pub capture_backtrace: bool,
    /// warn every N seconds while loops are still draining
    #[serde(default)]
    pub drain_warn_secs: Option<u64>,
}

fn signals_default() -> Vec<ShutdownSignal> {
    vec![
        ShutdownSignal::Interrupt,
        ShutdownSignal::Terminate,
        ShutdownSignal::Quit,
    ]
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            signals: signals_default(),
            capture_backtrace: false,
            drain_warn_secs: None,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_warn_after(&self) -> Option<Duration> {
        self.drain_warn_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
