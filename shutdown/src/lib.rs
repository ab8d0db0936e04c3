//! Graceful shutdown coordination for looping workers.
//!
//! A [`Shutdown`] tells loops when to stop ([`Shutdown::is_closed`],
//! [`Shutdown::run_loop`]), offers sleeps that end early on close
//! ([`Shutdown::wait`]), and runs one callback before closing and one after
//! every loop has exited.

mod config;
mod diagnostic;
mod error;
mod participants;
mod registry;
mod shutdown;
pub mod signal;

pub use config::ShutdownConfig;
pub use diagnostic::{CloseHook, CloseOrigin, CloseReason};
pub use error::{Result, ShutdownError};
pub use shutdown::Shutdown;
pub use signal::ShutdownSignal;
