//! Daemon subsystem: the control loop and interrupt teardown.

#[cfg(feature = "daemon")]
pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;
