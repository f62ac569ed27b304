#![forbid(unsafe_code)]

//! zeropad — keeps a filesystem's free space inside a `[min, max]` band by
//! growing or shrinking a zero-filled padding file.
//!
//! Growth is rate-limited and always happens in whole filesystem blocks;
//! shrinking is a single truncate. One process owns a padding file at a time,
//! enforced with an advisory lock.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use zeropad::prelude::*;
//! ```
//!
//! The controller is pure and can be driven directly:
//!
//! ```rust
//! use zeropad::padding::controller::{BandController, PadAction};
//! use zeropad::padding::rate::RateLimit;
//!
//! let rate = RateLimit::derive(60, 1024, 4096).unwrap();
//! let controller = BandController::new(10.0, 20.0, rate);
//! assert_eq!(controller.decide(15.0, 1 << 30, 0), PadAction::Hold);
//! ```

#[cfg(not(unix))]
compile_error!("zeropad needs statvfs, flock and daemon(3); only unix targets are supported");

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod padding;
pub mod platform;
