//! Padding file management: ownership, rate-limited growth, band control.

pub mod controller;
pub mod file;
pub mod rate;
