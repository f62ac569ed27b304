//! Filesystem monitoring: the probe the control loop samples every iteration.

pub mod fs_stats;
