//! Chip targets.

pub mod bl602;
