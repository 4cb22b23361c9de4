//! Infrastructure layer for Treadle.
//!
//! Contains implementations of the capability traits defined in `treadle-core`
//! (a `kubectl`-backed `ResourceClient`) and the TOML configuration loader.

pub mod config;
pub mod kubectl;
