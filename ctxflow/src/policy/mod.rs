//! Per-key propagation policy.
//!
//! This module provides:
//! - Down/up propagation modes
//! - The immutable, shared [`PropagationPolicy`] and its builder
//! - Resolution of configured settings into a policy

mod modes;
mod settings;
mod table;

pub use modes::{DownMode, UpMode};
pub use settings::{
    DataSettings, PropagationSettings, HOST_ADDRESS_KEY, HOST_KEY, SERVICE_KEY,
};
pub use table::{KeyPolicy, PolicyBuilder, PropagationPolicy};
