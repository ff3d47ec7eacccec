//! Protocol Stack Layers Library
//!
//! This crate implements the 5G NR uplink shared channel receiver according to
//! 3GPP Release 16 (TS 38.211, TS 38.212, TS 38.214).

pub mod phy;

use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
