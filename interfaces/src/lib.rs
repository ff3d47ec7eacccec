//! PHY Collaborator Interfaces Library
//! 
//! This crate provides the contracts the uplink receiver consumes from
//! components it does not own, starting with the resource grid.

pub mod resource_grid;

pub use resource_grid::{ResourceGrid, ResourceGridReader, ResourceGridWriter};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug, PartialEq)]
pub enum InterfaceError {
    #[error("Port {port} out of bounds (nof_ports={nof_ports})")]
    InvalidPort { port: usize, nof_ports: usize },

    #[error("Symbol {symbol} out of bounds (nof_symbols={nof_symbols})")]
    InvalidSymbol { symbol: usize, nof_symbols: usize },

    #[error("Subcarriers {start}..{end} out of bounds (nof_subc={nof_subc})")]
    InvalidSubcarrier { start: usize, end: usize, nof_subc: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
