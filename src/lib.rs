//! Core parallel storage engine for block-sparse neuron morphology and
//! connectivity datasets (spec.md §1).
//!
//! Five components, leaves first: the [`container`] adapter over a chunked
//! hierarchical binary store, the [`layout`] planner that turns per-rank
//! local lengths into globally coherent write offsets, the [`cell_index`]
//! secondary mapping, the [`tree`] encoder/decoder, and the [`dbs`] codec
//! for the Destination Block Sparse projection representation. [`comm`]
//! is the BSP communicator boundary every collective operation goes
//! through; [`config`] groups the multi-argument collective calls into
//! explicit parameter bundles.

pub mod cell_index;
pub mod comm;
pub mod config;
pub mod container;
pub mod dbs;
pub mod error;
pub mod ids;
pub mod layout;
pub mod population;
pub mod tree;

#[cfg(test)]
mod tests;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
