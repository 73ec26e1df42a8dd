//! Component C — the Cell Index (spec.md §4.C).
//!
//! A plain, append-only sequence of `CellId`s in rank-stripe order. Readers
//! use it to map a position in the tree/DBS pointer arrays back to the
//! caller-facing cell identifier without decoding any payload column.

use crate::comm::Communicator;
use crate::container::{Container, ElementType};
use crate::error::Error;
use crate::ids::CellId;
use crate::layout::LayoutRange;
use crate::Result;

const DATASET: &str = "/cell_index";

/// Extends `/cell_index` to cover `stripe` without writing anything yet.
///
/// Split out from [`append`] so a caller staging several datasets at once
/// (`tree::encoder::append_trees`) can run every dataset's extent change
/// before any dataset's `write_slab`, per spec.md §4.D's failure-semantics
/// contract: a later extend failing must never leave an earlier dataset
/// already written for this batch.
pub fn stage_extent<C: Container>(
    container: &mut C,
    stripe: LayoutRange,
    chunk: u64,
    local_len: u64,
) -> Result<()> {
    if local_len != stripe.local_len {
        return Err(Error::IndexIncoherent { index_len: local_len, stripe_len: stripe.local_len });
    }
    container.create_or_extend(DATASET, ElementType::U64, stripe.global_end, chunk)
}

/// Writes `cell_ids` into the already-extended `/cell_index`, at `stripe`.
pub fn write<C: Container>(
    container: &mut C,
    stripe: LayoutRange,
    cell_ids: &[CellId],
) -> Result<()> {
    container.write_slab(DATASET, stripe.local_start, cell_ids)
}

/// Extends and writes `/cell_index` over `stripe` in one call, for callers
/// that do not need to stage it alongside other datasets.
pub fn append<C: Container>(
    container: &mut C,
    stripe: LayoutRange,
    chunk: u64,
    cell_ids: &[CellId],
) -> Result<()> {
    stage_extent(container, stripe, chunk, cell_ids.len() as u64)?;
    write(container, stripe, cell_ids)
}

/// Validates that `/cell_index` already covers `stripe` without writing
/// anything, for the `create_index: false` path (spec.md §4.C, §9's Open
/// Questions: an explicit validation, not a silent skip).
pub fn validate_stripe<C: Container>(container: &C, stripe: LayoutRange) -> Result<()> {
    let existing = container.dataset_extent(DATASET)?;
    if existing < stripe.global_end {
        return Err(Error::IndexIncoherent { index_len: existing, stripe_len: stripe.global_end });
    }
    Ok(())
}

/// Reads the whole index, in stripe order. Used by round-trip tests and by
/// single-process embeddings; a distributed reader instead calls
/// `Container::read_slab` directly over its own assigned range.
pub fn read_all<C: Container>(container: &C) -> Result<Vec<CellId>> {
    let len = container.dataset_extent(DATASET)?;
    container.read_slab(DATASET, 0, len)
}
