//! Component B — the Collective Layout Planner (spec.md §4.B).
//!
//! A pure, stateless helper used by the tree encoder and the DBS codec to
//! turn a per-rank local length into a globally coherent stripe. It never
//! touches the backing store; it only exchanges lengths and prefix-sums
//! them, which is what keeps it trivially testable against
//! `comm::SingleProcess` and a hand-rolled multi-rank stub alike.

use crate::comm::Communicator;

/// One rank's assigned stripe within a shared one-dimensional dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRange {
    /// The global offset at which this rank's contribution begins.
    pub local_start: u64,
    /// The number of elements this rank contributes.
    pub local_len: u64,
    /// The dataset's new total length once every rank's contribution lands.
    pub global_end: u64,
}

impl LayoutRange {
    pub fn local_end(&self) -> u64 {
        self.local_start + self.local_len
    }

    pub fn is_empty(&self) -> bool {
        self.local_len == 0
    }
}

/// Computes `(local_start, local_len, global_end)` for this rank.
///
/// `global_base` is the pre-existing tail of the dataset (`G` in spec.md
/// §4.B); `local_n` is the number of elements this rank is about to
/// contribute. A rank contributing zero elements still calls this — the
/// all-gather is collective and every rank must participate (spec.md §4.B,
/// "Edge cases").
pub fn plan_stripe(comm: &dyn Communicator, local_n: u64, global_base: u64) -> LayoutRange {
    let lengths = comm.all_gather_u64(local_n);
    let rank = comm.rank() as usize;

    let local_start = global_base + lengths[..rank].iter().sum::<u64>();
    let global_end = global_base + lengths.iter().sum::<u64>();

    tracing::trace!(
        rank = comm.rank(),
        local_n,
        global_base,
        local_start,
        global_end,
        "planned collective stripe"
    );

    LayoutRange { local_start, local_len: local_n, global_end }
}

/// Plans a *pointer-array* stripe, where every rank contributes `local_n`
/// entries plus the last rank contributes one additional trailing sentinel
/// (spec.md §4.B: "the last rank's advertised length is `n_i + 1`").
///
/// Returns the stripe to write into the pointer dataset (its `local_len`
/// already includes the sentinel slot on the last rank) together with the
/// number of *payload* entries this rank actually encodes (always
/// `local_n`, regardless of the sentinel).
pub fn plan_pointer_stripe(comm: &dyn Communicator, local_n: u64, global_base: u64) -> LayoutRange {
    let is_last_rank = comm.rank() == comm.size() - 1;
    let advertised = if is_last_rank { local_n + 1 } else { local_n };
    plan_stripe(comm, advertised, global_base)
}

/// Rebases a local running-total pointer array (`n + 1` entries starting at
/// `0`, as built by `tree::encoder::flatten` or `dbs::codec::append_graph`)
/// by `payload_local_start`, keeping only the first `keep` entries.
///
/// The trailing entry is redundant on every rank but the last: it duplicates
/// the next rank's own `local_start`, which is why a non-last rank's
/// `plan_pointer_stripe` advertises only `n` entries rather than `n + 1`.
pub fn rebase_pointer_prefix<T: Copy + From<u64>>(
    local_running_totals: &[u64],
    payload_local_start: u64,
    keep: u64,
) -> Vec<T> {
    local_running_totals
        .iter()
        .take(keep as usize)
        .map(|&v| T::from(v + payload_local_start))
        .collect()
}
