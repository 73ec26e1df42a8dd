use crate::ids::Pop;

/// The error kinds a core collective call can fail with (spec.md §7).
///
/// Every variant is promoted across the communicator before it reaches the
/// caller: because every core call is collective, either every process
/// observes the same `Error` or every process observes `Ok`. See
/// `comm::Communicator::reduce_error` for where that promotion happens.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing chunked hierarchical store failed a read/write, a path
    /// was missing, or a type mismatched.
    #[error("container I/O failure at {path}: {source}")]
    ContainerIo { path: String, #[source] source: Box<dyn std::error::Error + Send + Sync> },

    /// Two ranks advertised overlapping hyperslabs for the same dataset.
    #[error(
        "layout overlap on `{dataset}`: rank {rank_a} claims [{start_a}, {end_a}), \
         rank {rank_b} claims [{start_b}, {end_b})"
    )]
    LayoutOverlap {
        dataset: String,
        rank_a: i32,
        start_a: u64,
        end_a: u64,
        rank_b: i32,
        start_b: u64,
        end_b: u64,
    },

    /// A write implied shrinking a dataset (on-disk datasets are append-only).
    #[error("refusing to shrink `{dataset}` from {current_len} to {requested_len}")]
    ExtentShrink { dataset: String, current_len: u64, requested_len: u64 },

    /// The cell index does not match the tree stripe it is supposed to describe.
    #[error(
        "cell index incoherent: index holds {index_len} cell ids but the tree stripe \
         being appended covers {stripe_len}"
    )]
    IndexIncoherent { index_len: u64, stripe_len: u64 },

    /// A decoded `(src_pop, dst_pop)` pair is absent from the admissible set.
    #[error("population pair ({src_pop}, {dst_pop}) is not in the admissible set")]
    PopulationPairForbidden { src_pop: Pop, dst_pop: Pop },

    /// A parsed structure violates one of the data-model invariants in spec.md §3.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A collective call did not return success on every process.
    #[error("collective call failed on at least one rank: {0}")]
    CommunicatorFailure(String),
}

impl Error {
    pub fn invariant(msg: impl Into<String>) -> Error {
        Error::InvariantViolation(msg.into())
    }

    pub fn forbidden_pair(src_pop: Pop, dst_pop: Pop) -> Error {
        Error::PopulationPairForbidden { src_pop, dst_pop }
    }

    /// Rough discriminant used for equality checks in tests without adding
    /// `PartialEq` requirements on the boxed I/O source.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::ContainerIo { .. } => "ContainerIo",
            Error::LayoutOverlap { .. } => "LayoutOverlap",
            Error::ExtentShrink { .. } => "ExtentShrink",
            Error::IndexIncoherent { .. } => "IndexIncoherent",
            Error::PopulationPairForbidden { .. } => "PopulationPairForbidden",
            Error::InvariantViolation(_) => "InvariantViolation",
            Error::CommunicatorFailure(_) => "CommunicatorFailure",
        }
    }
}
