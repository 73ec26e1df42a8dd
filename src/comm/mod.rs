//! The BSP communicator boundary (spec.md §6.2).
//!
//! The core treats MPI as an external collaborator: it only ever calls
//! through the [`Communicator`] trait, never `mpi-sys` directly. This keeps
//! the collective layout planner (`crate::layout`) and the DBS scatter-read
//! (`crate::dbs::scatter`) testable without an actual MPI runtime — tests
//! run against [`single::SingleProcess`], and real deployments enable the
//! `mpi-backend` feature to get [`mpi_backend::MpiCommunicator`].

pub mod single;

#[cfg(feature = "mpi-backend")]
pub mod mpi_backend;

pub use single::SingleProcess;

use crate::error::Error;

/// A bulk-synchronous-parallel communicator.
///
/// Every method here is a collective call: every rank in the communicator
/// must invoke it, including ranks that contribute nothing (spec.md §4.B,
/// "Edge cases" — a rank with `n_i = 0` still participates).
pub trait Communicator: Send + Sync {
    /// This process's rank, `0..size()`.
    fn rank(&self) -> i32;

    /// The number of ranks in the communicator.
    fn size(&self) -> i32;

    /// Exchanges one `u64` per rank: every rank sends `value` and receives
    /// the full vector of values in rank order. Used by
    /// `crate::layout::plan_stripe` to prefix-sum local lengths into
    /// global offsets.
    fn all_gather_u64(&self, value: u64) -> Vec<u64>;

    /// Variable-size all-to-all: `send[r]` is the byte buffer destined for
    /// rank `r`. Returns, in rank order, the bytes received from each rank.
    /// Used by `crate::dbs::scatter` to redistribute edges once their
    /// owning rank has been computed from `node_rank_map`.
    fn all_to_all_varying(&self, send: Vec<Vec<u8>>) -> Vec<Vec<u8>>;

    /// Broadcasts `value` from `root` to every rank, returning the value
    /// every rank now holds (used to agree on a single error kind or a
    /// shared `global_base` offset).
    fn broadcast_u64(&self, value: u64, root: i32) -> u64;

    /// A collective barrier with no payload.
    fn barrier(&self);

    /// Splits this communicator into a sub-communicator of the first
    /// `io_size` ranks plus "the rest", mirroring the `io_size` reader
    /// split in spec.md §4.E.2. Returns `true` if this rank is one of the
    /// first `io_size` readers.
    fn is_reader(&self, io_size: i32) -> bool {
        self.rank() < io_size.min(self.size())
    }

    /// Reduces a fallible collective step across every rank (spec.md §7,
    /// "Propagation policy": "every process observes the same error kind, or
    /// every process observes success").
    ///
    /// A *symmetric* failure — every rank independently produced an `Err` of
    /// the same kind, e.g. every rank decoded the same forbidden population
    /// pair from the same on-disk data — surfaces that shared kind
    /// unchanged on every rank. Only a genuinely *asymmetric* outcome (some
    /// ranks `Ok` and others `Err`, or ranks failing with different kinds) is
    /// promoted to a synthesized `Error::CommunicatorFailure`, since in that
    /// case there is no single real error every rank actually holds.
    fn reduce_result<T: Clone>(&self, local: Result<T, Error>) -> Result<T, Error> {
        let local_failed = if local.is_err() { 1u64 } else { 0u64 };
        let flags = self.all_gather_u64(local_failed);
        if flags.iter().all(|&f| f == 0) {
            return local;
        }

        let local_kind = match &local {
            Ok(_) => String::new(),
            Err(e) => e.kind_name().to_string(),
        };
        let kinds = self.all_gather_string(local_kind);

        let universal = flags.iter().all(|&f| f != 0);
        let first_failed_idx = flags.iter().position(|&f| f != 0).unwrap();
        let symmetric = universal
            && kinds.iter().zip(flags.iter()).all(|(k, &f)| f == 0 || k == &kinds[first_failed_idx]);

        if symmetric {
            return local;
        }

        // Asymmetric: find the lowest-ranked failure message and broadcast
        // it so every rank observes the identical synthesized error.
        let first_failed_rank = first_failed_idx as i32;
        let message = match &local {
            Ok(_) => String::new(),
            Err(e) => e.to_string(),
        };
        let chosen_message = if self.rank() == first_failed_rank {
            message
        } else {
            String::new()
        };
        let agreed = self.broadcast_string(chosen_message, first_failed_rank);
        Err(Error::CommunicatorFailure(agreed))
    }

    /// Broadcasts a string payload from `root`. Built on `all_to_all_varying`
    /// so backends only need to implement the byte-oriented primitives.
    fn broadcast_string(&self, value: String, root: i32) -> String {
        if self.rank() == root {
            let bytes = value.into_bytes();
            let mut send = vec![Vec::new(); self.size() as usize];
            for slot in send.iter_mut() {
                *slot = bytes.clone();
            }
            let received = self.all_to_all_varying(send);
            String::from_utf8(received[root as usize].clone()).unwrap_or_default()
        } else {
            let send = vec![Vec::new(); self.size() as usize];
            let received = self.all_to_all_varying(send);
            String::from_utf8(received[root as usize].clone()).unwrap_or_default()
        }
    }

    /// Gathers one UTF-8 string per rank, in rank order. Built on
    /// `all_to_all_varying` the same way `broadcast_string` is: every rank
    /// sends its own value to every destination, so what comes back from
    /// sender `r` is simply `r`'s local value.
    fn all_gather_string(&self, value: String) -> Vec<String> {
        let bytes = value.into_bytes();
        let send = vec![bytes; self.size() as usize];
        let received = self.all_to_all_varying(send);
        received.into_iter().map(|b| String::from_utf8(b).unwrap_or_default()).collect()
    }
}
