//! Real BSP communicator backed by `mpi` (rsmpi), enabled by the
//! `mpi-backend` feature.
//!
//! This is the only place `mpi::traits` is imported — everything above
//! `crate::comm::Communicator` stays portable to the `SingleProcess` test
//! backend.

use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::SystemCommunicator;
use mpi::traits::*;
use mpi::Count;

use super::Communicator;

/// Wraps an MPI world communicator (or a sub-communicator produced by a
/// split) behind the [`Communicator`] trait.
pub struct MpiCommunicator {
    world: SystemCommunicator,
}

impl MpiCommunicator {
    /// Wraps an already-initialized world communicator. Callers are
    /// expected to keep the `mpi::Universe` returned by `mpi::initialize`
    /// alive for the program's lifetime; this crate never calls
    /// `mpi::initialize` itself (spec.md §1 keeps MPI bootstrapping out of
    /// scope, an external collaborator concern).
    pub fn new(world: SystemCommunicator) -> Self {
        MpiCommunicator { world }
    }
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> i32 {
        self.world.rank()
    }

    fn size(&self) -> i32 {
        self.world.size()
    }

    fn all_gather_u64(&self, value: u64) -> Vec<u64> {
        let mut recv = vec![0u64; self.world.size() as usize];
        self.world.all_gather_into(&value, &mut recv[..]);
        recv
    }

    fn all_to_all_varying(&self, send: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let size = self.world.size() as usize;
        debug_assert_eq!(send.len(), size);

        let send_counts: Vec<Count> = send.iter().map(|v| v.len() as Count).collect();
        let send_flat: Vec<u8> = send.into_iter().flatten().collect();
        let send_displs = prefix_displacements(&send_counts);
        let send_partition = Partition::new(&send_flat, send_counts.clone(), send_displs);

        let recv_counts = exchange_counts(&self.world, &send_counts);
        let recv_displs = prefix_displacements(&recv_counts);
        let total_recv: usize = recv_counts.iter().map(|&c| c as usize).sum();
        let mut recv_flat = vec![0u8; total_recv];
        {
            let mut recv_partition =
                PartitionMut::new(&mut recv_flat[..], recv_counts.clone(), recv_displs.clone());
            self.world.all_to_all_varcount_into(&send_partition, &mut recv_partition);
        }

        split_by_counts(recv_flat, &recv_counts, &recv_displs)
    }

    fn broadcast_u64(&self, value: u64, root: i32) -> u64 {
        let mut value = value;
        self.world.process_at_rank(root).broadcast_into(&mut value);
        value
    }

    fn barrier(&self) {
        self.world.barrier();
    }
}

fn exchange_counts(world: &SystemCommunicator, send_counts: &[Count]) -> Vec<Count> {
    let mut recv_counts = vec![0 as Count; world.size() as usize];
    world.all_to_all_into(send_counts, &mut recv_counts[..]);
    recv_counts
}

fn prefix_displacements(counts: &[Count]) -> Vec<Count> {
    let mut displs = Vec::with_capacity(counts.len());
    let mut running = 0;
    for &c in counts {
        displs.push(running);
        running += c;
    }
    displs
}

fn split_by_counts(flat: Vec<u8>, counts: &[Count], displs: &[Count]) -> Vec<Vec<u8>> {
    counts
        .iter()
        .zip(displs.iter())
        .map(|(&count, &displ)| {
            let start = displ as usize;
            let end = start + count as usize;
            flat[start..end].to_vec()
        })
        .collect()
}
