//! Cross-cutting integration tests (spec.md §8, "Testable Properties").
//!
//! Every per-module `#[cfg(test)] mod tests` block checks that module in
//! isolation, almost always against `comm::SingleProcess`. What none of them
//! exercise is the thing the collective layout planner and the scatter-read
//! redistribution actually exist for: more than one rank really
//! participating in the same call. [`ThreadComm`] simulates that with real
//! OS threads synchronized through barriers, so `all_gather_u64` and
//! `all_to_all_varying` aggregate genuine per-rank values instead of a
//! hand-rolled stand-in (contrast `layout::tests::FixedRanks`, which only
//! checks the prefix-sum arithmetic).

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use bytemuck::{Pod, Zeroable};

use crate::comm::{Communicator, SingleProcess};
use crate::config::{AppendGraphConfig, AppendTreesConfig, EdgeMapType, ScatterReadConfig};
use crate::container::memory::MemoryContainer;
use crate::container::{Container, ElementType, EnumType};
use crate::dbs::codec::{append_graph, read_projection, reconstruct_edges};
use crate::dbs::scatter::{scatter_read_projection, RankTable};
use crate::dbs::{EdgeAttrSet, EdgeList, InputEdgeMap, ProjectionPaths};
use crate::ids::{CellId, LayerIdx, NodeId, ParentNodeIdx, Pop, PopRank, SectionIdx, SwcTypeCode};
use crate::population::{PopRange, PopTable};
use crate::tree::encoder::{append_trees, read_all_trees};
use crate::tree::Tree;

/// A BSP communicator backed by real OS threads rather than a precomputed
/// script. Every rank in a [`make_thread_comms`] group calls the same
/// sequence of collective operations (the code path is identical for every
/// rank), so a thread-local call counter is enough to line up each rank's
/// Nth call with everyone else's — no shared atomic counter needed.
struct ThreadComm {
    rank: i32,
    size: i32,
    gather_slots: Arc<Vec<(Mutex<Vec<u64>>, Barrier)>>,
    next_gather: AtomicUsize,
    alltoall_slots: Arc<Vec<(Mutex<Vec<Vec<Vec<u8>>>>, Barrier)>>,
    next_alltoall: AtomicUsize,
    bcast_slots: Arc<Vec<(Mutex<Option<u64>>, Barrier)>>,
    next_bcast: AtomicUsize,
    barrier: Arc<Barrier>,
}

impl Communicator for ThreadComm {
    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.size
    }

    fn all_gather_u64(&self, value: u64) -> Vec<u64> {
        let idx = self.next_gather.fetch_add(1, Ordering::SeqCst);
        let (mutex, barrier) = &self.gather_slots[idx];
        {
            mutex.lock().unwrap()[self.rank as usize] = value;
        }
        barrier.wait();
        mutex.lock().unwrap().clone()
    }

    fn all_to_all_varying(&self, send: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let idx = self.next_alltoall.fetch_add(1, Ordering::SeqCst);
        let (mutex, barrier) = &self.alltoall_slots[idx];
        {
            mutex.lock().unwrap()[self.rank as usize] = send;
        }
        barrier.wait();
        let table = mutex.lock().unwrap();
        (0..self.size as usize).map(|sender| table[sender][self.rank as usize].clone()).collect()
    }

    fn broadcast_u64(&self, value: u64, root: i32) -> u64 {
        let idx = self.next_bcast.fetch_add(1, Ordering::SeqCst);
        let (mutex, barrier) = &self.bcast_slots[idx];
        if self.rank == root {
            *mutex.lock().unwrap() = Some(value);
        }
        barrier.wait();
        mutex.lock().unwrap().expect("broadcast value never set by root")
    }

    fn barrier(&self) {
        self.barrier.wait();
    }
}

/// Builds `size` [`ThreadComm`]s sharing one rendezvous table, generous
/// enough for `max_calls` sequential collective operations per rank.
fn make_thread_comms(size: i32, max_calls: usize) -> Vec<ThreadComm> {
    let gather_slots = Arc::new(
        (0..max_calls)
            .map(|_| (Mutex::new(vec![0u64; size as usize]), Barrier::new(size as usize)))
            .collect::<Vec<_>>(),
    );
    let alltoall_slots = Arc::new(
        (0..max_calls)
            .map(|_| {
                (
                    Mutex::new(vec![vec![Vec::new(); size as usize]; size as usize]),
                    Barrier::new(size as usize),
                )
            })
            .collect::<Vec<_>>(),
    );
    let bcast_slots = Arc::new(
        (0..max_calls).map(|_| (Mutex::new(None), Barrier::new(size as usize))).collect::<Vec<_>>(),
    );
    let barrier = Arc::new(Barrier::new(size as usize));

    (0..size)
        .map(|rank| ThreadComm {
            rank,
            size,
            gather_slots: gather_slots.clone(),
            next_gather: AtomicUsize::new(0),
            alltoall_slots: alltoall_slots.clone(),
            next_alltoall: AtomicUsize::new(0),
            bcast_slots: bcast_slots.clone(),
            next_bcast: AtomicUsize::new(0),
            barrier: barrier.clone(),
        })
        .collect()
}

/// A [`MemoryContainer`] shared by every rank-thread in a multi-rank test.
/// Real collective I/O writes non-overlapping stripes from independent
/// processes; here every "rank" is a thread, so writes are serialized
/// through a `Mutex` instead — the thing under test is the cross-thread
/// collective math in `layout`/`dbs::scatter`, not concurrent file access.
#[derive(Clone)]
struct SharedContainer(Arc<Mutex<MemoryContainer>>);

impl SharedContainer {
    fn wrap(inner: MemoryContainer) -> Self {
        SharedContainer(Arc::new(Mutex::new(inner)))
    }
}

impl Container for SharedContainer {
    fn open(path: &Path, rw: bool) -> crate::Result<Self> {
        Ok(SharedContainer::wrap(MemoryContainer::open(path, rw)?))
    }

    fn close(self) -> crate::Result<()> {
        Ok(())
    }

    fn dataset_extent(&self, path: &str) -> crate::Result<u64> {
        self.0.lock().unwrap().dataset_extent(path)
    }

    fn create_or_extend(
        &mut self,
        path: &str,
        elem_type: ElementType,
        new_global_len: u64,
        chunk: u64,
    ) -> crate::Result<()> {
        self.0.lock().unwrap().create_or_extend(path, elem_type, new_global_len, chunk)
    }

    fn write_slab<T: Pod>(&mut self, path: &str, local_start: u64, data: &[T]) -> crate::Result<()> {
        self.0.lock().unwrap().write_slab(path, local_start, data)
    }

    fn read_slab<T: Pod + Zeroable>(
        &self,
        path: &str,
        local_start: u64,
        local_len: u64,
    ) -> crate::Result<Vec<T>> {
        self.0.lock().unwrap().read_slab(path, local_start, local_len)
    }

    fn enum_type(&mut self, enum_type: &EnumType) -> crate::Result<()> {
        self.0.lock().unwrap().enum_type(enum_type)
    }
}

fn tree_with(
    cell_id: u64,
    n: usize,
    sections: &[u16],
    src_section: &[u16],
    dst_section: &[u16],
    parent: &[i32],
) -> Tree {
    Tree {
        cell_id: CellId::new(cell_id),
        src_section: src_section.iter().map(|&s| SectionIdx::new(s)).collect(),
        dst_section: dst_section.iter().map(|&s| SectionIdx::new(s)).collect(),
        sections: sections.iter().map(|&s| SectionIdx::new(s)).collect(),
        x: (0..n).map(|i| i as f32).collect(),
        y: vec![0.0; n],
        z: vec![0.0; n],
        radius: vec![1.0; n],
        layer: vec![LayerIdx::new(0); n],
        parent: parent.iter().map(|&p| ParentNodeIdx::new(p)).collect(),
        swc_type: vec![SwcTypeCode(1); n],
    }
}

/// spec.md §8 scenario S2's tree A: N=4, M=3.
fn tree_a() -> Tree {
    tree_with(1, 4, &[0, 1, 2, 3], &[0, 0, 1], &[1, 2, 3], &[-1, 0, 1, 2])
}

/// spec.md §8 scenario S2's tree B: N=2, M=1.
fn tree_b() -> Tree {
    tree_with(2, 2, &[0, 1], &[0], &[1], &[-1, 0])
}

/// spec.md §8 scenario S3's tree C: a single node, no topology at all.
fn tree_c() -> Tree {
    tree_with(3, 1, &[0], &[], &[], &[-1])
}

#[test]
fn scenario_s2_two_ranks_build_one_tree_ensemble() {
    let dir = tempfile::tempdir().unwrap();
    let shared = SharedContainer::wrap(MemoryContainer::open(dir.path(), true).unwrap());
    let mut comms = make_thread_comms(2, 16).into_iter();
    let (comm0, comm1) = (comms.next().unwrap(), comms.next().unwrap());

    let (c0, c1) = (shared.clone(), shared.clone());
    let h0 = thread::spawn(move || {
        let mut container = c0;
        append_trees(&mut container, &comm0, &[tree_a()], AppendTreesConfig::default()).unwrap();
    });
    let h1 = thread::spawn(move || {
        let mut container = c1;
        append_trees(&mut container, &comm1, &[tree_b()], AppendTreesConfig::default()).unwrap();
    });
    h0.join().unwrap();
    h1.join().unwrap();

    let container = shared.0.lock().unwrap();
    let attr_ptr: Vec<u64> = container.read_slab("/attr_ptr", 0, 3).unwrap();
    let topo_ptr: Vec<u64> = container.read_slab("/topo_ptr", 0, 3).unwrap();
    assert_eq!(attr_ptr, vec![0, 4, 6]);
    assert_eq!(topo_ptr, vec![0, 3, 4]);

    drop(container);
    let trees = read_all_trees(&shared).unwrap();
    assert_eq!(trees, vec![tree_a(), tree_b()]);
}

#[test]
fn scenario_s3_a_third_batch_with_one_rank_idle() {
    let dir = tempfile::tempdir().unwrap();
    let shared = SharedContainer::wrap(MemoryContainer::open(dir.path(), true).unwrap());

    // First collective call: identical to S2 above.
    {
        let mut comms = make_thread_comms(2, 16).into_iter();
        let (comm0, comm1) = (comms.next().unwrap(), comms.next().unwrap());
        let (c0, c1) = (shared.clone(), shared.clone());
        let h0 = thread::spawn(move || {
            let mut container = c0;
            append_trees(&mut container, &comm0, &[tree_a()], AppendTreesConfig::default()).unwrap();
        });
        let h1 = thread::spawn(move || {
            let mut container = c1;
            append_trees(&mut container, &comm1, &[tree_b()], AppendTreesConfig::default()).unwrap();
        });
        h0.join().unwrap();
        h1.join().unwrap();
    }

    // Second call: rank 0 contributes tree C, rank 1 contributes nothing —
    // an empty rank must still participate in every all-gather (spec.md
    // §4.B, "Edge cases").
    let cfg = AppendTreesConfig { ptr_start: 2, attr_start: 6, sec_start: 6, topo_start: 4, ..AppendTreesConfig::default() };
    let mut comms = make_thread_comms(2, 16).into_iter();
    let (comm0, comm1) = (comms.next().unwrap(), comms.next().unwrap());
    let (c0, c1) = (shared.clone(), shared.clone());
    let h0 = thread::spawn(move || {
        let mut container = c0;
        append_trees(&mut container, &comm0, &[tree_c()], cfg).unwrap();
    });
    let h1 = thread::spawn(move || {
        let mut container = c1;
        append_trees(&mut container, &comm1, &[], cfg).unwrap();
    });
    h0.join().unwrap();
    h1.join().unwrap();

    let trees = read_all_trees(&shared).unwrap();
    assert_eq!(trees, vec![tree_a(), tree_b(), tree_c()]);
}

#[test]
fn rank_count_does_not_change_the_decoded_tree_ensemble() {
    // One process, one call with all three trees...
    let single_dir = tempfile::tempdir().unwrap();
    let mut single_container = MemoryContainer::open(single_dir.path(), true).unwrap();
    let single_comm = SingleProcess::new();
    append_trees(
        &mut single_container,
        &single_comm,
        &[tree_a(), tree_b(), tree_c()],
        AppendTreesConfig::default(),
    )
    .unwrap();
    let single_rank_trees = read_all_trees(&single_container).unwrap();

    // ...versus two ranks split across two collective calls (S2 then S3).
    let multi_dir = tempfile::tempdir().unwrap();
    let shared = SharedContainer::wrap(MemoryContainer::open(multi_dir.path(), true).unwrap());
    {
        let mut comms = make_thread_comms(2, 16).into_iter();
        let (comm0, comm1) = (comms.next().unwrap(), comms.next().unwrap());
        let (c0, c1) = (shared.clone(), shared.clone());
        let h0 = thread::spawn(move || {
            let mut container = c0;
            append_trees(&mut container, &comm0, &[tree_a()], AppendTreesConfig::default()).unwrap();
        });
        let h1 = thread::spawn(move || {
            let mut container = c1;
            append_trees(&mut container, &comm1, &[tree_b()], AppendTreesConfig::default()).unwrap();
        });
        h0.join().unwrap();
        h1.join().unwrap();
    }
    let cfg = AppendTreesConfig { ptr_start: 2, attr_start: 6, sec_start: 6, topo_start: 4, ..AppendTreesConfig::default() };
    {
        let mut comms = make_thread_comms(2, 16).into_iter();
        let (comm0, comm1) = (comms.next().unwrap(), comms.next().unwrap());
        let (c0, c1) = (shared.clone(), shared.clone());
        let h0 = thread::spawn(move || {
            let mut container = c0;
            append_trees(&mut container, &comm0, &[tree_c()], cfg).unwrap();
        });
        let h1 = thread::spawn(move || {
            let mut container = c1;
            append_trees(&mut container, &comm1, &[], cfg).unwrap();
        });
        h0.join().unwrap();
        h1.join().unwrap();
    }
    let multi_rank_trees = read_all_trees(&shared).unwrap();

    assert_eq!(single_rank_trees, multi_rank_trees);
}

fn s4_input_for(dests: &[(u32, &[u32])]) -> InputEdgeMap {
    let mut map = InputEdgeMap::new();
    for &(dst, srcs) in dests {
        map.insert(
            NodeId::new(dst),
            EdgeList { src: srcs.iter().map(|&s| NodeId::new(s)).collect(), attrs: EdgeAttrSet::empty() },
        );
    }
    map
}

fn sample_pop_table() -> (PopTable, Pop, Pop) {
    let mut table = PopTable::new();
    let src_pop = Pop::new(0);
    let dst_pop = Pop::new(1);
    table.push_range(PopRange { start: NodeId::new(0), count: 10, pop: src_pop }, "src").unwrap();
    table.push_range(PopRange { start: NodeId::new(10), count: 20, pop: dst_pop }, "dst").unwrap();
    table.allow_pair(src_pop, dst_pop);
    (table, src_pop, dst_pop)
}

#[test]
fn scenario_s4_two_ranks_encode_the_same_shape_as_one_rank() {
    let dir = tempfile::tempdir().unwrap();
    let shared = SharedContainer::wrap(MemoryContainer::open(dir.path(), true).unwrap());
    let paths = ProjectionPaths::new("/Projections/A-B");

    let mut comms = make_thread_comms(2, 16).into_iter();
    let (comm0, comm1) = (comms.next().unwrap(), comms.next().unwrap());
    let (c0, c1) = (shared.clone(), shared.clone());
    let (p0, p1) = (paths.clone(), paths.clone());

    let h0 = thread::spawn(move || {
        let mut container = c0;
        let local = s4_input_for(&[(10, &[1, 2]), (11, &[2])]);
        append_graph(&mut container, &comm0, &p0, &local, NodeId::new(10), NodeId::new(0), AppendGraphConfig::default())
            .unwrap();
    });
    let h1 = thread::spawn(move || {
        let mut container = c1;
        let local = s4_input_for(&[(20, &[3])]);
        append_graph(&mut container, &comm1, &p1, &local, NodeId::new(10), NodeId::new(0), AppendGraphConfig::default())
            .unwrap();
    });
    h0.join().unwrap();
    h1.join().unwrap();

    let projection = read_projection(&shared, &paths, &[]).unwrap();
    assert_eq!(projection.dst_blk_ptr.iter().map(|p| p.get()).collect::<Vec<_>>(), vec![0, 2, 3]);
    assert_eq!(projection.dst_idx.iter().map(|p| p.get()).collect::<Vec<_>>(), vec![0, 10]);
    assert_eq!(projection.dst_ptr.iter().map(|p| p.get()).collect::<Vec<_>>(), vec![0, 2, 3, 4]);
    assert_eq!(projection.src_idx.iter().map(|p| p.get()).collect::<Vec<_>>(), vec![1, 2, 2, 3]);

    let (pop_table, src_pop, dst_pop) = sample_pop_table();
    let reconstructed =
        reconstruct_edges(&projection, NodeId::new(10), NodeId::new(0), &pop_table, src_pop, dst_pop).unwrap();
    assert_eq!(reconstructed, s4_input_for(&[(10, &[1, 2]), (11, &[2]), (20, &[3])]));
}

/// spec.md §8 scenario S5, run across two real rank-threads: reader block
/// ranges split the read, `node_rank_map` then reshuffles the result.
#[test]
fn scenario_s5_two_ranks_redistribute_by_node_rank_map() {
    let dir = tempfile::tempdir().unwrap();
    let single_comm = SingleProcess::new();
    let paths = ProjectionPaths::new("/Projections/A-B");
    let shared = SharedContainer::wrap(MemoryContainer::open(dir.path(), true).unwrap());
    {
        let mut container = shared.0.lock().unwrap();
        append_graph(
            &mut *container,
            &single_comm,
            &paths,
            &s4_input_for(&[(10, &[1, 2]), (11, &[2]), (20, &[3])]),
            NodeId::new(10),
            NodeId::new(0),
            AppendGraphConfig::default(),
        )
        .unwrap();
    }

    let (pop_table, src_pop, dst_pop) = sample_pop_table();
    let mut rank_map = RankTable::new();
    rank_map.insert(NodeId::new(10), PopRank::new(0));
    rank_map.insert(NodeId::new(20), PopRank::new(0));
    rank_map.insert(NodeId::new(11), PopRank::new(1));

    let cfg = ScatterReadConfig { edge_map_type: EdgeMapType::DestinationKeyed, io_size: 2, ..ScatterReadConfig::default() };

    let mut comms = make_thread_comms(2, 16).into_iter();
    let (comm0, comm1) = (comms.next().unwrap(), comms.next().unwrap());
    let (c0, c1) = (shared.clone(), shared.clone());
    let (p0, p1) = (paths.clone(), paths.clone());
    let (pt0, pt1) = (pop_table.clone(), pop_table.clone());
    let (rm0, rm1) = (rank_map.clone(), rank_map.clone());
    let (cfg0, cfg1) = (cfg.clone(), cfg.clone());

    let h0 = thread::spawn(move || {
        scatter_read_projection(&c0, &comm0, &p0, &[], NodeId::new(10), NodeId::new(0), &pt0, src_pop, dst_pop, &rm0, &cfg0)
            .unwrap()
    });
    let h1 = thread::spawn(move || {
        scatter_read_projection(&c1, &comm1, &p1, &[], NodeId::new(10), NodeId::new(0), &pt1, src_pop, dst_pop, &rm1, &cfg1)
            .unwrap()
    });
    let outcome0 = h0.join().unwrap();
    let outcome1 = h1.join().unwrap();

    assert_eq!(outcome0.total_num_edges, 4);
    assert_eq!(outcome1.total_num_edges, 4);
    assert_eq!(outcome0.local_num_edges + outcome1.local_num_edges, 4);

    let mut rank0_dests: Vec<(u32, Vec<u32>)> = outcome0
        .prj_vector
        .iter()
        .map(|(k, v)| (k.get(), v.peers.iter().map(|p| p.get()).collect()))
        .collect();
    rank0_dests.sort();
    assert_eq!(rank0_dests, vec![(10, vec![1, 2]), (20, vec![3])]);

    let mut rank1_dests: Vec<(u32, Vec<u32>)> = outcome1
        .prj_vector
        .iter()
        .map(|(k, v)| (k.get(), v.peers.iter().map(|p| p.get()).collect()))
        .collect();
    rank1_dests.sort();
    assert_eq!(rank1_dests, vec![(11, vec![2])]);
}
