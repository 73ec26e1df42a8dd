//! `scatter_read_projection` (spec.md §4.E.2, §4.E.3).
//!
//! Reads a DBS projection off disk on the first `io_size` ranks only, then
//! redistributes the reconstructed edges to whichever rank `node_rank_map`
//! says owns each destination. Every rank, reader or not, participates in
//! the final all-to-all: this is the only place this crate touches
//! `Communicator::all_to_all_varying` for anything other than error
//! promotion.

use std::collections::BTreeMap;

use nohash::IntMap;

use crate::comm::Communicator;
use crate::config::{EdgeMapType, ScatterReadConfig};
use crate::container::{Container, ElementType};
use crate::dbs::{read_attr_column, AttrValues, EdgeAttrColumn, EdgeAttrSet, ProjectionPaths};
use crate::error::Error;
use crate::ids::{DstBlkPtr, DstPtr, NodeId, Pop, PopRank};
use crate::population::PopTable;
use crate::Result;

/// Maps a destination `NodeId` to the rank that should own its edges.
///
/// Implemented for any `Fn(NodeId) -> PopRank`, and for [`RankTable`] when
/// the mapping is cheaper to hold as a precomputed table than to recompute
/// per call.
pub trait NodeRankMap: Sync {
    fn rank_of(&self, node: NodeId) -> PopRank;
}

impl<F: Fn(NodeId) -> PopRank + Sync> NodeRankMap for F {
    fn rank_of(&self, node: NodeId) -> PopRank {
        self(node)
    }
}

/// A precomputed `NodeId -> PopRank` table, backed by a no-hash map since
/// `NodeId` is already a dense integer key (same role as `parallel.rs`'s
/// `IntMap<ItemId, _>` in the teacher).
#[derive(Debug, Clone, Default)]
pub struct RankTable(pub IntMap<u32, PopRank>);

impl RankTable {
    pub fn new() -> Self {
        RankTable(IntMap::default())
    }

    pub fn insert(&mut self, node: NodeId, rank: PopRank) {
        self.0.insert(node.get(), rank);
    }
}

impl NodeRankMap for RankTable {
    fn rank_of(&self, node: NodeId) -> PopRank {
        self.0.get(&node.get()).copied().unwrap_or_else(|| {
            panic!("RankTable has no owning rank for node {node}")
        })
    }
}

/// One rank's local view of a reconstructed edge after redistribution. The
/// map key is a destination or a source node depending on
/// [`EdgeMapType`](crate::config::EdgeMapType); `peers` holds the *other*
/// endpoint of every edge sharing that key, in delivery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScatterEdges {
    pub peers: Vec<NodeId>,
    pub attrs: EdgeAttrSet,
}

/// `destination-or-source NodeId -> (peer NodeIds, edge attributes)`, the
/// output shape `scatter_read_projection` delivers (spec.md §4.E.2).
pub type ScatterEdgeMap = BTreeMap<NodeId, ScatterEdges>;

/// The read-side state machine (spec.md §4.E.3). No state is retained
/// between calls; this only exists to label the synchronous collective
/// steps in tracing spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterState {
    Idle,
    StripePlanned,
    Reading,
    Redistributing,
    Delivered,
    Failed,
}

/// Everything `scatter_read_projection` hands back to the caller (spec.md
/// §4.E.2).
#[derive(Debug, Clone)]
pub struct ScatterReadOutcome {
    pub prj_vector: ScatterEdgeMap,
    pub edge_attr_names: Vec<(String, ElementType)>,
    pub local_num_nodes: u64,
    pub local_num_edges: u64,
    pub total_num_edges: u64,
}

struct LocalEdge {
    dst: NodeId,
    src: NodeId,
    attr_bytes: Vec<u8>,
}

struct LocalPhase {
    edges: Vec<LocalEdge>,
}

/// Computes the `[lo, hi)` block range this reader owns, dividing
/// `n_blocks` evenly across `io_readers` (spec.md §4.E.2, phase 1).
fn reader_block_range(rank: i32, io_readers: u64, n_blocks: u64) -> (u64, u64) {
    let rank = rank as u64;
    let lo = n_blocks * rank / io_readers;
    let hi = n_blocks * (rank + 1) / io_readers;
    (lo, hi)
}

fn read_local_phase<C: Container>(
    container: &C,
    paths: &ProjectionPaths,
    attr_schema: &[(String, ElementType)],
    dst_start: NodeId,
    src_start: NodeId,
    pop_table: &PopTable,
    src_pop: Pop,
    dst_pop: Pop,
    window: Option<(u64, u64)>,
    lo: u64,
    hi: u64,
) -> Result<LocalPhase> {
    pop_table.check_pair(src_pop, dst_pop)?;
    let dst_range = pop_table
        .range_of(dst_pop)
        .ok_or_else(|| Error::invariant(format!("no population range registered for dst pop {dst_pop}")))?;
    let src_range = pop_table
        .range_of(src_pop)
        .ok_or_else(|| Error::invariant(format!("no population range registered for src pop {src_pop}")))?;

    if hi <= lo {
        return Ok(LocalPhase { edges: Vec::new() });
    }

    let dst_blk_ptr: Vec<DstBlkPtr> = container.read_slab(&paths.dst_blk_ptr(), lo, hi - lo + 1)?;
    let dst_idx: Vec<NodeId> = container.read_slab(&paths.dst_idx(), lo, hi - lo)?;

    let blk_lo = dst_blk_ptr[0].get();
    let blk_hi = dst_blk_ptr[dst_blk_ptr.len() - 1].get();
    if blk_hi < blk_lo {
        return Err(Error::invariant("dst_blk_ptr is not monotonic non-decreasing"));
    }

    let dst_ptr: Vec<DstPtr> = container.read_slab(&paths.dst_ptr(), blk_lo, blk_hi - blk_lo + 1)?;
    let edge_lo = dst_ptr[0].get();
    let edge_hi = dst_ptr[dst_ptr.len() - 1].get();
    if edge_hi < edge_lo {
        return Err(Error::invariant("dst_ptr is not monotonic non-decreasing"));
    }

    let src_idx: Vec<NodeId> = container.read_slab(&paths.src_idx(), edge_lo, edge_hi - edge_lo)?;

    let mut attr_cols = Vec::with_capacity(attr_schema.len());
    for (name, ty) in attr_schema {
        let values = read_attr_column(container, &paths.attr(name), *ty, edge_lo, edge_hi - edge_lo)?;
        attr_cols.push(EdgeAttrColumn { name: name.clone(), values });
    }

    let mut edges = Vec::new();
    for b in 0..dst_idx.len() {
        let b_lo = dst_blk_ptr[b].get();
        let b_hi = dst_blk_ptr[b + 1].get();
        for i in b_lo..b_hi {
            if let Some((offset, numitems)) = window {
                if i < offset || i >= offset + numitems {
                    continue;
                }
            }

            let dest = NodeId::new(dst_idx[b].get() + (i - b_lo) as u32 + dst_start.get());
            if !dst_range.contains(dest) {
                return Err(Error::invariant(format!(
                    "reconstructed destination {dest} falls outside population {dst_pop}'s range"
                )));
            }

            let j_lo = (dst_ptr[(i - blk_lo) as usize].get() - edge_lo) as usize;
            let j_hi = (dst_ptr[(i - blk_lo) as usize + 1].get() - edge_lo) as usize;
            for j in j_lo..j_hi {
                let src = NodeId::new(src_idx[j].get() + src_start.get());
                if !src_range.contains(src) {
                    return Err(Error::invariant(format!(
                        "reconstructed source {src} falls outside population {src_pop}'s range"
                    )));
                }
                let mut attr_bytes = Vec::new();
                for col in &attr_cols {
                    attr_bytes.extend_from_slice(&col.values.bytes_of(j));
                }
                edges.push(LocalEdge { dst: dest, src, attr_bytes });
            }
        }
    }

    Ok(LocalPhase { edges })
}

fn attr_record_width(attr_schema: &[(String, ElementType)]) -> usize {
    attr_schema.iter().map(|(_, ty)| ty.size_bytes()).sum()
}

/// Serializes `edges` into `size` per-destination-rank send buffers, each
/// record laid out as `dst:u32 | src:u32 | attr bytes...` (spec.md §4.E.2,
/// "Redistribution"). `node_rank_map` is caller-supplied and can be
/// malformed; an out-of-range rank is surfaced as an error rather than
/// silently wrapped into a valid slot (spec.md §7, "all errors are
/// surfaced to the caller").
fn build_send_buffers(
    edges: &[LocalEdge],
    size: usize,
    node_rank_map: &dyn NodeRankMap,
) -> Result<Vec<Vec<u8>>> {
    let mut send = vec![Vec::new(); size];
    for edge in edges {
        let owner = node_rank_map.rank_of(edge.dst).get() as usize;
        if owner >= size {
            return Err(Error::invariant(format!(
                "node_rank_map assigned destination {} to rank {owner}, but the communicator only has {size} ranks",
                edge.dst
            )));
        }
        let buf = &mut send[owner];
        buf.extend_from_slice(&edge.dst.get().to_le_bytes());
        buf.extend_from_slice(&edge.src.get().to_le_bytes());
        buf.extend_from_slice(&edge.attr_bytes);
    }
    Ok(send)
}

/// Deserializes the bytes this rank received from every sender into a
/// [`ScatterEdgeMap`], keyed according to `edge_map_type`.
fn deserialize_received(
    received: Vec<Vec<u8>>,
    attr_schema: &[(String, ElementType)],
    edge_map_type: EdgeMapType,
) -> (ScatterEdgeMap, u64) {
    let record_width = 8 + attr_record_width(attr_schema);
    let mut out = ScatterEdgeMap::new();
    let mut local_num_edges = 0u64;

    for buf in received {
        if record_width == 0 {
            continue;
        }
        let mut offset = 0;
        while offset + record_width <= buf.len() {
            let dst = NodeId::new(u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()));
            let src = NodeId::new(u32::from_le_bytes(buf[offset + 4..offset + 8].try_into().unwrap()));
            let attr_bytes = &buf[offset + 8..offset + record_width];

            let (key, peer) = match edge_map_type {
                EdgeMapType::DestinationKeyed => (dst, src),
                EdgeMapType::SourceKeyed => (src, dst),
            };

            let entry = out.entry(key).or_insert_with(|| ScatterEdges {
                peers: Vec::new(),
                attrs: EdgeAttrSet(
                    attr_schema
                        .iter()
                        .map(|(name, ty)| EdgeAttrColumn {
                            name: name.clone(),
                            values: empty_attr_values(*ty),
                        })
                        .collect(),
                ),
            });
            entry.peers.push(peer);

            let mut cursor = 0;
            for (col, (_, ty)) in entry.attrs.0.iter_mut().zip(attr_schema.iter()) {
                let width = ty.size_bytes();
                col.values.push_bytes(&attr_bytes[cursor..cursor + width]);
                cursor += width;
            }

            local_num_edges += 1;
            offset += record_width;
        }
    }

    (out, local_num_edges)
}

fn empty_attr_values(ty: ElementType) -> AttrValues {
    match ty {
        ElementType::F32 => AttrValues::F32(Vec::new()),
        ElementType::U8 => AttrValues::U8(Vec::new()),
        ElementType::U16 => AttrValues::U16(Vec::new()),
        ElementType::U32 => AttrValues::U32(Vec::new()),
        ElementType::I8 => AttrValues::I8(Vec::new()),
        ElementType::I16 => AttrValues::I16(Vec::new()),
        ElementType::I32 => AttrValues::I32(Vec::new()),
        ElementType::U64 | ElementType::I64 => AttrValues::U32(Vec::new()),
    }
}

/// Reads and redistributes one DBS projection across the communicator
/// (spec.md §4.E.2). Every rank must call this with the same arguments;
/// only the first `cfg.io_size` ranks touch `container` directly.
///
/// `attr_schema` names every edge-attribute column that exists on the
/// projection; `cfg.attr_namespaces`, if set, narrows which of those are
/// actually fetched.
#[allow(clippy::too_many_arguments)]
pub fn scatter_read_projection<C: Container>(
    container: &C,
    comm: &dyn Communicator,
    paths: &ProjectionPaths,
    attr_schema: &[(String, ElementType)],
    dst_start: NodeId,
    src_start: NodeId,
    pop_table: &PopTable,
    src_pop: Pop,
    dst_pop: Pop,
    node_rank_map: &dyn NodeRankMap,
    cfg: &ScatterReadConfig,
) -> Result<ScatterReadOutcome> {
    let mut state = ScatterState::Idle;
    tracing::debug!(?state, rank = comm.rank(), "scatter_read_projection starting");

    let requested_schema: Vec<(String, ElementType)> = match &cfg.attr_namespaces {
        Some(names) => attr_schema.iter().filter(|(n, _)| names.contains(n)).cloned().collect(),
        None => attr_schema.to_vec(),
    };

    let io_readers = cfg.io_size.max(1).min(comm.size().max(1)) as u64;
    let is_reader = comm.is_reader(cfg.io_size);

    state = ScatterState::StripePlanned;
    tracing::trace!(?state, io_readers, "stripe planned");

    let local_phase_result: Result<LocalPhase> = (|| {
        if !is_reader {
            return Ok(LocalPhase { edges: Vec::new() });
        }
        let n_blocks_plus_1 = container.dataset_extent(&paths.dst_blk_ptr())?;
        let n_blocks = n_blocks_plus_1.saturating_sub(1);
        let (lo, hi) = reader_block_range(comm.rank(), io_readers, n_blocks);
        read_local_phase(
            container,
            paths,
            &requested_schema,
            dst_start,
            src_start,
            pop_table,
            src_pop,
            dst_pop,
            cfg.window,
            lo,
            hi,
        )
    })();

    state = ScatterState::Reading;
    tracing::trace!(?state, "bulk read phase complete locally, synchronizing");

    // Reduce on a `Clone`-able payload (the local edge count) rather than
    // `LocalPhase` itself, then recover the real data only once every rank
    // has agreed the read phase succeeded everywhere (spec.md §7,
    // "Propagation policy"). The original `Error` — not a re-wrapped
    // `InvariantViolation` — travels through `reduce_result` so a failure
    // that is symmetric across ranks surfaces its real kind unchanged.
    let (reduce_input, local_phase_ok): (Result<u64>, Option<LocalPhase>) = match local_phase_result
    {
        Ok(p) => {
            let count = p.edges.len() as u64;
            (Ok(count), Some(p))
        }
        Err(e) => (Err(e), None),
    };

    let local_phase = match comm.reduce_result(reduce_input) {
        Ok(_) => local_phase_ok
            .expect("reduce_result succeeded but the read phase had failed locally"),
        Err(e) => {
            tracing::warn!(error = %e, "scatter_read_projection failed during the read phase");
            return Err(e);
        }
    };

    state = ScatterState::Redistributing;
    tracing::trace!(?state, "redistributing edges across ranks");

    let size = comm.size().max(1) as usize;
    let send = match comm.reduce_result(build_send_buffers(&local_phase.edges, size, node_rank_map)) {
        Ok(send) => send,
        Err(e) => {
            tracing::warn!(error = %e, "scatter_read_projection failed while building send buffers");
            return Err(e);
        }
    };
    let received = comm.all_to_all_varying(send);
    let (prj_vector, local_num_edges) =
        deserialize_received(received, &requested_schema, cfg.edge_map_type);

    let total_num_edges = container.dataset_extent(&paths.src_idx())?;

    state = ScatterState::Delivered;
    tracing::debug!(
        ?state,
        rank = comm.rank(),
        local_num_nodes = prj_vector.len(),
        local_num_edges,
        total_num_edges,
        "scatter_read_projection delivered"
    );

    Ok(ScatterReadOutcome {
        prj_vector,
        edge_attr_names: requested_schema,
        local_num_nodes: prj_vector.len() as u64,
        local_num_edges,
        total_num_edges,
    })
}
