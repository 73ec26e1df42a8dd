//! `append_graph` (encode) and the whole-file decode/reconstruct path for
//! one DBS projection (spec.md §4.E.1).

use crate::comm::Communicator;
use crate::config::AppendGraphConfig;
use crate::container::{Container, ElementType};
use crate::dbs::{
    read_attr_column, stage_attr_column_extent, write_attr_column, AttrValues, EdgeAttrColumn,
    EdgeAttrSet, EdgeList, InputEdgeMap, Projection, ProjectionPaths,
};
use crate::error::Error;
use crate::ids::{DstBlkPtr, DstPtr, NodeId, Pop};
use crate::layout::{plan_pointer_stripe, plan_stripe, rebase_pointer_prefix};
use crate::population::PopTable;
use crate::Result;

impl From<u64> for DstBlkPtr {
    fn from(v: u64) -> Self {
        DstBlkPtr::new(v)
    }
}
impl From<u64> for DstPtr {
    fn from(v: u64) -> Self {
        DstPtr::new(v)
    }
}

struct FlatEdges {
    dst_blk_ptr: Vec<u64>,
    dst_idx: Vec<NodeId>,
    dst_ptr: Vec<u64>,
    src_idx: Vec<NodeId>,
    attrs: EdgeAttrSet,
}

/// Groups sorted destinations into maximal runs of consecutive `NodeId`s,
/// sorts each destination's out-edges by ascending source `NodeId`, and
/// builds the three running-total arrays (spec.md §4.E.1).
fn flatten(input: &InputEdgeMap, dst_start: NodeId, src_start: NodeId) -> Result<FlatEdges> {
    let schema = input.values().find(|e| !e.attrs.0.is_empty()).map(|e| e.attrs.schema());
    let mut attrs = match &schema {
        Some(schema) => EdgeAttrSet(
            schema
                .iter()
                .map(|(name, ty)| EdgeAttrColumn {
                    name: name.clone(),
                    values: match ty {
                        ElementType::F32 => AttrValues::F32(Vec::new()),
                        ElementType::U8 => AttrValues::U8(Vec::new()),
                        ElementType::U16 => AttrValues::U16(Vec::new()),
                        ElementType::U32 => AttrValues::U32(Vec::new()),
                        ElementType::I8 => AttrValues::I8(Vec::new()),
                        ElementType::I16 => AttrValues::I16(Vec::new()),
                        ElementType::I32 => AttrValues::I32(Vec::new()),
                        ElementType::U64 | ElementType::I64 => {
                            return Err(Error::invariant(format!(
                                "edge attribute `{name}` declared with unsupported width {ty:?}"
                            )))
                        }
                    },
                })
                .collect(),
        ),
        None => EdgeAttrSet::empty(),
    };

    let mut dst_blk_ptr = vec![0u64];
    let mut dst_idx = Vec::new();
    let mut dst_ptr = vec![0u64];
    let mut src_idx = Vec::new();
    let mut prev_dst: Option<u32> = None;
    let mut n_dst_in_block = 0u64;

    for (&dst, edges) in input.iter() {
        if let Some(declared) = &schema {
            if !edges.src.is_empty() && &edges.attrs.schema() != declared {
                return Err(Error::invariant(format!(
                    "destination {dst}'s edge attribute schema does not match the \
                     projection's declared schema"
                )));
            }
        }

        let is_new_block = match prev_dst {
            Some(p) => dst.get() != p + 1,
            None => true,
        };
        if is_new_block {
            if prev_dst.is_some() {
                dst_blk_ptr.push(dst_blk_ptr.last().unwrap() + n_dst_in_block);
            }
            dst_idx.push(NodeId::new(dst.get() - dst_start.get()));
            n_dst_in_block = 0;
        }
        n_dst_in_block += 1;
        prev_dst = Some(dst.get());

        let mut order: Vec<usize> = (0..edges.src.len()).collect();
        order.sort_by_key(|&i| edges.src[i].get());

        for &i in &order {
            src_idx.push(NodeId::new(edges.src[i].get() - src_start.get()));
            for (col, decl) in attrs.0.iter_mut().zip(edges.attrs.0.iter().filter(|c| {
                schema.as_ref().unwrap().iter().any(|(n, _)| n == &c.name)
            })) {
                let _ = decl;
                col.values.push_from(&edges.attrs.0.iter().find(|c| c.name == col.name).unwrap().values, i);
            }
        }
        dst_ptr.push(src_idx.len() as u64);
    }
    if prev_dst.is_some() {
        dst_blk_ptr.push(dst_blk_ptr.last().unwrap() + n_dst_in_block);
    }

    Ok(FlatEdges { dst_blk_ptr, dst_idx, dst_ptr, src_idx, attrs })
}

/// Appends one rank's local edge contribution to the projection at `paths`
/// (spec.md §4.E.1). Every rank must call this with the same `paths`,
/// `dst_start`, `src_start`, and `cfg`.
pub fn append_graph<C: Container>(
    container: &mut C,
    comm: &dyn Communicator,
    paths: &ProjectionPaths,
    input: &InputEdgeMap,
    dst_start: NodeId,
    src_start: NodeId,
    cfg: AppendGraphConfig,
) -> Result<()> {
    let local = flatten(input, dst_start, src_start)?;

    let n_blocks = local.dst_idx.len() as u64;
    let n_dst = input.len() as u64;
    let n_edges = local.src_idx.len() as u64;

    let block_ptr_stripe = plan_pointer_stripe(comm, n_blocks, cfg.dst_blk_start);
    let block_plain_stripe = plan_stripe(comm, n_blocks, cfg.dst_blk_start);
    let dest_ptr_stripe = plan_pointer_stripe(comm, n_dst, cfg.dst_start_offset);
    let dest_plain_stripe = plan_stripe(comm, n_dst, cfg.dst_start_offset);
    let edge_stripe = plan_stripe(comm, n_edges, cfg.src_start_offset);

    let dst_blk_ptr_out: Vec<DstBlkPtr> =
        rebase_pointer_prefix(&local.dst_blk_ptr, dest_plain_stripe.local_start, block_ptr_stripe.local_len);
    let dst_ptr_out: Vec<DstPtr> =
        rebase_pointer_prefix(&local.dst_ptr, edge_stripe.local_start, dest_ptr_stripe.local_len);

    let mut do_write = || -> Result<()> {
        // Stage every dataset's extent change — the four core arrays and
        // every attribute column alike — before any dataset is written, so
        // a later extend failure never leaves an earlier one already
        // committed for this batch (spec.md §4.D).
        container.create_or_extend(
            &paths.dst_blk_ptr(),
            ElementType::U64,
            block_ptr_stripe.global_end,
            cfg.chunk.pointer_chunk,
        )?;
        container.create_or_extend(
            &paths.dst_idx(),
            ElementType::U32,
            block_plain_stripe.global_end,
            cfg.chunk.payload_chunk,
        )?;
        container.create_or_extend(
            &paths.dst_ptr(),
            ElementType::U64,
            dest_ptr_stripe.global_end,
            cfg.chunk.pointer_chunk,
        )?;
        container.create_or_extend(
            &paths.src_idx(),
            ElementType::U32,
            edge_stripe.global_end,
            cfg.chunk.payload_chunk,
        )?;
        for col in &local.attrs.0 {
            stage_attr_column_extent(
                container,
                &paths.attr(&col.name),
                &col.values,
                edge_stripe.global_end,
                cfg.chunk.payload_chunk,
            )?;
        }

        container.write_slab(&paths.dst_blk_ptr(), block_ptr_stripe.local_start, &dst_blk_ptr_out)?;
        container.write_slab(&paths.dst_idx(), block_plain_stripe.local_start, &local.dst_idx)?;
        container.write_slab(&paths.dst_ptr(), dest_ptr_stripe.local_start, &dst_ptr_out)?;
        container.write_slab(&paths.src_idx(), edge_stripe.local_start, &local.src_idx)?;
        for col in &local.attrs.0 {
            write_attr_column(container, &paths.attr(&col.name), &col.values, edge_stripe.local_start)?;
        }
        Ok(())
    };

    comm.reduce_result(do_write())
}

/// Reads back the whole projection (single-process convenience, mirroring
/// `tree::encoder::read_all_trees`).
pub fn read_projection<C: Container>(
    container: &C,
    paths: &ProjectionPaths,
    attr_schema: &[(String, ElementType)],
) -> Result<Projection> {
    let n_blocks_plus_1 = container.dataset_extent(&paths.dst_blk_ptr())?;
    let dst_blk_ptr: Vec<DstBlkPtr> = container.read_slab(&paths.dst_blk_ptr(), 0, n_blocks_plus_1)?;
    let n_blocks = n_blocks_plus_1.saturating_sub(1);
    let dst_idx: Vec<NodeId> = container.read_slab(&paths.dst_idx(), 0, n_blocks)?;

    let n_dst = dst_blk_ptr.last().map(|p| p.get()).unwrap_or(0);
    let dst_ptr: Vec<DstPtr> = container.read_slab(&paths.dst_ptr(), 0, n_dst + 1)?;
    let n_edges = dst_ptr.last().map(|p| p.get()).unwrap_or(0);
    let src_idx: Vec<NodeId> = container.read_slab(&paths.src_idx(), 0, n_edges)?;

    let mut attrs = EdgeAttrSet::empty();
    for (name, ty) in attr_schema {
        let values = read_attr_column(container, &paths.attr(name), *ty, 0, n_edges)?;
        attrs.0.push(EdgeAttrColumn { name: name.clone(), values });
    }

    let projection = Projection { dst_blk_ptr, dst_idx, dst_ptr, src_idx, attrs };
    projection.validate()?;
    Ok(projection)
}

/// Reconstructs the edge map a decoded [`Projection`] represents, checking
/// every invariant in spec.md §3.4 and the admissibility of `(src_pop,
/// dst_pop)` against `pop_table` (spec.md §4.E.2).
pub fn reconstruct_edges(
    projection: &Projection,
    dst_start: NodeId,
    src_start: NodeId,
    pop_table: &PopTable,
    src_pop: Pop,
    dst_pop: Pop,
) -> Result<InputEdgeMap> {
    pop_table.check_pair(src_pop, dst_pop)?;
    let dst_range = pop_table
        .range_of(dst_pop)
        .ok_or_else(|| Error::invariant(format!("no population range registered for dst pop {dst_pop}")))?;
    let src_range = pop_table
        .range_of(src_pop)
        .ok_or_else(|| Error::invariant(format!("no population range registered for src pop {src_pop}")))?;

    let mut out = InputEdgeMap::new();
    for b in 0..projection.dst_idx.len() {
        let blk_lo = projection.dst_blk_ptr[b].get();
        let blk_hi = projection.dst_blk_ptr[b + 1].get();
        for i in blk_lo..blk_hi {
            let dest = NodeId::new(projection.dst_idx[b].get() + (i - blk_lo) as u32 + dst_start.get());
            if !dst_range.contains(dest) {
                return Err(Error::invariant(format!(
                    "reconstructed destination {dest} falls outside population {dst_pop}'s range"
                )));
            }

            let lo = projection.dst_ptr[i as usize].get() as usize;
            let hi = projection.dst_ptr[i as usize + 1].get() as usize;
            let mut edge_list = EdgeList {
                src: Vec::with_capacity(hi - lo),
                attrs: EdgeAttrSet(
                    projection.attrs.0.iter().map(|c| EdgeAttrColumn {
                        name: c.name.clone(),
                        values: c.values.empty_like(),
                    }).collect(),
                ),
            };
            for j in lo..hi {
                let src = NodeId::new(projection.src_idx[j].get() + src_start.get());
                if !src_range.contains(src) {
                    return Err(Error::invariant(format!(
                        "reconstructed source {src} falls outside population {src_pop}'s range"
                    )));
                }
                edge_list.src.push(src);
                for (out_col, in_col) in edge_list.attrs.0.iter_mut().zip(projection.attrs.0.iter()) {
                    out_col.values.push_from(&in_col.values, j);
                }
            }
            out.insert(dest, edge_list);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcess;
    use crate::container::memory::MemoryContainer;
    use crate::ids::PopRank;
    use crate::population::PopRange;

    fn s4_input() -> InputEdgeMap {
        let mut map = InputEdgeMap::new();
        map.insert(
            NodeId::new(10),
            EdgeList { src: vec![NodeId::new(1), NodeId::new(2)], attrs: EdgeAttrSet::empty() },
        );
        map.insert(
            NodeId::new(11),
            EdgeList { src: vec![NodeId::new(2)], attrs: EdgeAttrSet::empty() },
        );
        map.insert(
            NodeId::new(20),
            EdgeList { src: vec![NodeId::new(3)], attrs: EdgeAttrSet::empty() },
        );
        map
    }

    #[test]
    fn scenario_s4_encode_matches_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut container = MemoryContainer::open(dir.path(), true).unwrap();
        let comm = SingleProcess::new();
        let paths = ProjectionPaths::new("/Projections/A-B");

        append_graph(
            &mut container,
            &comm,
            &paths,
            &s4_input(),
            NodeId::new(10),
            NodeId::new(0),
            AppendGraphConfig::default(),
        )
        .unwrap();

        let projection = read_projection(&container, &paths, &[]).unwrap();
        assert_eq!(
            projection.dst_blk_ptr.iter().map(|p| p.get()).collect::<Vec<_>>(),
            vec![0, 2, 3]
        );
        assert_eq!(projection.dst_idx.iter().map(|p| p.get()).collect::<Vec<_>>(), vec![0, 10]);
        assert_eq!(
            projection.dst_ptr.iter().map(|p| p.get()).collect::<Vec<_>>(),
            vec![0, 2, 3, 4]
        );
        assert_eq!(
            projection.src_idx.iter().map(|p| p.get()).collect::<Vec<_>>(),
            vec![1, 2, 2, 3]
        );
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
    fn scenario_s4_round_trips_through_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        let mut container = MemoryContainer::open(dir.path(), true).unwrap();
        let comm = SingleProcess::new();
        let paths = ProjectionPaths::new("/Projections/A-B");
        let input = s4_input();

        append_graph(
            &mut container,
            &comm,
            &paths,
            &input,
            NodeId::new(10),
            NodeId::new(0),
            AppendGraphConfig::default(),
        )
        .unwrap();

        let projection = read_projection(&container, &paths, &[]).unwrap();
        let (pop_table, src_pop, dst_pop) = sample_pop_table();
        let reconstructed =
            reconstruct_edges(&projection, NodeId::new(10), NodeId::new(0), &pop_table, src_pop, dst_pop)
                .unwrap();

        assert_eq!(reconstructed, input);
    }

    #[test]
    fn forbidden_pair_is_rejected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut container = MemoryContainer::open(dir.path(), true).unwrap();
        let comm = SingleProcess::new();
        let paths = ProjectionPaths::new("/Projections/A-B");

        append_graph(
            &mut container,
            &comm,
            &paths,
            &s4_input(),
            NodeId::new(10),
            NodeId::new(0),
            AppendGraphConfig::default(),
        )
        .unwrap();

        let projection = read_projection(&container, &paths, &[]).unwrap();
        let mut pop_table = PopTable::new();
        let src_pop = Pop::new(0);
        let dst_pop = Pop::new(1);
        pop_table.push_range(PopRange { start: NodeId::new(0), count: 10, pop: src_pop }, "src").unwrap();
        pop_table.push_range(PopRange { start: NodeId::new(10), count: 20, pop: dst_pop }, "dst").unwrap();
        // Note: no `allow_pair` call, so (src_pop, dst_pop) is inadmissible.

        let err = reconstruct_edges(&projection, NodeId::new(10), NodeId::new(0), &pop_table, src_pop, dst_pop)
            .unwrap_err();
        assert_eq!(err.kind_name(), "PopulationPairForbidden");
        let _ = PopRank::ZERO;
    }
}
