//! Component D — the Tree Encoder (spec.md §4.D).
//!
//! Flattens a rank-local `[Tree]` into the container's seven-column
//! rectangular layout and the three running pointer arrays, rebases every
//! pointer through the Layout Planner, and decodes the same shape back.

use crate::cell_index;
use crate::comm::Communicator;
use crate::config::AppendTreesConfig;
use crate::container::{Container, ElementType};
use crate::ids::{AttrPtr, CellId, Coord, LayerIdx, ParentNodeIdx, RealVal, SecPtr, SectionIdx, SwcTypeCode, TopoPtr};
use crate::layout::{plan_pointer_stripe, plan_stripe, rebase_pointer_prefix};
use crate::tree::Tree;
use crate::Result;

struct FlatColumns {
    cell_ids: Vec<CellId>,
    attr_ptr: Vec<AttrPtr>,
    sec_ptr: Vec<SecPtr>,
    topo_ptr: Vec<TopoPtr>,
    x: Vec<Coord>,
    y: Vec<Coord>,
    z: Vec<Coord>,
    radius: Vec<RealVal>,
    layer: Vec<LayerIdx>,
    parent: Vec<ParentNodeIdx>,
    swc_type: Vec<SwcTypeCode>,
    sections: Vec<SectionIdx>,
    src_section: Vec<SectionIdx>,
    dst_section: Vec<SectionIdx>,
}

fn flatten(trees: &[Tree]) -> Result<FlatColumns> {
    for tree in trees {
        tree.validate()?;
    }

    let mut out = FlatColumns {
        cell_ids: Vec::with_capacity(trees.len()),
        attr_ptr: vec![AttrPtr::ZERO],
        sec_ptr: vec![SecPtr::ZERO],
        topo_ptr: vec![TopoPtr::ZERO],
        x: Vec::new(),
        y: Vec::new(),
        z: Vec::new(),
        radius: Vec::new(),
        layer: Vec::new(),
        parent: Vec::new(),
        swc_type: Vec::new(),
        sections: Vec::new(),
        src_section: Vec::new(),
        dst_section: Vec::new(),
    };

    for tree in trees {
        out.cell_ids.push(tree.cell_id);
        out.x.extend_from_slice(&tree.x);
        out.y.extend_from_slice(&tree.y);
        out.z.extend_from_slice(&tree.z);
        out.radius.extend_from_slice(&tree.radius);
        out.layer.extend_from_slice(&tree.layer);
        out.parent.extend_from_slice(&tree.parent);
        out.swc_type.extend_from_slice(&tree.swc_type);
        out.sections.extend_from_slice(&tree.sections);
        out.src_section.extend_from_slice(&tree.src_section);
        out.dst_section.extend_from_slice(&tree.dst_section);

        out.attr_ptr.push(AttrPtr::new(out.x.len() as u64));
        out.sec_ptr.push(SecPtr::new(out.sections.len() as u64));
        out.topo_ptr.push(TopoPtr::new(out.src_section.len() as u64));
    }

    Ok(out)
}

impl From<u64> for AttrPtr {
    fn from(v: u64) -> Self {
        AttrPtr::new(v)
    }
}
impl From<u64> for SecPtr {
    fn from(v: u64) -> Self {
        SecPtr::new(v)
    }
}
impl From<u64> for TopoPtr {
    fn from(v: u64) -> Self {
        TopoPtr::new(v)
    }
}

/// Appends `trees` collectively: every rank must call this with its own
/// local share of the tree ensemble, using the same `cfg` (spec.md §4.D).
pub fn append_trees<C: Container>(
    container: &mut C,
    comm: &dyn Communicator,
    trees: &[Tree],
    cfg: AppendTreesConfig,
) -> Result<()> {
    let local = flatten(trees)?;

    let n_trees = trees.len() as u64;
    let n_attr = local.x.len() as u64;
    let n_sec = local.sections.len() as u64;
    let n_topo = local.src_section.len() as u64;

    let index_stripe = plan_stripe(comm, n_trees, cfg.ptr_start);
    let ptr_stripe = plan_pointer_stripe(comm, n_trees, cfg.ptr_start);
    let attr_stripe = plan_stripe(comm, n_attr, cfg.attr_start);
    let sec_stripe = plan_stripe(comm, n_sec, cfg.sec_start);
    let topo_stripe = plan_stripe(comm, n_topo, cfg.topo_start);

    let attr_ptr_local: Vec<u64> = local.attr_ptr.iter().map(|p| p.get()).collect();
    let sec_ptr_local: Vec<u64> = local.sec_ptr.iter().map(|p| p.get()).collect();
    let topo_ptr_local: Vec<u64> = local.topo_ptr.iter().map(|p| p.get()).collect();

    let attr_ptr_out: Vec<AttrPtr> =
        rebase_pointer_prefix(&attr_ptr_local, attr_stripe.local_start, ptr_stripe.local_len);
    let sec_ptr_out: Vec<SecPtr> =
        rebase_pointer_prefix(&sec_ptr_local, sec_stripe.local_start, ptr_stripe.local_len);
    let topo_ptr_out: Vec<TopoPtr> =
        rebase_pointer_prefix(&topo_ptr_local, topo_stripe.local_start, ptr_stripe.local_len);

    let mut do_write = || -> Result<()> {
        // Stage every dataset's extent change before any dataset is
        // written, so a later failure (e.g. an enum mismatch on
        // `/swc_type`) never leaves an earlier dataset — including the
        // cell index — already committed for this batch (spec.md §4.D).
        if cfg.create_index {
            cell_index::stage_extent(
                container,
                index_stripe,
                cfg.chunk.pointer_chunk,
                local.cell_ids.len() as u64,
            )?;
        } else {
            cell_index::validate_stripe(container, index_stripe)?;
        }

        container.create_or_extend("/attr_ptr", ElementType::U64, ptr_stripe.global_end, cfg.chunk.pointer_chunk)?;
        container.create_or_extend("/sec_ptr", ElementType::U64, ptr_stripe.global_end, cfg.chunk.pointer_chunk)?;
        container.create_or_extend("/topo_ptr", ElementType::U64, ptr_stripe.global_end, cfg.chunk.pointer_chunk)?;
        container.create_or_extend("/src_section", ElementType::U16, topo_stripe.global_end, cfg.chunk.payload_chunk)?;
        container.create_or_extend("/dst_section", ElementType::U16, topo_stripe.global_end, cfg.chunk.payload_chunk)?;
        container.create_or_extend("/section", ElementType::U16, sec_stripe.global_end, cfg.chunk.payload_chunk)?;
        container.create_or_extend("/x", ElementType::F32, attr_stripe.global_end, cfg.chunk.payload_chunk)?;
        container.create_or_extend("/y", ElementType::F32, attr_stripe.global_end, cfg.chunk.payload_chunk)?;
        container.create_or_extend("/z", ElementType::F32, attr_stripe.global_end, cfg.chunk.payload_chunk)?;
        container.create_or_extend("/radius", ElementType::F32, attr_stripe.global_end, cfg.chunk.payload_chunk)?;
        container.create_or_extend("/layer", ElementType::U16, attr_stripe.global_end, cfg.chunk.payload_chunk)?;
        container.create_or_extend("/parent", ElementType::I32, attr_stripe.global_end, cfg.chunk.payload_chunk)?;
        container.create_or_extend("/swc_type", ElementType::U8, attr_stripe.global_end, cfg.chunk.payload_chunk)?;

        if cfg.create_index {
            cell_index::write(container, index_stripe, &local.cell_ids)?;
        }

        container.write_slab("/attr_ptr", ptr_stripe.local_start, &attr_ptr_out)?;
        container.write_slab("/sec_ptr", ptr_stripe.local_start, &sec_ptr_out)?;
        container.write_slab("/topo_ptr", ptr_stripe.local_start, &topo_ptr_out)?;
        container.write_slab("/src_section", topo_stripe.local_start, &local.src_section)?;
        container.write_slab("/dst_section", topo_stripe.local_start, &local.dst_section)?;
        container.write_slab("/section", sec_stripe.local_start, &local.sections)?;
        container.write_slab("/x", attr_stripe.local_start, &local.x)?;
        container.write_slab("/y", attr_stripe.local_start, &local.y)?;
        container.write_slab("/z", attr_stripe.local_start, &local.z)?;
        container.write_slab("/radius", attr_stripe.local_start, &local.radius)?;
        container.write_slab("/layer", attr_stripe.local_start, &local.layer)?;
        container.write_slab("/parent", attr_stripe.local_start, &local.parent)?;
        container.write_slab("/swc_type", attr_stripe.local_start, &local.swc_type)?;
        Ok(())
    };

    comm.reduce_result(do_write())
}

/// Reads back the whole dataset as a flat `Vec<Tree>`, in cell-index order.
///
/// This is a single-process convenience reader (used by round-trip tests
/// and by embeddings that never split across ranks); a distributed reader
/// instead slices `/attr_ptr` etc. over its own assigned range of trees.
pub fn read_all_trees<C: Container>(container: &C) -> Result<Vec<Tree>> {
    let cell_ids = cell_index::read_all(container)?;
    let n_trees = cell_ids.len() as u64;

    let attr_ptr: Vec<AttrPtr> = container.read_slab("/attr_ptr", 0, n_trees + 1)?;
    let sec_ptr: Vec<SecPtr> = container.read_slab("/sec_ptr", 0, n_trees + 1)?;
    let topo_ptr: Vec<TopoPtr> = container.read_slab("/topo_ptr", 0, n_trees + 1)?;

    let attr_total = attr_ptr.last().map(|p| p.get()).unwrap_or(0);
    let sec_total = sec_ptr.last().map(|p| p.get()).unwrap_or(0);
    let topo_total = topo_ptr.last().map(|p| p.get()).unwrap_or(0);

    let x: Vec<Coord> = container.read_slab("/x", 0, attr_total)?;
    let y: Vec<Coord> = container.read_slab("/y", 0, attr_total)?;
    let z: Vec<Coord> = container.read_slab("/z", 0, attr_total)?;
    let radius: Vec<RealVal> = container.read_slab("/radius", 0, attr_total)?;
    let layer: Vec<LayerIdx> = container.read_slab("/layer", 0, attr_total)?;
    let parent: Vec<ParentNodeIdx> = container.read_slab("/parent", 0, attr_total)?;
    let swc_type: Vec<SwcTypeCode> = container.read_slab("/swc_type", 0, attr_total)?;
    let sections: Vec<SectionIdx> = container.read_slab("/section", 0, sec_total)?;
    let src_section: Vec<SectionIdx> = container.read_slab("/src_section", 0, topo_total)?;
    let dst_section: Vec<SectionIdx> = container.read_slab("/dst_section", 0, topo_total)?;

    let mut trees = Vec::with_capacity(n_trees as usize);
    for k in 0..n_trees as usize {
        let (a0, a1) = (attr_ptr[k].get() as usize, attr_ptr[k + 1].get() as usize);
        let (s0, s1) = (sec_ptr[k].get() as usize, sec_ptr[k + 1].get() as usize);
        let (t0, t1) = (topo_ptr[k].get() as usize, topo_ptr[k + 1].get() as usize);

        trees.push(Tree {
            cell_id: cell_ids[k],
            src_section: src_section[t0..t1].to_vec(),
            dst_section: dst_section[t0..t1].to_vec(),
            sections: sections[s0..s1].to_vec(),
            x: x[a0..a1].to_vec(),
            y: y[a0..a1].to_vec(),
            z: z[a0..a1].to_vec(),
            radius: radius[a0..a1].to_vec(),
            layer: layer[a0..a1].to_vec(),
            parent: parent[a0..a1].to_vec(),
            swc_type: swc_type[a0..a1].to_vec(),
        });
    }
    Ok(trees)
}
