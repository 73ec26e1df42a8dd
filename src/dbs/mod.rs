//! Component E — the Graph (DBS) Codec (spec.md §3.4, §4.E).
//!
//! The Destination Block Sparse representation: three levels of indirection
//! (block → destination → source) over a bipartite edge set, plus the
//! heterogeneous edge-attribute columns that travel alongside `src_idx`.

pub mod codec;
pub mod scatter;

use std::collections::BTreeMap;

use bytemuck::Pod;

use crate::container::{Container, ElementType};
use crate::error::Error;
use crate::ids::{DstBlkPtr, DstPtr, NodeId};
use crate::Result;

/// One typed edge-attribute column, addressed by the same `j` index as
/// `src_idx`. Kept as a tagged union over the seven numeric widths spec.md
/// §9 calls out ("Heterogeneous attribute widths") instead of one erased
/// byte-blob type, so every value stays a real Rust scalar until the moment
/// it is cast to bytes for I/O or redistribution.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValues {
    F32(Vec<f32>),
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
}

impl AttrValues {
    pub fn len(&self) -> usize {
        match self {
            AttrValues::F32(v) => v.len(),
            AttrValues::U8(v) => v.len(),
            AttrValues::U16(v) => v.len(),
            AttrValues::U32(v) => v.len(),
            AttrValues::I8(v) => v.len(),
            AttrValues::I16(v) => v.len(),
            AttrValues::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            AttrValues::F32(_) => ElementType::F32,
            AttrValues::U8(_) => ElementType::U8,
            AttrValues::U16(_) => ElementType::U16,
            AttrValues::U32(_) => ElementType::U32,
            AttrValues::I8(_) => ElementType::I8,
            AttrValues::I16(_) => ElementType::I16,
            AttrValues::I32(_) => ElementType::I32,
        }
    }

    pub fn empty_like(&self) -> AttrValues {
        match self {
            AttrValues::F32(_) => AttrValues::F32(Vec::new()),
            AttrValues::U8(_) => AttrValues::U8(Vec::new()),
            AttrValues::U16(_) => AttrValues::U16(Vec::new()),
            AttrValues::U32(_) => AttrValues::U32(Vec::new()),
            AttrValues::I8(_) => AttrValues::I8(Vec::new()),
            AttrValues::I16(_) => AttrValues::I16(Vec::new()),
            AttrValues::I32(_) => AttrValues::I32(Vec::new()),
        }
    }

    /// Appends the value at `other[j]` to `self`. Both must hold the same
    /// variant; used while grouping edges by destination rank.
    pub fn push_from(&mut self, other: &AttrValues, j: usize) {
        match (self, other) {
            (AttrValues::F32(s), AttrValues::F32(o)) => s.push(o[j]),
            (AttrValues::U8(s), AttrValues::U8(o)) => s.push(o[j]),
            (AttrValues::U16(s), AttrValues::U16(o)) => s.push(o[j]),
            (AttrValues::U32(s), AttrValues::U32(o)) => s.push(o[j]),
            (AttrValues::I8(s), AttrValues::I8(o)) => s.push(o[j]),
            (AttrValues::I16(s), AttrValues::I16(o)) => s.push(o[j]),
            (AttrValues::I32(s), AttrValues::I32(o)) => s.push(o[j]),
            _ => panic!("push_from: mismatched AttrValues variants"),
        }
    }

    /// Appends the raw little-endian bytes of one value (as produced by
    /// `bytes_of`) — used when deserializing a redistribution wire record.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        fn read<T: Pod>(bytes: &[u8]) -> T {
            bytemuck::pod_read_unaligned(bytes)
        }
        match self {
            AttrValues::F32(v) => v.push(read(bytes)),
            AttrValues::U8(v) => v.push(read(bytes)),
            AttrValues::U16(v) => v.push(read(bytes)),
            AttrValues::U32(v) => v.push(read(bytes)),
            AttrValues::I8(v) => v.push(read(bytes)),
            AttrValues::I16(v) => v.push(read(bytes)),
            AttrValues::I32(v) => v.push(read(bytes)),
        }
    }

    pub fn bytes_of(&self, j: usize) -> Vec<u8> {
        match self {
            AttrValues::F32(v) => bytemuck::bytes_of(&v[j]).to_vec(),
            AttrValues::U8(v) => bytemuck::bytes_of(&v[j]).to_vec(),
            AttrValues::U16(v) => bytemuck::bytes_of(&v[j]).to_vec(),
            AttrValues::U32(v) => bytemuck::bytes_of(&v[j]).to_vec(),
            AttrValues::I8(v) => bytemuck::bytes_of(&v[j]).to_vec(),
            AttrValues::I16(v) => bytemuck::bytes_of(&v[j]).to_vec(),
            AttrValues::I32(v) => bytemuck::bytes_of(&v[j]).to_vec(),
        }
    }
}

/// One named, typed edge-attribute column.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeAttrColumn {
    pub name: String,
    pub values: AttrValues,
}

/// The full set of edge-attribute columns carried alongside `src_idx`, all
/// sharing its length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeAttrSet(pub Vec<EdgeAttrColumn>);

impl EdgeAttrSet {
    pub fn empty() -> Self {
        EdgeAttrSet(Vec::new())
    }

    pub fn schema(&self) -> Vec<(String, ElementType)> {
        self.0.iter().map(|c| (c.name.clone(), c.values.element_type())).collect()
    }

    pub fn validate_len(&self, expected: usize) -> Result<()> {
        for col in &self.0 {
            if col.values.len() != expected {
                return Err(Error::invariant(format!(
                    "edge attribute `{}` has length {}, expected {expected}",
                    col.name,
                    col.values.len()
                )));
            }
        }
        Ok(())
    }
}

/// One destination node's local out-edges and their attribute rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeList {
    pub src: Vec<NodeId>,
    pub attrs: EdgeAttrSet,
}

/// `destination NodeId -> (source NodeIds, edge attributes)`, the input
/// shape `append_graph` consumes (spec.md §4.E.1).
pub type InputEdgeMap = BTreeMap<NodeId, EdgeList>;

/// The decoded three-tier DBS representation of one projection (spec.md
/// §3.4), plus its optional edge-attribute columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub dst_blk_ptr: Vec<DstBlkPtr>,
    pub dst_idx: Vec<NodeId>,
    pub dst_ptr: Vec<DstPtr>,
    pub src_idx: Vec<NodeId>,
    pub attrs: EdgeAttrSet,
}

impl Projection {
    /// Checks spec.md §3.4's invariants on a fully decoded projection.
    pub fn validate(&self) -> Result<()> {
        if self.dst_idx.len() + 1 != self.dst_blk_ptr.len() {
            return Err(Error::invariant(format!(
                "dst_idx has {} entries but dst_blk_ptr has {} (expected {} + 1)",
                self.dst_idx.len(),
                self.dst_blk_ptr.len(),
                self.dst_idx.len()
            )));
        }
        for w in self.dst_blk_ptr.windows(2) {
            if w[1].get() < w[0].get() {
                return Err(Error::invariant("dst_blk_ptr is not monotonic non-decreasing"));
            }
        }
        let num_dst = self.dst_blk_ptr.last().map(|p| p.get()).unwrap_or(0) as usize;
        if self.dst_ptr.len() != num_dst + 1 {
            return Err(Error::invariant(format!(
                "dst_ptr has {} entries, expected {} (dst_blk_ptr's tail + 1)",
                self.dst_ptr.len(),
                num_dst + 1
            )));
        }
        for w in self.dst_ptr.windows(2) {
            if w[1].get() < w[0].get() {
                return Err(Error::invariant("dst_ptr is not monotonic non-decreasing"));
            }
        }
        let num_edges = self.dst_ptr.last().map(|p| p.get()).unwrap_or(0) as usize;
        if self.src_idx.len() != num_edges {
            return Err(Error::invariant(format!(
                "src_idx has {} entries, expected {num_edges} (dst_ptr's tail)",
                self.src_idx.len()
            )));
        }
        self.attrs.validate_len(num_edges)?;
        Ok(())
    }
}

/// The dataset paths for one projection's `/Projections/<src>-><dst>/` group
/// (spec.md §6.1). Attribute columns live under `<base>/Attributes/<name>`.
#[derive(Debug, Clone)]
pub struct ProjectionPaths {
    base: String,
}

impl ProjectionPaths {
    pub fn new(base: impl Into<String>) -> Self {
        ProjectionPaths { base: base.into() }
    }

    pub fn dst_blk_ptr(&self) -> String {
        format!("{}/dst_blk_ptr", self.base)
    }
    pub fn dst_idx(&self) -> String {
        format!("{}/dst_idx", self.base)
    }
    pub fn dst_ptr(&self) -> String {
        format!("{}/dst_ptr", self.base)
    }
    pub fn src_idx(&self) -> String {
        format!("{}/src_idx", self.base)
    }
    pub fn attr(&self, name: &str) -> String {
        format!("{}/Attributes/{}", self.base, name)
    }
}

pub(crate) fn read_attr_column<C: Container>(
    container: &C,
    path: &str,
    ty: ElementType,
    start: u64,
    len: u64,
) -> Result<AttrValues> {
    Ok(match ty {
        ElementType::F32 => AttrValues::F32(container.read_slab(path, start, len)?),
        ElementType::U8 => AttrValues::U8(container.read_slab(path, start, len)?),
        ElementType::U16 => AttrValues::U16(container.read_slab(path, start, len)?),
        ElementType::U32 => AttrValues::U32(container.read_slab(path, start, len)?),
        ElementType::I8 => AttrValues::I8(container.read_slab(path, start, len)?),
        ElementType::I16 => AttrValues::I16(container.read_slab(path, start, len)?),
        ElementType::I32 => AttrValues::I32(container.read_slab(path, start, len)?),
        ElementType::U64 | ElementType::I64 => {
            return Err(Error::invariant(format!(
                "edge attribute `{path}` declared with unsupported width {ty:?}"
            )))
        }
    })
}

/// Extends an attribute column's dataset to `global_end` without writing
/// anything yet. Split out from [`write_attr_column`] so `append_graph` can
/// stage every dataset's extent change — core arrays and attribute columns
/// alike — before any of them is written (spec.md §4.D's failure-semantics
/// contract).
pub(crate) fn stage_attr_column_extent<C: Container>(
    container: &mut C,
    path: &str,
    values: &AttrValues,
    global_end: u64,
    chunk: u64,
) -> Result<()> {
    container.create_or_extend(path, values.element_type(), global_end, chunk)
}

pub(crate) fn write_attr_column<C: Container>(
    container: &mut C,
    path: &str,
    values: &AttrValues,
    local_start: u64,
) -> Result<()> {
    match values {
        AttrValues::F32(v) => container.write_slab(path, local_start, v),
        AttrValues::U8(v) => container.write_slab(path, local_start, v),
        AttrValues::U16(v) => container.write_slab(path, local_start, v),
        AttrValues::U32(v) => container.write_slab(path, local_start, v),
        AttrValues::I8(v) => container.write_slab(path, local_start, v),
        AttrValues::I16(v) => container.write_slab(path, local_start, v),
        AttrValues::I32(v) => container.write_slab(path, local_start, v),
    }
}
