//! The tree (morphology) data model (spec.md §3.2) and component D, the
//! Tree Encoder (spec.md §4.D).

pub mod encoder;

use crate::error::Error;
use crate::ids::{CellId, Coord, LayerIdx, ParentNodeIdx, RealVal, SectionIdx, SwcTypeCode};
use crate::Result;

/// One neuron morphology: a parent-pointer tree over sections, plus seven
/// parallel per-node attribute columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub cell_id: CellId,

    /// Parallel arrays encoding a parent-pointer tree over sections:
    /// `dst_section[i]`'s parent section is `src_section[i]`.
    pub src_section: Vec<SectionIdx>,
    pub dst_section: Vec<SectionIdx>,

    /// One entry per section the topology implies (length M + 1 — spec.md
    /// §8 scenario S1's worked numbers are authoritative here: a 3-node,
    /// single-section, zero-edge tree has `sec_ptr = [0,1]`, not `[0,3]`,
    /// so this is a per-section array, not a per-node one despite §3.2's
    /// prose. See `DESIGN.md`'s Open Question decisions.
    pub sections: Vec<SectionIdx>,

    pub x: Vec<Coord>,
    pub y: Vec<Coord>,
    pub z: Vec<Coord>,
    pub radius: Vec<RealVal>,
    pub layer: Vec<LayerIdx>,
    pub parent: Vec<ParentNodeIdx>,
    pub swc_type: Vec<SwcTypeCode>,
}

impl Tree {
    pub fn node_count(&self) -> usize {
        self.x.len()
    }

    pub fn topology_len(&self) -> usize {
        self.src_section.len()
    }

    /// Checks every invariant in spec.md §3.2.
    pub fn validate(&self) -> Result<()> {
        let n = self.x.len();
        let columns: [(&str, usize); 6] = [
            ("y", self.y.len()),
            ("z", self.z.len()),
            ("radius", self.radius.len()),
            ("layer", self.layer.len()),
            ("parent", self.parent.len()),
            ("swc_type", self.swc_type.len()),
        ];
        for (name, len) in columns {
            if len != n {
                return Err(Error::invariant(format!(
                    "tree {}: column `{name}` has length {len}, expected {n} (matching `x`)",
                    self.cell_id
                )));
            }
        }

        let m = self.src_section.len();
        if self.dst_section.len() != m {
            return Err(Error::invariant(format!(
                "tree {}: `src_section` has length {m} but `dst_section` has length {}",
                self.cell_id,
                self.dst_section.len()
            )));
        }

        for (i, parent) in self.parent.iter().enumerate() {
            match parent.index() {
                Some(p) if p < i => {}
                Some(_) => {
                    return Err(Error::invariant(format!(
                        "tree {}: node {i} has parent {:?}, not rooted (parent must be < i)",
                        self.cell_id, parent
                    )))
                }
                None => {}
            }
        }

        // A topology of M parent-pointer edges over sections implies
        // exactly M + 1 sections (a rooted tree over sections), spec.md
        // §3.2's "all sections[i] refer to a section appearing in the
        // topology" (the degenerate single-section, zero-edge tree from
        // spec.md §8 scenario S1 is the M == 0 case).
        let implied_sections = m as u32 + 1;
        if self.sections.len() != implied_sections as usize {
            return Err(Error::invariant(format!(
                "tree {}: `sections` has length {}, but the topology implies {implied_sections} section(s)",
                self.cell_id,
                self.sections.len()
            )));
        }
        for (i, section) in self.sections.iter().enumerate() {
            if section.get() as u32 >= implied_sections {
                return Err(Error::invariant(format!(
                    "tree {}: node {i} references section {section}, but the topology \
                     only implies {implied_sections} section(s)",
                    self.cell_id
                )));
            }
        }
        for (edge_idx, (src, dst)) in
            self.src_section.iter().zip(self.dst_section.iter()).enumerate()
        {
            if src.get() as u32 >= implied_sections || dst.get() as u32 >= implied_sections {
                return Err(Error::invariant(format!(
                    "tree {}: topology edge {edge_idx} ({src} -> {dst}) out of range for \
                     {implied_sections} implied section(s)",
                    self.cell_id
                )));
            }
        }

        Ok(())
    }
}
