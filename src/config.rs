//! Parameter bundles for the multi-argument collective calls (spec.md §9,
//! "Mapping of parameter bundles"). Grouped into explicit records instead
//! of long positional argument lists, in the teacher's `BuildOption` spirit
//! (referenced from `examples/meilisearch-arroy/src/parallel.rs`).

/// The four starting offsets `append_trees` needs, plus whether it should
/// also write the cell index (spec.md §4.C, §4.D). Field names mirror the
/// `neuroh5` C++ signature in `examples/original_source/include/cell/append_tree.hh`
/// (`ptr_start, attr_start, sec_start, topo_start`), generalized with a
/// `ChunkConfig` instead of a single implicit chunk constant.
#[derive(Debug, Clone, Copy)]
pub struct AppendTreesConfig {
    pub ptr_start: u64,
    pub attr_start: u64,
    pub sec_start: u64,
    pub topo_start: u64,
    /// When `true`, this call also writes `cell_index`. When `false`, the
    /// caller asserts a compatible index was written by an earlier call,
    /// and the append validates that assertion instead of skipping it
    /// (spec.md §4.C; this is the behavior §9's Open Questions section
    /// requires rather than the TODO-stub the original left behind).
    pub create_index: bool,
    pub chunk: ChunkConfig,
}

impl Default for AppendTreesConfig {
    fn default() -> Self {
        AppendTreesConfig {
            ptr_start: 0,
            attr_start: 0,
            sec_start: 0,
            topo_start: 0,
            create_index: true,
            chunk: ChunkConfig::default(),
        }
    }
}

/// Chunk dimensions for the datasets a collective append touches. Only
/// affects I/O efficiency, never layout (spec.md §4.E.1).
#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    pub pointer_chunk: u64,
    pub payload_chunk: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig { pointer_chunk: 4096, payload_chunk: 65536 }
    }
}

/// Starting offsets for `append_graph` (spec.md §4.E.1): one per DBS
/// column family, mirroring `AppendTreesConfig`'s shape for the tree
/// column families.
#[derive(Debug, Clone, Copy)]
pub struct AppendGraphConfig {
    pub dst_blk_start: u64,
    pub dst_start_offset: u64,
    pub src_start_offset: u64,
    pub chunk: ChunkConfig,
}

impl Default for AppendGraphConfig {
    fn default() -> Self {
        AppendGraphConfig {
            dst_blk_start: 0,
            dst_start_offset: 0,
            src_start_offset: 0,
            chunk: ChunkConfig::default(),
        }
    }
}

/// The edge-map shape `scatter_read_projection` delivers (spec.md §4.E.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMapType {
    /// Keyed by destination node: canonical for downstream compute.
    DestinationKeyed,
    /// Keyed by source node: used when the caller inverts the traversal.
    SourceKeyed,
}

/// Everything `scatter_read_projection` needs besides the projection name
/// and the node-to-rank map (spec.md §4.E.2).
#[derive(Debug, Clone)]
pub struct ScatterReadConfig {
    pub edge_map_type: EdgeMapType,
    /// Number of reader processes: only the first `io_size` ranks touch
    /// the backing store directly (spec.md §4.E.2, phase 1).
    pub io_size: i32,
    /// Window into the destination stripe, `(offset, numitems)`.
    pub window: Option<(u64, u64)>,
    /// Names of the edge-attribute namespaces to read, or `None` for all.
    pub attr_namespaces: Option<Vec<String>>,
}

impl Default for ScatterReadConfig {
    fn default() -> Self {
        ScatterReadConfig {
            edge_map_type: EdgeMapType::DestinationKeyed,
            io_size: 1,
            window: None,
            attr_namespaces: None,
        }
    }
}
