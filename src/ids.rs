//! Fixed-width identifier and scalar *roles*.
//!
//! Each role wraps a plain integer so that, for instance, a `SectionIdx`
//! can never be passed where a `NodeId` is expected even though both are
//! `u32` underneath. All of them are `Pod`/`Zeroable` so payload columns
//! made of them can be cast directly to and from the byte slices the
//! `Container` reads and writes (see `container::Container::write_slab`).

use bytemuck::{Pod, Zeroable};

macro_rules! id_role {
    ($(#[$meta:meta])* $name:ident, $repr:ty) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
        #[repr(transparent)]
        pub struct $name(pub $repr);

        impl $name {
            pub const ZERO: $name = $name(0 as $repr);

            pub const fn new(value: $repr) -> Self {
                $name(value)
            }

            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                $name(value)
            }
        }

        impl From<$name> for $repr {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl core::ops::Add<$repr> for $name {
            type Output = $name;
            fn add(self, rhs: $repr) -> $name {
                $name(self.0 + rhs)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_role!(
    /// A global cell identifier, unique across the whole tree ensemble.
    CellId,
    u64
);

id_role!(
    /// A global node identifier within a population's `NodeId` range.
    NodeId,
    u32
);

id_role!(
    /// A section ordinal inside one tree's topology.
    SectionIdx,
    u16
);

id_role!(
    /// A cortical/structural layer tag on a node.
    LayerIdx,
    u16
);

id_role!(
    /// A small unsigned population identifier.
    Pop,
    u16
);

id_role!(
    /// The compute rank that owns a destination node, as assigned by the
    /// caller-supplied node-to-rank map.
    PopRank,
    u32
);

id_role!(
    /// A running offset into the `attr_*` payload columns.
    AttrPtr,
    u64
);

id_role!(
    /// A running offset into the `sec` payload column.
    SecPtr,
    u64
);

id_role!(
    /// A running offset into the `src_section`/`dst_section` payload columns.
    TopoPtr,
    u64
);

id_role!(
    /// A running offset into the `src_idx` edge column.
    DstPtr,
    u64
);

id_role!(
    /// A running offset into the `dst_idx`/`dst_ptr` block columns.
    DstBlkPtr,
    u64
);

/// A signed per-node parent index. `-1` means "no parent" (section root).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct ParentNodeIdx(pub i32);

impl ParentNodeIdx {
    pub const NONE: ParentNodeIdx = ParentNodeIdx(-1);

    pub const fn new(value: i32) -> Self {
        ParentNodeIdx(value)
    }

    pub fn is_none(self) -> bool {
        self.0 < 0
    }

    pub fn index(self) -> Option<usize> {
        if self.0 < 0 {
            None
        } else {
            Some(self.0 as usize)
        }
    }
}

/// A finite 3-D coordinate component.
pub type Coord = f32;

/// A finite real-valued attribute (radius, and similar scalar quantities).
pub type RealVal = f32;

/// The closed SWC morphological point-type enumeration.
///
/// Stored in the container as a named enumerated type (see
/// `container::Container::enum_type`); never as a free-form integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, enum_iterator::Sequence)]
#[repr(u8)]
pub enum SwcType {
    Undefined = 0,
    Soma = 1,
    Axon = 2,
    BasalDendrite = 3,
    ApicalDendrite = 4,
    CustomStart = 5,
}

impl SwcType {
    pub fn name(self) -> &'static str {
        match self {
            SwcType::Undefined => "undefined",
            SwcType::Soma => "soma",
            SwcType::Axon => "axon",
            SwcType::BasalDendrite => "basal_dendrite",
            SwcType::ApicalDendrite => "apical_dendrite",
            SwcType::CustomStart => "custom",
        }
    }

    /// All variants, in declaration order, as required when building the
    /// named enumerated container type (`Container::enum_type`).
    pub fn all() -> Vec<SwcType> {
        enum_iterator::all::<SwcType>().collect()
    }
}

impl TryFrom<u8> for SwcType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        enum_iterator::all::<SwcType>().find(|v| *v as u8 == value).ok_or(value)
    }
}

/// The on-disk, POD representation of a [`SwcType`] column entry.
///
/// `SwcType` itself cannot implement `Pod` (a `repr(u8)` enum does not
/// accept every byte pattern); the payload column is stored as this plain
/// byte wrapper and validated into `SwcType` on read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct SwcTypeCode(pub u8);

impl From<SwcType> for SwcTypeCode {
    fn from(ty: SwcType) -> Self {
        SwcTypeCode(ty as u8)
    }
}

impl TryFrom<SwcTypeCode> for SwcType {
    type Error = u8;

    fn try_from(code: SwcTypeCode) -> Result<Self, Self::Error> {
        SwcType::try_from(code.0)
    }
}
