//! Component A — the Container Adapter (spec.md §4.A).
//!
//! A minimal, typed wrapper over whatever chunked hierarchical binary store
//! backs the file on disk. The core only ever talks to the
//! [`Container`] trait; the HDF5 bindings themselves are an external
//! collaborator (spec.md §1) reached only through
//! [`hdf5_backend::Hdf5Container`] behind the `hdf5-backend` feature.
//! [`memory::MemoryContainer`] is always available and is what the tree
//! encoder, cell index, and DBS codec tests run against.

pub mod memory;

#[cfg(feature = "hdf5-backend")]
pub mod hdf5_backend;

use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::error::Error;
use crate::Result;

/// The element type of one dataset. Kept explicit rather than erased
/// behind a single numeric trait bound, because the backing store demands
/// an exact element type per dataset (spec.md §9, "Heterogeneous attribute
/// widths").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    F32,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
}

impl ElementType {
    pub fn size_bytes(self) -> usize {
        match self {
            ElementType::F32 | ElementType::U32 | ElementType::I32 => 4,
            ElementType::U8 | ElementType::I8 => 1,
            ElementType::U16 | ElementType::I16 => 2,
            ElementType::U64 | ElementType::I64 => 8,
        }
    }
}

/// A named enumerated type registered in the container (spec.md §6.1,
/// `/H5Types/`). `mapping` is `(variant_name, discriminant)` in declaration
/// order.
#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub mapping: Vec<(String, u8)>,
}

/// A minimal, typed wrapper over a chunked hierarchical binary store.
///
/// Every method that touches the backing store is collective in the full
/// system (every rank must call it with consistent arguments); this trait
/// itself does not enforce that — `crate::tree::encoder` and
/// `crate::dbs::codec` are responsible for calling through the
/// `Communicator` first and only then driving matching `Container` calls
/// on every rank.
pub trait Container: Sized {
    /// Opens the backing store collectively. `rw` selects read/write vs.
    /// read-only access.
    fn open(path: &Path, rw: bool) -> Result<Self>;

    /// Closes the backing store, releasing every handle it holds.
    fn close(self) -> Result<()>;

    /// The current length of `path`'s outermost axis, or `0` if the
    /// dataset does not exist yet.
    fn dataset_extent(&self, path: &str) -> Result<u64>;

    /// Idempotently extends `path` to `new_global_len` elements, creating
    /// it with the given `elem_type` and `chunk` size if it does not exist.
    /// Never shrinks a dataset (spec.md §7, `ExtentShrink`).
    fn create_or_extend(
        &mut self,
        path: &str,
        elem_type: ElementType,
        new_global_len: u64,
        chunk: u64,
    ) -> Result<()>;

    /// Writes `data` into the hyperslab `[local_start, local_start + data.len())`
    /// of `path`, assuming `path` has already been extended to at least
    /// that length. The transfer is collective: this call must be made by
    /// every rank, with non-overlapping ranges that cover
    /// `[existing_end, global_len)` between them.
    fn write_slab<T: Pod>(&mut self, path: &str, local_start: u64, data: &[T]) -> Result<()>;

    /// Reads `local_len` elements of `path` starting at `local_start`.
    fn read_slab<T: Pod + Zeroable>(
        &self,
        path: &str,
        local_start: u64,
        local_len: u64,
    ) -> Result<Vec<T>>;

    /// Registers (or looks up) a named enumerated type, used for the
    /// `swc_type` column (spec.md §3.1, §6.1).
    fn enum_type(&mut self, enum_type: &EnumType) -> Result<()>;
}

/// Guarantees [`Container::close`] runs on every exit path, including
/// panics unwinding through it, the way spec.md §5 and §9 ("Scoped
/// resources") require for file handles, property lists, and type handles.
///
/// Mirrors the teacher's `tempfile::TempDir` RAII-guard pattern, extended
/// from tests into production code since this crate's resource has an
/// explicit fallible `close`.
pub struct ContainerGuard<C: Container> {
    inner: Option<C>,
}

impl<C: Container> ContainerGuard<C> {
    pub fn open(path: &Path, rw: bool) -> Result<Self> {
        Ok(ContainerGuard { inner: Some(C::open(path, rw)?) })
    }

    pub fn get_mut(&mut self) -> &mut C {
        self.inner.as_mut().expect("ContainerGuard used after close")
    }

    pub fn get(&self) -> &C {
        self.inner.as_ref().expect("ContainerGuard used after close")
    }

    /// Closes the container explicitly, surfacing any close-time error
    /// instead of only logging it as `Drop` would have to.
    pub fn close(mut self) -> Result<()> {
        match self.inner.take() {
            Some(container) => container.close(),
            None => Ok(()),
        }
    }
}

impl<C: Container> Drop for ContainerGuard<C> {
    fn drop(&mut self) {
        if let Some(container) = self.inner.take() {
            if let Err(err) = container.close() {
                tracing::error!(error = %err, "container close failed during drop");
            }
        }
    }
}

pub(crate) fn io_error(path: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::ContainerIo { path: path.into(), source: Box::new(source) }
}
