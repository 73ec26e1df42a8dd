//! Real chunked-hierarchical-container backend, over the `hdf5` crate.
//! Enabled by the `hdf5-backend` feature.
//!
//! `hdf5`'s typed dataset API wants an `H5Type` bound; this adapter instead
//! goes through `hdf5::Dataset::read_raw`/`write_raw`, matching an
//! `ElementType` recorded at dataset-creation time against the caller's
//! `Pod` type by byte width only (spec.md §9, "Heterogeneous attribute
//! widths" — width is exactly what the backing store needs to agree on).

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use hdf5::types::{IntSize, TypeDescriptor};
use hdf5::{File as H5File, Selection};

use super::{io_error, Container, ElementType, EnumType};
use crate::error::Error;
use crate::Result;

pub struct Hdf5Container {
    file: H5File,
}

fn type_descriptor(elem_type: ElementType) -> TypeDescriptor {
    match elem_type {
        ElementType::F32 => TypeDescriptor::Float(hdf5::types::FloatSize::U4),
        ElementType::U8 => TypeDescriptor::Unsigned(IntSize::U1),
        ElementType::U16 => TypeDescriptor::Unsigned(IntSize::U2),
        ElementType::U32 => TypeDescriptor::Unsigned(IntSize::U4),
        ElementType::U64 => TypeDescriptor::Unsigned(IntSize::U8),
        ElementType::I8 => TypeDescriptor::Integer(IntSize::U1),
        ElementType::I16 => TypeDescriptor::Integer(IntSize::U2),
        ElementType::I32 => TypeDescriptor::Integer(IntSize::U4),
        ElementType::I64 => TypeDescriptor::Integer(IntSize::U8),
    }
}

impl Container for Hdf5Container {
    fn open(path: &Path, rw: bool) -> Result<Self> {
        let file = if rw {
            H5File::append(path)
        } else {
            H5File::open(path)
        }
        .map_err(|e| io_error(path.display().to_string(), e))?;
        Ok(Hdf5Container { file })
    }

    fn close(self) -> Result<()> {
        self.file.close().map_err(|e| io_error("<close>", e))
    }

    fn dataset_extent(&self, path: &str) -> Result<u64> {
        match self.file.dataset(path) {
            Ok(dataset) => Ok(dataset.shape().first().copied().unwrap_or(0) as u64),
            Err(_) => Ok(0),
        }
    }

    fn create_or_extend(
        &mut self,
        path: &str,
        elem_type: ElementType,
        new_global_len: u64,
        chunk: u64,
    ) -> Result<()> {
        let current_len = self.dataset_extent(path)?;
        if new_global_len < current_len {
            return Err(Error::ExtentShrink {
                dataset: path.to_string(),
                current_len,
                requested_len: new_global_len,
            });
        }

        if current_len == 0 && self.file.dataset(path).is_err() {
            self.file
                .new_dataset_builder()
                .dtype(type_descriptor(elem_type))
                .shape((0..).start_shape())
                .chunk((chunk.max(1) as usize,))
                .resizable(true)
                .create(path)
                .map_err(|e| io_error(path.to_string(), e))?;
        }

        let dataset = self.file.dataset(path).map_err(|e| io_error(path.to_string(), e))?;
        dataset.resize((new_global_len as usize,)).map_err(|e| io_error(path.to_string(), e))?;
        Ok(())
    }

    fn write_slab<T: Pod>(&mut self, path: &str, local_start: u64, data: &[T]) -> Result<()> {
        let dataset = self.file.dataset(path).map_err(|e| io_error(path.to_string(), e))?;
        let selection = Selection::new(
            (local_start as usize..(local_start as usize + data.len()),),
        );
        dataset
            .write_raw_slice(data, selection)
            .map_err(|e| io_error(path.to_string(), e))?;
        Ok(())
    }

    fn read_slab<T: Pod + Zeroable>(
        &self,
        path: &str,
        local_start: u64,
        local_len: u64,
    ) -> Result<Vec<T>> {
        let dataset = self.file.dataset(path).map_err(|e| io_error(path.to_string(), e))?;
        let selection =
            Selection::new((local_start as usize..(local_start as usize + local_len as usize),));
        dataset.read_raw_slice(selection).map_err(|e| io_error(path.to_string(), e))
    }

    fn enum_type(&mut self, enum_type: &EnumType) -> Result<()> {
        let mut builder = hdf5::types::EnumType::builder();
        for (name, value) in &enum_type.mapping {
            builder = builder.variant(name, *value);
        }
        let h5_enum = builder.build();
        self.file
            .group("/H5Types")
            .or_else(|_| self.file.create_group("/H5Types"))
            .map_err(|e| io_error("/H5Types", e))?
            .link_type(&enum_type.name, h5_enum)
            .map_err(|e| io_error(enum_type.name.clone(), e))?;
        Ok(())
    }
}
