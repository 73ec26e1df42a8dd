use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};

use super::{io_error, Container, ElementType, EnumType};
use crate::error::Error;
use crate::Result;

/// A directory-of-files stand-in for the chunked hierarchical container.
///
/// Each dataset becomes one flat file under `dir` (one byte array, grown
/// in place — chunking only affects the real backend's I/O granularity,
/// never this one's semantics, per spec.md §4.E.1). This is what
/// `crate::tree`, `crate::cell_index`, and `crate::dbs` are exercised
/// against in tests, and what a single-process embedding of this crate
/// can use directly without linking HDF5.
///
/// Mirrors the teacher's `DatabaseHandle { env, database, tempdir }` test
/// fixture (`examples/meilisearch-arroy/src/tests/mod.rs`): callers keep
/// their own `tempfile::TempDir` alive alongside a `MemoryContainer`
/// opened on its path.
pub struct MemoryContainer {
    dir: PathBuf,
    enums: HashMap<String, EnumType>,
    elem_types: HashMap<String, ElementType>,
}

impl MemoryContainer {
    fn data_path(&self, dataset: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", sanitize(dataset)))
    }

    fn elem_type_of(&self, dataset: &str) -> Option<ElementType> {
        self.elem_types.get(dataset).copied()
    }
}

fn sanitize(dataset: &str) -> String {
    dataset.trim_start_matches('/').replace('/', "__")
}

impl Container for MemoryContainer {
    fn open(path: &Path, _rw: bool) -> Result<Self> {
        fs::create_dir_all(path).map_err(|e| io_error(path.display().to_string(), e))?;
        Ok(MemoryContainer {
            dir: path.to_path_buf(),
            enums: HashMap::new(),
            elem_types: HashMap::new(),
        })
    }

    fn close(self) -> Result<()> {
        Ok(())
    }

    fn dataset_extent(&self, path: &str) -> Result<u64> {
        let file_path = self.data_path(path);
        let elem_size = match self.elem_type_of(path) {
            Some(ty) => ty.size_bytes() as u64,
            None => return Ok(0),
        };
        match fs::metadata(&file_path) {
            Ok(meta) => Ok(meta.len() / elem_size),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(io_error(file_path.display().to_string(), e)),
        }
    }

    fn create_or_extend(
        &mut self,
        path: &str,
        elem_type: ElementType,
        new_global_len: u64,
        _chunk: u64,
    ) -> Result<()> {
        if let Some(existing) = self.elem_types.get(path) {
            if *existing != elem_type {
                return Err(Error::invariant(format!(
                    "dataset `{path}` already has element type {existing:?}, got {elem_type:?}"
                )));
            }
        } else {
            self.elem_types.insert(path.to_string(), elem_type);
        }

        let current_len = self.dataset_extent(path)?;
        if new_global_len < current_len {
            return Err(Error::ExtentShrink {
                dataset: path.to_string(),
                current_len,
                requested_len: new_global_len,
            });
        }

        let file_path = self.data_path(path);
        let file =
            OpenOptions::new().create(true).write(true).open(&file_path).map_err(|e| {
                io_error(file_path.display().to_string(), e)
            })?;
        let new_byte_len = new_global_len * elem_type.size_bytes() as u64;
        file.set_len(new_byte_len).map_err(|e| io_error(file_path.display().to_string(), e))?;
        Ok(())
    }

    fn write_slab<T: Pod>(&mut self, path: &str, local_start: u64, data: &[T]) -> Result<()> {
        let file_path = self.data_path(path);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&file_path)
            .map_err(|e| io_error(file_path.display().to_string(), e))?;

        let elem_size = std::mem::size_of::<T>() as u64;
        let offset = local_start * elem_size;
        file.seek(SeekFrom::Start(offset)).map_err(|e| io_error(file_path.display().to_string(), e))?;

        let bytes = bytemuck::cast_slice(data);
        file.write_all(bytes).map_err(|e| io_error(file_path.display().to_string(), e))?;
        Ok(())
    }

    fn read_slab<T: Pod + Zeroable>(
        &self,
        path: &str,
        local_start: u64,
        local_len: u64,
    ) -> Result<Vec<T>> {
        let file_path = self.data_path(path);
        let mut file =
            File::open(&file_path).map_err(|e| io_error(file_path.display().to_string(), e))?;

        let elem_size = std::mem::size_of::<T>() as u64;
        let offset = local_start * elem_size;
        file.seek(SeekFrom::Start(offset)).map_err(|e| io_error(file_path.display().to_string(), e))?;

        let mut bytes = vec![0u8; (local_len * elem_size) as usize];
        file.read_exact(&mut bytes).map_err(|e| io_error(file_path.display().to_string(), e))?;

        Ok(aligned_or_collect_vec(&bytes))
    }

    fn enum_type(&mut self, enum_type: &EnumType) -> Result<()> {
        self.enums.insert(enum_type.name.clone(), enum_type.clone());
        Ok(())
    }
}

/// Casts `bytes` to `Vec<T>`, falling back to a copy when the buffer is not
/// aligned for `T`. Same trick as the teacher's `node::aligned_or_collect_vec`.
fn aligned_or_collect_vec<T: Pod + Zeroable>(bytes: &[u8]) -> Vec<T> {
    use bytemuck::PodCastError::TargetAlignmentGreaterAndInputNotAligned;
    match bytemuck::try_cast_slice(bytes) {
        Ok(casted) => casted.to_vec(),
        Err(TargetAlignmentGreaterAndInputNotAligned) => bytemuck::pod_collect_to_vec(bytes),
        Err(e) => panic!("casting slab bytes for `{bytes:?}` failed: {e}", bytes = bytes.len()),
    }
}
