//! Memory-mapped segments backing the shared buffers.

use std::fs::{self, OpenOptions};
use std::marker::PhantomData;

use bytemuck::Pod;
use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use crate::error::IpcError;
use crate::names::{Resource, ResourceNames};

/// Whether a segment is created (client) or opened (server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Create or truncate the backing file, zero it, and unlink it on drop.
    Create,
    /// Open an existing backing file and leave it in place on drop.
    Open,
}

/// One named byte region shared with the other process.
pub struct SharedSegment {
    name: String,
    path: std::path::PathBuf,
    map: MmapMut,
    len: usize,
    owned: bool,
}

impl SharedSegment {
    /// Map `resource` with room for exactly `len` bytes.
    pub fn map(
        names: &ResourceNames,
        resource: Resource,
        len: usize,
        mode: MapMode,
    ) -> Result<Self, IpcError> {
        let name = names.name(resource);
        let path = names.path(resource);
        let io_err = |source| IpcError::Io {
            name: name.clone(),
            source,
        };

        let file = match mode {
            MapMode::Create => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(io_err)?;
                file.set_len(len as u64).map_err(io_err)?;
                file
            }
            MapMode::Open => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&path)
                    .map_err(io_err)?;
                let actual = file.metadata().map_err(io_err)?.len();
                if actual < len as u64 {
                    return Err(IpcError::SizeMismatch {
                        name: name.clone(),
                        expected: len,
                        actual,
                    });
                }
                file
            }
        };

        // SAFETY: the file stays mapped for the lifetime of `map`; concurrent
        // writers are serialised by the doorbells, never by this mapping.
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file) }.map_err(io_err)?;
        debug!(name = %name, len, ?mode, "Mapped shared segment");

        Ok(Self {
            name,
            path,
            map,
            len,
            owned: mode == MapMode::Create,
        })
    }

    /// Resource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length mappings.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current contents.
    pub fn bytes(&self) -> &[u8] {
        &self.map[..self.len]
    }

    /// Replace the whole contents with `data`, which must match the segment length.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<(), IpcError> {
        if data.len() != self.len {
            return Err(IpcError::SizeMismatch {
                name: self.name.clone(),
                expected: self.len,
                actual: data.len() as u64,
            });
        }
        self.map[..self.len].copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if self.owned {
            if let Err(err) = fs::remove_file(&self.path) {
                debug!(%err, name = %self.name, "Failed to unlink shared segment");
            }
        }
    }
}

impl std::fmt::Debug for SharedSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSegment")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("owned", &self.owned)
            .finish()
    }
}

/// Segment holding exactly one `T`, always read and written whole.
#[derive(Debug)]
pub struct PodSegment<T: Pod> {
    segment: SharedSegment,
    _marker: PhantomData<T>,
}

impl<T: Pod> PodSegment<T> {
    /// Map `resource` sized for one `T`.
    pub fn map(names: &ResourceNames, resource: Resource, mode: MapMode) -> Result<Self, IpcError> {
        Ok(Self {
            segment: SharedSegment::map(names, resource, std::mem::size_of::<T>(), mode)?,
            _marker: PhantomData,
        })
    }

    /// Copy the current value out.
    pub fn read(&self) -> T {
        bytemuck::pod_read_unaligned(self.segment.bytes())
    }

    /// Overwrite the stored value.
    pub fn write(&mut self, value: &T) {
        let len = self.segment.len;
        self.segment.map[..len].copy_from_slice(bytemuck::bytes_of(value));
    }
}
