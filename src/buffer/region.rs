use crate::error::MemoryError;
use log::{debug, trace};
use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Largest region a single init may request
pub const MAX_REGION_SIZE: usize = 64 * 1024 * 1024;

/// Alignment of every backing allocation
pub const REGION_ALIGNMENT: usize = 64;

/// Where a region's backing storage came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOrigin {
    /// Allocated by this process for its own use
    Local,
    /// Attached to storage created by another party
    Remote,
}

/// Zeroed, aligned heap allocation owned by exactly one backing
struct AlignedBytes {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: AlignedBytes uniquely owns its allocation and is only reachable
// through the backing's mutex.
unsafe impl Send for AlignedBytes {}

impl AlignedBytes {
    fn allocate(size: usize) -> Result<Self, MemoryError> {
        let layout = Layout::from_size_align(size, REGION_ALIGNMENT)
            .map_err(|_| MemoryError::InvalidValue(format!("no layout for {} bytes", size)))?;

        // Safety: size is validated non-zero before we get here
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(MemoryError::AllocationFailed { size })?;
        Ok(Self { ptr, layout })
    }

    fn as_slice(&self) -> &[u8] {
        // Safety: ptr is valid for layout.size() initialised bytes for our lifetime
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: as above, and &mut self guarantees exclusive access
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBytes {
    fn drop(&mut self) {
        // Safety: allocated with exactly this layout in `allocate`
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// Backing storage that one or more regions map.
///
/// The storage is released when the last mapping goes away.
pub struct RegionBacking {
    name: String,
    size: usize,
    writable: bool,
    bytes: Mutex<AlignedBytes>,
}

impl RegionBacking {
    /// Create backing storage other parties can attach to
    pub fn create(name: impl Into<String>, size: usize, writable: bool) -> Result<Arc<Self>, MemoryError> {
        validate_size(size)?;
        let name = name.into();
        let bytes = AlignedBytes::allocate(size)?;
        trace!("Created backing '{}' ({} bytes, writable={})", name, size, writable);

        Ok(Arc::new(Self {
            name,
            size,
            writable,
            bytes: Mutex::new(bytes),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl fmt::Debug for RegionBacking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionBacking")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("writable", &self.writable)
            .finish()
    }
}

fn validate_size(size: usize) -> Result<(), MemoryError> {
    if size == 0 {
        return Err(MemoryError::InvalidValue("region size must be non-zero".to_string()));
    }
    if size > MAX_REGION_SIZE {
        return Err(MemoryError::InvalidValue(format!(
            "{} bytes exceeds the {} byte limit",
            size, MAX_REGION_SIZE
        )));
    }
    Ok(())
}

/// A mapped view of shared memory with an explicit lifecycle.
///
/// The mapping exists only after a successful init and is dropped exactly once
/// by [`close`](Self::close) or by `Drop`. Every accessor fails with
/// [`MemoryError::Closed`] afterwards.
pub struct SharedMemoryRegion {
    name: String,
    size: usize,
    origin: RegionOrigin,
    read_only: bool,
    mapping: Option<Arc<RegionBacking>>,
}

impl SharedMemoryRegion {
    /// Allocate fresh local storage and map it
    pub fn init_local(name: impl Into<String>, size: usize, read_only: bool) -> Result<Self, MemoryError> {
        let name = name.into();
        let backing = RegionBacking::create(name.clone(), size, !read_only)?;

        debug!("Mapped local region '{}' ({} bytes)", name, size);
        Ok(Self {
            name,
            size,
            origin: RegionOrigin::Local,
            read_only,
            mapping: Some(backing),
        })
    }

    /// Map storage created elsewhere. A writable mapping of read-only
    /// storage is refused.
    pub fn attach(
        name: impl Into<String>,
        backing: &Arc<RegionBacking>,
        read_only: bool,
    ) -> Result<Self, MemoryError> {
        let name = name.into();
        validate_size(backing.size())?;
        if !read_only && !backing.is_writable() {
            return Err(MemoryError::InvalidOperation(format!(
                "cannot map '{}' writable: backing '{}' is read-only",
                name,
                backing.name()
            )));
        }

        debug!(
            "Attached region '{}' to backing '{}' ({} bytes, read_only={})",
            name,
            backing.name(),
            backing.size(),
            read_only
        );
        Ok(Self {
            name,
            size: backing.size(),
            origin: RegionOrigin::Remote,
            read_only,
            mapping: Some(Arc::clone(backing)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn origin(&self) -> RegionOrigin {
        self.origin
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_closed(&self) -> bool {
        self.mapping.is_none()
    }

    /// Unmap and release the backing reference. Returns false if the region
    /// was already closed.
    pub fn close(&mut self) -> bool {
        match self.mapping.take() {
            Some(backing) => {
                trace!("Unmapped region '{}'", self.name);
                drop(backing);
                true
            }
            None => false,
        }
    }

    fn mapping(&self) -> Result<&Arc<RegionBacking>, MemoryError> {
        self.mapping.as_ref().ok_or_else(|| MemoryError::Closed {
            name: self.name.clone(),
        })
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), MemoryError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(MemoryError::InvalidValue(format!(
                "range {}+{} is outside region '{}' ({} bytes)",
                offset, len, self.name, self.size
            ))),
        }
    }

    pub fn write_at(&self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        let backing = self.mapping()?;
        if self.read_only {
            return Err(MemoryError::InvalidOperation(format!(
                "region '{}' is mapped read-only",
                self.name
            )));
        }
        self.check_range(offset, data.len())?;

        let mut bytes = backing.bytes.lock();
        bytes.as_mut_slice()[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy bytes starting at `offset` into `out`, returning how many were read
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Result<usize, MemoryError> {
        let backing = self.mapping()?;
        if offset > self.size {
            return Err(MemoryError::InvalidValue(format!(
                "offset {} is past the end of region '{}'",
                offset, self.name
            )));
        }

        let count = out.len().min(self.size - offset);
        let bytes = backing.bytes.lock();
        out[..count].copy_from_slice(&bytes.as_slice()[offset..offset + count]);
        Ok(count)
    }

    /// Borrow the mapped bytes for the duration of `f`
    pub fn with_slice<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, MemoryError> {
        let backing = self.mapping()?;
        let bytes = backing.bytes.lock();
        Ok(f(bytes.as_slice()))
    }

    /// Mutably borrow the mapped bytes for the duration of `f`
    pub fn with_slice_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, MemoryError> {
        let backing = self.mapping()?;
        if self.read_only {
            return Err(MemoryError::InvalidOperation(format!(
                "region '{}' is mapped read-only",
                self.name
            )));
        }
        let mut bytes = backing.bytes.lock();
        Ok(f(bytes.as_mut_slice()))
    }

    /// Zero the whole region
    pub fn zero(&self) -> Result<(), MemoryError> {
        self.with_slice_mut(|bytes| bytes.fill(0))
    }
}

impl fmt::Debug for SharedMemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemoryRegion")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("origin", &self.origin)
            .field("read_only", &self.read_only)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        self.close();
    }
}
