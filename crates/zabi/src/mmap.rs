/// Guest-memory access hook. Capabilities that copy bytes to or from
/// guest-addressable memory (file/aio's path and write-buffer arguments)
/// go through this rather than touching guest linear memory directly,
/// since the host embedding is the only party that knows how a guest
/// pointer maps to host bytes (a wasm instance's linear memory, a
/// shared-memory segment, …).
///
/// Both methods are callback-shaped rather than returning a borrowed
/// slice: guest memory is not stable across suspension points, so
/// callers must copy out everything they need before the callback
/// returns rather than holding the slice across an await/yield.
pub trait MmapHook: Send + Sync {
    fn with_guest_bytes(&self, guest_ptr: u64, len: u32, f: &mut dyn FnMut(&[u8])) -> Result<(), MmapError>;

    fn with_guest_bytes_mut(&self, guest_ptr: u64, len: u32, f: &mut dyn FnMut(&mut [u8])) -> Result<(), MmapError>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MmapError {
    #[error("guest range [{ptr}, {ptr}+{len}) is out of bounds")]
    OutOfBounds { ptr: u64, len: u32 },
}

/// An [`MmapHook`] over a single contiguous host buffer, standing in for
/// a guest's linear memory. Used by tests and by embeddings where the
/// "guest" is just a host-resident byte slice (no actual sandboxing
/// boundary to cross).
pub struct FlatMmap {
    bytes: std::sync::Mutex<Vec<u8>>,
}

impl FlatMmap {
    pub fn new(bytes: Vec<u8>) -> Self {
        FlatMmap { bytes: std::sync::Mutex::new(bytes) }
    }

    fn range(len_total: usize, ptr: u64, len: u32) -> Result<std::ops::Range<usize>, MmapError> {
        let start = usize::try_from(ptr).map_err(|_| MmapError::OutOfBounds { ptr, len })?;
        let end = start.checked_add(len as usize).ok_or(MmapError::OutOfBounds { ptr, len })?;
        if end > len_total {
            return Err(MmapError::OutOfBounds { ptr, len });
        }
        Ok(start..end)
    }
}

impl MmapHook for FlatMmap {
    fn with_guest_bytes(&self, guest_ptr: u64, len: u32, f: &mut dyn FnMut(&[u8])) -> Result<(), MmapError> {
        let guard = self.bytes.lock().expect("flat mmap mutex poisoned");
        let range = Self::range(guard.len(), guest_ptr, len)?;
        f(&guard[range]);
        Ok(())
    }

    fn with_guest_bytes_mut(&self, guest_ptr: u64, len: u32, f: &mut dyn FnMut(&mut [u8])) -> Result<(), MmapError> {
        let mut guard = self.bytes.lock().expect("flat mmap mutex poisoned");
        let range = Self::range(guard.len(), guest_ptr, len)?;
        f(&mut guard[range]);
        Ok(())
    }
}
