//! The bounded open-file table: monotonically-issued non-zero file ids
//! mapped to owned fds. Capacity 256 per §3's `file/aio` context
//! lifecycle.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

pub const CAPACITY: usize = 256;

pub struct FileTable {
    slots: Vec<Option<(u64, OwnedFd)>>,
    next_id: u64,
}

impl FileTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(CAPACITY);
        slots.resize_with(CAPACITY, || None);
        FileTable { slots, next_id: 1 }
    }

    /// Allocates a fresh file id for `fd`, returning `None` if the
    /// table is full (256 concurrently open files).
    pub fn alloc(&mut self, fd: OwnedFd) -> Option<u64> {
        let slot = self.slots.iter_mut().find(|s| s.is_none())?;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let id = if id == 0 { let i = self.next_id; self.next_id = self.next_id.wrapping_add(1); i } else { id };
        *slot = Some((id, fd));
        Some(id)
    }

    pub fn raw_fd(&self, id: u64) -> Option<RawFd> {
        self.slots.iter().flatten().find(|(slot_id, _)| *slot_id == id).map(|(_, fd)| fd.as_raw_fd())
    }

    /// Removes and returns the fd for `id`; dropping the returned
    /// `OwnedFd` closes it.
    pub fn take(&mut self, id: u64) -> Option<OwnedFd> {
        let slot = self.slots.iter_mut().find(|s| matches!(s, Some((slot_id, _)) if *slot_id == id))?;
        slot.take().map(|(_, fd)| fd)
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}
