use std::io;
use std::os::unix::io::RawFd;
use std::sync::{Mutex, OnceLock};

/// Total slot count of the process-wide handle table.
pub const TABLE_CAPACITY: usize = 256;

/// Handle values below this are reserved for stdin/stdout/stderr and are
/// never allocated by [`HandleTable::alloc`].
pub const RESERVED_HANDLES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleFlags(u8);

impl HandleFlags {
    pub const READABLE: HandleFlags = HandleFlags(1 << 0);
    pub const WRITABLE: HandleFlags = HandleFlags(1 << 1);
    pub const ENDABLE: HandleFlags = HandleFlags(1 << 2);
    pub const NONE: HandleFlags = HandleFlags(0);

    pub const fn union(self, other: HandleFlags) -> HandleFlags {
        HandleFlags(self.0 | other.0)
    }

    pub const fn contains(self, other: HandleFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for HandleFlags {
    type Output = HandleFlags;
    fn bitor(self, rhs: HandleFlags) -> HandleFlags {
        self.union(rhs)
    }
}

/// Byte-stream operations a handle supports. A capability backs this with
/// whatever state it needs (the original's `ctx` pointer is just `self`
/// here, since a trait object already carries its own data).
pub trait HandleOps: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let _ = buf;
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = buf;
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn end(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Readiness-polling operations. Not every handle registers these — a
/// handle with no pollable underlying fd (e.g. a pure in-memory buffer)
/// simply omits them, and `poll_lookup` reports it as absent rather than
/// synthesizing a fd.
pub trait PollOps: Send {
    fn poll_fd(&self) -> RawFd;
    fn ready_mask(&self) -> HandleFlags;
}

struct Slot {
    ops: Box<dyn HandleOps>,
    poll: Option<Box<dyn PollOps>>,
    flags: HandleFlags,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandleError {
    #[error("handle table is full")]
    TableFull,
    #[error("handle {0} is not live")]
    NotFound(u32),
    #[error("handle {0} is reserved")]
    Reserved(u32),
}

/// Process-wide slot array. Operations take no internal lock of their
/// own beyond what guards the table itself; per §5 of the runtime
/// contract, concurrent alloc/release across threads is the caller's
/// responsibility.
pub struct HandleTable {
    slots: Vec<Option<Slot>>,
    next: usize,
}

impl HandleTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(TABLE_CAPACITY);
        slots.resize_with(TABLE_CAPACITY, || None);
        HandleTable { slots, next: RESERVED_HANDLES as usize }
    }

    /// Allocates a new handle for `ops`, linear-probing from `next`.
    /// Returned value is always `>= RESERVED_HANDLES`.
    pub fn alloc(
        &mut self,
        ops: Box<dyn HandleOps>,
        poll: Option<Box<dyn PollOps>>,
        flags: HandleFlags,
    ) -> Result<u32, HandleError> {
        let start = self.next;
        for offset in 0..self.slots.len() {
            let idx = (start + offset) % self.slots.len();
            if idx < RESERVED_HANDLES as usize {
                continue;
            }
            if self.slots[idx].is_none() {
                self.slots[idx] = Some(Slot { ops, poll, flags });
                self.next = (idx + 1) % self.slots.len();
                return Ok(idx as u32);
            }
        }
        Err(HandleError::TableFull)
    }

    pub fn release(&mut self, handle: u32) -> Result<(), HandleError> {
        if handle < RESERVED_HANDLES {
            return Err(HandleError::Reserved(handle));
        }
        let idx = handle as usize;
        match self.slots.get_mut(idx) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(HandleError::NotFound(handle)),
        }
    }

    pub fn with_ops<R>(&mut self, handle: u32, f: impl FnOnce(&mut dyn HandleOps, HandleFlags) -> R) -> Result<R, HandleError> {
        if handle < RESERVED_HANDLES {
            return Err(HandleError::Reserved(handle));
        }
        let slot = self.slots.get_mut(handle as usize).and_then(Option::as_mut).ok_or(HandleError::NotFound(handle))?;
        Ok(f(slot.ops.as_mut(), slot.flags))
    }

    /// Poll-op lookup. Returns `Ok(None)` (not an error) for a live
    /// handle with no registered poll ops, matching the original's
    /// "entries without poll support are simply skipped by the event
    /// loop" stance.
    pub fn poll_lookup<R>(&self, handle: u32, f: impl FnOnce(&dyn PollOps, HandleFlags) -> R) -> Result<Option<R>, HandleError> {
        if handle < RESERVED_HANDLES {
            return Err(HandleError::Reserved(handle));
        }
        let slot = self.slots.get(handle as usize).and_then(Option::as_ref).ok_or(HandleError::NotFound(handle))?;
        Ok(slot.poll.as_deref().map(|poll| f(poll, slot.flags)))
    }

    pub fn is_live(&self, handle: u32) -> bool {
        (handle as usize) < self.slots.len() && self.slots[handle as usize].is_some()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_TABLE: OnceLock<Mutex<HandleTable>> = OnceLock::new();

/// The process-wide handle table, lazily initialized on first use.
pub fn global_table() -> &'static Mutex<HandleTable> {
    GLOBAL_TABLE.get_or_init(|| Mutex::new(HandleTable::new()))
}

#[cfg(test)]
mod test {
    use super::*;

    struct Echo(Vec<u8>);
    impl HandleOps for Echo {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            Ok(n)
        }
    }

    #[test]
    fn test_alloc_skips_reserved_range() {
        let mut table = HandleTable::new();
        let h = table.alloc(Box::new(Echo(vec![1, 2, 3])), None, HandleFlags::READABLE).unwrap();
        assert!(h >= RESERVED_HANDLES);
    }

    #[test]
    fn test_release_then_alloc_recycles_slot() {
        let mut table = HandleTable::new();
        let h1 = table.alloc(Box::new(Echo(vec![])), None, HandleFlags::NONE).unwrap();
        table.release(h1).unwrap();
        assert!(!table.is_live(h1));
        let h2 = table.alloc(Box::new(Echo(vec![])), None, HandleFlags::NONE).unwrap();
        assert!(table.is_live(h2));
    }

    #[test]
    fn test_release_reserved_handle_is_rejected() {
        let mut table = HandleTable::new();
        assert_eq!(table.release(1), Err(HandleError::Reserved(1)));
    }

    #[test]
    fn test_read_dispatches_to_registered_ops() {
        let mut table = HandleTable::new();
        let h = table.alloc(Box::new(Echo(vec![9, 9, 9])), None, HandleFlags::READABLE).unwrap();
        let mut buf = [0u8; 3];
        let n = table.with_ops(h, |ops, _flags| ops.read(&mut buf).unwrap()).unwrap();
        assert_eq!(n, 3);
        assert_eq!(buf, [9, 9, 9]);
    }

    #[test]
    fn test_poll_lookup_absent_is_not_an_error() {
        let mut table = HandleTable::new();
        let h = table.alloc(Box::new(Echo(vec![])), None, HandleFlags::NONE).unwrap();
        let result = table.poll_lookup(h, |_poll, _flags| unreachable!());
        assert_eq!(result.unwrap().is_none(), true);
    }
}
