//! Request opcodes, open-file flag bits, directory-entry type codes,
//! and the owned (already copied-out-of-guest-memory) job payloads the
//! worker thread consumes.

/// `file/aio` request opcodes. Values match `zi_file_aio_op_v1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum Op {
    Open = 1,
    Close = 2,
    Read = 3,
    Write = 4,
    Mkdir = 5,
    Rmdir = 6,
    Unlink = 7,
    Stat = 8,
    Readdir = 9,
}

impl Op {
    pub fn from_u16(v: u16) -> Option<Self> {
        Some(match v {
            1 => Op::Open,
            2 => Op::Close,
            3 => Op::Read,
            4 => Op::Write,
            5 => Op::Mkdir,
            6 => Op::Rmdir,
            7 => Op::Unlink,
            8 => Op::Stat,
            9 => Op::Readdir,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::Open => "open",
            Op::Close => "close",
            Op::Read => "read",
            Op::Write => "write",
            Op::Mkdir => "mkdir",
            Op::Rmdir => "rmdir",
            Op::Unlink => "unlink",
            Op::Stat => "stat",
            Op::Readdir => "readdir",
        }
    }
}

/// The completion event opcode, `ZI_FILE_AIO_EV_DONE`.
pub const EV_DONE: u16 = 100;

/// `oflags` bits on the OPEN request payload, grounded on
/// `zi_file_open_flags25.h`.
pub mod oflags {
    pub const READ: u32 = 1;
    pub const WRITE: u32 = 2;
    pub const CREATE: u32 = 4;
    pub const TRUNC: u32 = 8;
    pub const APPEND: u32 = 16;
}

/// `zi_file_aio_dirent_type_v1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum DirentType {
    Unknown = 0,
    File = 1,
    Dir = 2,
    Symlink = 3,
    Other = 4,
}

impl DirentType {
    pub fn from_d_type(dt: u8) -> Self {
        match dt as i32 {
            libc::DT_REG => DirentType::File,
            libc::DT_DIR => DirentType::Dir,
            libc::DT_LNK => DirentType::Symlink,
            libc::DT_UNKNOWN => DirentType::Unknown,
            _ => DirentType::Other,
        }
    }
}

/// A queued work item, with every guest-memory-derived buffer already
/// copied into heap-owned storage (per §5's "guest memory is not stable
/// across suspension points" policy) before it's placed on the queue.
#[derive(Debug)]
pub enum Job {
    Open { rid: u32, path: Vec<u8>, oflags: u32, create_mode: u32 },
    Close { rid: u32, file_id: u64 },
    Read { rid: u32, file_id: u64, offset: u64, max_len: u32 },
    Write { rid: u32, file_id: u64, offset: u64, data: Vec<u8> },
    Mkdir { rid: u32, path: Vec<u8>, mode: u32 },
    Rmdir { rid: u32, path: Vec<u8> },
    Unlink { rid: u32, path: Vec<u8> },
    Stat { rid: u32, path: Vec<u8> },
    Readdir { rid: u32, path: Vec<u8>, max_bytes: u32 },
}

impl Job {
    pub fn rid(&self) -> u32 {
        match self {
            Job::Open { rid, .. }
            | Job::Close { rid, .. }
            | Job::Read { rid, .. }
            | Job::Write { rid, .. }
            | Job::Mkdir { rid, .. }
            | Job::Rmdir { rid, .. }
            | Job::Unlink { rid, .. }
            | Job::Stat { rid, .. }
            | Job::Readdir { rid, .. } => *rid,
        }
    }

    pub fn op(&self) -> Op {
        match self {
            Job::Open { .. } => Op::Open,
            Job::Close { .. } => Op::Close,
            Job::Read { .. } => Op::Read,
            Job::Write { .. } => Op::Write,
            Job::Mkdir { .. } => Op::Mkdir,
            Job::Rmdir { .. } => Op::Rmdir,
            Job::Unlink { .. } => Op::Unlink,
            Job::Stat { .. } => Op::Stat,
            Job::Readdir { .. } => Op::Readdir,
        }
    }
}

/// Bounded circular queue of [`Job`]s, capacity 128 per §3's
/// `file/aio` context lifecycle.
pub struct JobQueue {
    items: std::collections::VecDeque<Job>,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        JobQueue { items: std::collections::VecDeque::with_capacity(capacity), capacity }
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn has_room(&self) -> bool {
        !self.is_full()
    }

    pub fn push(&mut self, job: Job) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push_back(job);
        true
    }

    pub fn pop(&mut self) -> Option<Job> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_queue_rejects_push_past_capacity() {
        let mut q = JobQueue::new(2);
        assert!(q.push(Job::Close { rid: 1, file_id: 1 }));
        assert!(q.push(Job::Close { rid: 2, file_id: 1 }));
        assert!(!q.push(Job::Close { rid: 3, file_id: 1 }));
        assert!(q.is_full());
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut q = JobQueue::new(4);
        q.push(Job::Close { rid: 1, file_id: 1 });
        q.push(Job::Close { rid: 2, file_id: 1 });
        assert_eq!(q.pop().unwrap().rid(), 1);
        assert_eq!(q.pop().unwrap().rid(), 2);
        assert!(q.pop().is_none());
    }
}
