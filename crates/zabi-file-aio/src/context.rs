//! The per-capability-instance runtime: a 64 KiB input staging buffer,
//! a growable (up to 1 MiB) output ring, a bounded job queue drained by
//! one worker thread, and the wakeup socketpair an event loop polls.
//! Grounded on `zi_file_aio25.c`'s `zi_aio_ctx` and its
//! `process_pending_requests_locked`/`worker_main`/`aio_*` functions.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use zabi::MmapHook;

use crate::errno::RuntimeErrorKind;
use crate::file_table::FileTable;
use crate::frame;
use crate::job::{oflags, DirentType, Job, JobQueue, Op};
use crate::sandbox;

const INBUF_CAP: usize = 65_536;
const MAX_OUT: usize = 1 << 20;
const MAX_JOBS: usize = 128;
const MAX_READ: u32 = 60_000;
const MAX_WRITE: u32 = 1 << 20;
const MAX_READDIR: u32 = 60_000;
const HEADROOM_RESERVE: usize = 4_096;

/// Sandbox configuration, fixed for the lifetime of the context: the
/// original reads `ZI_FS_ROOT` once at capability-open time and never
/// revisits it.
struct SandboxConfig {
    root: Option<OwnedFd>,
}

impl SandboxConfig {
    fn enabled(&self) -> bool {
        self.root.is_some()
    }
}

struct Inner {
    inbuf: Vec<u8>,
    outbuf: Vec<u8>,
    out_off: usize,
    jobs: JobQueue,
    files: FileTable,
    closed: bool,
    notify_signaled: bool,
    /// Set once a malformed frame is seen; the stream is torn down
    /// rather than byte-skip-resynced (see DESIGN.md).
    protocol_error: Option<String>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            inbuf: Vec::with_capacity(INBUF_CAP),
            outbuf: Vec::new(),
            out_off: 0,
            jobs: JobQueue::new(MAX_JOBS),
            files: FileTable::new(),
            closed: false,
            notify_signaled: false,
            protocol_error: None,
        }
    }

    fn out_is_empty(&self) -> bool {
        self.out_off >= self.outbuf.len()
    }
}

fn compact_out(inner: &mut Inner) {
    if inner.out_off == 0 {
        return;
    }
    if inner.out_off >= inner.outbuf.len() {
        inner.outbuf.clear();
    } else {
        inner.outbuf.drain(..inner.out_off);
    }
    inner.out_off = 0;
}

fn signal_wakeup(inner: &mut Inner, notify_w: RawFd) {
    if inner.notify_signaled {
        return;
    }
    let byte: u8 = 1;
    let n = unsafe { libc::write(notify_w, &byte as *const u8 as *const libc::c_void, 1) };
    if n == 1 {
        inner.notify_signaled = true;
    }
}

fn signal_readable(inner: &mut Inner, notify_w: RawFd) {
    if !inner.out_is_empty() {
        signal_wakeup(inner, notify_w);
    }
}

fn drain_wakeup(inner: &mut Inner, notify_r: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(notify_r, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
    }
    inner.notify_signaled = false;
}

fn ensure_out_headroom(inner: &mut Inner, need: usize) -> bool {
    compact_out(inner);
    inner.outbuf.len() + need <= MAX_OUT
}

/// Appends a frame that headroom was already reserved for (the
/// request-acknowledgement path); never blocks.
fn append_out(inner: &mut Inner, notify_w: RawFd, data: &[u8]) -> bool {
    let was_empty = inner.out_is_empty();
    if inner.outbuf.len() + data.len() > MAX_OUT {
        return false;
    }
    inner.outbuf.extend_from_slice(data);
    if was_empty {
        signal_readable(inner, notify_w);
    }
    true
}

/// Appends a completion frame, blocking the worker thread on the
/// output-ring condvar if the ring has no room, mirroring
/// `append_out_or_wait_locked`.
fn append_out_or_wait<'a>(
    mut inner: MutexGuard<'a, Inner>,
    cv: &Condvar,
    notify_w: RawFd,
    data: &[u8],
) -> MutexGuard<'a, Inner> {
    loop {
        let was_empty = inner.out_is_empty();
        compact_out(&mut inner);
        if inner.outbuf.len() + data.len() <= MAX_OUT {
            inner.outbuf.extend_from_slice(data);
            if was_empty {
                signal_readable(&mut inner, notify_w);
            }
            return inner;
        }
        if inner.closed {
            return inner;
        }
        inner = cv.wait(inner).unwrap();
    }
}

fn emit_ok_empty(inner: &mut Inner, notify_w: RawFd, op: u16, rid: u32) {
    append_out(inner, notify_w, &frame::write_ok(op, rid, &[]));
}

fn emit_error(inner: &mut Inner, notify_w: RawFd, op: u16, rid: u32, msg: &str) {
    append_out(inner, notify_w, &frame::write_error(op, rid, msg));
}

/// `u16 orig_op, u16 reserved, u32 result, [orig_op-specific extra]`,
/// grounded on `ZI_FILE_AIO_EV_DONE`'s payload layout.
fn done_payload(orig_op: u16, result: u32, extra: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + extra.len());
    out.extend_from_slice(&orig_op.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // reserved
    out.extend_from_slice(&result.to_le_bytes());
    out.extend_from_slice(extra);
    out
}

fn emit_done_ok<'a>(
    inner: MutexGuard<'a, Inner>,
    cv: &Condvar,
    notify_w: RawFd,
    rid: u32,
    orig_op: u16,
    result: u32,
    extra: &[u8],
) -> MutexGuard<'a, Inner> {
    let frame = frame::write_ok(crate::job::EV_DONE, rid, &done_payload(orig_op, result, extra));
    append_out_or_wait(inner, cv, notify_w, &frame)
}

fn emit_done_err<'a>(inner: MutexGuard<'a, Inner>, cv: &Condvar, notify_w: RawFd, rid: u32, msg: &str) -> MutexGuard<'a, Inner> {
    let frame = frame::write_error(crate::job::EV_DONE, rid, msg);
    append_out_or_wait(inner, cv, notify_w, &frame)
}

/// Copies `len` bytes of guest memory at `ptr` into an owned buffer via
/// the capability's mmap hook, emitting an error frame and returning
/// `None` on an out-of-bounds access.
fn copy_guest_bytes(
    mmap: &dyn MmapHook,
    inner: &mut Inner,
    notify_w: RawFd,
    op: u16,
    rid: u32,
    ptr: u64,
    len: u32,
    oob_msg: &str,
) -> Option<Vec<u8>> {
    if len == 0 {
        return Some(Vec::new());
    }
    let mut out = Vec::with_capacity(len as usize);
    let res = mmap.with_guest_bytes(ptr, len, &mut |bytes| out.extend_from_slice(bytes));
    if res.is_err() {
        emit_error(inner, notify_w, op, rid, oob_msg);
        return None;
    }
    Some(out)
}

fn copy_guest_path(mmap: &dyn MmapHook, inner: &mut Inner, notify_w: RawFd, op: u16, rid: u32, ptr: u64, len: u32) -> Option<Vec<u8>> {
    if len == 0 {
        emit_error(inner, notify_w, op, rid, "empty path");
        return None;
    }
    let path = copy_guest_bytes(mmap, inner, notify_w, op, rid, ptr, len, "path out of bounds")?;
    if path.contains(&0u8) {
        emit_error(inner, notify_w, op, rid, "invalid: path contains NUL");
        return None;
    }
    Some(path)
}

fn u64le(p: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(p[at..at + 8].try_into().unwrap())
}
fn u32le(p: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(p[at..at + 4].try_into().unwrap())
}

/// Validates and enqueues one parsed request frame, emitting an
/// immediate request-acknowledgement (or rejection) frame synchronously.
/// Grounded on `handle_req_locked`.
fn handle_request(mmap: &dyn MmapHook, inner: &mut Inner, notify_w: RawFd, cv: &Condvar, op: u16, rid: u32, payload: &[u8]) {
    let Some(parsed) = Op::from_u16(op) else {
        emit_error(inner, notify_w, op, rid, "unknown op");
        return;
    };

    let job = match parsed {
        Op::Open => {
            if payload.len() < 20 {
                emit_error(inner, notify_w, op, rid, "bad OPEN payload");
                return;
            }
            let path_ptr = u64le(payload, 0);
            let path_len = u32le(payload, 8);
            let flags = u32le(payload, 12);
            let create_mode = u32le(payload, 16);
            let Some(path) = copy_guest_path(mmap, inner, notify_w, op, rid, path_ptr, path_len) else { return };
            if flags & (oflags::READ | oflags::WRITE) == 0 {
                emit_error(inner, notify_w, op, rid, "bad oflags");
                return;
            }
            Job::Open { rid, path, oflags: flags, create_mode }
        }
        Op::Close => {
            if payload.len() < 8 {
                emit_error(inner, notify_w, op, rid, "bad CLOSE payload");
                return;
            }
            Job::Close { rid, file_id: u64le(payload, 0) }
        }
        Op::Read => {
            if payload.len() < 20 {
                emit_error(inner, notify_w, op, rid, "bad READ payload");
                return;
            }
            let file_id = u64le(payload, 0);
            let offset = u64le(payload, 8);
            let max_len = u32le(payload, 16).min(MAX_READ);
            Job::Read { rid, file_id, offset, max_len }
        }
        Op::Write => {
            if payload.len() < 28 {
                emit_error(inner, notify_w, op, rid, "bad WRITE payload");
                return;
            }
            let file_id = u64le(payload, 0);
            let offset = u64le(payload, 8);
            let src_ptr = u64le(payload, 16);
            let src_len = u32le(payload, 24);
            if src_len > MAX_WRITE {
                emit_error(inner, notify_w, op, rid, "write exceeds 1 MiB limit");
                return;
            }
            let Some(data) = copy_guest_bytes(mmap, inner, notify_w, op, rid, src_ptr, src_len, "src out of bounds") else { return };
            Job::Write { rid, file_id, offset, data }
        }
        Op::Mkdir => {
            if payload.len() < 12 {
                emit_error(inner, notify_w, op, rid, "bad MKDIR payload");
                return;
            }
            let path_ptr = u64le(payload, 0);
            let path_len = u32le(payload, 8);
            let mode = if payload.len() >= 16 { u32le(payload, 12) } else { 0o755 };
            let Some(path) = copy_guest_path(mmap, inner, notify_w, op, rid, path_ptr, path_len) else { return };
            Job::Mkdir { rid, path, mode }
        }
        Op::Rmdir => {
            if payload.len() < 12 {
                emit_error(inner, notify_w, op, rid, "bad RMDIR payload");
                return;
            }
            let Some(path) = copy_guest_path(mmap, inner, notify_w, op, rid, u64le(payload, 0), u32le(payload, 8)) else { return };
            Job::Rmdir { rid, path }
        }
        Op::Unlink => {
            if payload.len() < 12 {
                emit_error(inner, notify_w, op, rid, "bad UNLINK payload");
                return;
            }
            let Some(path) = copy_guest_path(mmap, inner, notify_w, op, rid, u64le(payload, 0), u32le(payload, 8)) else { return };
            Job::Unlink { rid, path }
        }
        Op::Stat => {
            if payload.len() < 12 {
                emit_error(inner, notify_w, op, rid, "bad STAT payload");
                return;
            }
            let Some(path) = copy_guest_path(mmap, inner, notify_w, op, rid, u64le(payload, 0), u32le(payload, 8)) else { return };
            Job::Stat { rid, path }
        }
        Op::Readdir => {
            if payload.len() < 16 {
                emit_error(inner, notify_w, op, rid, "bad READDIR payload");
                return;
            }
            let max_bytes = u32le(payload, 12).clamp(4, MAX_READDIR);
            let Some(path) = copy_guest_path(mmap, inner, notify_w, op, rid, u64le(payload, 0), u32le(payload, 8)) else { return };
            Job::Readdir { rid, path, max_bytes }
        }
    };

    if !inner.jobs.push(job) {
        emit_error(inner, notify_w, op, rid, "queue full");
        return;
    }
    emit_ok_empty(inner, notify_w, op, rid);
    cv.notify_all();
}

/// Drains as many complete frames from `inbuf` as are currently
/// buffered, stopping when a frame is incomplete, output headroom runs
/// out, or a malformed frame is encountered. Unlike the original's
/// byte-skip resync on a bad frame, a malformed frame is treated as a
/// fatal protocol error and the stream is torn down (see DESIGN.md).
fn process_pending_requests(mmap: &dyn MmapHook, inner: &mut Inner, notify_w: RawFd, cv: &Condvar) {
    loop {
        if inner.inbuf.len() < frame::HEADER_LEN {
            break;
        }
        if !ensure_out_headroom(inner, HEADROOM_RESERVE) {
            break;
        }
        let payload_len = frame::peek_payload_len(&inner.inbuf) as usize;
        let frame_len = frame::HEADER_LEN + payload_len;
        if frame_len > INBUF_CAP {
            inner.protocol_error = Some("oversized frame".to_string());
            inner.closed = true;
            cv.notify_all();
            return;
        }
        if inner.inbuf.len() < frame_len {
            break;
        }
        match frame::parse(&inner.inbuf[..frame_len]) {
            Ok(fr) => {
                let (op, rid, payload) = (fr.op, fr.rid, fr.payload.to_vec());
                inner.inbuf.drain(..frame_len);
                handle_request(mmap, inner, notify_w, cv, op, rid, &payload);
            }
            Err(e) => {
                inner.protocol_error = Some(e.to_string());
                inner.closed = true;
                cv.notify_all();
                return;
            }
        }
    }
}

fn open_trusted(path: &[u8], flags: i32, mode: u32) -> Result<OwnedFd, RuntimeErrorKind> {
    let cpath = std::ffi::CString::new(path).map_err(|_| RuntimeErrorKind::Invalid)?;
    let fd = unsafe { libc::open(cpath.as_ptr(), flags, mode as libc::mode_t) };
    if fd < 0 {
        return Err(RuntimeErrorKind::last_os_error());
    }
    Ok(unsafe { std::os::fd::FromRawFd::from_raw_fd(fd) })
}

fn open_for_job(sandbox: &SandboxConfig, path: &[u8], req_flags: u32, create_mode: u32) -> Result<OwnedFd, String> {
    let want_r = req_flags & oflags::READ != 0;
    let want_w = req_flags & oflags::WRITE != 0;
    let mut flags = match (want_r, want_w) {
        (true, true) => libc::O_RDWR,
        (false, true) => libc::O_WRONLY,
        _ => libc::O_RDONLY,
    };
    if req_flags & oflags::CREATE != 0 {
        flags |= libc::O_CREAT;
    }
    if req_flags & oflags::TRUNC != 0 {
        flags |= libc::O_TRUNC;
    }
    if req_flags & oflags::APPEND != 0 {
        flags |= libc::O_APPEND;
    }
    let mode = if create_mode != 0 { create_mode } else { 0o644 };

    if sandbox.enabled() {
        let root = sandbox.root.as_ref().unwrap();
        sandbox::open_under_root(std::os::fd::AsFd::as_fd(root), path, flags | libc::O_CLOEXEC, mode).map_err(|e| e.to_message("open"))
    } else {
        open_trusted(path, flags | libc::O_CLOEXEC, mode).map_err(|e| format!("open failed: {}", e.as_str()))
    }
}

fn run_open(job_rid: u32, path: Vec<u8>, req_flags: u32, create_mode: u32, shared: &Mutex<Inner>, cv: &Condvar, notify_w: RawFd, sandbox: &SandboxConfig) {
    match open_for_job(sandbox, &path, req_flags, create_mode) {
        Ok(fd) => {
            let mut guard = shared.lock().unwrap();
            match guard.files.alloc(fd) {
                Some(file_id) => {
                    let _ = emit_done_ok(guard, cv, notify_w, job_rid, Op::Open as u16, 0, &file_id.to_le_bytes());
                }
                None => {
                    let _ = emit_done_err(guard, cv, notify_w, job_rid, "too many open files");
                }
            }
        }
        Err(msg) => {
            let guard = shared.lock().unwrap();
            let _ = emit_done_err(guard, cv, notify_w, job_rid, &msg);
        }
    }
}

fn run_close(rid: u32, file_id: u64, shared: &Mutex<Inner>, cv: &Condvar, notify_w: RawFd) {
    let taken = {
        let mut guard = shared.lock().unwrap();
        guard.files.take(file_id)
    };
    match taken {
        Some(fd) => {
            drop(fd); // closes via OwnedFd::drop
            let guard = shared.lock().unwrap();
            let _ = emit_done_ok(guard, cv, notify_w, rid, Op::Close as u16, 0, &[]);
        }
        None => {
            let guard = shared.lock().unwrap();
            let _ = emit_done_err(guard, cv, notify_w, rid, "unknown file_id");
        }
    }
}

fn run_read(rid: u32, file_id: u64, offset: u64, max_len: u32, shared: &Mutex<Inner>, cv: &Condvar, notify_w: RawFd) {
    let raw = {
        let guard = shared.lock().unwrap();
        guard.files.raw_fd(file_id)
    };
    let Some(fd) = raw else {
        let guard = shared.lock().unwrap();
        let _ = emit_done_err(guard, cv, notify_w, rid, "unknown file_id");
        return;
    };
    let mut buf = vec![0u8; max_len as usize];
    let n = unsafe { libc::pread(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), offset as libc::off_t) };
    if n < 0 {
        let k = RuntimeErrorKind::last_os_error();
        let guard = shared.lock().unwrap();
        let _ = emit_done_err(guard, cv, notify_w, rid, &format!("read failed: {}", k.as_str()));
        return;
    }
    buf.truncate(n as usize);
    let guard = shared.lock().unwrap();
    let _ = emit_done_ok(guard, cv, notify_w, rid, Op::Read as u16, n as u32, &buf);
}

fn run_write(rid: u32, file_id: u64, offset: u64, data: Vec<u8>, shared: &Mutex<Inner>, cv: &Condvar, notify_w: RawFd) {
    let raw = {
        let guard = shared.lock().unwrap();
        guard.files.raw_fd(file_id)
    };
    let Some(fd) = raw else {
        let guard = shared.lock().unwrap();
        let _ = emit_done_err(guard, cv, notify_w, rid, "unknown file_id");
        return;
    };
    let n = unsafe { libc::pwrite(fd, data.as_ptr() as *const libc::c_void, data.len(), offset as libc::off_t) };
    if n < 0 {
        let k = RuntimeErrorKind::last_os_error();
        let guard = shared.lock().unwrap();
        let _ = emit_done_err(guard, cv, notify_w, rid, &format!("write failed: {}", k.as_str()));
        return;
    }
    let guard = shared.lock().unwrap();
    let _ = emit_done_ok(guard, cv, notify_w, rid, Op::Write as u16, n as u32, &[]);
}

enum PathOp {
    Mkdir(u32),
    Rmdir,
    Unlink,
    Stat,
    Readdir(u32),
}

fn run_path_op(rid: u32, path: Vec<u8>, kind: PathOp, shared: &Mutex<Inner>, cv: &Condvar, notify_w: RawFd, sandbox: &SandboxConfig) {
    if !sandbox.enabled() {
        run_path_op_trusted(rid, &path, kind, shared, cv, notify_w);
        return;
    }
    let root = sandbox.root.as_ref().unwrap();
    let rootfd = std::os::fd::AsFd::as_fd(root);

    match kind {
        PathOp::Mkdir(mode) => {
            let parent = match sandbox::open_parent_under_root(rootfd, &path) {
                Ok(p) => p,
                Err(e) => {
                    let guard = shared.lock().unwrap();
                    let _ = emit_done_err(guard, cv, notify_w, rid, &e.to_message("mkdir"));
                    return;
                }
            };
            let r = unsafe { libc::mkdirat(parent.dirfd(), parent.name.as_ptr(), mode as libc::mode_t) };
            finish_status_op(rid, r, Op::Mkdir, shared, cv, notify_w);
        }
        PathOp::Rmdir => {
            let parent = match sandbox::open_parent_under_root(rootfd, &path) {
                Ok(p) => p,
                Err(e) => {
                    let guard = shared.lock().unwrap();
                    let _ = emit_done_err(guard, cv, notify_w, rid, &e.to_message("rmdir"));
                    return;
                }
            };
            if sandbox::is_symlink_at(parent.dirfd(), &parent.name) {
                let guard = shared.lock().unwrap();
                let _ = emit_done_err(guard, cv, notify_w, rid, "denied: refuses to act through a symlink");
                return;
            }
            let r = unsafe { libc::unlinkat(parent.dirfd(), parent.name.as_ptr(), libc::AT_REMOVEDIR) };
            finish_status_op(rid, r, Op::Rmdir, shared, cv, notify_w);
        }
        PathOp::Unlink => {
            let parent = match sandbox::open_parent_under_root(rootfd, &path) {
                Ok(p) => p,
                Err(e) => {
                    let guard = shared.lock().unwrap();
                    let _ = emit_done_err(guard, cv, notify_w, rid, &e.to_message("unlink"));
                    return;
                }
            };
            if sandbox::is_symlink_at(parent.dirfd(), &parent.name) {
                let guard = shared.lock().unwrap();
                let _ = emit_done_err(guard, cv, notify_w, rid, "denied: refuses to act through a symlink");
                return;
            }
            let r = unsafe { libc::unlinkat(parent.dirfd(), parent.name.as_ptr(), 0) };
            finish_status_op(rid, r, Op::Unlink, shared, cv, notify_w);
        }
        PathOp::Stat => {
            let parent = match sandbox::open_parent_under_root(rootfd, &path) {
                Ok(p) => p,
                Err(e) => {
                    let guard = shared.lock().unwrap();
                    let _ = emit_done_err(guard, cv, notify_w, rid, &e.to_message("stat"));
                    return;
                }
            };
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            let r = unsafe { libc::fstatat(parent.dirfd(), parent.name.as_ptr(), &mut st, libc::AT_SYMLINK_NOFOLLOW) };
            if r != 0 {
                let k = RuntimeErrorKind::last_os_error();
                let guard = shared.lock().unwrap();
                let _ = emit_done_err(guard, cv, notify_w, rid, &format!("stat failed: {}", k.as_str()));
                return;
            }
            let guard = shared.lock().unwrap();
            let _ = emit_done_ok(guard, cv, notify_w, rid, Op::Stat as u16, 0, &encode_stat(&st));
        }
        PathOp::Readdir(max_bytes) => {
            let dirfd = match sandbox::open_under_root(rootfd, &path, libc::O_RDONLY | libc::O_DIRECTORY, 0) {
                Ok(fd) => fd,
                Err(e) => {
                    let guard = shared.lock().unwrap();
                    let _ = emit_done_err(guard, cv, notify_w, rid, &e.to_message("readdir"));
                    return;
                }
            };
            match read_directory(dirfd, max_bytes) {
                Ok(payload) => {
                    let guard = shared.lock().unwrap();
                    let _ = emit_done_ok(guard, cv, notify_w, rid, Op::Readdir as u16, 0, &payload);
                }
                Err(k) => {
                    let guard = shared.lock().unwrap();
                    let _ = emit_done_err(guard, cv, notify_w, rid, &format!("readdir failed: {}", k.as_str()));
                }
            }
        }
    }
}

fn run_path_op_trusted(rid: u32, path: &[u8], kind: PathOp, shared: &Mutex<Inner>, cv: &Condvar, notify_w: RawFd) {
    let Ok(cpath) = std::ffi::CString::new(path) else {
        let guard = shared.lock().unwrap();
        let _ = emit_done_err(guard, cv, notify_w, rid, "invalid: path contains NUL");
        return;
    };
    match kind {
        PathOp::Mkdir(mode) => {
            let r = unsafe { libc::mkdir(cpath.as_ptr(), mode as libc::mode_t) };
            finish_status_op(rid, r, Op::Mkdir, shared, cv, notify_w);
        }
        PathOp::Rmdir => {
            let r = unsafe { libc::rmdir(cpath.as_ptr()) };
            finish_status_op(rid, r, Op::Rmdir, shared, cv, notify_w);
        }
        PathOp::Unlink => {
            let r = unsafe { libc::unlink(cpath.as_ptr()) };
            finish_status_op(rid, r, Op::Unlink, shared, cv, notify_w);
        }
        PathOp::Stat => {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            let r = unsafe { libc::lstat(cpath.as_ptr(), &mut st) };
            if r != 0 {
                let k = RuntimeErrorKind::last_os_error();
                let guard = shared.lock().unwrap();
                let _ = emit_done_err(guard, cv, notify_w, rid, &format!("stat failed: {}", k.as_str()));
                return;
            }
            let guard = shared.lock().unwrap();
            let _ = emit_done_ok(guard, cv, notify_w, rid, Op::Stat as u16, 0, &encode_stat(&st));
        }
        PathOp::Readdir(max_bytes) => {
            let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC) };
            if fd < 0 {
                let k = RuntimeErrorKind::last_os_error();
                let guard = shared.lock().unwrap();
                let _ = emit_done_err(guard, cv, notify_w, rid, &format!("readdir failed: {}", k.as_str()));
                return;
            }
            let owned: OwnedFd = unsafe { std::os::fd::FromRawFd::from_raw_fd(fd) };
            match read_directory(owned, max_bytes) {
                Ok(payload) => {
                    let guard = shared.lock().unwrap();
                    let _ = emit_done_ok(guard, cv, notify_w, rid, Op::Readdir as u16, 0, &payload);
                }
                Err(k) => {
                    let guard = shared.lock().unwrap();
                    let _ = emit_done_err(guard, cv, notify_w, rid, &format!("readdir failed: {}", k.as_str()));
                }
            }
        }
    }
}

fn finish_status_op(rid: u32, r: i32, op: Op, shared: &Mutex<Inner>, cv: &Condvar, notify_w: RawFd) {
    let label = op.name();
    if r == 0 {
        let guard = shared.lock().unwrap();
        let _ = emit_done_ok(guard, cv, notify_w, rid, op as u16, 0, &[]);
    } else {
        let k = RuntimeErrorKind::last_os_error();
        let guard = shared.lock().unwrap();
        let _ = emit_done_err(guard, cv, notify_w, rid, &format!("{label} failed: {}", k.as_str()));
    }
}

/// 32-byte STAT completion payload: dtype(u32) size(u64) mtime_sec(u64)
/// mtime_nsec(u64) mode(u32), grounded on the original's `zi_stat_v1`.
fn encode_stat(st: &libc::stat) -> Vec<u8> {
    let dtype = match st.st_mode & libc::S_IFMT {
        libc::S_IFREG => DirentType::File,
        libc::S_IFDIR => DirentType::Dir,
        libc::S_IFLNK => DirentType::Symlink,
        _ => DirentType::Other,
    };
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(&(dtype as u32).to_le_bytes());
    out.extend_from_slice(&(st.st_size as u64).to_le_bytes());
    out.extend_from_slice(&(st.st_mtime as u64).to_le_bytes());
    out.extend_from_slice(&(st.st_mtime_nsec as u64).to_le_bytes());
    out.extend_from_slice(&(st.st_mode as u32).to_le_bytes());
    out
}

/// Reads directory entries via `readdir(3)` up to `max_bytes` of
/// encoded payload (each entry: dtype(u32) name_len(u32) name bytes).
fn read_directory(dirfd: OwnedFd, max_bytes: u32) -> Result<Vec<u8>, RuntimeErrorKind> {
    let dir = unsafe { libc::fdopendir(dirfd.as_raw_fd()) };
    if dir.is_null() {
        return Err(RuntimeErrorKind::last_os_error());
    }
    std::mem::forget(dirfd); // fdopendir now owns the fd; closedir below releases it
    let mut out = Vec::new();
    loop {
        let ent = unsafe { libc::readdir(dir) };
        if ent.is_null() {
            break;
        }
        let name = unsafe { std::ffi::CStr::from_ptr((*ent).d_name.as_ptr()) };
        let bytes = name.to_bytes();
        if bytes == b"." || bytes == b".." {
            continue;
        }
        let dtype = DirentType::from_d_type(unsafe { (*ent).d_type });
        let entry_len = 8 + bytes.len();
        if out.len() + entry_len > max_bytes as usize {
            break;
        }
        out.extend_from_slice(&(dtype as u32).to_le_bytes());
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(bytes);
    }
    unsafe { libc::closedir(dir) };
    Ok(out)
}

fn worker_main(shared: Arc<Mutex<Inner>>, cv: Arc<Condvar>, notify_w: RawFd, sandbox: Arc<SandboxConfig>) {
    loop {
        let job = {
            let mut guard = shared.lock().unwrap();
            loop {
                if guard.closed {
                    return;
                }
                if let Some(job) = guard.jobs.pop() {
                    break job;
                }
                guard = cv.wait(guard).unwrap();
            }
        };

        match job {
            Job::Open { rid, path, oflags, create_mode } => run_open(rid, path, oflags, create_mode, &shared, &cv, notify_w, &sandbox),
            Job::Close { rid, file_id } => run_close(rid, file_id, &shared, &cv, notify_w),
            Job::Read { rid, file_id, offset, max_len } => run_read(rid, file_id, offset, max_len, &shared, &cv, notify_w),
            Job::Write { rid, file_id, offset, data } => run_write(rid, file_id, offset, data, &shared, &cv, notify_w),
            Job::Mkdir { rid, path, mode } => run_path_op(rid, path, PathOp::Mkdir(mode), &shared, &cv, notify_w, &sandbox),
            Job::Rmdir { rid, path } => run_path_op(rid, path, PathOp::Rmdir, &shared, &cv, notify_w, &sandbox),
            Job::Unlink { rid, path } => run_path_op(rid, path, PathOp::Unlink, &shared, &cv, notify_w, &sandbox),
            Job::Stat { rid, path } => run_path_op(rid, path, PathOp::Stat, &shared, &cv, notify_w, &sandbox),
            Job::Readdir { rid, path, max_bytes } => run_path_op(rid, path, PathOp::Readdir(max_bytes), &shared, &cv, notify_w, &sandbox),
        }
    }
}

/// The live `file/aio` capability instance: owns the worker thread and
/// the wakeup socketpair, and implements [`zabi::HandleOps`] /
/// [`zabi::PollOps`] against the shared [`Inner`] state.
pub struct FileAioContext {
    inner: Arc<Mutex<Inner>>,
    cv: Arc<Condvar>,
    notify_r: OwnedFd,
    notify_w: OwnedFd,
    mmap: Arc<dyn MmapHook>,
    worker: Option<JoinHandle<()>>,
}

impl FileAioContext {
    /// Spawns the worker thread. `root` is the sandbox root directory
    /// fd, if `ZI_FS_ROOT` was configured; `None` runs in trusted
    /// (unsandboxed) mode.
    pub fn spawn(root: Option<OwnedFd>, mmap: Arc<dyn MmapHook>) -> std::io::Result<Self> {
        let (notify_r, notify_w) = std::os::unix::net::UnixStream::pair()?;
        notify_r.set_nonblocking(true)?;
        notify_w.set_nonblocking(true)?;
        let notify_r: OwnedFd = notify_r.into();
        let notify_w: OwnedFd = notify_w.into();

        let inner = Arc::new(Mutex::new(Inner::new()));
        let cv = Arc::new(Condvar::new());
        let sandbox = Arc::new(SandboxConfig { root });

        let worker_inner = Arc::clone(&inner);
        let worker_cv = Arc::clone(&cv);
        let worker_notify_w = notify_w.as_raw_fd();
        let worker_sandbox = Arc::clone(&sandbox);
        let worker = std::thread::Builder::new()
            .name("zabi-file-aio".to_string())
            .spawn(move || worker_main(worker_inner, worker_cv, worker_notify_w, worker_sandbox))?;

        Ok(FileAioContext { inner, cv, notify_r, notify_w, mmap, worker: Some(worker) })
    }

    pub fn poll_fd(&self) -> RawFd {
        self.notify_r.as_raw_fd()
    }
}

impl zabi::HandleOps for FileAioContext {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(msg) = &inner.protocol_error {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, msg.clone()));
        }
        if inner.closed {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "handle closed"));
        }
        if buf.len() > INBUF_CAP - inner.inbuf.len() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "input staging buffer full"));
        }
        inner.inbuf.extend_from_slice(buf);
        let notify_w = self.notify_w.as_raw_fd();
        process_pending_requests(&*self.mmap, &mut inner, notify_w, &self.cv);
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut inner = self.inner.lock().unwrap();
        if inner.out_is_empty() {
            if inner.closed {
                return Ok(0);
            }
            return Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, "nothing to read"));
        }
        let avail = inner.outbuf.len() - inner.out_off;
        let n = avail.min(buf.len());
        let start = inner.out_off;
        buf[..n].copy_from_slice(&inner.outbuf[start..start + n]);
        inner.out_off += n;
        if inner.out_is_empty() {
            let notify_r = self.notify_r.as_raw_fd();
            drain_wakeup(&mut inner, notify_r);
        }
        self.cv.notify_all();
        let notify_w = self.notify_w.as_raw_fd();
        process_pending_requests(&*self.mmap, &mut inner, notify_w, &self.cv);
        Ok(n)
    }

    fn end(&mut self) -> std::io::Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
        }
        self.cv.notify_all();
        Ok(())
    }
}

impl zabi::PollOps for FileAioContext {
    fn ready_mask(&self) -> zabi::HandleFlags {
        let inner = self.inner.lock().unwrap();
        let mut mask = zabi::HandleFlags::NONE;
        if !inner.out_is_empty() {
            mask = mask | zabi::HandleFlags::READABLE;
        }
        if !inner.closed && inner.jobs.has_room() {
            mask = mask | zabi::HandleFlags::WRITABLE;
        }
        mask
    }

    fn poll_fd(&self) -> RawFd {
        self.notify_r.as_raw_fd()
    }
}

impl Drop for FileAioContext {
    fn drop(&mut self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
        }
        self.cv.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use zabi::{FlatMmap, HandleOps};

    fn ctx() -> FileAioContext {
        FileAioContext::spawn(None, Arc::new(FlatMmap::new(vec![0u8; 0]))).unwrap()
    }

    fn write_req(op: u16, rid: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&frame::MAGIC);
        out.extend_from_slice(&frame::VERSION.to_le_bytes());
        out.extend_from_slice(&op.to_le_bytes());
        out.extend_from_slice(&rid.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_unknown_op_gets_error_ack() {
        let mut c = ctx();
        let req = write_req(999, 1, &[]);
        c.write(&req).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 256];
        let n = c.read(&mut buf).unwrap();
        let fr = frame::parse(&buf[..n]).unwrap();
        assert_eq!(fr.status, frame::STATUS_ERR);
    }

    /// Reads exactly one frame off the context, retrying briefly while
    /// the worker thread is still producing it. Returns `(status, payload)`.
    fn read_one_frame(c: &mut FileAioContext) -> (u32, Vec<u8>) {
        let mut buf = vec![0u8; 65_536];
        for _ in 0..200 {
            match c.read(&mut buf) {
                Ok(n) if n > 0 => {
                    let fr = frame::parse(&buf[..n]).unwrap();
                    return (fr.status, fr.payload.to_vec());
                }
                _ => std::thread::sleep(std::time::Duration::from_millis(5)),
            }
        }
        panic!("timed out waiting for a frame");
    }

    #[test]
    fn test_mkdir_then_stat_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub");
        let path_str = path.to_str().unwrap().as_bytes().to_vec();
        let path_len = path_str.len() as u32;

        let mmap = Arc::new(FlatMmap::new(path_str.clone()));
        let mut c = FileAioContext::spawn(None, mmap).unwrap();

        let mut mkdir_payload = Vec::new();
        mkdir_payload.extend_from_slice(&0u64.to_le_bytes()); // path_ptr
        mkdir_payload.extend_from_slice(&path_len.to_le_bytes());
        mkdir_payload.extend_from_slice(&0o755u32.to_le_bytes()); // mode
        mkdir_payload.extend_from_slice(&0u32.to_le_bytes()); // flags
        c.write(&write_req(Op::Mkdir as u16, 1, &mkdir_payload)).unwrap();

        let (ack_status, _) = read_one_frame(&mut c);
        assert_eq!(ack_status, frame::STATUS_OK);
        let (done_status, _) = read_one_frame(&mut c);
        assert_eq!(done_status, frame::STATUS_OK);
        assert!(path.is_dir());

        let mut stat_payload = Vec::new();
        stat_payload.extend_from_slice(&0u64.to_le_bytes());
        stat_payload.extend_from_slice(&path_len.to_le_bytes());
        stat_payload.extend_from_slice(&0u32.to_le_bytes());
        c.write(&write_req(Op::Stat as u16, 2, &stat_payload)).unwrap();

        let (ack_status, _) = read_one_frame(&mut c);
        assert_eq!(ack_status, frame::STATUS_OK);
        let (done_status, done_payload) = read_one_frame(&mut c);
        assert_eq!(done_status, frame::STATUS_OK);
        // done_payload is orig_op(u16) reserved(u16) result(u32) then the 32-byte stat blob.
        let dtype = u32::from_le_bytes(done_payload[8..12].try_into().unwrap());
        assert_eq!(dtype, DirentType::Dir as u32);
    }

    #[test]
    fn test_path_escaping_sandbox_root_is_denied() {
        let dir = tempfile::tempdir().unwrap();
        let escaped = b"/../etc/passwd".to_vec();
        let path_len = escaped.len() as u32;
        let root: OwnedFd = open_trusted(dir.path().to_str().unwrap().as_bytes(), libc::O_DIRECTORY | libc::O_RDONLY, 0).unwrap();

        let mmap = Arc::new(FlatMmap::new(escaped));
        let mut c = FileAioContext::spawn(Some(root), mmap).unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(&0u64.to_le_bytes());
        payload.extend_from_slice(&path_len.to_le_bytes());
        payload.extend_from_slice(&oflags::READ.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        c.write(&write_req(Op::Open as u16, 7, &payload)).unwrap();

        let (ack_status, _) = read_one_frame(&mut c);
        assert_eq!(ack_status, frame::STATUS_OK);
        let (done_status, _) = read_one_frame(&mut c);
        assert_eq!(done_status, frame::STATUS_ERR);
    }
}
