//! Requests handed to a filesystem and the session library's reply primitives.
//!
//! A [`Request`] owns the `fuse_req_t` until one of its `reply_*` methods
//! consumes it. Dropping an unanswered request replies `EIO` so the kernel
//! never waits forever on a forgotten or panicking handler.

use super::attr::{Entry, FileAttr, FileType, Statfs};
use super::bufvec::BufferVector;
use super::file_info::{FileHandleState, FileInfo};
use super::sys;
use libc::{c_char, c_int};
use log::{error, warn};
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

/// Caller credentials of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
    /// Process id.
    pub pid: i32,
    /// umask of the calling process.
    pub umask: u32,
}

/// One in-flight kernel request.
#[derive(Debug)]
pub struct Request {
    raw: sys::fuse_req_t,
    op: &'static str,
}

impl Request {
    /// Wraps a request received from libfuse.
    ///
    /// # Safety
    ///
    /// `raw` must be a live request that has not been answered yet.
    pub(crate) unsafe fn from_raw(raw: sys::fuse_req_t, op: &'static str) -> Self {
        Self { raw, op }
    }

    /// Name of the operation this request belongs to.
    pub fn operation(&self) -> &'static str {
        self.op
    }

    /// Credentials of the process that issued the request.
    pub fn caller(&self) -> Caller {
        // SAFETY: libfuse returns a pointer into the live request.
        let ctx = unsafe { &*sys::fuse_req_ctx(self.raw) };
        Caller {
            uid: ctx.uid,
            gid: ctx.gid,
            pid: ctx.pid,
            umask: ctx.umask as u32,
        }
    }

    /// Hands the raw request over to code that replies on its own.
    pub fn into_raw(self) -> sys::fuse_req_t {
        let raw = self.raw;
        std::mem::forget(self);
        raw
    }

    fn sent(op: &'static str, rc: c_int) {
        if rc != 0 {
            warn!("Reply to {} not delivered: errno {}", op, -rc);
        }
    }

    /// Replies with an errno; `0` means plain success for operations that
    /// carry no data.
    pub fn reply_err(self, errno: c_int) {
        let op = self.op;
        // SAFETY: consumes the live request exactly once.
        Self::sent(op, unsafe { sys::fuse_reply_err(self.into_raw(), errno) });
    }

    /// Success without data.
    pub fn reply_ok(self) {
        self.reply_err(0);
    }

    /// Replies to lookup or mkdir.
    pub fn reply_entry(self, entry: &Entry) {
        let op = self.op;
        let param = entry.to_native();
        // SAFETY: `param` outlives the call.
        Self::sent(op, unsafe { sys::fuse_reply_entry(self.into_raw(), &param) });
    }

    /// Replies to create with the new entry and its open file state.
    pub fn reply_create(self, entry: &Entry, info: &FileInfo) {
        let Some(state) = FileHandleState::encode(info) else {
            return self.reply_err(libc::ENOMEM);
        };
        let op = self.op;
        let param = entry.to_native();
        // SAFETY: both records outlive the call.
        Self::sent(op, unsafe {
            sys::fuse_reply_create(self.into_raw(), &param, state.as_ptr())
        });
    }

    /// Replies to getattr or setattr.
    pub fn reply_attr(self, attr: &FileAttr, ttl: Duration) {
        let op = self.op;
        let st = attr.to_stat();
        // SAFETY: `st` outlives the call.
        Self::sent(op, unsafe {
            sys::fuse_reply_attr(self.into_raw(), &st, ttl.as_secs_f64())
        });
    }

    /// Replies to open or opendir.
    pub fn reply_open(self, info: &FileInfo) {
        let Some(state) = FileHandleState::encode(info) else {
            return self.reply_err(libc::ENOMEM);
        };
        let op = self.op;
        // SAFETY: `state` outlives the call.
        Self::sent(op, unsafe { sys::fuse_reply_open(self.into_raw(), state.as_ptr()) });
    }

    /// Replies to write with the number of bytes accepted.
    pub fn reply_write(self, count: usize) {
        let op = self.op;
        // SAFETY: consumes the live request exactly once.
        Self::sent(op, unsafe { sys::fuse_reply_write(self.into_raw(), count) });
    }

    /// Replies with a contiguous buffer.
    pub fn reply_buf(self, data: &[u8]) {
        let op = self.op;
        // SAFETY: `data` outlives the call.
        Self::sent(op, unsafe {
            sys::fuse_reply_buf(self.into_raw(), data.as_ptr() as *const c_char, data.len())
        });
    }

    /// Replies with a scatter/gather vector, letting libfuse splice
    /// fd-backed segments where it can. `flags` are libfuse's
    /// `fuse_buf_copy_flags`; `0` lets libfuse choose.
    pub fn reply_data(self, data: &mut BufferVector<'_>, flags: c_int) {
        let op = self.op;
        // SAFETY: the vector and everything it borrows outlive the call.
        Self::sent(op, unsafe {
            sys::fuse_reply_data(self.into_raw(), data.as_mut_ptr(), flags)
        });
    }

    /// Replies to statfs.
    pub fn reply_statfs(self, stats: &Statfs) {
        let op = self.op;
        let st = stats.to_native();
        // SAFETY: `st` outlives the call.
        Self::sent(op, unsafe { sys::fuse_reply_statfs(self.into_raw(), &st) });
    }

    /// Replies to readdir with a filled listing.
    pub fn reply_dir(self, listing: &DirectoryBuffer) {
        self.reply_buf(listing.as_bytes());
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        error!("Request {} dropped without a reply, answering EIO", self.op);
        // SAFETY: the request was never consumed, otherwise drop would not run.
        unsafe { sys::fuse_reply_err(self.raw, libc::EIO) };
    }
}

/// Directory listing packed in the kernel's dirent format.
#[derive(Debug)]
pub struct DirectoryBuffer {
    data: Vec<u8>,
    used: usize,
}

impl DirectoryBuffer {
    /// Listing of at most `size` bytes, the size the kernel asked for.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
            used: 0,
        }
    }

    /// Appends one entry. `offset` is the offset of the *next* entry.
    ///
    /// Returns `true` when the buffer is full and the entry was not added.
    pub fn add(
        &mut self,
        req: &Request,
        ino: u64,
        offset: i64,
        kind: FileType,
        name: &OsStr,
    ) -> bool {
        let Ok(name) = CString::new(name.as_bytes()) else {
            warn!("Skipping directory entry with embedded NUL: {:?}", name);
            return false;
        };
        // SAFETY: plain old data.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        st.st_ino = ino as _;
        st.st_mode = kind.mode_bits();
        let remaining = self.data.len() - self.used;
        let tail = self.data[self.used..].as_mut_ptr() as *mut c_char;
        // SAFETY: `tail` has `remaining` writable bytes; libfuse writes
        // nothing when the entry does not fit.
        let needed = unsafe {
            sys::fuse_add_direntry(req.raw, tail, remaining, name.as_ptr(), &st, offset as _)
        };
        if needed > remaining {
            return true;
        }
        self.used += needed;
        false
    }

    /// Bytes filled so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Whether no entry has been added.
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }
}
