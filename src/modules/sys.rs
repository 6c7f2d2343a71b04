//! Raw libfuse3 declarations.
//!
//! Only the subset of `fuse_lowlevel.h` / `fuse_common.h` / `fuse_opt.h`
//! that the bridge touches is declared here. Struct layouts follow
//! libfuse 3.17; the leading fields of `fuse_file_info` and the
//! `fuse_lowlevel_ops` slot order are unchanged since 3.0.
//!
//! Nothing in this module is safe to use directly: the safe wrappers live in
//! `session`, `file_info`, `bufvec` and `reply`.

#![allow(non_camel_case_types)]
#![allow(missing_docs)]

// The packed `fuse_file_info` bits are mapped for LSB-first bitfields only.
#[cfg(not(target_endian = "little"))]
compile_error!("fusebridge supports little-endian targets only");

use libc::{c_char, c_int, c_uint, c_void, gid_t, mode_t, off_t, pid_t, size_t, stat, statvfs, uid_t};

/// Inode number as used on the wire.
pub type fuse_ino_t = u64;

#[repr(C)]
pub struct fuse_session {
    _private: [u8; 0],
}

#[repr(C)]
pub struct fuse_req {
    _private: [u8; 0],
}

pub type fuse_req_t = *mut fuse_req;

#[repr(C)]
#[derive(Debug)]
pub struct fuse_args {
    pub argc: c_int,
    pub argv: *mut *mut c_char,
    pub allocated: c_int,
}

impl fuse_args {
    pub const fn empty() -> Self {
        Self {
            argc: 0,
            argv: std::ptr::null_mut(),
            allocated: 0,
        }
    }
}

// enum fuse_buf_flags
pub const FUSE_BUF_IS_FD: c_int = 1 << 1;
pub const FUSE_BUF_FD_SEEK: c_int = 1 << 2;

// to_set bits passed to setattr
pub const FUSE_SET_ATTR_MODE: c_int = 1 << 0;
pub const FUSE_SET_ATTR_UID: c_int = 1 << 1;
pub const FUSE_SET_ATTR_GID: c_int = 1 << 2;
pub const FUSE_SET_ATTR_SIZE: c_int = 1 << 3;
pub const FUSE_SET_ATTR_ATIME: c_int = 1 << 4;
pub const FUSE_SET_ATTR_MTIME: c_int = 1 << 5;
pub const FUSE_SET_ATTR_ATIME_NOW: c_int = 1 << 7;
pub const FUSE_SET_ATTR_MTIME_NOW: c_int = 1 << 8;
pub const FUSE_SET_ATTR_CTIME: c_int = 1 << 10;

/// One scatter/gather segment.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct fuse_buf {
    pub size: size_t,
    pub flags: c_int,
    pub mem: *mut c_void,
    pub fd: c_int,
    pub pos: off_t,
    pub mem_size: size_t,
}

impl fuse_buf {
    pub const fn empty() -> Self {
        Self {
            size: 0,
            flags: 0,
            mem: std::ptr::null_mut(),
            fd: -1,
            pos: 0,
            mem_size: 0,
        }
    }
}

/// Variable-length: `buf` is really `count` elements long.
#[repr(C)]
#[derive(Debug)]
pub struct fuse_bufvec {
    pub count: size_t,
    pub idx: size_t,
    pub off: size_t,
    pub buf: [fuse_buf; 1],
}

/// `struct fuse_file_info` with its nine single-bit fields folded into `bits`.
///
/// On little-endian targets GCC allocates bitfields from the least
/// significant bit, so `writepage` is bit 0 and `parallel_direct_writes`
/// bit 8 of the second 32-bit word. Big-endian targets start from the most
/// significant bit and are rejected at compile time.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct fuse_file_info {
    pub flags: i32,
    pub bits: u32,
    pub padding2: u32,
    pub padding3: u32,
    pub fh: u64,
    pub lock_owner: u64,
    pub poll_events: u32,
    pub backing_id: i32,
    pub compat_flags: u64,
    pub reserved: [u64; 2],
}

#[repr(C)]
pub struct fuse_entry_param {
    pub ino: fuse_ino_t,
    pub generation: u64,
    pub attr: stat,
    pub attr_timeout: f64,
    pub entry_timeout: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct fuse_ctx {
    pub uid: uid_t,
    pub gid: gid_t,
    pub pid: pid_t,
    pub umask: mode_t,
}

/// Slot for an operation the bridge never registers.
pub type Unused = Option<unsafe extern "C" fn()>;

pub type EntryOp = Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char)>;
pub type FileOp = Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *mut fuse_file_info)>;
pub type TransferOp =
    Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, size_t, off_t, *mut fuse_file_info)>;

/// `struct fuse_lowlevel_ops`, slot order as in libfuse 3.x up to `lseek`.
#[repr(C)]
#[derive(Default)]
pub struct fuse_lowlevel_ops {
    pub init: Unused,
    pub destroy: Unused,
    pub lookup: EntryOp,
    pub forget: Unused,
    pub getattr: FileOp,
    pub setattr:
        Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *mut stat, c_int, *mut fuse_file_info)>,
    pub readlink: Unused,
    pub mknod: Unused,
    pub mkdir: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, mode_t)>,
    pub unlink: EntryOp,
    pub rmdir: EntryOp,
    pub symlink: Unused,
    pub rename: Option<
        unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, fuse_ino_t, *const c_char, c_uint),
    >,
    pub link: Unused,
    pub open: FileOp,
    pub read: TransferOp,
    pub write: Option<
        unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, size_t, off_t, *mut fuse_file_info),
    >,
    pub flush: Unused,
    pub release: FileOp,
    pub fsync: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t, c_int, *mut fuse_file_info)>,
    pub opendir: FileOp,
    pub readdir: TransferOp,
    pub releasedir: FileOp,
    pub fsyncdir: Unused,
    pub statfs: Option<unsafe extern "C" fn(fuse_req_t, fuse_ino_t)>,
    pub setxattr: Unused,
    pub getxattr: Unused,
    pub listxattr: Unused,
    pub removexattr: Unused,
    pub access: Unused,
    pub create: Option<
        unsafe extern "C" fn(fuse_req_t, fuse_ino_t, *const c_char, mode_t, *mut fuse_file_info),
    >,
    pub getlk: Unused,
    pub setlk: Unused,
    pub bmap: Unused,
    pub ioctl: Unused,
    pub poll: Unused,
    pub write_buf: Unused,
    pub retrieve_reply: Unused,
    pub forget_multi: Unused,
    pub flock: Unused,
    pub fallocate: Unused,
    pub readdirplus: Unused,
    pub copy_file_range: Unused,
    pub lseek: Unused,
}

#[link(name = "fuse3")]
extern "C" {
    pub fn fuse_opt_add_arg(args: *mut fuse_args, arg: *const c_char) -> c_int;
    pub fn fuse_opt_free_args(args: *mut fuse_args);

    pub fn fuse_session_new(
        args: *mut fuse_args,
        op: *const fuse_lowlevel_ops,
        op_size: size_t,
        userdata: *mut c_void,
    ) -> *mut fuse_session;
    pub fn fuse_session_mount(se: *mut fuse_session, mountpoint: *const c_char) -> c_int;
    pub fn fuse_session_unmount(se: *mut fuse_session);
    pub fn fuse_session_destroy(se: *mut fuse_session);
    pub fn fuse_session_fd(se: *mut fuse_session) -> c_int;
    pub fn fuse_session_exited(se: *mut fuse_session) -> c_int;
    pub fn fuse_session_receive_buf(se: *mut fuse_session, buf: *mut fuse_buf) -> c_int;
    pub fn fuse_session_process_buf(se: *mut fuse_session, buf: *const fuse_buf);

    pub fn fuse_req_userdata(req: fuse_req_t) -> *mut c_void;
    pub fn fuse_req_ctx(req: fuse_req_t) -> *const fuse_ctx;

    pub fn fuse_reply_err(req: fuse_req_t, err: c_int) -> c_int;
    pub fn fuse_reply_entry(req: fuse_req_t, e: *const fuse_entry_param) -> c_int;
    pub fn fuse_reply_create(
        req: fuse_req_t,
        e: *const fuse_entry_param,
        fi: *const fuse_file_info,
    ) -> c_int;
    pub fn fuse_reply_attr(req: fuse_req_t, attr: *const stat, attr_timeout: f64) -> c_int;
    pub fn fuse_reply_open(req: fuse_req_t, fi: *const fuse_file_info) -> c_int;
    pub fn fuse_reply_write(req: fuse_req_t, count: size_t) -> c_int;
    pub fn fuse_reply_buf(req: fuse_req_t, buf: *const c_char, size: size_t) -> c_int;
    pub fn fuse_reply_data(req: fuse_req_t, bufv: *mut fuse_bufvec, flags: c_int) -> c_int;
    pub fn fuse_reply_statfs(req: fuse_req_t, stbuf: *const statvfs) -> c_int;
    pub fn fuse_add_direntry(
        req: fuse_req_t,
        buf: *mut c_char,
        bufsize: size_t,
        name: *const c_char,
        stbuf: *const stat,
        off: off_t,
    ) -> size_t;
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn test_file_info_layout() {
        assert_eq!(size_of::<fuse_file_info>(), 64);
        assert_eq!(offset_of!(fuse_file_info, bits), 4);
        assert_eq!(offset_of!(fuse_file_info, fh), 16);
        assert_eq!(offset_of!(fuse_file_info, lock_owner), 24);
        assert_eq!(offset_of!(fuse_file_info, poll_events), 32);
        assert_eq!(offset_of!(fuse_file_info, backing_id), 36);
        assert_eq!(offset_of!(fuse_file_info, compat_flags), 40);
    }

    #[test]
    fn test_buf_layout() {
        assert_eq!(size_of::<fuse_buf>(), 48);
        assert_eq!(offset_of!(fuse_buf, mem), 16);
        assert_eq!(offset_of!(fuse_buf, pos), 32);
        assert_eq!(offset_of!(fuse_bufvec, buf), 24);
        assert_eq!(size_of::<fuse_bufvec>(), 24 + size_of::<fuse_buf>());
    }

    #[test]
    fn test_ops_table_is_all_pointers() {
        assert_eq!(
            size_of::<fuse_lowlevel_ops>(),
            44 * size_of::<Option<unsafe extern "C" fn()>>()
        );
    }
}
