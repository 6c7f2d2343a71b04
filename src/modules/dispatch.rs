//! The operation table registered with libfuse and the filesystem contract
//! its entry points forward to.
//!
//! Every entry point is a stateless stub: it recovers the filesystem from the
//! request's userdata, turns C strings and `fuse_file_info` into Rust values,
//! and forwards. It never validates, retries or replies on its own.

use super::file_info::FileInfo;
use super::reply::Request;
use super::sys::{self, fuse_file_info, fuse_ino_t, fuse_req_t};
use libc::{c_char, c_int, c_uint, mode_t, off_t, size_t, ENOSYS};
use log::{debug, error};
use std::ffi::{CStr, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::panic::{self, AssertUnwindSafe};

/// The seventeen operations a mounted filesystem answers.
///
/// Each method receives the request and the protocol arguments and must
/// eventually consume the request with one of its `reply_*` methods. The
/// defaults answer `ENOSYS`.
#[allow(unused_variables)]
pub trait Filesystem {
    /// Look up `name` in directory `parent`.
    fn lookup(&mut self, req: Request, parent: u64, name: &OsStr) {
        req.reply_err(ENOSYS);
    }

    /// Attributes of `ino`; `fi` is present when called on an open file.
    fn getattr(&mut self, req: Request, ino: u64, fi: Option<&FileInfo>) {
        req.reply_err(ENOSYS);
    }

    /// Change the attributes selected by `to_set` (`FUSE_SET_ATTR_*`).
    /// [`SetAttr::from_raw`](super::attr::SetAttr::from_raw) decodes them.
    fn setattr(
        &mut self,
        req: Request,
        ino: u64,
        attr: &libc::stat,
        to_set: c_int,
        fi: Option<&FileInfo>,
    ) {
        req.reply_err(ENOSYS);
    }

    /// Create directory `name` in `parent`.
    fn mkdir(&mut self, req: Request, parent: u64, name: &OsStr, mode: u32) {
        req.reply_err(ENOSYS);
    }

    /// Remove directory `name` from `parent`.
    fn rmdir(&mut self, req: Request, parent: u64, name: &OsStr) {
        req.reply_err(ENOSYS);
    }

    /// Remove file `name` from `parent`.
    fn unlink(&mut self, req: Request, parent: u64, name: &OsStr) {
        req.reply_err(ENOSYS);
    }

    /// Rename `parent/name` to `newparent/newname`; `flags` are `RENAME_*`.
    fn rename(
        &mut self,
        req: Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
    ) {
        req.reply_err(ENOSYS);
    }

    /// Open `ino`.
    fn open(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        req.reply_err(ENOSYS);
    }

    /// Last close of an open file.
    fn release(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        req.reply_err(ENOSYS);
    }

    /// Read up to `size` bytes at `offset`.
    fn read(&mut self, req: Request, ino: u64, size: usize, offset: i64, fi: &FileInfo) {
        req.reply_err(ENOSYS);
    }

    /// Write `data` at `offset`.
    fn write(&mut self, req: Request, ino: u64, data: &[u8], offset: i64, fi: &FileInfo) {
        req.reply_err(ENOSYS);
    }

    /// Create and open file `name` in `parent`.
    fn create(&mut self, req: Request, parent: u64, name: &OsStr, mode: u32, fi: &FileInfo) {
        req.reply_err(ENOSYS);
    }

    /// Flush file contents; only user data when `datasync` is set.
    fn fsync(&mut self, req: Request, ino: u64, datasync: bool, fi: &FileInfo) {
        req.reply_err(ENOSYS);
    }

    /// Open directory `ino`.
    fn opendir(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        req.reply_err(ENOSYS);
    }

    /// List directory entries starting after `offset`.
    fn readdir(&mut self, req: Request, ino: u64, size: usize, offset: i64, fi: &FileInfo) {
        req.reply_err(ENOSYS);
    }

    /// Close directory `ino`.
    fn releasedir(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        req.reply_err(ENOSYS);
    }

    /// Filesystem statistics.
    fn statfs(&mut self, req: Request, ino: u64) {
        req.reply_err(ENOSYS);
    }
}

/// What the session hands libfuse as userdata.
pub(crate) type Userdata = Box<dyn Filesystem>;

/// Names of the registered operations, in table order.
pub const OPERATIONS: [&str; 17] = [
    "lookup",
    "getattr",
    "setattr",
    "mkdir",
    "unlink",
    "rmdir",
    "rename",
    "open",
    "read",
    "write",
    "release",
    "fsync",
    "opendir",
    "readdir",
    "releasedir",
    "statfs",
    "create",
];

/// Builds the operation table. Slots not listed stay empty.
pub(crate) fn operations() -> sys::fuse_lowlevel_ops {
    sys::fuse_lowlevel_ops {
        lookup: Some(ll_lookup),
        getattr: Some(ll_getattr),
        setattr: Some(ll_setattr),
        mkdir: Some(ll_mkdir),
        unlink: Some(ll_unlink),
        rmdir: Some(ll_rmdir),
        rename: Some(ll_rename),
        open: Some(ll_open),
        read: Some(ll_read),
        write: Some(ll_write),
        release: Some(ll_release),
        fsync: Some(ll_fsync),
        opendir: Some(ll_opendir),
        readdir: Some(ll_readdir),
        releasedir: Some(ll_releasedir),
        statfs: Some(ll_statfs),
        create: Some(ll_create),
        ..Default::default()
    }
}

unsafe fn forward<F>(req: fuse_req_t, op: &'static str, call: F)
where
    F: FnOnce(&mut dyn Filesystem, Request),
{
    let fs = &mut **(sys::fuse_req_userdata(req) as *mut Userdata);
    let request = Request::from_raw(req, op);
    debug!("-> {}", op);
    // Unwinding into libfuse is undefined; the request is dropped during
    // unwinding and answers EIO on its own.
    if panic::catch_unwind(AssertUnwindSafe(|| call(fs, request))).is_err() {
        error!("Filesystem panicked while handling {}", op);
    }
}

unsafe fn os_str<'a>(name: *const c_char) -> &'a OsStr {
    OsStr::from_bytes(CStr::from_ptr(name).to_bytes())
}

unsafe fn file_info(fi: *const fuse_file_info) -> Option<FileInfo> {
    fi.as_ref().map(FileInfo::decode)
}

unsafe extern "C" fn ll_lookup(req: fuse_req_t, parent: fuse_ino_t, name: *const c_char) {
    let name = os_str(name);
    forward(req, "lookup", |fs, req| fs.lookup(req, parent, name));
}

unsafe extern "C" fn ll_getattr(req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
    let fi = file_info(fi);
    forward(req, "getattr", |fs, req| fs.getattr(req, ino, fi.as_ref()));
}

unsafe extern "C" fn ll_setattr(
    req: fuse_req_t,
    ino: fuse_ino_t,
    attr: *mut libc::stat,
    to_set: c_int,
    fi: *mut fuse_file_info,
) {
    let attr = &*attr;
    let fi = file_info(fi);
    forward(req, "setattr", |fs, req| {
        fs.setattr(req, ino, attr, to_set, fi.as_ref())
    });
}

unsafe extern "C" fn ll_mkdir(
    req: fuse_req_t,
    parent: fuse_ino_t,
    name: *const c_char,
    mode: mode_t,
) {
    let name = os_str(name);
    forward(req, "mkdir", |fs, req| fs.mkdir(req, parent, name, mode as u32));
}

unsafe extern "C" fn ll_unlink(req: fuse_req_t, parent: fuse_ino_t, name: *const c_char) {
    let name = os_str(name);
    forward(req, "unlink", |fs, req| fs.unlink(req, parent, name));
}

unsafe extern "C" fn ll_rmdir(req: fuse_req_t, parent: fuse_ino_t, name: *const c_char) {
    let name = os_str(name);
    forward(req, "rmdir", |fs, req| fs.rmdir(req, parent, name));
}

unsafe extern "C" fn ll_rename(
    req: fuse_req_t,
    parent: fuse_ino_t,
    name: *const c_char,
    newparent: fuse_ino_t,
    newname: *const c_char,
    flags: c_uint,
) {
    let name = os_str(name);
    let newname = os_str(newname);
    forward(req, "rename", |fs, req| {
        fs.rename(req, parent, name, newparent, newname, flags)
    });
}

unsafe extern "C" fn ll_open(req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
    let fi = file_info(fi).unwrap_or_default();
    forward(req, "open", |fs, req| fs.open(req, ino, &fi));
}

unsafe extern "C" fn ll_read(
    req: fuse_req_t,
    ino: fuse_ino_t,
    size: size_t,
    off: off_t,
    fi: *mut fuse_file_info,
) {
    let fi = file_info(fi).unwrap_or_default();
    forward(req, "read", |fs, req| fs.read(req, ino, size, off as i64, &fi));
}

unsafe extern "C" fn ll_write(
    req: fuse_req_t,
    ino: fuse_ino_t,
    buf: *const c_char,
    size: size_t,
    off: off_t,
    fi: *mut fuse_file_info,
) {
    let data: &[u8] = if size == 0 || buf.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(buf as *const u8, size)
    };
    let fi = file_info(fi).unwrap_or_default();
    forward(req, "write", |fs, req| fs.write(req, ino, data, off as i64, &fi));
}

unsafe extern "C" fn ll_release(req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
    let fi = file_info(fi).unwrap_or_default();
    forward(req, "release", |fs, req| fs.release(req, ino, &fi));
}

unsafe extern "C" fn ll_fsync(
    req: fuse_req_t,
    ino: fuse_ino_t,
    datasync: c_int,
    fi: *mut fuse_file_info,
) {
    let fi = file_info(fi).unwrap_or_default();
    forward(req, "fsync", |fs, req| fs.fsync(req, ino, datasync != 0, &fi));
}

unsafe extern "C" fn ll_opendir(req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
    let fi = file_info(fi).unwrap_or_default();
    forward(req, "opendir", |fs, req| fs.opendir(req, ino, &fi));
}

unsafe extern "C" fn ll_readdir(
    req: fuse_req_t,
    ino: fuse_ino_t,
    size: size_t,
    off: off_t,
    fi: *mut fuse_file_info,
) {
    let fi = file_info(fi).unwrap_or_default();
    forward(req, "readdir", |fs, req| {
        fs.readdir(req, ino, size, off as i64, &fi)
    });
}

unsafe extern "C" fn ll_releasedir(req: fuse_req_t, ino: fuse_ino_t, fi: *mut fuse_file_info) {
    let fi = file_info(fi).unwrap_or_default();
    forward(req, "releasedir", |fs, req| fs.releasedir(req, ino, &fi));
}

unsafe extern "C" fn ll_statfs(req: fuse_req_t, ino: fuse_ino_t) {
    forward(req, "statfs", |fs, req| fs.statfs(req, ino));
}

unsafe extern "C" fn ll_create(
    req: fuse_req_t,
    parent: fuse_ino_t,
    name: *const c_char,
    mode: mode_t,
    fi: *mut fuse_file_info,
) {
    let name = os_str(name);
    let fi = file_info(fi).unwrap_or_default();
    forward(req, "create", |fs, req| {
        fs.create(req, parent, name, mode as u32, &fi)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_seventeen_operations_registered() {
        let ops = operations();
        let registered = [
            ops.lookup.is_some(),
            ops.getattr.is_some(),
            ops.setattr.is_some(),
            ops.mkdir.is_some(),
            ops.unlink.is_some(),
            ops.rmdir.is_some(),
            ops.rename.is_some(),
            ops.open.is_some(),
            ops.read.is_some(),
            ops.write.is_some(),
            ops.release.is_some(),
            ops.fsync.is_some(),
            ops.opendir.is_some(),
            ops.readdir.is_some(),
            ops.releasedir.is_some(),
            ops.statfs.is_some(),
            ops.create.is_some(),
        ];
        assert_eq!(registered.len(), OPERATIONS.len());
        assert!(registered.iter().all(|set| *set));
    }

    #[test]
    fn test_unlisted_operations_stay_empty() {
        let ops = operations();
        assert!(ops.init.is_none());
        assert!(ops.destroy.is_none());
        assert!(ops.forget.is_none());
        assert!(ops.readlink.is_none());
        assert!(ops.flush.is_none());
        assert!(ops.write_buf.is_none());
        assert!(ops.readdirplus.is_none());
        assert!(ops.lseek.is_none());
    }

    #[test]
    fn test_file_info_decoding_tolerates_null() {
        assert!(unsafe { file_info(std::ptr::null()) }.is_none());
        let native = FileInfo::with_fh(libc::O_WRONLY, 3).to_native();
        let decoded = unsafe { file_info(&native) }.unwrap();
        assert_eq!(decoded.fh, 3);
        assert_eq!(decoded.flags, libc::O_WRONLY);
    }
}
