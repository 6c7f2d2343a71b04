//! C ABI for filesystems implemented outside Rust.
//!
//! Every function returns `0` on success or an [`ErrorKind`] code. Handles
//! are opaque pointers; each `*_create`/`*_encode` is paired with exactly one
//! `*_delete`, and every `*_delete` accepts null.
//!
//! The foreign filesystem registers its seventeen operations through a
//! [`ForeignOps`] table. Each callback receives the `user` pointer given to
//! [`fusebridge_create`], then the raw `fuse_req_t` and the protocol
//! arguments, and replies through libfuse's own `fuse_reply_*` functions.
//! File info is passed as a native record that is only valid during the
//! callback; use [`fusebridge_fi_decode`] to read it.

use super::bufvec;
use super::dispatch::Filesystem;
use super::error::{to_code, ErrorKind};
use super::file_info::{FileHandleState, FileInfo, FileInfoFlags};
use super::reply::Request;
use super::session::Session;
use super::sys::{fuse_buf, fuse_bufvec, fuse_file_info, fuse_ino_t, fuse_req_t};
use libc::{c_char, c_int, c_uint, c_void, mode_t, off_t, size_t, ENOMEM, ENOSYS};
use log::warn;
use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;

type EntryFn = unsafe extern "C" fn(*mut c_void, fuse_req_t, fuse_ino_t, *const c_char);
type FileFn = unsafe extern "C" fn(*mut c_void, fuse_req_t, fuse_ino_t, *mut fuse_file_info);
type TransferFn =
    unsafe extern "C" fn(*mut c_void, fuse_req_t, fuse_ino_t, size_t, off_t, *mut fuse_file_info);

/// Operation table supplied by the foreign filesystem. Null slots answer
/// `ENOSYS`. Slots are named after the [`Filesystem`] methods they serve.
#[allow(missing_docs)]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ForeignOps {
    pub lookup: Option<EntryFn>,
    pub readdir: Option<TransferFn>,
    pub mkdir:
        Option<unsafe extern "C" fn(*mut c_void, fuse_req_t, fuse_ino_t, *const c_char, mode_t)>,
    pub rmdir: Option<EntryFn>,
    pub unlink: Option<EntryFn>,
    pub rename: Option<
        unsafe extern "C" fn(
            *mut c_void,
            fuse_req_t,
            fuse_ino_t,
            *const c_char,
            fuse_ino_t,
            *const c_char,
            c_uint,
        ),
    >,
    pub open: Option<FileFn>,
    pub release: Option<FileFn>,
    pub read: Option<TransferFn>,
    pub write: Option<
        unsafe extern "C" fn(
            *mut c_void,
            fuse_req_t,
            fuse_ino_t,
            *const c_char,
            size_t,
            off_t,
            *mut fuse_file_info,
        ),
    >,
    pub create: Option<
        unsafe extern "C" fn(
            *mut c_void,
            fuse_req_t,
            fuse_ino_t,
            *const c_char,
            mode_t,
            *mut fuse_file_info,
        ),
    >,
    pub fsync:
        Option<unsafe extern "C" fn(*mut c_void, fuse_req_t, fuse_ino_t, c_int, *mut fuse_file_info)>,
    pub getattr: Option<FileFn>,
    pub setattr: Option<
        unsafe extern "C" fn(
            *mut c_void,
            fuse_req_t,
            fuse_ino_t,
            *mut libc::stat,
            c_int,
            *mut fuse_file_info,
        ),
    >,
    pub opendir: Option<FileFn>,
    pub releasedir: Option<FileFn>,
    pub statfs: Option<unsafe extern "C" fn(*mut c_void, fuse_req_t, fuse_ino_t)>,
}

/// Adapts a [`ForeignOps`] table to [`Filesystem`].
struct ForeignFilesystem {
    ops: ForeignOps,
    user: *mut c_void,
}

fn c_name(name: &OsStr) -> Option<CString> {
    CString::new(name.as_bytes()).ok()
}

// Encodes `fi` for the duration of `call`; answers ENOMEM if that fails.
fn with_file_info<F>(req: Request, fi: Option<&FileInfo>, call: F)
where
    F: FnOnce(fuse_req_t, *mut fuse_file_info),
{
    let Some(fi) = fi else {
        return call(req.into_raw(), ptr::null_mut());
    };
    match FileHandleState::encode(fi) {
        Some(mut state) => call(req.into_raw(), state.native_mut() as *mut fuse_file_info),
        None => req.reply_err(ENOMEM),
    }
}

impl ForeignFilesystem {
    fn entry_op(&self, op: Option<EntryFn>, req: Request, parent: u64, name: &OsStr) {
        let (Some(f), Some(name)) = (op, c_name(name)) else {
            return req.reply_err(ENOSYS);
        };
        // SAFETY: calling the foreign table with arguments matching its ABI.
        unsafe { f(self.user, req.into_raw(), parent, name.as_ptr()) };
    }

    fn file_op(&self, op: Option<FileFn>, req: Request, ino: u64, fi: Option<&FileInfo>) {
        let Some(f) = op else {
            return req.reply_err(ENOSYS);
        };
        // SAFETY: as above; the file info outlives the call.
        with_file_info(req, fi, |raw, native| unsafe { f(self.user, raw, ino, native) });
    }

    fn transfer_op(
        &self,
        op: Option<TransferFn>,
        req: Request,
        ino: u64,
        size: usize,
        offset: i64,
        fi: &FileInfo,
    ) {
        let Some(f) = op else {
            return req.reply_err(ENOSYS);
        };
        with_file_info(req, Some(fi), |raw, native| unsafe {
            f(self.user, raw, ino, size, offset as off_t, native)
        });
    }
}

impl Filesystem for ForeignFilesystem {
    fn lookup(&mut self, req: Request, parent: u64, name: &OsStr) {
        self.entry_op(self.ops.lookup, req, parent, name);
    }

    fn getattr(&mut self, req: Request, ino: u64, fi: Option<&FileInfo>) {
        self.file_op(self.ops.getattr, req, ino, fi);
    }

    fn setattr(
        &mut self,
        req: Request,
        ino: u64,
        attr: &libc::stat,
        to_set: c_int,
        fi: Option<&FileInfo>,
    ) {
        let Some(f) = self.ops.setattr else {
            return req.reply_err(ENOSYS);
        };
        let mut attr = *attr;
        with_file_info(req, fi, |raw, native| unsafe {
            f(self.user, raw, ino, &mut attr, to_set, native)
        });
    }

    fn mkdir(&mut self, req: Request, parent: u64, name: &OsStr, mode: u32) {
        let (Some(f), Some(name)) = (self.ops.mkdir, c_name(name)) else {
            return req.reply_err(ENOSYS);
        };
        unsafe { f(self.user, req.into_raw(), parent, name.as_ptr(), mode as mode_t) };
    }

    fn rmdir(&mut self, req: Request, parent: u64, name: &OsStr) {
        self.entry_op(self.ops.rmdir, req, parent, name);
    }

    fn unlink(&mut self, req: Request, parent: u64, name: &OsStr) {
        self.entry_op(self.ops.unlink, req, parent, name);
    }

    fn rename(
        &mut self,
        req: Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
    ) {
        let (Some(f), Some(name), Some(newname)) = (self.ops.rename, c_name(name), c_name(newname))
        else {
            return req.reply_err(ENOSYS);
        };
        unsafe {
            f(
                self.user,
                req.into_raw(),
                parent,
                name.as_ptr(),
                newparent,
                newname.as_ptr(),
                flags,
            )
        };
    }

    fn open(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        self.file_op(self.ops.open, req, ino, Some(fi));
    }

    fn release(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        self.file_op(self.ops.release, req, ino, Some(fi));
    }

    fn read(&mut self, req: Request, ino: u64, size: usize, offset: i64, fi: &FileInfo) {
        self.transfer_op(self.ops.read, req, ino, size, offset, fi);
    }

    fn write(&mut self, req: Request, ino: u64, data: &[u8], offset: i64, fi: &FileInfo) {
        let Some(f) = self.ops.write else {
            return req.reply_err(ENOSYS);
        };
        with_file_info(req, Some(fi), |raw, native| unsafe {
            f(
                self.user,
                raw,
                ino,
                data.as_ptr() as *const c_char,
                data.len(),
                offset as off_t,
                native,
            )
        });
    }

    fn create(&mut self, req: Request, parent: u64, name: &OsStr, mode: u32, fi: &FileInfo) {
        let (Some(f), Some(name)) = (self.ops.create, c_name(name)) else {
            return req.reply_err(ENOSYS);
        };
        with_file_info(req, Some(fi), |raw, native| unsafe {
            f(self.user, raw, parent, name.as_ptr(), mode as mode_t, native)
        });
    }

    fn fsync(&mut self, req: Request, ino: u64, datasync: bool, fi: &FileInfo) {
        let Some(f) = self.ops.fsync else {
            return req.reply_err(ENOSYS);
        };
        with_file_info(req, Some(fi), |raw, native| unsafe {
            f(self.user, raw, ino, datasync as c_int, native)
        });
    }

    fn opendir(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        self.file_op(self.ops.opendir, req, ino, Some(fi));
    }

    fn readdir(&mut self, req: Request, ino: u64, size: usize, offset: i64, fi: &FileInfo) {
        self.transfer_op(self.ops.readdir, req, ino, size, offset, fi);
    }

    fn releasedir(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        self.file_op(self.ops.releasedir, req, ino, Some(fi));
    }

    fn statfs(&mut self, req: Request, ino: u64) {
        let Some(f) = self.ops.statfs else {
            return req.reply_err(ENOSYS);
        };
        unsafe { f(self.user, req.into_raw(), ino) };
    }
}

/// Creates a session and mounts it at `mountpoint`.
///
/// On success `*obj` receives the session handle; on failure it is set to
/// null and nothing needs releasing. A null `ops` registers an empty table.
///
/// # Safety
///
/// `mountpoint` must be a NUL-terminated string, `ops` null or a valid
/// table, and `obj` a writable pointer.
#[no_mangle]
pub unsafe extern "C" fn fusebridge_create(
    mountpoint: *const c_char,
    ops: *const ForeignOps,
    user: *mut c_void,
    obj: *mut *mut c_void,
) -> c_int {
    if obj.is_null() {
        return ErrorKind::NoSession.code();
    }
    *obj = ptr::null_mut();
    if mountpoint.is_null() {
        return ErrorKind::MountFailed.code();
    }
    let ops = ops.as_ref().copied().unwrap_or_default();
    let path = Path::new(OsStr::from_bytes(CStr::from_ptr(mountpoint).to_bytes()));
    match Session::create(path, ForeignFilesystem { ops, user }) {
        Ok(session) => {
            *obj = Box::into_raw(Box::new(session)) as *mut c_void;
            0
        }
        Err(e) => {
            warn!("fusebridge_create({}) failed: {}", path.display(), e);
            e.code()
        }
    }
}

/// Unmounts and releases a session. Null is accepted and ignored.
///
/// # Safety
///
/// `obj` must be null or a live handle from [`fusebridge_create`]; it must
/// not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn fusebridge_delete(obj: *mut c_void) -> c_int {
    if !obj.is_null() {
        drop(Box::from_raw(obj as *mut Session));
    }
    0
}

/// Stores the session's readiness descriptor in `*fd`.
///
/// # Safety
///
/// `obj` must be null or a live handle; `fd` null or writable.
#[no_mangle]
pub unsafe extern "C" fn fusebridge_get_fd(obj: *mut c_void, fd: *mut c_int) -> c_int {
    let Some(session) = (obj as *const Session).as_ref() else {
        return ErrorKind::NoSession.code();
    };
    match session.fd() {
        Ok(raw) => {
            if let Some(out) = fd.as_mut() {
                *out = raw;
            }
            0
        }
        Err(e) => e.code(),
    }
}

/// Receives and dispatches at most one pending request.
///
/// # Safety
///
/// `obj` must be null or a live handle, and must not be used concurrently.
#[no_mangle]
pub unsafe extern "C" fn fusebridge_check_fds(obj: *mut c_void) -> c_int {
    let Some(session) = (obj as *mut Session).as_mut() else {
        return ErrorKind::NoSession.code();
    };
    to_code(session.pump())
}

/// Allocates a buffer vector of `count` empty descriptors; null for zero or
/// on allocation failure.
#[no_mangle]
pub extern "C" fn fusebridge_bufvec_create(count: size_t) -> *mut fuse_bufvec {
    bufvec::alloc_raw(count)
}

/// Copies `buf` into slot `index`. Not bounds checked.
///
/// # Safety
///
/// `vec` must come from [`fusebridge_bufvec_create`] and `index` must be
/// below the count it was created with.
#[no_mangle]
pub unsafe extern "C" fn fusebridge_bufvec_set(vec: *mut fuse_bufvec, index: size_t, buf: fuse_buf) {
    bufvec::set_raw(vec, index, buf);
}

/// Releases a buffer vector. Null is ignored.
///
/// # Safety
///
/// `vec` must be null or come from [`fusebridge_bufvec_create`].
#[no_mangle]
pub unsafe extern "C" fn fusebridge_bufvec_delete(vec: *mut fuse_bufvec) {
    bufvec::free_raw(vec);
}

/// Reads the seven flat fields of a native file info record. Null output
/// pointers are skipped.
///
/// # Safety
///
/// `fi` must point at a valid record; outputs must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn fusebridge_fi_decode(
    fi: *const fuse_file_info,
    flags: *mut i32,
    packed: *mut u32,
    fh: *mut u64,
    lock_owner: *mut u64,
    poll_events: *mut u32,
    backing_id: *mut i32,
    compat_flags: *mut u64,
) {
    let info = FileInfo::decode(&*fi);
    if let Some(out) = flags.as_mut() {
        *out = info.flags;
    }
    if let Some(out) = packed.as_mut() {
        *out = info.packed.bits();
    }
    if let Some(out) = fh.as_mut() {
        *out = info.fh;
    }
    if let Some(out) = lock_owner.as_mut() {
        *out = info.lock_owner;
    }
    if let Some(out) = poll_events.as_mut() {
        *out = info.poll_events;
    }
    if let Some(out) = backing_id.as_mut() {
        *out = info.backing_id;
    }
    if let Some(out) = compat_flags.as_mut() {
        *out = info.compat_flags;
    }
}

/// Allocates a native file info record from flat fields; null on
/// allocation failure. Bits 9-31 of `packed` are ignored.
#[no_mangle]
pub extern "C" fn fusebridge_fi_encode(
    flags: i32,
    packed: u32,
    fh: u64,
    lock_owner: u64,
    poll_events: u32,
    backing_id: i32,
    compat_flags: u64,
) -> *mut fuse_file_info {
    let info = FileInfo {
        flags,
        packed: FileInfoFlags::from_bits_truncate(packed),
        fh,
        lock_owner,
        poll_events,
        backing_id,
        compat_flags,
    };
    FileHandleState::encode(&info)
        .map(FileHandleState::into_raw)
        .unwrap_or(ptr::null_mut())
}

/// Releases a record from [`fusebridge_fi_encode`]. Null is ignored.
///
/// # Safety
///
/// `fi` must be null or come from [`fusebridge_fi_encode`].
#[no_mangle]
pub unsafe extern "C" fn fusebridge_fi_delete(fi: *mut fuse_file_info) {
    drop(FileHandleState::from_raw(fi));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_delete_null_session_is_ok() {
        assert_eq!(unsafe { fusebridge_delete(ptr::null_mut()) }, 0);
    }

    #[test]
    fn test_null_session_queries() {
        let mut fd: c_int = -1;
        assert_eq!(
            unsafe { fusebridge_get_fd(ptr::null_mut(), &mut fd) },
            ErrorKind::NoSession.code()
        );
        assert_eq!(fd, -1);
        assert_eq!(
            unsafe { fusebridge_check_fds(ptr::null_mut()) },
            ErrorKind::NoSession.code()
        );
    }

    #[test]
    fn test_create_on_missing_path() {
        let path = CString::new("/nonexistent/path").unwrap();
        let mut obj: *mut c_void = 0x1 as *mut c_void;
        let rc = unsafe { fusebridge_create(path.as_ptr(), ptr::null(), ptr::null_mut(), &mut obj) };
        assert_eq!(rc, ErrorKind::MountFailed.code());
        assert!(obj.is_null());
        assert_eq!(
            unsafe { fusebridge_get_fd(obj, ptr::null_mut()) },
            ErrorKind::NoSession.code()
        );
    }

    #[test]
    fn test_create_rejects_null_arguments() {
        let path = CString::new("/tmp").unwrap();
        let rc = unsafe {
            fusebridge_create(path.as_ptr(), ptr::null(), ptr::null_mut(), ptr::null_mut())
        };
        assert_eq!(rc, ErrorKind::NoSession.code());

        let mut obj: *mut c_void = ptr::null_mut();
        let rc = unsafe { fusebridge_create(ptr::null(), ptr::null(), ptr::null_mut(), &mut obj) };
        assert_eq!(rc, ErrorKind::MountFailed.code());
    }

    #[test]
    fn test_file_info_through_c_abi() {
        let packed = (FileInfoFlags::DIRECT_IO | FileInfoFlags::NONSEEKABLE).bits() | 0xffff_fe00;
        let fi = fusebridge_fi_encode(libc::O_RDONLY, packed, 77, 5, 1, -1, 9);
        assert!(!fi.is_null());

        let (mut flags, mut bits, mut fh, mut owner, mut events, mut backing, mut compat) =
            (0, 0, 0, 0, 0, 0, 0);
        unsafe {
            fusebridge_fi_decode(
                fi,
                &mut flags,
                &mut bits,
                &mut fh,
                &mut owner,
                &mut events,
                &mut backing,
                &mut compat,
            );
            fusebridge_fi_delete(fi);
            fusebridge_fi_delete(ptr::null_mut());
        }
        assert_eq!(flags, libc::O_RDONLY);
        assert_eq!(bits, (1 << 1) | (1 << 4));
        assert_eq!((fh, owner, events, backing, compat), (77, 5, 1, -1, 9));
    }

    #[test]
    fn test_decode_skips_null_outputs() {
        let fi = fusebridge_fi_encode(0, 1, 3, 0, 0, 0, 0);
        let mut fh = 0u64;
        unsafe {
            fusebridge_fi_decode(
                fi,
                ptr::null_mut(),
                ptr::null_mut(),
                &mut fh,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
            fusebridge_fi_delete(fi);
        }
        assert_eq!(fh, 3);
    }

    #[test]
    fn test_bufvec_through_c_abi() {
        assert!(fusebridge_bufvec_create(0).is_null());
        let vec = fusebridge_bufvec_create(5);
        assert!(!vec.is_null());
        let data = [1u8; 16];
        unsafe {
            for index in 0..4 {
                fusebridge_bufvec_set(
                    vec,
                    index,
                    fuse_buf {
                        size: index + 1,
                        ..fuse_buf::empty()
                    },
                );
            }
            fusebridge_bufvec_set(
                vec,
                4,
                fuse_buf {
                    size: data.len(),
                    mem: data.as_ptr() as *mut c_void,
                    ..fuse_buf::empty()
                },
            );
            let slots = ptr::addr_of!((*vec).buf) as *const fuse_buf;
            for index in 0..4 {
                assert_eq!((*slots.add(index)).size, index + 1);
            }
            assert_eq!((*slots.add(4)).size, 16);
            assert_eq!((*vec).count, 5);
            fusebridge_bufvec_delete(vec);
            fusebridge_bufvec_delete(ptr::null_mut());
        }
    }

    #[test]
    fn test_empty_foreign_table() {
        let ops = ForeignOps::default();
        assert!(ops.lookup.is_none());
        assert!(ops.statfs.is_none());
    }

    /// What a foreign callback saw.
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Call {
        op: &'static str,
        user: usize,
        req: usize,
        ino: u64,
        name: Option<Vec<u8>>,
        size: usize,
        offset: i64,
        mode: u32,
        data: Vec<u8>,
        info: Option<FileInfo>,
    }

    thread_local! {
        static CALLS: std::cell::RefCell<Vec<Call>> = const { std::cell::RefCell::new(Vec::new()) };
    }

    fn take_calls() -> Vec<Call> {
        CALLS.with(|calls| calls.take())
    }

    unsafe fn record(call: Call, fi: *mut fuse_file_info) {
        let info = fi.as_ref().map(FileInfo::decode);
        CALLS.with(|calls| calls.borrow_mut().push(Call { info, ..call }));
    }

    unsafe fn name_of(name: *const c_char) -> Option<Vec<u8>> {
        Some(CStr::from_ptr(name).to_bytes().to_vec())
    }

    unsafe extern "C" fn on_open(
        user: *mut c_void,
        req: fuse_req_t,
        ino: fuse_ino_t,
        fi: *mut fuse_file_info,
    ) {
        let call = Call {
            op: "open",
            user: user as usize,
            req: req as usize,
            ino,
            ..Default::default()
        };
        record(call, fi);
    }

    unsafe extern "C" fn on_getattr(
        user: *mut c_void,
        req: fuse_req_t,
        ino: fuse_ino_t,
        fi: *mut fuse_file_info,
    ) {
        let call = Call {
            op: "getattr",
            user: user as usize,
            req: req as usize,
            ino,
            ..Default::default()
        };
        record(call, fi);
    }

    unsafe extern "C" fn on_read(
        user: *mut c_void,
        req: fuse_req_t,
        ino: fuse_ino_t,
        size: size_t,
        offset: off_t,
        fi: *mut fuse_file_info,
    ) {
        let call = Call {
            op: "read",
            user: user as usize,
            req: req as usize,
            ino,
            size,
            offset: offset as i64,
            ..Default::default()
        };
        record(call, fi);
    }

    unsafe extern "C" fn on_write(
        user: *mut c_void,
        req: fuse_req_t,
        ino: fuse_ino_t,
        buf: *const c_char,
        size: size_t,
        offset: off_t,
        fi: *mut fuse_file_info,
    ) {
        let call = Call {
            op: "write",
            user: user as usize,
            req: req as usize,
            ino,
            size,
            offset: offset as i64,
            data: std::slice::from_raw_parts(buf as *const u8, size).to_vec(),
            ..Default::default()
        };
        record(call, fi);
    }

    unsafe extern "C" fn on_create(
        user: *mut c_void,
        req: fuse_req_t,
        parent: fuse_ino_t,
        name: *const c_char,
        mode: mode_t,
        fi: *mut fuse_file_info,
    ) {
        let call = Call {
            op: "create",
            user: user as usize,
            req: req as usize,
            ino: parent,
            name: name_of(name),
            mode: mode as u32,
            ..Default::default()
        };
        record(call, fi);
    }

    unsafe extern "C" fn on_lookup(
        user: *mut c_void,
        req: fuse_req_t,
        parent: fuse_ino_t,
        name: *const c_char,
    ) {
        let call = Call {
            op: "lookup",
            user: user as usize,
            req: req as usize,
            ino: parent,
            name: name_of(name),
            ..Default::default()
        };
        record(call, ptr::null_mut());
    }

    unsafe extern "C" fn on_setattr(
        user: *mut c_void,
        req: fuse_req_t,
        ino: fuse_ino_t,
        attr: *mut libc::stat,
        to_set: c_int,
        fi: *mut fuse_file_info,
    ) {
        let call = Call {
            op: "setattr",
            user: user as usize,
            req: req as usize,
            ino,
            size: (*attr).st_size as usize,
            mode: to_set as u32,
            ..Default::default()
        };
        // the record is a scratch copy; callers must not see this
        (*attr).st_size = 0;
        record(call, fi);
    }

    fn recording_fs(user: usize) -> ForeignFilesystem {
        ForeignFilesystem {
            ops: ForeignOps {
                lookup: Some(on_lookup),
                open: Some(on_open),
                read: Some(on_read),
                write: Some(on_write),
                create: Some(on_create),
                getattr: Some(on_getattr),
                setattr: Some(on_setattr),
                ..Default::default()
            },
            user: user as *mut c_void,
        }
    }

    // Present slots hand the request over with into_raw before any reply,
    // so a dangling handle never reaches libfuse.
    fn request(op: &'static str) -> (Request, usize) {
        let raw: fuse_req_t = ptr::NonNull::dangling().as_ptr();
        (unsafe { Request::from_raw(raw, op) }, raw as usize)
    }

    fn sample_info() -> FileInfo {
        FileInfo {
            flags: libc::O_RDWR | libc::O_APPEND,
            packed: FileInfoFlags::WRITEPAGE
                | FileInfoFlags::KEEP_CACHE
                | FileInfoFlags::PARALLEL_DIRECT_WRITES,
            fh: 0xfeed_beef,
            lock_owner: 12,
            poll_events: 3,
            backing_id: 4,
            compat_flags: 5,
        }
    }

    #[test]
    fn test_open_and_read_forward_user_and_file_info() {
        let mut fs = recording_fs(0xabc0);
        let info = sample_info();

        let (req, raw) = request("open");
        fs.open(req, 42, &info);
        let (req, _) = request("read");
        fs.read(req, 42, 4096, 8192, &info);

        let calls = take_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            Call {
                op: "open",
                user: 0xabc0,
                req: raw,
                ino: 42,
                info: Some(info),
                ..Default::default()
            }
        );
        assert_eq!(calls[1].op, "read");
        assert_eq!(calls[1].user, 0xabc0);
        assert_eq!((calls[1].size, calls[1].offset), (4096, 8192));
        assert_eq!(calls[1].info, Some(info));
    }

    #[test]
    fn test_write_forwards_data_and_offset() {
        let mut fs = recording_fs(7);
        let info = FileInfo::with_fh(libc::O_WRONLY, 99);

        let (req, _) = request("write");
        fs.write(req, 5, b"payload", 1 << 33, &info);

        let calls = take_calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!((call.op, call.user, call.ino), ("write", 7, 5));
        assert_eq!(call.data, b"payload");
        assert_eq!((call.size, call.offset), (7, 1 << 33));
        assert_eq!(call.info.map(|i| i.fh), Some(99));
    }

    #[test]
    fn test_create_and_lookup_forward_names() {
        let mut fs = recording_fs(1);
        let info = sample_info();

        let (req, _) = request("create");
        fs.create(req, 9, OsStr::new("new.txt"), libc::S_IFREG | 0o640, &info);
        let (req, _) = request("lookup");
        fs.lookup(req, 9, OsStr::new("new.txt"));

        let calls = take_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name.as_deref(), Some(&b"new.txt"[..]));
        assert_eq!((calls[0].ino, calls[0].mode), (9, libc::S_IFREG | 0o640));
        assert_eq!(calls[0].info, Some(info));
        assert_eq!(calls[1].op, "lookup");
        assert_eq!(calls[1].name.as_deref(), Some(&b"new.txt"[..]));
        assert_eq!(calls[1].info, None);
    }

    #[test]
    fn test_setattr_passes_a_private_copy() {
        let mut fs = recording_fs(2);
        let mut attr: libc::stat = unsafe { std::mem::zeroed() };
        attr.st_size = 1234;
        let to_set = crate::modules::sys::FUSE_SET_ATTR_SIZE;

        let (req, _) = request("setattr");
        fs.setattr(req, 11, &attr, to_set, Some(&FileInfo::with_fh(0, 6)));
        let (req, _) = request("setattr");
        fs.setattr(req, 11, &attr, to_set, None);

        let calls = take_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[0].ino, calls[0].size), (11, 1234));
        assert_eq!(calls[0].mode, to_set as u32);
        assert_eq!(calls[0].info.map(|i| i.fh), Some(6));
        assert_eq!(calls[1].info, None);
        assert_eq!(attr.st_size, 1234);
    }

    #[test]
    fn test_getattr_without_file_info_passes_null() {
        let mut fs = recording_fs(3);
        let (req, _) = request("getattr");
        fs.getattr(req, 1, None);
        let (req, _) = request("getattr");
        fs.getattr(req, 1, Some(&sample_info()));

        let calls = take_calls();
        assert_eq!(calls[0].info, None);
        assert_eq!(calls[1].info, Some(sample_info()));
    }
}
