//! Session lifecycle and the non-blocking receive loop.
//!
//! A [`Session`] is one mounted filesystem. Instead of running libfuse's
//! blocking dispatch loop it exposes the session descriptor so that a host
//! event loop can wait on it, and a single-shot [`Session::pump`] that
//! receives and dispatches at most one request.

use super::constants::PROGRAM_NAME;
use super::dispatch::{self, Filesystem, Userdata};
use super::error::{ErrorKind, Result};
use super::sys;
use libc::{c_void, EAGAIN, EINTR, ENOENT};
use log::{debug, error, info};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::ffi::CString;
use std::fmt;
use std::mem::size_of;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use uuid::Uuid;

/// One mounted filesystem.
///
/// Owns the mount arguments, the operation table, the libfuse session and a
/// receive buffer reused for every request. Dropping the session unmounts it
/// and releases everything in reverse order of acquisition.
///
/// Sessions are neither `Send` nor `Sync`: requests are dispatched on the
/// thread that calls [`Session::pump`], and the receive buffer is mutated in
/// place.
///
/// # Example
///
/// ```no_run
/// use fusebridge::{MemFs, Session};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut session = Session::create("/tmp/mnt", MemFs::default())?;
/// let fd = session.fd()?;
/// // wait until `fd` is readable, then:
/// let _ = session.pump();
/// # Ok(())
/// # }
/// ```
pub struct Session {
    id: Uuid,
    mountpoint: PathBuf,
    args: sys::fuse_args,
    ops: sys::fuse_lowlevel_ops,
    se: *mut sys::fuse_session,
    mounted: bool,
    buf: sys::fuse_buf,
    userdata: *mut Userdata,
}

impl Session {
    /// Creates a session for `filesystem` and mounts it at `mountpoint`.
    ///
    /// On success the mount is visible system-wide until the session is
    /// dropped. Every failure releases whatever was acquired before it.
    ///
    /// # Errors
    ///
    /// * `AllocationFailed` if the argument vector could not be built
    /// * `SessionCreateFailed` if libfuse refused to create the session
    /// * `MountFailed` if mounting failed or the descriptor could not be
    ///   made non-blocking
    pub fn create<P, FS>(mountpoint: P, filesystem: FS) -> Result<Session>
    where
        P: AsRef<Path>,
        FS: Filesystem + 'static,
    {
        let userdata: Box<Userdata> = Box::new(Box::new(filesystem));
        let mut session = Session {
            id: Uuid::new_v4(),
            mountpoint: mountpoint.as_ref().to_path_buf(),
            args: sys::fuse_args::empty(),
            ops: dispatch::operations(),
            se: ptr::null_mut(),
            mounted: false,
            buf: sys::fuse_buf::empty(),
            userdata: Box::into_raw(userdata),
        };

        // SAFETY: `args` is a valid, initially empty argument vector.
        if unsafe { sys::fuse_opt_add_arg(&mut session.args, PROGRAM_NAME.as_ptr()) } != 0 {
            error!("Session {}: failed to build mount arguments", session.id);
            return Err(ErrorKind::AllocationFailed);
        }

        // SAFETY: the table is fully populated and libfuse copies it; the
        // userdata pointer stays valid until `drop` destroys the session.
        session.se = unsafe {
            sys::fuse_session_new(
                &mut session.args,
                &session.ops,
                size_of::<sys::fuse_lowlevel_ops>(),
                session.userdata as *mut c_void,
            )
        };
        if session.se.is_null() {
            error!("Session {}: fuse_session_new failed", session.id);
            return Err(ErrorKind::SessionCreateFailed);
        }

        let Ok(c_mountpoint) = CString::new(session.mountpoint.as_os_str().as_bytes()) else {
            error!(
                "Session {}: mountpoint {:?} contains a NUL byte",
                session.id, session.mountpoint
            );
            return Err(ErrorKind::MountFailed);
        };
        // SAFETY: live session and NUL-terminated path.
        if unsafe { sys::fuse_session_mount(session.se, c_mountpoint.as_ptr()) } != 0 {
            error!(
                "Session {}: failed to mount at {}",
                session.id,
                session.mountpoint.display()
            );
            return Err(ErrorKind::MountFailed);
        }
        session.mounted = true;

        let fd = session.fd().map_err(|_| ErrorKind::MountFailed)?;
        if let Err(e) = set_nonblocking(fd) {
            error!("Session {}: cannot make fd {} non-blocking: {}", session.id, fd, e);
            return Err(ErrorKind::MountFailed);
        }

        info!(
            "Session {} mounted at {} (fd {})",
            session.id,
            session.mountpoint.display(),
            fd
        );
        Ok(session)
    }

    /// Unmounts and releases the session. Equivalent to dropping it.
    pub fn delete(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    /// Receives and dispatches at most one pending request.
    ///
    /// The matching [`Filesystem`] method runs synchronously inside this
    /// call. Never blocks and never retries.
    ///
    /// # Errors
    ///
    /// * `NoDataAvailable` if nothing was pending (including zero-length
    ///   receives, interrupted reads and requests the kernel already
    ///   aborted)
    /// * `ReceiveFailed` for any other transport error
    pub fn pump(&mut self) -> Result<()> {
        // SAFETY: live session; `buf` is owned by us and only ever handed to
        // libfuse's receive primitive, which (re)allocates `buf.mem`.
        let size = unsafe { sys::fuse_session_receive_buf(self.se, &mut self.buf) };
        match size {
            n if n > 0 => {
                debug!("Session {}: received {} bytes", self.id, n);
                // SAFETY: `buf` now holds one complete request.
                unsafe { sys::fuse_session_process_buf(self.se, &self.buf) };
                Ok(())
            }
            0 => Err(ErrorKind::NoDataAvailable),
            n => match -n {
                EAGAIN | EINTR | ENOENT => Err(ErrorKind::NoDataAvailable),
                errno => {
                    debug!("Session {}: receive failed with errno {}", self.id, errno);
                    Err(ErrorKind::ReceiveFailed(errno))
                }
            },
        }
    }

    /// The descriptor to wait on for readability before calling `pump`.
    ///
    /// # Errors
    ///
    /// `DescriptorUnavailable` if libfuse reports no descriptor.
    pub fn fd(&self) -> Result<RawFd> {
        // SAFETY: `se` is non-null for every constructed session.
        let fd = unsafe { sys::fuse_session_fd(self.se) };
        if fd < 0 {
            return Err(ErrorKind::DescriptorUnavailable);
        }
        Ok(fd)
    }

    /// Whether libfuse considers the session finished, e.g. because the
    /// filesystem was unmounted from outside. Such a session only ever
    /// reports `NoDataAvailable`.
    pub fn exited(&self) -> bool {
        // SAFETY: live session.
        unsafe { sys::fuse_session_exited(self.se) != 0 }
    }

    /// Identifier used in log records.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Where the filesystem is mounted.
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // SAFETY: every pointer below was produced during `create` and is
        // released exactly once, in reverse order of acquisition.
        unsafe {
            if !self.se.is_null() {
                if self.mounted {
                    sys::fuse_session_unmount(self.se);
                    info!(
                        "Session {} unmounted from {}",
                        self.id,
                        self.mountpoint.display()
                    );
                }
                sys::fuse_session_destroy(self.se);
                self.se = ptr::null_mut();
            }
            libc::free(self.buf.mem);
            self.buf = sys::fuse_buf::empty();
            sys::fuse_opt_free_args(&mut self.args);
            drop(Box::from_raw(self.userdata));
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("mountpoint", &self.mountpoint)
            .field("mounted", &self.mounted)
            .finish()
    }
}

pub(crate) fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}
