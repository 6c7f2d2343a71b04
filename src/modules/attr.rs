//! Attribute types exchanged with the session library.

use super::constants::{BLOCK_SIZE, MAX_NAME_LENGTH};
use super::sys;
use libc::c_int;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Kind of inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Directory.
    Directory,
    /// Regular file.
    RegularFile,
}

impl FileType {
    /// `S_IF*` bits for `st_mode`.
    pub fn mode_bits(self) -> libc::mode_t {
        match self {
            FileType::Directory => libc::S_IFDIR,
            FileType::RegularFile => libc::S_IFREG,
        }
    }
}

/// Attributes of one inode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileAttr {
    /// Inode number.
    pub ino: u64,
    /// Size in bytes.
    pub size: u64,
    /// Size in 512-byte blocks.
    pub blocks: u64,
    /// Last access.
    pub atime: SystemTime,
    /// Last modification.
    pub mtime: SystemTime,
    /// Last status change.
    pub ctime: SystemTime,
    /// Kind of inode.
    pub kind: FileType,
    /// Permission bits.
    pub perm: u16,
    /// Hard link count.
    pub nlink: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Device id for special files.
    pub rdev: u32,
    /// Preferred I/O block size.
    pub blksize: u32,
}

impl FileAttr {
    /// Recomputes `blocks` from `size`.
    pub fn set_size(&mut self, size: u64) {
        self.size = size;
        self.blocks = size.div_ceil(BLOCK_SIZE);
    }

    /// Native `struct stat`.
    pub fn to_stat(&self) -> libc::stat {
        // SAFETY: `stat` is plain old data; all-zero is a valid value.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        st.st_ino = self.ino as _;
        st.st_size = self.size as _;
        st.st_blocks = self.blocks as _;
        st.st_mode = self.kind.mode_bits() | self.perm as libc::mode_t;
        st.st_nlink = self.nlink as _;
        st.st_uid = self.uid;
        st.st_gid = self.gid;
        st.st_rdev = self.rdev as _;
        st.st_blksize = self.blksize as _;
        let (secs, nsecs) = unix_parts(self.atime);
        st.st_atime = secs as _;
        st.st_atime_nsec = nsecs as _;
        let (secs, nsecs) = unix_parts(self.mtime);
        st.st_mtime = secs as _;
        st.st_mtime_nsec = nsecs as _;
        let (secs, nsecs) = unix_parts(self.ctime);
        st.st_ctime = secs as _;
        st.st_ctime_nsec = nsecs as _;
        st
    }
}

/// Seconds and nanoseconds since the epoch; times before it collapse to zero.
pub fn unix_parts(time: SystemTime) -> (i64, i64) {
    time.duration_since(UNIX_EPOCH)
        .map(|d| (d.as_secs() as i64, d.subsec_nanos() as i64))
        .unwrap_or((0, 0))
}

/// Inverse of [`unix_parts`].
pub fn from_unix_parts(secs: i64, nsecs: i64) -> SystemTime {
    if secs < 0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::new(secs as u64, nsecs.clamp(0, 999_999_999) as u32)
}

/// Reply to lookup, mkdir and create.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    /// Attributes of the entry.
    pub attr: FileAttr,
    /// Generation number, bumped when an inode number is reused.
    pub generation: u64,
    /// How long the kernel may cache the attributes.
    pub attr_ttl: Duration,
    /// How long the kernel may cache the name.
    pub entry_ttl: Duration,
}

impl Entry {
    /// Entry with the same TTL for name and attributes.
    pub fn new(attr: FileAttr, ttl: Duration) -> Self {
        Self {
            attr,
            generation: 0,
            attr_ttl: ttl,
            entry_ttl: ttl,
        }
    }

    pub(crate) fn to_native(&self) -> sys::fuse_entry_param {
        sys::fuse_entry_param {
            ino: self.attr.ino,
            generation: self.generation,
            attr: self.attr.to_stat(),
            attr_timeout: self.attr_ttl.as_secs_f64(),
            entry_timeout: self.entry_ttl.as_secs_f64(),
        }
    }
}

/// Filesystem statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statfs {
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub bfree: u64,
    /// Free blocks available to unprivileged users.
    pub bavail: u64,
    /// Total inodes.
    pub files: u64,
    /// Free inodes.
    pub ffree: u64,
    /// Block size.
    pub bsize: u32,
    /// Maximum name length.
    pub namelen: u32,
    /// Fragment size.
    pub frsize: u32,
}

impl Default for Statfs {
    fn default() -> Self {
        Self {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: BLOCK_SIZE as u32,
            namelen: MAX_NAME_LENGTH,
            frsize: BLOCK_SIZE as u32,
        }
    }
}

impl Statfs {
    pub(crate) fn to_native(&self) -> libc::statvfs {
        // SAFETY: plain old data.
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        st.f_bsize = self.bsize as _;
        st.f_frsize = self.frsize as _;
        st.f_blocks = self.blocks as _;
        st.f_bfree = self.bfree as _;
        st.f_bavail = self.bavail as _;
        st.f_files = self.files as _;
        st.f_ffree = self.ffree as _;
        st.f_favail = self.ffree as _;
        st.f_namemax = self.namelen as _;
        st
    }
}

/// Target for a time attribute in setattr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOrNow {
    /// A specific point in time.
    At(SystemTime),
    /// The time the request is handled.
    Now,
}

/// The attributes a setattr request asks to change, decoded from the
/// `(struct stat, to_set)` pair libfuse passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttr {
    /// New permission and type bits.
    pub mode: Option<u32>,
    /// New owner.
    pub uid: Option<u32>,
    /// New group.
    pub gid: Option<u32>,
    /// New size.
    pub size: Option<u64>,
    /// New access time.
    pub atime: Option<TimeOrNow>,
    /// New modification time.
    pub mtime: Option<TimeOrNow>,
    /// New status change time.
    pub ctime: Option<SystemTime>,
}

impl SetAttr {
    /// Decodes the raw setattr arguments.
    pub fn from_raw(attr: &libc::stat, to_set: c_int) -> Self {
        let has = |bit: c_int| to_set & bit != 0;
        let time = |now_bit: c_int, bit: c_int, secs: i64, nsecs: i64| {
            if has(now_bit) {
                Some(TimeOrNow::Now)
            } else if has(bit) {
                Some(TimeOrNow::At(from_unix_parts(secs, nsecs)))
            } else {
                None
            }
        };
        Self {
            mode: has(sys::FUSE_SET_ATTR_MODE).then_some(attr.st_mode as u32),
            uid: has(sys::FUSE_SET_ATTR_UID).then_some(attr.st_uid),
            gid: has(sys::FUSE_SET_ATTR_GID).then_some(attr.st_gid),
            size: has(sys::FUSE_SET_ATTR_SIZE).then_some(attr.st_size as u64),
            atime: time(
                sys::FUSE_SET_ATTR_ATIME_NOW,
                sys::FUSE_SET_ATTR_ATIME,
                attr.st_atime as i64,
                attr.st_atime_nsec as i64,
            ),
            mtime: time(
                sys::FUSE_SET_ATTR_MTIME_NOW,
                sys::FUSE_SET_ATTR_MTIME,
                attr.st_mtime as i64,
                attr.st_mtime_nsec as i64,
            ),
            ctime: has(sys::FUSE_SET_ATTR_CTIME)
                .then(|| from_unix_parts(attr.st_ctime as i64, attr.st_ctime_nsec as i64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr() -> FileAttr {
        FileAttr {
            ino: 7,
            size: 0,
            blocks: 0,
            atime: UNIX_EPOCH + Duration::new(10, 5),
            mtime: UNIX_EPOCH + Duration::new(20, 6),
            ctime: UNIX_EPOCH + Duration::new(30, 7),
            kind: FileType::RegularFile,
            perm: 0o644,
            nlink: 1,
            uid: 1000,
            gid: 1000,
            rdev: 0,
            blksize: 512,
        }
    }

    #[test]
    fn test_to_stat() {
        let mut a = attr();
        a.set_size(513);
        let st = a.to_stat();
        assert_eq!(st.st_ino, 7);
        assert_eq!(st.st_size, 513);
        assert_eq!(st.st_blocks, 2);
        assert_eq!(st.st_mode, libc::S_IFREG | 0o644);
        assert_eq!(st.st_mtime, 20);
        assert_eq!(st.st_mtime_nsec, 6);
    }

    #[test]
    fn test_setattr_decoding() {
        let mut st = attr().to_stat();
        st.st_size = 99;
        st.st_mode = 0o600;
        let to_set = sys::FUSE_SET_ATTR_SIZE | sys::FUSE_SET_ATTR_MODE | sys::FUSE_SET_ATTR_ATIME_NOW
            | sys::FUSE_SET_ATTR_MTIME;
        let changes = SetAttr::from_raw(&st, to_set);
        assert_eq!(changes.size, Some(99));
        assert_eq!(changes.mode, Some(0o600));
        assert_eq!(changes.uid, None);
        assert_eq!(changes.atime, Some(TimeOrNow::Now));
        assert_eq!(
            changes.mtime,
            Some(TimeOrNow::At(UNIX_EPOCH + Duration::new(20, 6)))
        );
        assert_eq!(changes.ctime, None);
    }

    #[test]
    fn test_times_before_epoch_collapse() {
        assert_eq!(unix_parts(UNIX_EPOCH - Duration::from_secs(5)), (0, 0));
        assert_eq!(from_unix_parts(-3, 0), UNIX_EPOCH);
    }

    #[test]
    fn test_statfs_native() {
        let st = Statfs {
            blocks: 100,
            bfree: 40,
            files: 10,
            ffree: 3,
            ..Default::default()
        }
        .to_native();
        assert_eq!(st.f_blocks, 100);
        assert_eq!(st.f_bfree, 40);
        assert_eq!(st.f_favail, 3);
        assert_eq!(st.f_namemax, 255);
    }
}
