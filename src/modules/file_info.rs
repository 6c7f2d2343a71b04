//! Per-open-file state and its translation to and from `fuse_file_info`.
//!
//! The native record carries nine single-bit fields. Code on the other side
//! of the boundary cannot declare C bitfields, so the record is exposed as
//! seven flat scalars where the nine booleans are packed into one `u32`:
//!
//! | bit | flag                     |
//! |-----|--------------------------|
//! | 0   | `writepage`              |
//! | 1   | `direct_io`              |
//! | 2   | `keep_cache`             |
//! | 3   | `flush`                  |
//! | 4   | `nonseekable`            |
//! | 5   | `flock_release`          |
//! | 6   | `cache_readdir`          |
//! | 7   | `noflush`                |
//! | 8   | `parallel_direct_writes` |
//!
//! Bits 9-31 are always written as zero and ignored when read. The order is
//! part of this crate's API and does not depend on how a given compiler lays
//! out the native struct.

use super::sys::fuse_file_info;
use std::alloc::{alloc_zeroed, Layout};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::ptr::NonNull;

/// The nine packed per-file booleans.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FileInfoFlags(u32);

impl FileInfoFlags {
    /// Page cache write-back request (`writepage`).
    pub const WRITEPAGE: Self = Self(1 << 0);
    /// Bypass the page cache (`direct_io`).
    pub const DIRECT_IO: Self = Self(1 << 1);
    /// Keep previously cached data on open (`keep_cache`).
    pub const KEEP_CACHE: Self = Self(1 << 2);
    /// Flush is being issued on close (`flush`).
    pub const FLUSH: Self = Self(1 << 3);
    /// File is not seekable (`nonseekable`).
    pub const NONSEEKABLE: Self = Self(1 << 4);
    /// Release was triggered by dropping a flock (`flock_release`).
    pub const FLOCK_RELEASE: Self = Self(1 << 5);
    /// Allow caching of directory listings (`cache_readdir`).
    pub const CACHE_READDIR: Self = Self(1 << 6);
    /// Do not send flush on close (`noflush`).
    pub const NOFLUSH: Self = Self(1 << 7);
    /// Allow concurrent direct writes on the same inode (`parallel_direct_writes`).
    pub const PARALLEL_DIRECT_WRITES: Self = Self(1 << 8);

    /// Mask of all defined bits.
    pub const ALL: Self = Self(0x1ff);

    const NAMES: [(Self, &'static str); 9] = [
        (Self::WRITEPAGE, "WRITEPAGE"),
        (Self::DIRECT_IO, "DIRECT_IO"),
        (Self::KEEP_CACHE, "KEEP_CACHE"),
        (Self::FLUSH, "FLUSH"),
        (Self::NONSEEKABLE, "NONSEEKABLE"),
        (Self::FLOCK_RELEASE, "FLOCK_RELEASE"),
        (Self::CACHE_READDIR, "CACHE_READDIR"),
        (Self::NOFLUSH, "NOFLUSH"),
        (Self::PARALLEL_DIRECT_WRITES, "PARALLEL_DIRECT_WRITES"),
    ];

    /// No flags set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The packed representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds a flag set, dropping undefined bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags in `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the flags in `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Sets or clears `other` depending on `value`.
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for FileInfoFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FileInfoFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for FileInfoFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "FileInfoFlags({})", names.join(" | "))
    }
}

// Position of each packed flag inside the native bitfield word, in
// declaration order of `struct fuse_file_info`.
const NATIVE_BITS: [(FileInfoFlags, u32); 9] = [
    (FileInfoFlags::WRITEPAGE, 0),
    (FileInfoFlags::DIRECT_IO, 1),
    (FileInfoFlags::KEEP_CACHE, 2),
    (FileInfoFlags::FLUSH, 3),
    (FileInfoFlags::NONSEEKABLE, 4),
    (FileInfoFlags::FLOCK_RELEASE, 5),
    (FileInfoFlags::CACHE_READDIR, 6),
    (FileInfoFlags::NOFLUSH, 7),
    (FileInfoFlags::PARALLEL_DIRECT_WRITES, 8),
];

impl fuse_file_info {
    fn native_bit(&self, shift: u32) -> bool {
        (self.bits >> shift) & 1 == 1
    }

    fn set_native_bit(&mut self, shift: u32, value: bool) {
        if value {
            self.bits |= 1 << shift;
        } else {
            self.bits &= !(1 << shift);
        }
    }
}

/// Flat form of `fuse_file_info`: seven fixed-width scalars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Open flags (`O_RDONLY`, `O_APPEND`, ...).
    pub flags: i32,
    /// The nine packed booleans.
    pub packed: FileInfoFlags,
    /// Handle value chosen by the filesystem on open/create/opendir.
    pub fh: u64,
    /// Lock owner id.
    pub lock_owner: u64,
    /// Requested poll events.
    pub poll_events: u32,
    /// Passthrough backing file id, `-1` when there is none.
    pub backing_id: i32,
    /// Compatibility flags.
    pub compat_flags: u64,
}

impl FileInfo {
    /// A record carrying only open flags and a handle value.
    pub fn with_fh(flags: i32, fh: u64) -> Self {
        Self {
            flags,
            fh,
            ..Default::default()
        }
    }

    /// Reads the flat fields out of a native record.
    pub fn decode(native: &fuse_file_info) -> Self {
        let mut packed = FileInfoFlags::empty();
        for (flag, shift) in NATIVE_BITS {
            packed.set(flag, native.native_bit(shift));
        }
        Self {
            flags: native.flags,
            packed,
            fh: native.fh,
            lock_owner: native.lock_owner,
            poll_events: native.poll_events,
            backing_id: native.backing_id,
            compat_flags: native.compat_flags,
        }
    }

    /// Builds a native record. Padding and reserved words are zero.
    pub fn to_native(&self) -> fuse_file_info {
        let mut native = fuse_file_info {
            flags: self.flags,
            fh: self.fh,
            lock_owner: self.lock_owner,
            poll_events: self.poll_events,
            backing_id: self.backing_id,
            compat_flags: self.compat_flags,
            ..Default::default()
        };
        for (flag, shift) in NATIVE_BITS {
            native.set_native_bit(shift, self.packed.contains(flag));
        }
        native
    }
}

/// A heap-allocated native `fuse_file_info`.
///
/// This is the record handed across the boundary by pointer. It is released
/// exactly once, either by dropping it or through [`FileHandleState::from_raw`]
/// for a pointer previously produced by [`FileHandleState::into_raw`].
pub struct FileHandleState(NonNull<fuse_file_info>);

impl FileHandleState {
    /// Allocates a native record from flat fields.
    ///
    /// Returns `None` if the allocation fails.
    pub fn encode(info: &FileInfo) -> Option<Self> {
        let layout = Layout::new::<fuse_file_info>();
        // SAFETY: the layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) } as *mut fuse_file_info;
        let ptr = NonNull::new(ptr)?;
        // SAFETY: freshly allocated, properly aligned and sized for the type.
        unsafe { ptr.as_ptr().write(info.to_native()) };
        Some(Self(ptr))
    }

    /// Reads the flat fields back.
    pub fn decode(&self) -> FileInfo {
        FileInfo::decode(self.native())
    }

    /// The native record.
    pub fn native(&self) -> &fuse_file_info {
        // SAFETY: owned, initialised allocation.
        unsafe { self.0.as_ref() }
    }

    /// Mutable access to the native record.
    pub fn native_mut(&mut self) -> &mut fuse_file_info {
        // SAFETY: owned, initialised allocation; `&mut self` is exclusive.
        unsafe { self.0.as_mut() }
    }

    /// Pointer for passing to libfuse; valid while `self` lives.
    pub fn as_ptr(&self) -> *const fuse_file_info {
        self.0.as_ptr()
    }

    /// Gives up ownership.
    pub fn into_raw(self) -> *mut fuse_file_info {
        let ptr = self.0.as_ptr();
        std::mem::forget(self);
        ptr
    }

    /// Takes ownership of a pointer produced by [`FileHandleState::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `into_raw` and must not have been released yet.
    pub unsafe fn from_raw(ptr: *mut fuse_file_info) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }
}

impl Drop for FileHandleState {
    fn drop(&mut self) {
        // SAFETY: allocated in `encode` with the global allocator and the
        // layout of the type, which is exactly what `Box` expects.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

impl fmt::Debug for FileHandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileHandleState").field(&self.decode()).finish()
    }
}
