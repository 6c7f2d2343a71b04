//! Scatter/gather buffer vectors for read and write payloads.
//!
//! A `fuse_bufvec` is a header followed by `count` inline `fuse_buf`
//! descriptors. The C declaration only reserves room for one, so vectors of
//! more than one element are allocated with trailing space and addressed
//! through raw pointers.

use super::sys::{fuse_buf, fuse_bufvec, FUSE_BUF_FD_SEEK, FUSE_BUF_IS_FD};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr::{self, NonNull};

fn layout_for(count: usize) -> Option<Layout> {
    let trailing = count.checked_sub(1)?;
    let size = trailing
        .checked_mul(size_of::<fuse_buf>())?
        .checked_add(size_of::<fuse_bufvec>())?;
    Layout::from_size_align(size, align_of::<fuse_bufvec>()).ok()
}

unsafe fn slot(vec: *mut fuse_bufvec, index: usize) -> *mut fuse_buf {
    (ptr::addr_of_mut!((*vec).buf) as *mut fuse_buf).add(index)
}

/// Allocates a vector with `count` empty descriptors.
///
/// Returns null for `count == 0` and on allocation failure.
pub(crate) fn alloc_raw(count: usize) -> *mut fuse_bufvec {
    let Some(layout) = layout_for(count) else {
        return ptr::null_mut();
    };
    // SAFETY: the layout always covers at least the header.
    let vec = unsafe { alloc_zeroed(layout) } as *mut fuse_bufvec;
    if vec.is_null() {
        return vec;
    }
    // SAFETY: `vec` points at `layout.size()` writable bytes, enough for the
    // header and `count` descriptors.
    unsafe {
        (*vec).count = count;
        for index in 0..count {
            slot(vec, index).write(fuse_buf::empty());
        }
    }
    vec
}

/// Overwrites descriptor `index` without bounds checking.
///
/// # Safety
///
/// `vec` must come from [`alloc_raw`] and `index` must be below its count.
pub(crate) unsafe fn set_raw(vec: *mut fuse_bufvec, index: usize, buf: fuse_buf) {
    slot(vec, index).write(buf);
}

/// Frees a vector from [`alloc_raw`]. Null is ignored.
///
/// # Safety
///
/// `vec` must be null or come from [`alloc_raw`] with its `count` untouched,
/// and must not be used afterwards.
pub(crate) unsafe fn free_raw(vec: *mut fuse_bufvec) {
    if vec.is_null() {
        return;
    }
    if let Some(layout) = layout_for((*vec).count) {
        dealloc(vec as *mut u8, layout);
    }
}

/// One segment of a transfer.
#[derive(Debug, Clone, Copy)]
pub enum BufDescriptor<'a> {
    /// Bytes in memory.
    Memory(&'a [u8]),
    /// `size` bytes read from (or written to) a file descriptor, either at
    /// the descriptor's current offset or at an explicit position.
    Fd {
        /// Source or sink descriptor.
        fd: BorrowedFd<'a>,
        /// Number of bytes.
        size: usize,
        /// Explicit offset; sets `FUSE_BUF_FD_SEEK` when present.
        pos: Option<i64>,
    },
}

impl BufDescriptor<'_> {
    fn to_native(self) -> fuse_buf {
        match self {
            BufDescriptor::Memory(bytes) => fuse_buf {
                size: bytes.len(),
                mem: bytes.as_ptr() as *mut libc::c_void,
                ..fuse_buf::empty()
            },
            BufDescriptor::Fd { fd, size, pos } => fuse_buf {
                size,
                flags: FUSE_BUF_IS_FD | if pos.is_some() { FUSE_BUF_FD_SEEK } else { 0 },
                fd: fd.as_raw_fd(),
                pos: pos.unwrap_or(0) as libc::off_t,
                ..fuse_buf::empty()
            },
        }
    }
}

/// An owned `fuse_bufvec` with a capacity fixed at creation.
///
/// Memory descriptors borrow their bytes for `'a`, so the vector cannot
/// outlive the data it points at.
pub struct BufferVector<'a> {
    vec: NonNull<fuse_bufvec>,
    count: usize,
    _data: PhantomData<&'a [u8]>,
}

impl<'a> BufferVector<'a> {
    /// Allocates `count` empty descriptors.
    ///
    /// `None` for a zero count or when allocation fails; the two are not
    /// distinguished.
    pub fn create(count: usize) -> Option<Self> {
        NonNull::new(alloc_raw(count)).map(|vec| Self {
            vec,
            count,
            _data: PhantomData,
        })
    }

    /// Single memory segment.
    pub fn from_slice(bytes: &'a [u8]) -> Option<Self> {
        let mut vec = Self::create(1)?;
        vec.set(0, BufDescriptor::Memory(bytes));
        Some(vec)
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Always false: a vector holds at least one descriptor.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Overwrites descriptor `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn set(&mut self, index: usize, desc: BufDescriptor<'a>) {
        assert!(
            index < self.count,
            "buffer index {} out of range for vector of {}",
            index,
            self.count
        );
        // SAFETY: bounds checked above.
        unsafe { set_raw(self.vec.as_ptr(), index, desc.to_native()) };
    }

    /// Descriptor at `index`.
    pub fn get(&self, index: usize) -> Option<&fuse_buf> {
        if index >= self.count {
            return None;
        }
        // SAFETY: in bounds and initialised by `alloc_raw`.
        Some(unsafe { &*slot(self.vec.as_ptr(), index) })
    }

    /// Total payload size over all descriptors.
    pub fn total_size(&self) -> usize {
        (0..self.count)
            .filter_map(|index| self.get(index))
            .map(|buf| buf.size)
            .sum()
    }

    /// Pointer for the session library's copy/splice primitives.
    pub fn as_mut_ptr(&mut self) -> *mut fuse_bufvec {
        self.vec.as_ptr()
    }
}

impl Drop for BufferVector<'_> {
    fn drop(&mut self) {
        // SAFETY: allocated by `alloc_raw` and `count` is never changed by us.
        unsafe { free_raw(self.vec.as_ptr()) };
    }
}

impl std::fmt::Debug for BufferVector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries((0..self.count).filter_map(|index| self.get(index)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs::File;
    use std::os::fd::AsFd;

    #[test]
    fn test_zero_count_is_none() {
        assert!(BufferVector::create(0).is_none());
        assert!(alloc_raw(0).is_null());
    }

    #[test]
    fn test_single_and_multi_element_capacity() {
        let one = BufferVector::create(1).unwrap();
        let five = BufferVector::create(5).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(five.len(), 5);
        assert!(!one.is_empty());
        assert!(one.get(1).is_none());
        assert!(five.get(4).is_some());
        assert_eq!(layout_for(1).unwrap().size(), size_of::<fuse_bufvec>());
        assert_eq!(
            layout_for(5).unwrap().size(),
            size_of::<fuse_bufvec>() + 4 * size_of::<fuse_buf>()
        );
    }

    #[test]
    fn test_fresh_descriptors_are_empty() {
        let vec = BufferVector::create(3).unwrap();
        for index in 0..3 {
            let buf = vec.get(index).unwrap();
            assert_eq!(buf.size, 0);
            assert!(buf.mem.is_null());
            assert_eq!(buf.fd, -1);
        }
        assert_eq!(vec.total_size(), 0);
    }

    #[test]
    fn test_set_last_index_leaves_others_alone() {
        let chunks: [&[u8]; 5] = [b"a", b"bb", b"ccc", b"dddd", b"eeeee"];
        let mut vec = BufferVector::create(5).unwrap();
        for (index, chunk) in chunks.iter().enumerate().take(4) {
            vec.set(index, BufDescriptor::Memory(*chunk));
        }
        let before: Vec<(usize, usize)> = (0..4)
            .map(|i| {
                let buf = vec.get(i).unwrap();
                (buf.size, buf.mem as usize)
            })
            .collect();

        vec.set(4, BufDescriptor::Memory(chunks[4]));

        for (index, expected) in before.iter().enumerate() {
            let buf = vec.get(index).unwrap();
            assert_eq!((buf.size, buf.mem as usize), *expected);
        }
        assert_eq!(vec.get(4).unwrap().size, 5);
        assert_eq!(vec.total_size(), 15);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_set_out_of_range_panics() {
        let mut vec = BufferVector::create(2).unwrap();
        vec.set(2, BufDescriptor::Memory(b"x"));
    }

    #[test]
    fn test_fd_descriptor_flags() -> Result<()> {
        let file = File::open("/dev/null")?;
        let mut vec = BufferVector::create(2).unwrap();
        vec.set(
            0,
            BufDescriptor::Fd {
                fd: file.as_fd(),
                size: 4096,
                pos: Some(8192),
            },
        );
        vec.set(
            1,
            BufDescriptor::Fd {
                fd: file.as_fd(),
                size: 10,
                pos: None,
            },
        );

        let seek = vec.get(0).unwrap();
        assert_eq!(seek.flags, FUSE_BUF_IS_FD | FUSE_BUF_FD_SEEK);
        assert_eq!(seek.fd, file.as_raw_fd());
        assert_eq!(seek.pos, 8192);

        let stream = vec.get(1).unwrap();
        assert_eq!(stream.flags, FUSE_BUF_IS_FD);
        Ok(())
    }

    #[test]
    fn test_raw_vector_keeps_count_in_header() {
        let raw = alloc_raw(3);
        assert!(!raw.is_null());
        unsafe {
            assert_eq!((*raw).count, 3);
            assert_eq!((*raw).idx, 0);
            assert_eq!((*raw).off, 0);
            set_raw(raw, 2, fuse_buf { size: 7, ..fuse_buf::empty() });
            assert_eq!((*slot(raw, 2)).size, 7);
            free_raw(raw);
            free_raw(ptr::null_mut());
        }
    }
}
