//! A complete in-memory filesystem.
//!
//! Files and directories live in an inode table rooted at [`ROOT_INODE`].
//! Every operation is implemented twice over: an inner method that returns
//! the result or an errno, and the [`Filesystem`] method that turns it into
//! a reply.

use super::attr::{Entry, FileAttr, FileType, SetAttr, Statfs, TimeOrNow};
use super::bufvec::BufferVector;
use super::constants::*;
use super::dispatch::Filesystem;
use super::file_info::FileInfo;
use super::reply::{DirectoryBuffer, Request};
use libc::{
    c_int, EBADF, EEXIST, EFBIG, EINVAL, EISDIR, ENAMETOOLONG, ENOENT, ENOMEM, ENOTDIR, ENOTEMPTY,
    O_ACCMODE, O_APPEND, O_RDONLY, O_TRUNC, O_WRONLY, RENAME_EXCHANGE, RENAME_NOREPLACE,
};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::ffi::{OsStr, OsString};
use std::path::{Component, Path};
use std::time::{Duration, SystemTime};

type Errno<T> = std::result::Result<T, c_int>;

// Advertised through statfs. Only the per-file size limit is enforced.
const CAPACITY_BLOCKS: u64 = 1 << 21;
const CAPACITY_INODES: u64 = 1 << 20;

/// Largest file the filesystem will hold.
const MAX_FILE_SIZE: u64 = CAPACITY_BLOCKS * BLOCK_SIZE;

#[derive(Debug, Clone)]
struct Node {
    attr: FileAttr,
    parent: u64,
    content: Vec<u8>,
    children: BTreeMap<OsString, u64>,
}

impl Node {
    fn is_dir(&self) -> bool {
        self.attr.kind == FileType::Directory
    }

    fn touch(&mut self, now: SystemTime) {
        self.attr.mtime = now;
        self.attr.ctime = now;
    }
}

#[derive(Debug, Clone, Copy)]
struct Handle {
    ino: u64,
    flags: i32,
}

impl Handle {
    fn readable(&self) -> bool {
        self.flags & O_ACCMODE != O_WRONLY
    }

    fn writable(&self) -> bool {
        self.flags & O_ACCMODE != O_RDONLY
    }
}

/// One entry of a directory listing: offset of the next entry, inode,
/// kind and name.
pub type DirEntry = (i64, u64, FileType, OsString);

/// In-memory filesystem.
#[derive(Debug)]
pub struct MemFs {
    nodes: HashMap<u64, Node>,
    handles: HashMap<u64, Handle>,
    next_inode: u64,
    next_fh: u64,
    ttl: Duration,
    uid: u32,
    gid: u32,
}

impl Default for MemFs {
    fn default() -> Self {
        let root = Node {
            attr: new_attr(ROOT_INODE, FileType::Directory, DEFAULT_PERMISSION, DEFAULT_UID, DEFAULT_GID),
            parent: ROOT_INODE,
            content: Vec::new(),
            children: BTreeMap::new(),
        };
        Self {
            nodes: HashMap::from([(ROOT_INODE, root)]),
            handles: HashMap::new(),
            next_inode: INITIAL_INODE,
            next_fh: 1,
            ttl: TTL,
            uid: DEFAULT_UID,
            gid: DEFAULT_GID,
        }
    }
}

fn new_attr(ino: u64, kind: FileType, perm: u16, uid: u32, gid: u32) -> FileAttr {
    let now = SystemTime::now();
    FileAttr {
        ino,
        size: 0,
        blocks: 0,
        atime: now,
        mtime: now,
        ctime: now,
        kind,
        perm,
        nlink: if kind == FileType::Directory { 2 } else { 1 },
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE as u32,
    }
}

/// Grows or shrinks `content` to `len` bytes, zero-filling new space.
/// Sizes past [`MAX_FILE_SIZE`] are EFBIG and a failed allocation is ENOMEM.
fn resize_content(content: &mut Vec<u8>, len: u64) -> Errno<()> {
    if len > MAX_FILE_SIZE {
        return Err(EFBIG);
    }
    let len = usize::try_from(len).map_err(|_| EFBIG)?;
    if len > content.len() {
        content
            .try_reserve_exact(len - content.len())
            .map_err(|_| ENOMEM)?;
    }
    content.resize(len, 0);
    Ok(())
}

fn resolve(time: TimeOrNow, now: SystemTime) -> SystemTime {
    match time {
        TimeOrNow::At(at) => at,
        TimeOrNow::Now => now,
    }
}

impl MemFs {
    /// Sets how long the kernel may cache names and attributes.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Owner of the root directory and of seeded files.
    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        if let Some(root) = self.nodes.get_mut(&ROOT_INODE) {
            root.attr.uid = uid;
            root.attr.gid = gid;
        }
        self
    }

    /// Creates a regular file at `path` relative to the root, along with any
    /// missing parent directories. An existing file is overwritten.
    pub fn seed_file<P: AsRef<Path>>(&mut self, path: P, content: &[u8]) -> Errno<u64> {
        let mut names = Vec::new();
        for component in path.as_ref().components() {
            match component {
                Component::Normal(name) => names.push(name),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => return Err(EINVAL),
            }
        }
        let Some((file, dirs)) = names.split_last() else {
            return Err(EINVAL);
        };

        let mut parent = ROOT_INODE;
        for dir in dirs {
            parent = match self.find(parent, dir) {
                Ok(ino) => ino,
                Err(ENOENT) => {
                    let perm = DEFAULT_PERMISSION;
                    self.make_node(parent, dir, FileType::Directory, perm, self.uid, self.gid)?
                        .ino
                }
                Err(e) => return Err(e),
            };
        }

        let ino = match self.find(parent, file) {
            Ok(ino) => ino,
            Err(ENOENT) => {
                let perm = DEFAULT_FILE_PERMISSION;
                self.make_node(parent, file, FileType::RegularFile, perm, self.uid, self.gid)?
                    .ino
            }
            Err(e) => return Err(e),
        };
        let node = self.node_mut(ino)?;
        if node.is_dir() {
            return Err(EISDIR);
        }
        let mut bytes = Vec::new();
        resize_content(&mut bytes, content.len() as u64)?;
        bytes.copy_from_slice(content);
        node.content = bytes;
        node.attr.set_size(content.len() as u64);
        debug!("Seeded {} ({} bytes)", path.as_ref().display(), content.len());
        Ok(ino)
    }

    fn node(&self, ino: u64) -> Errno<&Node> {
        self.nodes.get(&ino).ok_or(ENOENT)
    }

    fn node_mut(&mut self, ino: u64) -> Errno<&mut Node> {
        self.nodes.get_mut(&ino).ok_or(ENOENT)
    }

    fn dir(&self, ino: u64) -> Errno<&Node> {
        let node = self.node(ino)?;
        if !node.is_dir() {
            return Err(ENOTDIR);
        }
        Ok(node)
    }

    fn touch(&mut self, ino: u64) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.touch(SystemTime::now());
        }
    }

    fn find(&self, parent: u64, name: &OsStr) -> Errno<u64> {
        self.dir(parent)?.children.get(name).copied().ok_or(ENOENT)
    }

    fn attributes(&self, ino: u64) -> Errno<FileAttr> {
        Ok(self.node(ino)?.attr)
    }

    fn make_node(
        &mut self,
        parent: u64,
        name: &OsStr,
        kind: FileType,
        perm: u16,
        uid: u32,
        gid: u32,
    ) -> Errno<FileAttr> {
        if name.len() > MAX_NAME_LENGTH as usize {
            return Err(ENAMETOOLONG);
        }
        if self.dir(parent)?.children.contains_key(name) {
            return Err(EEXIST);
        }

        let ino = self.next_inode;
        self.next_inode += 1;
        let attr = new_attr(ino, kind, perm, uid, gid);
        self.nodes.insert(
            ino,
            Node {
                attr,
                parent,
                content: Vec::new(),
                children: BTreeMap::new(),
            },
        );

        let dir = self.node_mut(parent)?;
        dir.children.insert(name.to_owned(), ino);
        if kind == FileType::Directory {
            dir.attr.nlink += 1;
        }
        dir.touch(attr.ctime);
        debug!("Created {:?} {:?} as inode {} in {}", kind, name, ino, parent);
        Ok(attr)
    }

    // The inode disappears once its last link and last open handle are gone.
    fn drop_link(&mut self, ino: u64) {
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.attr.nlink = 0;
            node.attr.ctime = SystemTime::now();
        }
        if !self.handles.values().any(|h| h.ino == ino) {
            self.nodes.remove(&ino);
        }
    }

    fn remove_entry(&mut self, parent: u64, name: &OsStr, want_dir: bool) -> Errno<()> {
        let ino = self.find(parent, name)?;
        let node = self.node(ino)?;
        match (want_dir, node.is_dir()) {
            (true, false) => return Err(ENOTDIR),
            (false, true) => return Err(EISDIR),
            _ => {}
        }
        if node.is_dir() && !node.children.is_empty() {
            return Err(ENOTEMPTY);
        }

        let is_dir = node.is_dir();
        let dir = self.node_mut(parent)?;
        dir.children.remove(name);
        if is_dir {
            dir.attr.nlink -= 1;
        }
        dir.touch(SystemTime::now());
        self.drop_link(ino);
        debug!("Removed {:?} (inode {}) from {}", name, ino, parent);
        Ok(())
    }

    fn is_ancestor(&self, ancestor: u64, mut ino: u64) -> bool {
        loop {
            if ino == ancestor {
                return true;
            }
            if ino == ROOT_INODE {
                return false;
            }
            ino = match self.nodes.get(&ino) {
                Some(node) => node.parent,
                None => return false,
            };
        }
    }

    fn move_entry(
        &mut self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
    ) -> Errno<()> {
        if flags & RENAME_EXCHANGE != 0 {
            return Err(EINVAL);
        }
        if newname.len() > MAX_NAME_LENGTH as usize {
            return Err(ENAMETOOLONG);
        }
        let ino = self.find(parent, name)?;
        let target = self.dir(newparent)?.children.get(newname).copied();
        let moving_dir = self.node(ino)?.is_dir();
        if moving_dir && self.is_ancestor(ino, newparent) {
            return Err(EINVAL);
        }

        if let Some(target) = target {
            if flags & RENAME_NOREPLACE != 0 {
                return Err(EEXIST);
            }
            if target == ino {
                return Ok(());
            }
            let replaced = self.node(target)?;
            match (moving_dir, replaced.is_dir()) {
                (true, false) => return Err(ENOTDIR),
                (false, true) => return Err(EISDIR),
                _ => {}
            }
            if replaced.is_dir() && !replaced.children.is_empty() {
                return Err(ENOTEMPTY);
            }
            let dir = self.node_mut(newparent)?;
            dir.children.remove(newname);
            if moving_dir {
                dir.attr.nlink -= 1;
            }
            self.drop_link(target);
        }

        let now = SystemTime::now();
        let source = self.node_mut(parent)?;
        source.children.remove(name);
        if moving_dir {
            source.attr.nlink -= 1;
        }
        source.touch(now);
        let dest = self.node_mut(newparent)?;
        dest.children.insert(newname.to_owned(), ino);
        if moving_dir {
            dest.attr.nlink += 1;
        }
        dest.touch(now);
        let node = self.node_mut(ino)?;
        node.parent = newparent;
        node.attr.ctime = now;
        debug!(
            "Renamed {:?} in {} to {:?} in {}",
            name, parent, newname, newparent
        );
        Ok(())
    }

    fn set_attributes(&mut self, ino: u64, changes: &SetAttr) -> Errno<FileAttr> {
        let now = SystemTime::now();
        let node = self.node_mut(ino)?;
        if let Some(size) = changes.size {
            if node.is_dir() {
                return Err(EISDIR);
            }
            resize_content(&mut node.content, size)?;
            node.attr.set_size(size);
            node.attr.mtime = now;
        }
        if let Some(mode) = changes.mode {
            node.attr.perm = (mode & 0o7777) as u16;
        }
        if let Some(uid) = changes.uid {
            node.attr.uid = uid;
        }
        if let Some(gid) = changes.gid {
            node.attr.gid = gid;
        }
        if let Some(atime) = changes.atime {
            node.attr.atime = resolve(atime, now);
        }
        if let Some(mtime) = changes.mtime {
            node.attr.mtime = resolve(mtime, now);
        }
        node.attr.ctime = changes.ctime.unwrap_or(now);
        Ok(node.attr)
    }

    fn open_handle(&mut self, ino: u64, flags: i32, want_dir: bool) -> Errno<u64> {
        let node = self.node_mut(ino)?;
        match (want_dir, node.is_dir()) {
            (true, false) => return Err(ENOTDIR),
            (false, true) => return Err(EISDIR),
            _ => {}
        }
        let handle = Handle { ino, flags };
        if !want_dir && flags & O_TRUNC != 0 && handle.writable() {
            node.content.clear();
            node.attr.set_size(0);
            node.touch(SystemTime::now());
        }

        let fh = self.next_fh;
        self.next_fh += 1;
        self.handles.insert(fh, handle);
        Ok(fh)
    }

    fn close_handle(&mut self, fh: u64) -> Errno<()> {
        let handle = self.handles.remove(&fh).ok_or(EBADF)?;
        let unlinked = self
            .nodes
            .get(&handle.ino)
            .is_some_and(|node| node.attr.nlink == 0);
        if unlinked && !self.handles.values().any(|h| h.ino == handle.ino) {
            self.nodes.remove(&handle.ino);
        }
        Ok(())
    }

    fn handle(&self, ino: u64, fh: u64) -> Errno<Handle> {
        self.handles
            .get(&fh)
            .filter(|h| h.ino == ino)
            .copied()
            .ok_or(EBADF)
    }

    fn read_at(&self, ino: u64, fh: u64, offset: i64, size: usize) -> Errno<&[u8]> {
        if !self.handle(ino, fh)?.readable() {
            return Err(EBADF);
        }
        let node = self.node(ino)?;
        if node.is_dir() {
            return Err(EISDIR);
        }
        let len = node.content.len();
        let start = usize::try_from(offset).unwrap_or(0).min(len);
        let end = start.saturating_add(size).min(len);
        Ok(&node.content[start..end])
    }

    fn write_at(&mut self, ino: u64, fh: u64, offset: i64, data: &[u8]) -> Errno<usize> {
        let handle = self.handle(ino, fh)?;
        if !handle.writable() {
            return Err(EBADF);
        }
        let offset = usize::try_from(offset).map_err(|_| EINVAL)?;
        let node = self.node_mut(ino)?;
        let start = if handle.flags & O_APPEND != 0 {
            node.content.len()
        } else {
            offset
        };
        let end = start.checked_add(data.len()).ok_or(EFBIG)?;
        if node.content.len() < end {
            resize_content(&mut node.content, end as u64)?;
        }
        node.content[start..end].copy_from_slice(data);
        node.attr.set_size(node.content.len() as u64);
        node.touch(SystemTime::now());
        Ok(data.len())
    }

    fn entries(&self, ino: u64, offset: i64) -> Errno<Vec<DirEntry>> {
        let dir = self.dir(ino)?;
        let dots = [
            (ino, FileType::Directory, OsString::from(".")),
            (dir.parent, FileType::Directory, OsString::from("..")),
        ];
        let children = dir.children.iter().filter_map(|(name, child)| {
            let kind = self.nodes.get(child)?.attr.kind;
            Some((*child, kind, name.clone()))
        });
        Ok(dots
            .into_iter()
            .chain(children)
            .enumerate()
            .skip(usize::try_from(offset).unwrap_or(0))
            .map(|(i, (child, kind, name))| ((i + 1) as i64, child, kind, name))
            .collect())
    }

    fn statistics(&self) -> Statfs {
        let used: u64 = self.nodes.values().map(|node| node.attr.blocks).sum();
        let files = self.nodes.len() as u64;
        Statfs {
            blocks: CAPACITY_BLOCKS,
            bfree: CAPACITY_BLOCKS.saturating_sub(used),
            bavail: CAPACITY_BLOCKS.saturating_sub(used),
            files: CAPACITY_INODES,
            ffree: CAPACITY_INODES.saturating_sub(files),
            ..Default::default()
        }
    }
}

fn creation_perm(req: &Request, mode: u32) -> u16 {
    (mode & !req.caller().umask & 0o7777) as u16
}

impl Filesystem for MemFs {
    fn lookup(&mut self, req: Request, parent: u64, name: &OsStr) {
        match self.find(parent, name).and_then(|ino| self.attributes(ino)) {
            Ok(attr) => req.reply_entry(&Entry::new(attr, self.ttl)),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn getattr(&mut self, req: Request, ino: u64, _fi: Option<&FileInfo>) {
        match self.attributes(ino) {
            Ok(attr) => req.reply_attr(&attr, self.ttl),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn setattr(
        &mut self,
        req: Request,
        ino: u64,
        attr: &libc::stat,
        to_set: c_int,
        _fi: Option<&FileInfo>,
    ) {
        match self.set_attributes(ino, &SetAttr::from_raw(attr, to_set)) {
            Ok(attr) => req.reply_attr(&attr, self.ttl),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn mkdir(&mut self, req: Request, parent: u64, name: &OsStr, mode: u32) {
        let caller = req.caller();
        let perm = creation_perm(&req, mode);
        match self.make_node(parent, name, FileType::Directory, perm, caller.uid, caller.gid) {
            Ok(attr) => req.reply_entry(&Entry::new(attr, self.ttl)),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn rmdir(&mut self, req: Request, parent: u64, name: &OsStr) {
        match self.remove_entry(parent, name, true) {
            Ok(()) => req.reply_ok(),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn unlink(&mut self, req: Request, parent: u64, name: &OsStr) {
        match self.remove_entry(parent, name, false) {
            Ok(()) => req.reply_ok(),
            Err(errno) => req.reply_err(errno),
        }
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
        match self.move_entry(parent, name, newparent, newname, flags) {
            Ok(()) => req.reply_ok(),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn open(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        match self.open_handle(ino, fi.flags, false) {
            Ok(fh) => req.reply_open(&FileInfo { fh, ..*fi }),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn release(&mut self, req: Request, _ino: u64, fi: &FileInfo) {
        match self.close_handle(fi.fh) {
            Ok(()) => req.reply_ok(),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn read(&mut self, req: Request, ino: u64, size: usize, offset: i64, fi: &FileInfo) {
        match self.read_at(ino, fi.fh, offset, size) {
            Ok(data) => match BufferVector::from_slice(data) {
                Some(mut vec) => req.reply_data(&mut vec, 0),
                None => req.reply_buf(data),
            },
            Err(errno) => req.reply_err(errno),
        }
    }

    fn write(&mut self, req: Request, ino: u64, data: &[u8], offset: i64, fi: &FileInfo) {
        match self.write_at(ino, fi.fh, offset, data) {
            Ok(written) => req.reply_write(written),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn create(&mut self, req: Request, parent: u64, name: &OsStr, mode: u32, fi: &FileInfo) {
        let caller = req.caller();
        let perm = creation_perm(&req, mode);
        let created = self
            .make_node(parent, name, FileType::RegularFile, perm, caller.uid, caller.gid)
            .and_then(|attr| Ok((attr, self.open_handle(attr.ino, fi.flags, false)?)));
        match created {
            Ok((attr, fh)) => req.reply_create(&Entry::new(attr, self.ttl), &FileInfo { fh, ..*fi }),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn fsync(&mut self, req: Request, ino: u64, _datasync: bool, fi: &FileInfo) {
        match self.handle(ino, fi.fh) {
            Ok(_) => req.reply_ok(),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn opendir(&mut self, req: Request, ino: u64, fi: &FileInfo) {
        match self.open_handle(ino, fi.flags, true) {
            Ok(fh) => req.reply_open(&FileInfo { fh, ..*fi }),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn readdir(&mut self, req: Request, ino: u64, size: usize, offset: i64, _fi: &FileInfo) {
        let entries = match self.entries(ino, offset) {
            Ok(entries) => entries,
            Err(errno) => return req.reply_err(errno),
        };
        let mut listing = DirectoryBuffer::new(size);
        for (next, child, kind, name) in entries {
            if listing.add(&req, child, next, kind, &name) {
                break;
            }
        }
        req.reply_dir(&listing);
    }

    fn releasedir(&mut self, req: Request, _ino: u64, fi: &FileInfo) {
        match self.close_handle(fi.fh) {
            Ok(()) => req.reply_ok(),
            Err(errno) => req.reply_err(errno),
        }
    }

    fn statfs(&mut self, req: Request, _ino: u64) {
        req.reply_statfs(&self.statistics());
    }
}
