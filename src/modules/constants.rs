//! Filesystem constants and default values.

use std::ffi::CStr;
use std::time::Duration;

// File system constants
/// How long the kernel may cache names and attributes.
pub const TTL: Duration = Duration::from_secs(1);
/// Unit of `st_blocks` and the advertised block size.
pub const BLOCK_SIZE: u64 = 512;
/// Permission bits of directories created without an explicit mode.
pub const DEFAULT_PERMISSION: u16 = 0o755;
/// Permission bits of seeded files.
pub const DEFAULT_FILE_PERMISSION: u16 = 0o644;
/// Inode of the mount root, fixed by the kernel protocol.
pub const ROOT_INODE: u64 = 1;
/// First inode handed out after the root.
pub const INITIAL_INODE: u64 = 2;
/// Longest accepted file name, in bytes.
pub const MAX_NAME_LENGTH: u32 = 255;

// User and group IDs
/// Owner of the root directory unless overridden.
pub const DEFAULT_UID: u32 = 501;
/// Group of the root directory unless overridden.
pub const DEFAULT_GID: u32 = 20;

/// argv[0] handed to libfuse's option parser, which rejects an empty argv.
pub const PROGRAM_NAME: &CStr = c"fusebridge";
