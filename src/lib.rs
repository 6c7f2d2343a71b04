#![doc(html_root_url = "https://docs.rs/fusebridge/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! fusebridge: a non-blocking adapter over the libfuse3 low-level API
//!
//! libfuse normally owns the thread that serves a mount. fusebridge inverts
//! that: it exposes the session descriptor so a host event loop can wait on
//! it, and a single-shot `pump` that receives and dispatches one request.
//! Filesystems are written in Rust against the [`Filesystem`] trait, or in
//! any other language through the C ABI in [`modules::capi`].
//!
//! ## Features
//!
//! - Mount and unmount with scoped, single-owner lifetimes
//! - One readiness descriptor per session, non-blocking receive
//! - Seventeen low-level operations forwarded to a handler
//! - Flat encoding of `fuse_file_info` and its nine packed flags
//! - Scatter/gather buffer vectors for read replies
//! - An in-memory filesystem and a tokio driver
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fusebridge::{reactor, MemFs, Session};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let mut fs = MemFs::default();
//! fs.seed_file("hello.txt", b"Hello, World!\n")
//!     .map_err(std::io::Error::from_raw_os_error)?;
//!
//! let mut session = Session::create("/tmp/mnt", fs)?;
//! reactor::drive(&mut session, tokio::signal::ctrl_c()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error codes
//!
//! Every fallible call returns an [`ErrorKind`]; across the C ABI it is an
//! integer from 1 (`AllocationFailed`) to 7 (`NoSession`), with 0 for
//! success.

pub mod modules;

pub use modules::dispatch::Filesystem;
pub use modules::error::{ErrorKind, Result};
pub use modules::memfs::MemFs;
pub use modules::reactor;
pub use modules::session::Session;

// Re-export commonly used types
pub use modules::attr::{Entry, FileAttr, FileType, SetAttr, Statfs, TimeOrNow};
pub use modules::bufvec::{BufDescriptor, BufferVector};
pub use modules::file_info::{FileHandleState, FileInfo, FileInfoFlags};
pub use modules::reply::{Caller, DirectoryBuffer, Request};
