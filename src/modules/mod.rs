//! Core bridge modules.
//!
//! This module provides the main components of the bridge:
//!
//! - `sys`: raw libfuse3 declarations
//! - `session`: session lifecycle and the single-shot receive loop
//! - `dispatch`: the operation table and the `Filesystem` contract
//! - `reply`: requests and reply primitives
//! - `file_info`, `bufvec`, `attr`: typed views of the native records
//! - `capi`: the C ABI for filesystems written in other languages
//! - `memfs`: an in-memory filesystem
//! - `reactor`: driving a session from tokio
//! - `config`: settings for the binary

pub mod attr;
pub mod bufvec;
pub mod capi;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod file_info;
pub mod memfs;
pub mod reactor;
pub mod reply;
pub mod session;
pub mod sys;
