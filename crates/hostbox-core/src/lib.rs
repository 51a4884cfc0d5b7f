//! # hostbox-core
//!
//! Host-level primitives used by the hostbox container runtime.
//!
//! hostbox does not isolate containers; instead this crate provides the
//! small set of OS interactions the runtime needs:
//! - **Identity**: resolving an OS user, re-owning a directory tree, and
//!   configuring a child process to run under that user.
//! - **Paths**: confining caller-supplied relative paths to a container directory.
//! - **Signals**: delivering termination signals to a process group.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod identity;
pub mod paths;
pub mod signal;
