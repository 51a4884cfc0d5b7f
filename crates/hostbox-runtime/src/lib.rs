//! Container lifecycle management for the hostbox backend.
//!
//! [`HostBackend`](backend::host::HostBackend) is the registry: it admits,
//! tracks, looks up, and destroys containers. Each
//! [`Container`](container::Container) owns a working directory on the host
//! and the processes started inside it, and moves file trees in and out as
//! tar streams.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod container;
pub mod handle;
pub mod metrics;
pub mod process;
pub mod stream;
mod sync;
