//! Container backend contract.

pub mod host;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hostbox_common::error::Result;
use hostbox_common::types::{Capacity, Properties};

use crate::container::{Container, ContainerInfo, ContainerSpec};
use crate::metrics::ContainerMetrics;

pub use host::HostBackend;

/// The container API a backend implements.
///
/// Front ends (RPC servers, CLIs) drive containers exclusively through
/// this trait; containers themselves are operated on directly once
/// obtained from [`create`](Self::create) or [`lookup`](Self::lookup).
pub trait ContainerBackend: Send + Sync {
    /// Prepares the backend for use. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if backend storage cannot be created.
    fn start(&self) -> Result<()>;

    /// Destroys every container.
    ///
    /// # Errors
    ///
    /// Returns a `Shutdown` error listing each container that could not be
    /// destroyed; the others are still torn down.
    fn stop(&self) -> Result<()>;

    /// Health check.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unusable.
    fn ping(&self) -> Result<()>;

    /// Returns the admission ceiling.
    fn capacity(&self) -> Capacity;

    /// Creates a container.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionDenied` at capacity, `InvalidHandle` or
    /// `HandleTaken` for unusable handles, and I/O errors from storage.
    fn create(&self, spec: ContainerSpec) -> Result<Arc<Container>>;

    /// Destroys a container. Unknown handles are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the container's processes cannot be stopped or
    /// its directory cannot be removed.
    fn destroy(&self, handle: &str) -> Result<()>;

    /// Returns the containers whose properties include every pair in `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot enumerate its containers.
    fn containers(&self, filter: &Properties) -> Result<Vec<Arc<Container>>>;

    /// Returns the container with the given handle.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such container exists.
    fn lookup(&self, handle: &str) -> Result<Arc<Container>>;

    /// Returns the grace time of `container`.
    fn grace_time(&self, container: &Container) -> Duration;

    /// Returns info for several containers at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot answer.
    fn bulk_info(&self, handles: &[String]) -> Result<HashMap<String, ContainerInfo>>;

    /// Returns metrics for several containers at once.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot answer.
    fn bulk_metrics(&self, handles: &[String]) -> Result<HashMap<String, ContainerMetrics>>;
}
