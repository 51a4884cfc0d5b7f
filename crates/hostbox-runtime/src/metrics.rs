//! Resource metrics reported through the backend contract.
//!
//! hostbox does no resource accounting, so bulk metrics queries always come
//! back empty; this type exists so the contract has a concrete entry shape.

use hostbox_common::types::Handle;
use serde::{Deserialize, Serialize};

/// Resource usage of one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetrics {
    /// Container this snapshot belongs to.
    pub handle: Option<Handle>,
    /// CPU usage in nanoseconds.
    pub cpu_usage_ns: u64,
    /// Memory usage in bytes.
    pub memory_usage_bytes: u64,
    /// Disk usage of the container directory in bytes.
    pub disk_usage_bytes: u64,
}
