//! Host backend: containers are plain directories on this machine.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use hostbox_common::config::HostboxConfig;
use hostbox_common::error::{HostboxError, Result};
use hostbox_common::types::{Capacity, Handle, Properties};
use hostbox_core::identity::{self, IdentitySwitcher};

use super::ContainerBackend;
use crate::container::{Container, ContainerInfo, ContainerSpec};
use crate::handle::HandleGenerator;
use crate::metrics::ContainerMetrics;
use crate::sync::{read, write};

/// Registry of containers hosted under a single directory.
#[derive(Debug)]
pub struct HostBackend {
    config: HostboxConfig,
    containers: RwLock<HashMap<String, Arc<Container>>>,
    handles: HandleGenerator,
    switcher: Arc<dyn IdentitySwitcher>,
}

impl HostBackend {
    /// Creates a backend using the platform's identity switcher.
    #[must_use]
    pub fn new(config: HostboxConfig) -> Self {
        Self::with_switcher(config, identity::host_switcher())
    }

    /// Creates a backend with an explicit identity switcher.
    #[must_use]
    pub fn with_switcher(config: HostboxConfig, switcher: Arc<dyn IdentitySwitcher>) -> Self {
        Self {
            config,
            containers: RwLock::new(HashMap::new()),
            handles: HandleGenerator::seeded_from_clock(),
            switcher,
        }
    }

    /// Directory holding one subdirectory per container.
    #[must_use]
    pub fn containers_dir(&self) -> &Path {
        &self.config.containers_dir
    }

    /// Number of registered containers, active or not.
    pub fn len(&self) -> usize {
        read(&self.containers).len()
    }

    /// Whether no container is registered.
    pub fn is_empty(&self) -> bool {
        read(&self.containers).is_empty()
    }
}

impl ContainerBackend for HostBackend {
    fn start(&self) -> Result<()> {
        let dir = self.containers_dir();
        std::fs::create_dir_all(dir).map_err(|e| HostboxError::io(dir, e))?;
        tracing::info!(dir = %dir.display(), "backend started");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let handles: Vec<String> = read(&self.containers).keys().cloned().collect();
        let mut failures = Vec::new();
        for handle in handles {
            if let Err(e) = self.destroy(&handle) {
                tracing::warn!(handle = %handle, error = %e, "failed to destroy container");
                failures.push((handle, e));
            }
        }
        if failures.is_empty() {
            tracing::info!("backend stopped");
            Ok(())
        } else {
            Err(HostboxError::Shutdown { failures })
        }
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn capacity(&self) -> Capacity {
        Capacity {
            max_active: self.config.max_active_containers,
        }
    }

    fn create(&self, spec: ContainerSpec) -> Result<Arc<Container>> {
        let mut containers = write(&self.containers);

        let active = containers.values().filter(|c| c.is_active()).count();
        let max = self.config.max_active_containers;
        if active >= max {
            tracing::warn!(active, max, "container refused: at capacity");
            return Err(HostboxError::AdmissionDenied { active, max });
        }

        let handle = match spec.handle {
            Some(requested) => Handle::parse(requested)?,
            None => self.handles.generate(),
        };
        if containers.contains_key(handle.as_str()) {
            return Err(HostboxError::HandleTaken {
                handle: handle.to_string(),
            });
        }

        let work_dir = self.config.containers_dir.join(handle.as_str());
        std::fs::create_dir_all(&work_dir).map_err(|e| HostboxError::io(&work_dir, e))?;

        let container = Arc::new(Container::new(
            handle.clone(),
            work_dir,
            spec.properties,
            spec.grace_time.unwrap_or(self.config.default_grace_time),
            self.config.stop_timeout,
            Arc::clone(&self.switcher),
        ));
        let _ = containers.insert(handle.to_string(), Arc::clone(&container));
        tracing::info!(handle = %handle, dir = %container.work_dir().display(), "container created");
        Ok(container)
    }

    fn destroy(&self, handle: &str) -> Result<()> {
        let mut containers = write(&self.containers);
        let Some(container) = containers.get(handle).cloned() else {
            return Ok(());
        };

        container.shut_down()?;
        match std::fs::remove_dir_all(container.work_dir()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(HostboxError::io(container.work_dir(), e)),
        }
        container.mark_destroyed();
        let _ = containers.remove(handle);
        tracing::info!(handle, "container destroyed");
        Ok(())
    }

    fn containers(&self, filter: &Properties) -> Result<Vec<Arc<Container>>> {
        let containers = read(&self.containers);
        Ok(containers
            .values()
            .filter(|c| {
                let properties = c.properties();
                filter
                    .iter()
                    .all(|(key, value)| properties.get(key) == Some(value))
            })
            .cloned()
            .collect())
    }

    fn lookup(&self, handle: &str) -> Result<Arc<Container>> {
        read(&self.containers)
            .get(handle)
            .cloned()
            .ok_or_else(|| HostboxError::NotFound {
                kind: "container",
                id: handle.to_string(),
            })
    }

    fn grace_time(&self, container: &Container) -> Duration {
        container.current_grace_time()
    }

    fn bulk_info(&self, _handles: &[String]) -> Result<HashMap<String, ContainerInfo>> {
        Ok(HashMap::new())
    }

    fn bulk_metrics(&self, _handles: &[String]) -> Result<HashMap<String, ContainerMetrics>> {
        Ok(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(root: &Path, max: usize) -> HostBackend {
        let mut config = HostboxConfig::with_containers_dir(root.join("containers"));
        config.max_active_containers = max;
        let backend = HostBackend::new(config);
        backend.start().expect("start");
        backend
    }

    #[test]
    fn start_creates_containers_dir_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let b = backend(dir.path(), 1);
        assert!(b.containers_dir().is_dir());
        b.start().expect("second start");
        b.ping().expect("ping");
    }

    #[test]
    fn create_uses_requested_handle_and_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let b = backend(dir.path(), 1);
        let c = b
            .create(ContainerSpec {
                handle: Some("web".into()),
                ..ContainerSpec::default()
            })
            .expect("create");
        assert_eq!(c.handle().as_str(), "web");
        assert_eq!(c.work_dir(), b.containers_dir().join("web"));
        assert!(c.work_dir().is_dir());
    }

    #[test]
    fn create_generates_fixed_width_handles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let b = backend(dir.path(), 4);
        let c = b.create(ContainerSpec::default()).expect("create");
        assert_eq!(c.handle().as_str().len(), 11);
    }

    #[test]
    fn create_rejects_bad_and_duplicate_handles() {
        let dir = tempfile::tempdir().expect("tempdir");
        let b = backend(dir.path(), 4);
        let spec = |h: &str| ContainerSpec {
            handle: Some(h.into()),
            ..ContainerSpec::default()
        };

        assert!(matches!(
            b.create(spec("../escape")).unwrap_err(),
            HostboxError::InvalidHandle { .. }
        ));
        let _ = b.create(spec("one")).expect("create");
        assert!(matches!(
            b.create(spec("one")).unwrap_err(),
            HostboxError::HandleTaken { .. }
        ));
    }

    #[test]
    fn grace_time_defaults_from_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let b = backend(dir.path(), 2);
        let default = b.create(ContainerSpec::default()).expect("create");
        assert_eq!(b.grace_time(&default), Duration::from_secs(300));

        let custom = b
            .create(ContainerSpec {
                grace_time: Some(Duration::from_secs(5)),
                ..ContainerSpec::default()
            })
            .expect("create");
        assert_eq!(b.grace_time(&custom), Duration::from_secs(5));
    }

    #[test]
    fn capacity_reports_configured_ceiling() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(backend(dir.path(), 1).capacity().max_active, 1);
        assert_eq!(backend(dir.path(), 3).capacity().max_active, 3);
    }

    #[test]
    fn destroy_removes_directory_and_entry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let b = backend(dir.path(), 1);
        let c = b.create(ContainerSpec::default()).expect("create");
        let handle = c.handle().to_string();
        std::fs::write(c.work_dir().join("file"), "x").expect("write");

        b.destroy(&handle).expect("destroy");
        assert!(!c.work_dir().exists());
        assert!(b.is_empty());
        assert_eq!(c.state(), hostbox_common::types::ContainerState::Destroyed);
        b.destroy(&handle).expect("destroy again");
    }

    #[test]
    fn bulk_queries_are_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let b = backend(dir.path(), 1);
        let c = b.create(ContainerSpec::default()).expect("create");
        let handles = vec![c.handle().to_string()];
        assert!(b.bulk_info(&handles).expect("info").is_empty());
        assert!(b.bulk_metrics(&handles).expect("metrics").is_empty());
    }

    #[test]
    fn stop_destroys_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let b = backend(dir.path(), 3);
        for _ in 0..3 {
            let _ = b.create(ContainerSpec::default()).expect("create");
        }
        assert_eq!(b.len(), 3);
        b.stop().expect("stop");
        assert!(b.is_empty());
        assert_eq!(
            std::fs::read_dir(b.containers_dir()).expect("read_dir").count(),
            0
        );
    }
}
