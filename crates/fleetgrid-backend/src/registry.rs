//! Per-project backend registry.

use std::collections::HashMap;
use std::sync::Arc;

use fleetgrid_state::BackendType;
use tracing::debug;

use crate::compute::Compute;

/// The backends configured for each project, in preference order.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    projects: HashMap<String, Vec<Arc<dyn Compute>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend to a project. A second backend of the same type
    /// replaces the first.
    pub fn register(&mut self, project: &str, compute: Arc<dyn Compute>) {
        let backend = compute.backend_type();
        let backends = self.projects.entry(project.to_string()).or_default();
        backends.retain(|c| c.backend_type() != backend);
        backends.push(compute);
        debug!(%project, %backend, "backend registered");
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_backend(mut self, project: &str, compute: Arc<dyn Compute>) -> Self {
        self.register(project, compute);
        self
    }

    pub fn get(&self, project: &str, backend: BackendType) -> Option<Arc<dyn Compute>> {
        self.projects
            .get(project)?
            .iter()
            .find(|c| c.backend_type() == backend)
            .cloned()
    }

    /// All backends of a project in registration (preference) order.
    pub fn project_backends(&self, project: &str) -> Vec<Arc<dyn Compute>> {
        self.projects.get(project).cloned().unwrap_or_default()
    }

    /// Backend types of a project in preference order.
    pub fn backend_order(&self, project: &str) -> Vec<BackendType> {
        self.project_backends(project)
            .iter()
            .map(|c| c.backend_type())
            .collect()
    }

    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.projects.keys().map(String::as_str)
    }
}
