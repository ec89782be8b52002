//! Tenant registry: tenant id → its [`TenantIndex`].
//!
//! Indexes are created on first request and cached for the life of the
//! process. Creating an entry touches no files; the index opens lazily.
//! All tenants share one [`Services`] bundle, so labeling calls from every
//! tenant draw on the same rate limiter.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::config::Config;
use crate::error::RagError;
use crate::tenant::{validate_tenant_id, IngestReport, Layout, Services, TenantIndex};

pub struct TenantRegistry {
    layout: Layout,
    services: Arc<Services>,
    tenants: Mutex<HashMap<String, Arc<TenantIndex>>>,
}

impl TenantRegistry {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_services(
            Layout::from_config(&config.storage),
            Arc::new(Services::from_config(config)?),
        ))
    }

    pub fn with_services(layout: Layout, services: Arc<Services>) -> Self {
        Self {
            layout,
            services,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// The cached index for `tenant_id`, created on first request.
    /// Concurrent first requests observe the same instance.
    pub fn get_or_create(&self, tenant_id: &str) -> Result<Arc<TenantIndex>, RagError> {
        validate_tenant_id(tenant_id)?;
        let mut tenants = self.tenants.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = tenants.get(tenant_id) {
            return Ok(index.clone());
        }
        let index = Arc::new(TenantIndex::new(
            tenant_id,
            self.layout.clone(),
            self.services.clone(),
        )?);
        tenants.insert(tenant_id.to_string(), index.clone());
        tracing::debug!(tenant = %tenant_id, "registered tenant");
        Ok(index)
    }

    /// Ingest `dir` into `tenant_id`'s index.
    pub async fn update_dataset(&self, tenant_id: &str, dir: &Path) -> Result<IngestReport> {
        let index = self.get_or_create(tenant_id)?;
        index.update_document_set(dir).await
    }

    /// Ids of every tenant seen by this registry, sorted.
    pub fn tenants(&self) -> Vec<String> {
        let tenants = self.tenants.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = tenants.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_in(root: &Path) -> TenantRegistry {
        let mut config = Config::rooted_at(root);
        config.storage.backend = "memory".to_string();
        TenantRegistry::new(&config).unwrap()
    }

    #[test]
    fn test_same_instance_per_tenant() {
        let tmp = TempDir::new().unwrap();
        let registry = registry_in(tmp.path());
        let a = registry.get_or_create("t1").unwrap();
        let b = registry.get_or_create("t1").unwrap();
        let c = registry.get_or_create("t2").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.tenants(), vec!["t1", "t2"]);
    }

    #[test]
    fn test_creation_touches_no_files() {
        let tmp = TempDir::new().unwrap();
        let registry = registry_in(tmp.path());
        let index = registry.get_or_create("quiet").unwrap();
        assert!(!index.is_open());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_rejects_bad_ids() {
        let tmp = TempDir::new().unwrap();
        let registry = registry_in(tmp.path());
        let err = registry.get_or_create("../t2").unwrap_err();
        assert!(matches!(err, RagError::InvalidTenantId { .. }));
        assert!(registry.tenants().is_empty());
    }

    #[test]
    fn test_concurrent_first_requests_share_instance() {
        let tmp = TempDir::new().unwrap();
        let registry = Arc::new(registry_in(tmp.path()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_create("shared").unwrap())
            })
            .collect();
        let indexes: Vec<Arc<TenantIndex>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(indexes.iter().all(|i| Arc::ptr_eq(i, &indexes[0])));
    }
}
