//! Instance record store
//!
//! Owns every mutation of registration state. Service groups are kept in
//! registration order and disappear together with their cursor as soon as
//! their last instance is removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::error::{RegistryError, RegistryResult};
use super::selector;

// ============================================================================
// Instance Record
// ============================================================================

/// One registered, addressable endpoint of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Logical service group the instance belongs to
    pub name: String,

    /// Base address of the instance; identity key within the group
    pub url: String,

    /// Display label, unique within the group
    pub instance_id: String,

    /// When the instance first registered
    pub registered_at: DateTime<Utc>,

    /// Refreshed on every (re-)registration
    pub last_seen: DateTime<Utc>,

    /// Last known liveness state
    pub healthy: bool,

    /// Store-assigned sequence number; a url registered anew gets a new one
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl InstanceRecord {
    /// Create a fresh, healthy record
    pub fn new(name: impl Into<String>, url: impl Into<String>, instance_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            url: url.into(),
            instance_id: instance_id.into(),
            registered_at: now,
            last_seen: now,
            healthy: true,
            generation: 0,
        }
    }

    /// Refresh after a repeated registration
    pub fn refresh(&mut self) {
        self.last_seen = Utc::now();
        self.healthy = true;
    }
}

// ============================================================================
// Service Group
// ============================================================================

/// Ordered instances sharing a service name, plus the round-robin cursor
#[derive(Debug, Clone, Default)]
pub struct ServiceGroup {
    pub(super) instances: Vec<InstanceRecord>,
    pub(super) cursor: usize,
    next_ordinal: usize,
}

impl ServiceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances in registration order
    pub fn instances(&self) -> &[InstanceRecord] {
        &self.instances
    }

    /// Current round-robin cursor
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Number of instances currently eligible for selection
    pub fn healthy_count(&self) -> usize {
        self.instances.iter().filter(|i| i.healthy).count()
    }

    /// Append a record, keeping `url` unique
    pub fn push(&mut self, record: InstanceRecord) {
        match self.position(&record.url) {
            Some(index) => self.instances[index] = record,
            None => self.instances.push(record),
        }
    }

    fn position(&self, url: &str) -> Option<usize> {
        self.instances.iter().position(|i| i.url == url)
    }

    fn find_mut(&mut self, url: &str) -> Option<&mut InstanceRecord> {
        self.instances.iter_mut().find(|i| i.url == url)
    }

    fn has_instance_id(&self, instance_id: &str) -> bool {
        self.instances.iter().any(|i| i.instance_id == instance_id)
    }

    /// Next `<name>-<n>` label not already used in this group
    fn generate_instance_id(&mut self, name: &str) -> String {
        let mut ordinal = self.next_ordinal.max(self.instances.len());
        loop {
            let candidate = format!("{name}-{ordinal}");
            ordinal += 1;
            if !self.has_instance_id(&candidate) {
                self.next_ordinal = ordinal;
                return candidate;
            }
        }
    }
}

// ============================================================================
// Store Types
// ============================================================================

/// Outcome of an upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Identifier of the new or refreshed record
    pub instance_id: String,

    /// False when an existing record was refreshed in place
    pub created: bool,
}

/// An instance the health checker should probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub service: String,
    pub instance_id: String,
    pub url: String,
    generation: u64,
}

/// Point-in-time counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub services: usize,
    pub instances: usize,
    pub healthy: usize,
}

// ============================================================================
// Instance Store
// ============================================================================

/// In-memory registry of service groups
///
/// All operations take the store lock for their whole read-modify-write
/// sequence, so each call is atomic with respect to every other call.
#[derive(Debug, Default)]
pub struct InstanceStore {
    groups: RwLock<HashMap<String, ServiceGroup>>,
    next_generation: AtomicU64,
}

impl InstanceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance, or refresh it if its `url` is already known
    pub async fn upsert(&self, name: &str, url: &str, instance_id: Option<String>) -> Registration {
        let mut groups = self.groups.write().await;
        let group = groups.entry(name.to_string()).or_default();

        if let Some(existing) = group.find_mut(url) {
            existing.refresh();
            tracing::debug!(service = %name, url = %url, instance_id = %existing.instance_id, "Instance refreshed");
            return Registration {
                instance_id: existing.instance_id.clone(),
                created: false,
            };
        }

        // Supplied ids must not shadow another record's id
        let instance_id = match instance_id {
            Some(id) if !group.has_instance_id(&id) => id,
            Some(requested) => {
                let assigned = group.generate_instance_id(name);
                tracing::warn!(
                    service = %name,
                    url = %url,
                    requested = %requested,
                    assigned = %assigned,
                    "Requested instance id already in use"
                );
                assigned
            }
            None => group.generate_instance_id(name),
        };

        let mut record = InstanceRecord::new(name, url, instance_id.clone());
        record.generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        group.push(record);

        tracing::info!(service = %name, url = %url, instance_id = %instance_id, "Instance registered");

        Registration {
            instance_id,
            created: true,
        }
    }

    /// Remove one instance; drops the group when it becomes empty
    pub async fn remove_instance(&self, name: &str, url: &str) -> bool {
        let mut groups = self.groups.write().await;

        let Some(group) = groups.get_mut(name) else {
            return false;
        };
        let Some(index) = group.position(url) else {
            return false;
        };

        let removed = group.instances.remove(index);
        tracing::info!(service = %name, url = %url, instance_id = %removed.instance_id, "Instance unregistered");

        if group.is_empty() {
            groups.remove(name);
            tracing::info!(service = %name, "Service group removed");
        }
        true
    }

    /// Remove a whole service group
    pub async fn remove_all(&self, name: &str) -> bool {
        let removed = self.groups.write().await.remove(name);
        if let Some(group) = &removed {
            tracing::info!(service = %name, instances = group.len(), "Service group unregistered");
        }
        removed.is_some()
    }

    /// Snapshot of every group, keyed by service name
    pub async fn list_all(&self) -> BTreeMap<String, Vec<InstanceRecord>> {
        self.groups
            .read()
            .await
            .iter()
            .map(|(name, group)| (name.clone(), group.instances.clone()))
            .collect()
    }

    /// Snapshot of one group's instances
    pub async fn instances(&self, name: &str) -> Option<Vec<InstanceRecord>> {
        self.groups.read().await.get(name).map(|g| g.instances.clone())
    }

    /// Set the health flag of one record
    ///
    /// Returns the previous flag, or `None` when the record is gone.
    pub async fn set_health(&self, name: &str, url: &str, healthy: bool) -> Option<bool> {
        let mut groups = self.groups.write().await;
        let record = groups.get_mut(name)?.find_mut(url)?;
        Some(std::mem::replace(&mut record.healthy, healthy))
    }

    /// Set the health flag of the record a probe target was taken from
    ///
    /// Returns `None` when that record is gone, including when its url was
    /// unregistered and registered again after the snapshot.
    pub async fn set_health_for(&self, target: &ProbeTarget, healthy: bool) -> Option<bool> {
        let mut groups = self.groups.write().await;
        let record = groups.get_mut(&target.service)?.find_mut(&target.url)?;
        if record.generation != target.generation {
            return None;
        }
        Some(std::mem::replace(&mut record.healthy, healthy))
    }

    /// Pick the next healthy instance of a service in round-robin order
    pub async fn select(&self, name: &str) -> RegistryResult<InstanceRecord> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(name)
            .ok_or_else(|| RegistryError::not_found(name))?;

        selector::next_healthy(group).ok_or_else(|| RegistryError::NoHealthyInstances {
            service: name.to_string(),
        })
    }

    /// Every (service, url) pair currently registered
    pub async fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.groups
            .read()
            .await
            .iter()
            .flat_map(|(service, group)| {
                group.instances.iter().map(move |i| ProbeTarget {
                    service: service.clone(),
                    instance_id: i.instance_id.clone(),
                    url: i.url.clone(),
                    generation: i.generation,
                })
            })
            .collect()
    }

    /// Whether a service group exists
    pub async fn contains(&self, name: &str) -> bool {
        self.groups.read().await.contains_key(name)
    }

    /// Current counts across all groups
    pub async fn stats(&self) -> StoreStats {
        let groups = self.groups.read().await;
        StoreStats {
            services: groups.len(),
            instances: groups.values().map(ServiceGroup::len).sum(),
            healthy: groups.values().map(ServiceGroup::healthy_count).sum(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const SERVICE: &str = "ingestion-service";

    #[tokio::test]
    async fn test_upsert_creates_group() {
        let store = InstanceStore::new();

        let registration = store.upsert(SERVICE, "http://a:5001", None).await;
        assert!(registration.created);
        assert_eq!(registration.instance_id, "ingestion-service-0");

        let instances = store.instances(SERVICE).await.unwrap();
        assert_eq!(instances.len(), 1);
        assert!(instances[0].healthy);
        assert_eq!(instances[0].url, "http://a:5001");
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = InstanceStore::new();

        let first = store.upsert(SERVICE, "http://a:5001", None).await;
        let second = store.upsert(SERVICE, "http://a:5001", Some("other".to_string())).await;

        assert_eq!(first.instance_id, second.instance_id);
        assert!(!second.created);
        assert_eq!(store.instances(SERVICE).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_refresh_resets_health() {
        let store = InstanceStore::new();
        store.upsert(SERVICE, "http://a:5001", None).await;
        store.set_health(SERVICE, "http://a:5001", false).await;

        let before = store.instances(SERVICE).await.unwrap()[0].last_seen;
        store.upsert(SERVICE, "http://a:5001", None).await;

        let record = &store.instances(SERVICE).await.unwrap()[0];
        assert!(record.healthy);
        assert!(record.last_seen >= before);
    }

    #[tokio::test]
    async fn test_supplied_instance_id() {
        let store = InstanceStore::new();
        let registration = store
            .upsert(SERVICE, "http://a:5001", Some("ingest-primary".to_string()))
            .await;
        assert_eq!(registration.instance_id, "ingest-primary");
    }

    #[tokio::test]
    async fn test_supplied_id_colliding_with_generated_id() {
        let store = InstanceStore::new();
        store.upsert(SERVICE, "http://a:5001", None).await;

        let registration = store
            .upsert(SERVICE, "http://b:5001", Some("ingestion-service-0".to_string()))
            .await;

        assert!(registration.created);
        assert_eq!(registration.instance_id, "ingestion-service-1");
    }

    #[tokio::test]
    async fn test_supplied_id_colliding_with_supplied_id() {
        let store = InstanceStore::new();
        let first = store
            .upsert(SERVICE, "http://c:5001", Some("dup".to_string()))
            .await;
        let second = store
            .upsert(SERVICE, "http://d:5001", Some("dup".to_string()))
            .await;

        assert_eq!(first.instance_id, "dup");
        assert_ne!(second.instance_id, "dup");

        let ids: HashSet<_> = store
            .instances(SERVICE)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.instance_id)
            .collect();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_supplied_ids_unique_across_mixed_registrations() {
        let store = InstanceStore::new();
        store.upsert(SERVICE, "http://a:5001", None).await;
        store.upsert(SERVICE, "http://b:5001", Some("ingestion-service-0".to_string())).await;
        store.upsert(SERVICE, "http://c:5001", Some("dup".to_string())).await;
        store.upsert(SERVICE, "http://d:5001", Some("dup".to_string())).await;

        let instances = store.instances(SERVICE).await.unwrap();
        let ids: HashSet<_> = instances.iter().map(|i| i.instance_id.as_str()).collect();
        assert_eq!(ids.len(), instances.len());
        assert_eq!(instances.len(), 4);
    }

    #[tokio::test]
    async fn test_generated_ids_stay_unique_after_removal() {
        let store = InstanceStore::new();
        store.upsert(SERVICE, "http://a:5001", None).await;
        store.upsert(SERVICE, "http://b:5001", None).await;
        store.remove_instance(SERVICE, "http://a:5001").await;

        let registration = store.upsert(SERVICE, "http://c:5001", None).await;
        assert_eq!(registration.instance_id, "ingestion-service-2");

        let ids: Vec<_> = store
            .instances(SERVICE)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.instance_id)
            .collect();
        assert_eq!(ids, vec!["ingestion-service-1", "ingestion-service-2"]);
    }

    #[tokio::test]
    async fn test_remove_last_instance_drops_group() {
        let store = InstanceStore::new();
        store.upsert(SERVICE, "http://a:5001", None).await;
        store.upsert(SERVICE, "http://b:5001", None).await;

        assert!(store.remove_instance(SERVICE, "http://a:5001").await);
        assert!(store.contains(SERVICE).await);

        assert!(store.remove_instance(SERVICE, "http://b:5001").await);
        assert!(!store.contains(SERVICE).await);
        assert!(store.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown() {
        let store = InstanceStore::new();
        assert!(!store.remove_instance(SERVICE, "http://a:5001").await);
        assert!(!store.remove_all(SERVICE).await);

        store.upsert(SERVICE, "http://a:5001", None).await;
        assert!(!store.remove_instance(SERVICE, "http://zzz:5001").await);
        assert!(store.contains(SERVICE).await);
    }

    #[tokio::test]
    async fn test_remove_all() {
        let store = InstanceStore::new();
        store.upsert(SERVICE, "http://a:5001", None).await;
        store.upsert(SERVICE, "http://b:5001", None).await;
        store.upsert("storage-service", "http://s:5002", None).await;

        assert!(store.remove_all(SERVICE).await);

        let all = store.list_all().await;
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("storage-service"));
    }

    #[tokio::test]
    async fn test_set_health_missing_record_is_noop() {
        let store = InstanceStore::new();
        assert_eq!(store.set_health(SERVICE, "http://a:5001", false).await, None);

        store.upsert(SERVICE, "http://a:5001", None).await;
        assert_eq!(store.set_health(SERVICE, "http://b:5001", false).await, None);
        assert_eq!(store.set_health(SERVICE, "http://a:5001", false).await, Some(true));
        assert_eq!(store.set_health(SERVICE, "http://a:5001", true).await, Some(false));
    }

    #[tokio::test]
    async fn test_set_health_for_current_record() {
        let store = InstanceStore::new();
        store.upsert(SERVICE, "http://a:5001", None).await;
        let target = store.probe_targets().await.remove(0);

        // Refreshing keeps the same record
        store.upsert(SERVICE, "http://a:5001", None).await;
        assert_eq!(store.set_health_for(&target, false).await, Some(true));
        assert!(!store.instances(SERVICE).await.unwrap()[0].healthy);
    }

    #[tokio::test]
    async fn test_set_health_for_reregistered_url_is_dropped() {
        let store = InstanceStore::new();
        store.upsert(SERVICE, "http://a:5001", None).await;
        let target = store.probe_targets().await.remove(0);

        store.remove_instance(SERVICE, "http://a:5001").await;
        store.upsert(SERVICE, "http://a:5001", None).await;

        assert_eq!(store.set_health_for(&target, false).await, None);
        assert!(store.instances(SERVICE).await.unwrap()[0].healthy);
    }

    #[tokio::test]
    async fn test_list_all_preserves_registration_order() {
        let store = InstanceStore::new();
        for host in ["c", "a", "b"] {
            store.upsert(SERVICE, &format!("http://{host}:5001"), None).await;
        }

        let all = store.list_all().await;
        let urls: Vec<_> = all[SERVICE].iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["http://c:5001", "http://a:5001", "http://b:5001"]);
    }

    #[tokio::test]
    async fn test_select_errors() {
        let store = InstanceStore::new();
        assert_eq!(
            store.select(SERVICE).await,
            Err(RegistryError::not_found(SERVICE))
        );

        store.upsert(SERVICE, "http://a:5001", None).await;
        store.set_health(SERVICE, "http://a:5001", false).await;
        assert_eq!(
            store.select(SERVICE).await,
            Err(RegistryError::NoHealthyInstances {
                service: SERVICE.to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_probe_targets_and_stats() {
        let store = InstanceStore::new();
        store.upsert(SERVICE, "http://a:5001", None).await;
        store.upsert(SERVICE, "http://b:5001", None).await;
        store.upsert("storage-service", "http://s:5002", None).await;
        store.set_health(SERVICE, "http://b:5001", false).await;

        let targets = store.probe_targets().await;
        assert_eq!(targets.len(), 3);
        assert!(targets
            .iter()
            .any(|t| t.service == "storage-service" && t.url == "http://s:5002"));

        let stats = store.stats().await;
        assert_eq!(
            stats,
            StoreStats {
                services: 2,
                instances: 3,
                healthy: 2
            }
        );
    }

    #[test]
    fn test_group_push_replaces_same_url() {
        let mut group = ServiceGroup::new();
        group.push(InstanceRecord::new(SERVICE, "http://a:5001", "one"));
        group.push(InstanceRecord::new(SERVICE, "http://a:5001", "two"));

        assert_eq!(group.len(), 1);
        assert_eq!(group.instances()[0].instance_id, "two");
    }
}
