//! Domain profiles and the data-manager seam.
//!
//! The loader materialises tariff-plan rows into these profile shapes and
//! writes them through the `DataManager` trait. Persistence backends are
//! external collaborators; an in-memory implementation backs development
//! and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("NOT_FOUND")]
    NotFound,
    #[error("storage error: {0}")]
    Backend(String),
}

pub const NON_TRANSACTIONAL: &str = "";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttributeRule {
    pub filter_ids: Vec<String>,
    pub path: String,
    #[serde(rename = "type")]
    pub rule_type: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttributeProfile {
    pub tenant: String,
    pub id: String,
    pub contexts: Vec<String>,
    pub filter_ids: Vec<String>,
    pub attributes: Vec<AttributeRule>,
    pub blocker: bool,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceProfile {
    pub tenant: String,
    pub id: String,
    pub filter_ids: Vec<String>,
    pub usage_ttl: Option<String>,
    pub limit: f64,
    pub allocation_message: String,
    pub blocker: bool,
    pub stored: bool,
    pub weight: f64,
    pub threshold_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterRuleDef {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub element: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilterProfile {
    pub tenant: String,
    pub id: String,
    pub rules: Vec<FilterRuleDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricDef {
    pub metric_id: String,
    pub filter_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatQueueProfile {
    pub tenant: String,
    pub id: String,
    pub filter_ids: Vec<String>,
    pub queue_length: i64,
    pub ttl: Option<String>,
    pub min_items: usize,
    pub metrics: Vec<MetricDef>,
    pub stored: bool,
    pub blocker: bool,
    pub weight: f64,
    pub threshold_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThresholdProfile {
    pub tenant: String,
    pub id: String,
    pub filter_ids: Vec<String>,
    pub max_hits: i64,
    pub min_hits: i64,
    pub min_sleep: Option<String>,
    pub blocker: bool,
    pub weight: f64,
    pub action_ids: Vec<String>,
    pub run_async: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteDef {
    pub id: String,
    pub filter_ids: Vec<String>,
    pub account_ids: Vec<String>,
    pub rating_plan_ids: Vec<String>,
    pub resource_ids: Vec<String>,
    pub stat_ids: Vec<String>,
    pub weight: f64,
    pub blocker: bool,
    pub route_parameters: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteProfile {
    pub tenant: String,
    pub id: String,
    pub filter_ids: Vec<String>,
    pub sorting: String,
    pub sorting_parameters: Vec<String>,
    pub routes: Vec<RouteDef>,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChargerProfile {
    pub tenant: String,
    pub id: String,
    pub filter_ids: Vec<String>,
    pub run_id: String,
    pub attribute_ids: Vec<String>,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DispatcherHostRef {
    pub id: String,
    pub filter_ids: Vec<String>,
    pub weight: f64,
    pub blocker: bool,
    pub params: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DispatcherProfile {
    pub tenant: String,
    pub id: String,
    pub subsystems: Vec<String>,
    pub filter_ids: Vec<String>,
    pub strategy: String,
    pub strategy_params: Vec<String>,
    pub hosts: Vec<DispatcherHostRef>,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DispatcherHost {
    pub tenant: String,
    pub id: String,
    pub address: String,
    pub transport: String,
    pub tls: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RateDef {
    pub id: String,
    pub filter_ids: Vec<String>,
    pub activation_times: String,
    pub weight: f64,
    pub blocker: bool,
    pub interval_start: Option<String>,
    pub fixed_fee: f64,
    pub recurrent_fee: f64,
    pub unit: Option<String>,
    pub increment: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RateProfile {
    pub tenant: String,
    pub id: String,
    pub filter_ids: Vec<String>,
    pub weight: f64,
    pub rates: Vec<RateDef>,
}

/// Runtime state written alongside its profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub tenant: String,
    pub id: String,
    pub usages: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatQueue {
    pub tenant: String,
    pub id: String,
    pub metrics: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Threshold {
    pub tenant: String,
    pub id: String,
    pub hits: u64,
}

/// Narrow CRUD over domain profiles and their runtime state.
#[async_trait]
pub trait DataManager: Send + Sync {
    async fn set_attribute_profile(
        &self,
        profile: AttributeProfile,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn remove_attribute_profile(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
        with_index: bool,
    ) -> Result<(), StorageError>;

    async fn set_resource_profile(
        &self,
        profile: ResourceProfile,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn remove_resource_profile(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn set_resource(&self, resource: Resource) -> Result<(), StorageError>;
    async fn remove_resource(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
    ) -> Result<(), StorageError>;

    async fn set_filter(&self, profile: FilterProfile, with_index: bool)
        -> Result<(), StorageError>;
    async fn remove_filter(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
        with_index: bool,
    ) -> Result<(), StorageError>;

    async fn set_stat_queue_profile(
        &self,
        profile: StatQueueProfile,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn remove_stat_queue_profile(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn set_stat_queue(&self, queue: StatQueue) -> Result<(), StorageError>;
    async fn remove_stat_queue(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
    ) -> Result<(), StorageError>;

    async fn set_threshold_profile(
        &self,
        profile: ThresholdProfile,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn remove_threshold_profile(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn set_threshold(&self, threshold: Threshold) -> Result<(), StorageError>;
    async fn remove_threshold(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
    ) -> Result<(), StorageError>;

    async fn set_route_profile(
        &self,
        profile: RouteProfile,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn remove_route_profile(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
        with_index: bool,
    ) -> Result<(), StorageError>;

    async fn set_charger_profile(
        &self,
        profile: ChargerProfile,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn remove_charger_profile(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
        with_index: bool,
    ) -> Result<(), StorageError>;

    async fn set_dispatcher_profile(
        &self,
        profile: DispatcherProfile,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn remove_dispatcher_profile(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
        with_index: bool,
    ) -> Result<(), StorageError>;

    async fn set_dispatcher_host(&self, host: DispatcherHost) -> Result<(), StorageError>;
    async fn remove_dispatcher_host(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
    ) -> Result<(), StorageError>;

    async fn set_rate_profile(
        &self,
        profile: RateProfile,
        with_index: bool,
    ) -> Result<(), StorageError>;
    /// Replace only the listed rates of an existing profile (`*partial`).
    async fn set_rate_profile_rates(
        &self,
        profile: RateProfile,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn remove_rate_profile(
        &self,
        tenant: &str,
        id: &str,
        transaction_id: &str,
        with_index: bool,
    ) -> Result<(), StorageError>;
    async fn remove_rate_profile_rates(
        &self,
        tenant: &str,
        id: &str,
        rate_ids: &[String],
        with_index: bool,
    ) -> Result<(), StorageError>;
}

// cache partitions, shared with the loader's invalidation calls
pub const CACHE_ATTRIBUTE_PROFILES: &str = "*attribute_profiles";
pub const CACHE_RESOURCE_PROFILES: &str = "*resource_profiles";
pub const CACHE_FILTERS: &str = "*filters";
pub const CACHE_STATQUEUE_PROFILES: &str = "*statqueue_profiles";
pub const CACHE_THRESHOLD_PROFILES: &str = "*threshold_profiles";
pub const CACHE_ROUTE_PROFILES: &str = "*route_profiles";
pub const CACHE_CHARGER_PROFILES: &str = "*charger_profiles";
pub const CACHE_DISPATCHER_PROFILES: &str = "*dispatcher_profiles";
pub const CACHE_DISPATCHER_HOSTS: &str = "*dispatcher_hosts";
pub const CACHE_RATE_PROFILES: &str = "*rate_profiles";

/// In-memory backend: one serialized map per partition, keyed `tenant:ID`.
#[derive(Default)]
pub struct MemoryDataManager {
    partitions: RwLock<HashMap<&'static str, HashMap<String, serde_json::Value>>>,
}

impl MemoryDataManager {
    pub fn new() -> Self {
        MemoryDataManager::default()
    }

    fn key(tenant: &str, id: &str) -> String {
        format!("{tenant}:{id}")
    }

    async fn store<T: Serialize>(
        &self,
        partition: &'static str,
        tenant: &str,
        id: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let encoded =
            serde_json::to_value(value).map_err(|e| StorageError::Backend(e.to_string()))?;
        self.partitions
            .write()
            .await
            .entry(partition)
            .or_default()
            .insert(Self::key(tenant, id), encoded);
        Ok(())
    }

    async fn drop_key(
        &self,
        partition: &'static str,
        tenant: &str,
        id: &str,
    ) -> Result<(), StorageError> {
        self.partitions
            .write()
            .await
            .entry(partition)
            .or_default()
            .remove(&Self::key(tenant, id))
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    pub async fn get(&self, partition: &str, tenant: &str, id: &str) -> Option<serde_json::Value> {
        self.partitions
            .read()
            .await
            .get(partition)?
            .get(&Self::key(tenant, id))
            .cloned()
    }

    pub async fn count(&self, partition: &str) -> usize {
        self.partitions
            .read()
            .await
            .get(partition)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DataManager for MemoryDataManager {
    async fn set_attribute_profile(
        &self,
        profile: AttributeProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.store(CACHE_ATTRIBUTE_PROFILES, &profile.tenant, &profile.id, &profile)
            .await
    }

    async fn remove_attribute_profile(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_ATTRIBUTE_PROFILES, tenant, id).await
    }

    async fn set_resource_profile(
        &self,
        profile: ResourceProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.store(CACHE_RESOURCE_PROFILES, &profile.tenant, &profile.id, &profile)
            .await
    }

    async fn remove_resource_profile(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_RESOURCE_PROFILES, tenant, id).await
    }

    async fn set_resource(&self, resource: Resource) -> Result<(), StorageError> {
        self.store("resources", &resource.tenant, &resource.id, &resource)
            .await
    }

    async fn remove_resource(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
    ) -> Result<(), StorageError> {
        self.drop_key("resources", tenant, id).await
    }

    async fn set_filter(
        &self,
        profile: FilterProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.store(CACHE_FILTERS, &profile.tenant, &profile.id, &profile)
            .await
    }

    async fn remove_filter(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_FILTERS, tenant, id).await
    }

    async fn set_stat_queue_profile(
        &self,
        profile: StatQueueProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.store(CACHE_STATQUEUE_PROFILES, &profile.tenant, &profile.id, &profile)
            .await
    }

    async fn remove_stat_queue_profile(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_STATQUEUE_PROFILES, tenant, id).await
    }

    async fn set_stat_queue(&self, queue: StatQueue) -> Result<(), StorageError> {
        self.store("statqueues", &queue.tenant, &queue.id, &queue).await
    }

    async fn remove_stat_queue(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
    ) -> Result<(), StorageError> {
        self.drop_key("statqueues", tenant, id).await
    }

    async fn set_threshold_profile(
        &self,
        profile: ThresholdProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.store(CACHE_THRESHOLD_PROFILES, &profile.tenant, &profile.id, &profile)
            .await
    }

    async fn remove_threshold_profile(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_THRESHOLD_PROFILES, tenant, id).await
    }

    async fn set_threshold(&self, threshold: Threshold) -> Result<(), StorageError> {
        self.store("thresholds", &threshold.tenant, &threshold.id, &threshold)
            .await
    }

    async fn remove_threshold(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
    ) -> Result<(), StorageError> {
        self.drop_key("thresholds", tenant, id).await
    }

    async fn set_route_profile(
        &self,
        profile: RouteProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.store(CACHE_ROUTE_PROFILES, &profile.tenant, &profile.id, &profile)
            .await
    }

    async fn remove_route_profile(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_ROUTE_PROFILES, tenant, id).await
    }

    async fn set_charger_profile(
        &self,
        profile: ChargerProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.store(CACHE_CHARGER_PROFILES, &profile.tenant, &profile.id, &profile)
            .await
    }

    async fn remove_charger_profile(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_CHARGER_PROFILES, tenant, id).await
    }

    async fn set_dispatcher_profile(
        &self,
        profile: DispatcherProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.store(CACHE_DISPATCHER_PROFILES, &profile.tenant, &profile.id, &profile)
            .await
    }

    async fn remove_dispatcher_profile(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_DISPATCHER_PROFILES, tenant, id).await
    }

    async fn set_dispatcher_host(&self, host: DispatcherHost) -> Result<(), StorageError> {
        self.store(CACHE_DISPATCHER_HOSTS, &host.tenant, &host.id, &host)
            .await
    }

    async fn remove_dispatcher_host(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_DISPATCHER_HOSTS, tenant, id).await
    }

    async fn set_rate_profile(
        &self,
        profile: RateProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.store(CACHE_RATE_PROFILES, &profile.tenant, &profile.id, &profile)
            .await
    }

    async fn set_rate_profile_rates(
        &self,
        profile: RateProfile,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        let existing = self
            .get(CACHE_RATE_PROFILES, &profile.tenant, &profile.id)
            .await;
        let mut merged: RateProfile = match existing {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| StorageError::Backend(e.to_string()))?,
            None => RateProfile {
                tenant: profile.tenant.clone(),
                id: profile.id.clone(),
                filter_ids: profile.filter_ids.clone(),
                weight: profile.weight,
                rates: Vec::new(),
            },
        };
        for rate in profile.rates {
            merged.rates.retain(|r| r.id != rate.id);
            merged.rates.push(rate);
        }
        self.store(CACHE_RATE_PROFILES, &merged.tenant, &merged.id, &merged)
            .await
    }

    async fn remove_rate_profile(
        &self,
        tenant: &str,
        id: &str,
        _transaction_id: &str,
        _with_index: bool,
    ) -> Result<(), StorageError> {
        self.drop_key(CACHE_RATE_PROFILES, tenant, id).await
    }

    async fn remove_rate_profile_rates(
        &self,
        tenant: &str,
        id: &str,
        rate_ids: &[String],
        _with_index: bool,
    ) -> Result<(), StorageError> {
        let existing = self
            .get(CACHE_RATE_PROFILES, tenant, id)
            .await
            .ok_or(StorageError::NotFound)?;
        let mut profile: RateProfile =
            serde_json::from_value(existing).map_err(|e| StorageError::Backend(e.to_string()))?;
        profile.rates.retain(|rate| !rate_ids.contains(&rate.id));
        self.store(CACHE_RATE_PROFILES, tenant, id, &profile).await
    }
}
