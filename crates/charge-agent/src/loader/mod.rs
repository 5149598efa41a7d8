//! The tariff-plan loader engine.
//!
//! A folder pass takes the advisory lockfile, walks every configured loader
//! type with all of its CSV files advancing in lockstep one logical row at a
//! time, buffers rows per tenant-scoped key, materialises domain profiles
//! through the data manager, invalidates caches, moves the processed files
//! to the output directory and releases the lock. Rows for one key must be
//! contiguous in the input: the engine holds a single key at a time and
//! flushes the buffered group whenever the key changes.

pub mod data;
pub mod profiles;

use crate::config::{Flags, LoaderCfg, LoaderDataCfg};
use crate::dm::{DataManager, Resource, StatQueue, StorageError, Threshold};
use crate::rpc::{RpcClient, RpcError};
use crate::rsr::RsrError;
use crate::sessions::{CACHE_CLEAR, CACHE_LOAD_CACHE, CACHE_RELOAD_CACHE, CACHE_REMOVE_ITEM};
use data::{files_for_templates, tenant_key, update_from_csv, LoaderData};
use serde_json::json;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("cannot open <{file}>: {source}")]
    OpenFile {
        file: String,
        source: std::io::Error,
    },
    #[error("unknown loader type <{0}>")]
    UnknownType(String),
    #[error("mandatory column <{field}> has no value")]
    MissingField { field: String },
    #[error("invalid field <{field}> value <{value}>")]
    BadField { field: String, value: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Rsr(#[from] RsrError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub const META_PARTIAL: &str = "*partial";

/// The closed set of loader types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoaderType {
    Attributes,
    Resources,
    Filters,
    Stats,
    Thresholds,
    Routes,
    Chargers,
    Dispatchers,
    DispatcherHosts,
    RateProfiles,
}

impl LoaderType {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "*attributes" => Some(LoaderType::Attributes),
            "*resources" => Some(LoaderType::Resources),
            "*filters" => Some(LoaderType::Filters),
            "*stats" => Some(LoaderType::Stats),
            "*thresholds" => Some(LoaderType::Thresholds),
            "*routes" => Some(LoaderType::Routes),
            "*chargers" => Some(LoaderType::Chargers),
            "*dispatchers" => Some(LoaderType::Dispatchers),
            "*dispatcher_hosts" => Some(LoaderType::DispatcherHosts),
            "*rate_profiles" => Some(LoaderType::RateProfiles),
            _ => None,
        }
    }

    pub fn cache_partition(self) -> &'static str {
        match self {
            LoaderType::Attributes => crate::dm::CACHE_ATTRIBUTE_PROFILES,
            LoaderType::Resources => crate::dm::CACHE_RESOURCE_PROFILES,
            LoaderType::Filters => crate::dm::CACHE_FILTERS,
            LoaderType::Stats => crate::dm::CACHE_STATQUEUE_PROFILES,
            LoaderType::Thresholds => crate::dm::CACHE_THRESHOLD_PROFILES,
            LoaderType::Routes => crate::dm::CACHE_ROUTE_PROFILES,
            LoaderType::Chargers => crate::dm::CACHE_CHARGER_PROFILES,
            LoaderType::Dispatchers => crate::dm::CACHE_DISPATCHER_PROFILES,
            LoaderType::DispatcherHosts => crate::dm::CACHE_DISPATCHER_HOSTS,
            LoaderType::RateProfiles => crate::dm::CACHE_RATE_PROFILES,
        }
    }

    fn ids_keys(self) -> &'static [&'static str] {
        match self {
            LoaderType::Attributes => &["AttributeProfileIDs"],
            LoaderType::Resources => &["ResourceProfileIDs", "ResourceIDs"],
            LoaderType::Filters => &["FilterIDs"],
            LoaderType::Stats => &["StatsQueueProfileIDs", "StatsQueueIDs"],
            LoaderType::Thresholds => &["ThresholdProfileIDs", "ThresholdIDs"],
            LoaderType::Routes => &["RouteProfileIDs"],
            LoaderType::Chargers => &["ChargerProfileIDs"],
            LoaderType::Dispatchers => &["DispatcherProfileIDs"],
            LoaderType::DispatcherHosts => &["DispatcherHostIDs"],
            LoaderType::RateProfiles => &["RateProfileIDs"],
        }
    }
}

/// What to do with parsed content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOption {
    Store,
    Remove,
}

impl LoadOption {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "*store" => Some(LoadOption::Store),
            "*remove" => Some(LoadOption::Remove),
            _ => None,
        }
    }
}

/// Cache-coherence strategy after persisting a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caching {
    None,
    Reload,
    Load,
    Remove,
    Clear,
}

impl Caching {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "*none" => Some(Caching::None),
            "*reload" => Some(Caching::Reload),
            "*load" => Some(Caching::Load),
            "*remove" => Some(Caching::Remove),
            "*clear" => Some(Caching::Clear),
            _ => None,
        }
    }
}

/// One loader instance bound to a folder.
pub struct Loader {
    ldr_id: String,
    tenant: String,
    dry_run: bool,
    tp_in_dir: PathBuf,
    tp_out_dir: PathBuf,
    lock_filename: String,
    field_sep: u8,
    caching: Caching,
    data: Vec<(LoaderType, LoaderDataCfg, Flags)>,
    dm: Arc<dyn DataManager>,
    cache_conns: Option<Arc<dyn RpcClient>>,
}

impl Loader {
    pub fn new(
        cfg: &LoaderCfg,
        dm: Arc<dyn DataManager>,
        cache_conns: Option<Arc<dyn RpcClient>>,
    ) -> Result<Self, LoaderError> {
        let field_sep = cfg
            .separator_byte()
            .map_err(|e| LoaderError::Config(e.to_string()))?;
        let caching = Caching::parse(&cfg.caching)
            .ok_or_else(|| LoaderError::Config(format!("unknown caching <{}>", cfg.caching)))?;
        let mut data = Vec::with_capacity(cfg.data.len());
        for section in &cfg.data {
            let ldr_type = LoaderType::parse(&section.data_type)
                .ok_or_else(|| LoaderError::UnknownType(section.data_type.clone()))?;
            let flags = Flags::parse(&section.flags);
            data.push((ldr_type, section.clone(), flags));
        }
        Ok(Loader {
            ldr_id: cfg.id.clone(),
            tenant: cfg.tenant.clone(),
            dry_run: cfg.dry_run,
            tp_in_dir: PathBuf::from(&cfg.tp_in_dir),
            tp_out_dir: PathBuf::from(&cfg.tp_out_dir),
            lock_filename: cfg.lock_filename.clone(),
            field_sep,
            caching,
            data,
            dm,
            cache_conns,
        })
    }

    pub fn caching(&self) -> Caching {
        self.caching
    }

    /// One locked folder pass. The lockfile is advisory (created without
    /// exclusivity, matching cross-process convention) and is removed on
    /// every exit path. A storage error aborts the pass; remaining types are
    /// not attempted and the input files stay in place.
    pub async fn process_folder(
        &self,
        caching: Caching,
        load_option: LoadOption,
    ) -> Result<(), LoaderError> {
        self.lock_folder()?;
        let result = self.run_pass(caching, load_option).await;
        let unlocked = self.unlock_folder();
        result?;
        unlocked
    }

    async fn run_pass(&self, caching: Caching, load_option: LoadOption) -> Result<(), LoaderError> {
        for (ldr_type, section, flags) in &self.data {
            match self
                .process_type(*ldr_type, section, flags, caching, load_option)
                .await
            {
                Ok(()) => {}
                Err(LoaderError::OpenFile { file, source }) => {
                    warn!(
                        loader_id = %self.ldr_id,
                        loader_type = ?ldr_type,
                        file = %file,
                        error = %source,
                        "cannot open files, skipping type"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        self.move_files()
    }

    fn lock_folder(&self) -> Result<(), LoaderError> {
        // O_RDONLY|O_CREAT: the lockfile is opened read-only even when an
        // existing one is owned by another process
        OpenOptions::new()
            .read(true)
            .mode(0o644)
            .custom_flags(libc::O_CREAT)
            .open(self.tp_in_dir.join(&self.lock_filename))?;
        Ok(())
    }

    fn unlock_folder(&self) -> Result<(), LoaderError> {
        fs::remove_file(self.tp_in_dir.join(&self.lock_filename))?;
        Ok(())
    }

    fn move_files(&self) -> Result<(), LoaderError> {
        for entry in fs::read_dir(&self.tp_in_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy() == self.lock_filename || !entry.path().is_file() {
                continue;
            }
            fs::rename(entry.path(), self.tp_out_dir.join(&name))?;
        }
        Ok(())
    }

    async fn process_type(
        &self,
        ldr_type: LoaderType,
        section: &LoaderDataCfg,
        flags: &Flags,
        caching: Caching,
        load_option: LoadOption,
    ) -> Result<(), LoaderError> {
        let mut file_names = files_for_templates(&section.fields);
        if let Some(name) = &section.file_name {
            if !file_names.iter().any(|f| f == name) {
                file_names.push(name.clone());
            }
        }
        let mut readers = Vec::with_capacity(file_names.len());
        for name in file_names {
            let path = self.tp_in_dir.join(&name);
            let file = fs::File::open(&path).map_err(|source| LoaderError::OpenFile {
                file: path.display().to_string(),
                source,
            })?;
            let reader = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .comment(Some(b'#'))
                .delimiter(self.field_sep)
                .from_reader(file);
            readers.push((name, reader));
        }

        let mut buffered: Option<(String, Vec<LoaderData>)> = None;
        let mut ids: Vec<String> = Vec::new();
        let mut line = 0usize;
        'rows: loop {
            line += 1;
            let mut records = Vec::with_capacity(readers.len());
            let mut row_error = false;
            for (name, reader) in readers.iter_mut() {
                let mut record = csv::StringRecord::new();
                match reader.read_record(&mut record) {
                    Ok(true) => records.push((name.clone(), record)),
                    Ok(false) => break 'rows,
                    Err(err) => {
                        warn!(
                            loader_id = %self.ldr_id,
                            file = %name,
                            line,
                            error = %err,
                            "reading line"
                        );
                        row_error = true;
                    }
                }
            }
            if row_error {
                continue; // a read error on any reader discards the logical row
            }
            let mut row = LoaderData::new();
            let mut decode_error = false;
            for (name, record) in &records {
                if let Err(err) = update_from_csv(&mut row, name, record, &section.fields) {
                    warn!(
                        loader_id = %self.ldr_id,
                        file = %name,
                        line,
                        error = %err,
                        "decoding line"
                    );
                    decode_error = true;
                    break;
                }
            }
            if decode_error || row.is_empty() {
                continue;
            }
            if row.get("Tenant").map_or(true, String::is_empty) {
                row.insert("Tenant".to_string(), self.tenant.clone());
            }

            let key = tenant_key(&row);
            match &mut buffered {
                Some((current, rows)) if *current == key => rows.push(row),
                Some(_) => {
                    let (prev_key, rows) = buffered.take().expect("buffer checked above");
                    self.flush_group(ldr_type, flags, &prev_key, &rows, load_option, &mut ids)
                        .await?;
                    buffered = Some((key, vec![row]));
                }
                None => buffered = Some((key, vec![row])),
            }
        }
        if let Some((key, rows)) = buffered.take() {
            self.flush_group(ldr_type, flags, &key, &rows, load_option, &mut ids)
                .await?;
        }
        self.invalidate_cache(ldr_type, caching, &ids).await
    }

    async fn flush_group(
        &self,
        ldr_type: LoaderType,
        flags: &Flags,
        key: &str,
        rows: &[LoaderData],
        load_option: LoadOption,
        ids: &mut Vec<String>,
    ) -> Result<(), LoaderError> {
        if rows.is_empty() {
            return Ok(());
        }
        match load_option {
            LoadOption::Store => self.store_group(ldr_type, flags, rows, ids).await,
            LoadOption::Remove => self.remove_group(ldr_type, flags, key, rows, ids).await,
        }
    }

    async fn store_group(
        &self,
        ldr_type: LoaderType,
        flags: &Flags,
        rows: &[LoaderData],
        ids: &mut Vec<String>,
    ) -> Result<(), LoaderError> {
        macro_rules! dry_run_or {
            ($label:literal, $profile:expr, $write:expr) => {{
                if self.dry_run {
                    info!(
                        loader_id = %self.ldr_id,
                        profile = %serde_json::to_string(&$profile).unwrap_or_default(),
                        concat!("DRY_RUN: ", $label)
                    );
                    return Ok(());
                }
                ids.push(format!("{}:{}", $profile.tenant, $profile.id));
                $write
            }};
        }
        match ldr_type {
            LoaderType::Attributes => {
                let profile = profiles::attribute_profile(rows)?;
                dry_run_or!("AttributeProfile", profile, {
                    self.dm.set_attribute_profile(profile, true).await?;
                })
            }
            LoaderType::Resources => {
                let profile = profiles::resource_profile(rows)?;
                dry_run_or!("ResourceProfile", profile, {
                    let state = Resource {
                        tenant: profile.tenant.clone(),
                        id: profile.id.clone(),
                        usages: HashMap::new(),
                    };
                    self.dm.set_resource_profile(profile, true).await?;
                    self.dm.set_resource(state).await?;
                })
            }
            LoaderType::Filters => {
                let profile = profiles::filter_profile(rows)?;
                dry_run_or!("Filter", profile, {
                    self.dm.set_filter(profile, true).await?;
                })
            }
            LoaderType::Stats => {
                let profile = profiles::stat_queue_profile(rows)?;
                dry_run_or!("StatQueueProfile", profile, {
                    let state = StatQueue {
                        tenant: profile.tenant.clone(),
                        id: profile.id.clone(),
                        metrics: profile.metrics.iter().map(|m| m.metric_id.clone()).collect(),
                    };
                    self.dm.set_stat_queue_profile(profile, true).await?;
                    self.dm.set_stat_queue(state).await?;
                })
            }
            LoaderType::Thresholds => {
                let profile = profiles::threshold_profile(rows)?;
                dry_run_or!("ThresholdProfile", profile, {
                    let state = Threshold {
                        tenant: profile.tenant.clone(),
                        id: profile.id.clone(),
                        hits: 0,
                    };
                    self.dm.set_threshold_profile(profile, true).await?;
                    self.dm.set_threshold(state).await?;
                })
            }
            LoaderType::Routes => {
                let profile = profiles::route_profile(rows)?;
                dry_run_or!("RouteProfile", profile, {
                    self.dm.set_route_profile(profile, true).await?;
                })
            }
            LoaderType::Chargers => {
                let profile = profiles::charger_profile(rows)?;
                dry_run_or!("ChargerProfile", profile, {
                    self.dm.set_charger_profile(profile, true).await?;
                })
            }
            LoaderType::Dispatchers => {
                let profile = profiles::dispatcher_profile(rows)?;
                dry_run_or!("DispatcherProfile", profile, {
                    self.dm.set_dispatcher_profile(profile, true).await?;
                })
            }
            LoaderType::DispatcherHosts => {
                let profile = profiles::dispatcher_host(rows)?;
                dry_run_or!("DispatcherHost", profile, {
                    self.dm.set_dispatcher_host(profile).await?;
                })
            }
            LoaderType::RateProfiles => {
                let profile = profiles::rate_profile(rows)?;
                dry_run_or!("RateProfile", profile, {
                    if flags.has(META_PARTIAL) {
                        self.dm.set_rate_profile_rates(profile, true).await?;
                    } else {
                        self.dm.set_rate_profile(profile, true).await?;
                    }
                })
            }
        }
        Ok(())
    }

    async fn remove_group(
        &self,
        ldr_type: LoaderType,
        flags: &Flags,
        key: &str,
        rows: &[LoaderData],
        ids: &mut Vec<String>,
    ) -> Result<(), LoaderError> {
        let (tenant, id) = key.split_once(':').unwrap_or((key, ""));
        if self.dry_run {
            info!(
                loader_id = %self.ldr_id,
                loader_type = ?ldr_type,
                tenant_id = %key,
                "DRY_RUN: remove"
            );
            return Ok(());
        }
        ids.push(key.to_string());
        const TX: &str = crate::dm::NON_TRANSACTIONAL;
        match ldr_type {
            LoaderType::Attributes => {
                self.dm.remove_attribute_profile(tenant, id, TX, true).await?;
            }
            LoaderType::Resources => {
                self.dm.remove_resource_profile(tenant, id, TX, true).await?;
                self.dm.remove_resource(tenant, id, TX).await?;
            }
            LoaderType::Filters => {
                self.dm.remove_filter(tenant, id, TX, true).await?;
            }
            LoaderType::Stats => {
                self.dm.remove_stat_queue_profile(tenant, id, TX, true).await?;
                self.dm.remove_stat_queue(tenant, id, TX).await?;
            }
            LoaderType::Thresholds => {
                self.dm.remove_threshold_profile(tenant, id, TX, true).await?;
                self.dm.remove_threshold(tenant, id, TX).await?;
            }
            LoaderType::Routes => {
                self.dm.remove_route_profile(tenant, id, TX, true).await?;
            }
            LoaderType::Chargers => {
                self.dm.remove_charger_profile(tenant, id, TX, true).await?;
            }
            LoaderType::Dispatchers => {
                self.dm.remove_dispatcher_profile(tenant, id, TX, true).await?;
            }
            LoaderType::DispatcherHosts => {
                self.dm.remove_dispatcher_host(tenant, id, TX).await?;
            }
            LoaderType::RateProfiles => {
                if flags.has(META_PARTIAL) {
                    let rate_ids = rows.first().map(profiles::rate_ids).unwrap_or_default();
                    self.dm
                        .remove_rate_profile_rates(tenant, id, &rate_ids, true)
                        .await?;
                } else {
                    self.dm.remove_rate_profile(tenant, id, TX, true).await?;
                }
            }
        }
        Ok(())
    }

    async fn invalidate_cache(
        &self,
        ldr_type: LoaderType,
        caching: Caching,
        ids: &[String],
    ) -> Result<(), LoaderError> {
        let Some(cache) = &self.cache_conns else {
            return Ok(());
        };
        if ids.is_empty() || caching == Caching::None {
            return Ok(());
        }
        match caching {
            Caching::None => {}
            Caching::Reload | Caching::Load => {
                let mut args = serde_json::Map::new();
                for key in ldr_type.ids_keys() {
                    args.insert(key.to_string(), json!(ids));
                }
                let method = if caching == Caching::Reload {
                    CACHE_RELOAD_CACHE
                } else {
                    CACHE_LOAD_CACHE
                };
                cache.call(method, serde_json::Value::Object(args)).await?;
            }
            Caching::Remove => {
                for id in ids {
                    cache
                        .call(
                            CACHE_REMOVE_ITEM,
                            json!({
                                "CacheID": ldr_type.cache_partition(),
                                "ItemID": id,
                            }),
                        )
                        .await?;
                }
            }
            Caching::Clear => {
                cache.call(CACHE_CLEAR, json!({})).await?;
            }
        }
        Ok(())
    }
}
