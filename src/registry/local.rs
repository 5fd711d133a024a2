//! Embedded model registry on sled.
//!
//! Trees:
//! - `runs`: `{run_id}` -> `RunInfo`
//! - `logged_models`: `{run_id}/{artifact_path}` -> `LoggedModel`
//! - `run_artifacts`: `{run_id}/{artifact_path}` -> model bytes
//! - `versions`: `{name}/{version:020}` -> `RegisteredModelVersion`
//! - `version_counters`: `{name}` -> last assigned version (u64 BE)
//! - `aliases`: `{name}/{alias}` -> version (u64 BE)
//!
//! Version assignment and alias moves are single transactions, so versions
//! are never reused and an alias has exactly one holder.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::debug;
use uuid::Uuid;

use super::{ModelRegistry, RegistryError};
use crate::types::{
    model_uri, parse_model_uri, ArtifactBlob, LoggedModel, ModelSignature,
    RegisteredModelVersion, RunInfo, RunStatus,
};

#[derive(Clone)]
pub struct LocalRegistry {
    db: Db,
    runs: Tree,
    logged_models: Tree,
    run_artifacts: Tree,
    versions: Tree,
    counters: Tree,
    aliases: Tree,
}

fn version_key(name: &str, version: u64) -> String {
    format!("{name}/{version:020}")
}

fn alias_key(name: &str, alias: &str) -> String {
    format!("{name}/{alias}")
}

/// Model and alias names are key segments joined with `/`.
fn check_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.contains('/') {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}

fn abort<E: Into<RegistryError>>(err: E) -> ConflictableTransactionError<RegistryError> {
    ConflictableTransactionError::Abort(err.into())
}

fn flatten(err: TransactionError<RegistryError>) -> RegistryError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => RegistryError::Database(e),
    }
}

impl LocalRegistry {
    /// Open or create the registry database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        Self::from_db(sled::open(path)?)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, RegistryError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, RegistryError> {
        Ok(Self {
            runs: db.open_tree("runs")?,
            logged_models: db.open_tree("logged_models")?,
            run_artifacts: db.open_tree("run_artifacts")?,
            versions: db.open_tree("versions")?,
            counters: db.open_tree("version_counters")?,
            aliases: db.open_tree("aliases")?,
            db,
        })
    }

    fn get_json<T: DeserializeOwned>(tree: &Tree, key: &str) -> Result<Option<T>, RegistryError> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(tree: &Tree, key: &str, value: &T) -> Result<(), RegistryError> {
        tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<RunInfo, RegistryError> {
        Self::get_json(&self.runs, run_id)?.ok_or_else(|| RegistryError::RunNotFound(run_id.to_string()))
    }

    /// Apply `f` to an active run and store it back.
    fn update_active_run(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut RunInfo),
    ) -> Result<(), RegistryError> {
        let mut run = self.load_run(run_id)?;
        if run.status != RunStatus::Running {
            return Err(RegistryError::RunNotActive(run_id.to_string()));
        }
        f(&mut run);
        Self::put_json(&self.runs, run_id, &run)
    }

    fn load_version(&self, name: &str, version: u64) -> Result<RegisteredModelVersion, RegistryError> {
        Self::get_json(&self.versions, &version_key(name, version))?.ok_or_else(|| {
            RegistryError::VersionNotFound {
                name: name.to_string(),
                version,
            }
        })
    }

    /// Every version of `name`, oldest first.
    pub fn list_versions(&self, name: &str) -> Result<Vec<RegisteredModelVersion>, RegistryError> {
        check_name(name)?;
        let prefix = format!("{name}/");
        let mut out = Vec::new();
        for entry in self.versions.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Logged model metadata for a `runs:/` URI.
    pub fn logged_model(&self, model_uri: &str) -> Result<LoggedModel, RegistryError> {
        let (run_id, path) = parse_model_uri(model_uri)
            .ok_or_else(|| RegistryError::InvalidModelUri(model_uri.to_string()))?;
        Self::get_json(&self.logged_models, &format!("{run_id}/{path}"))?
            .ok_or_else(|| RegistryError::ArtifactNotFound(model_uri.to_string()))
    }
}

impl ModelRegistry for LocalRegistry {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn start_run(&self, experiment: &str, run_name: &str) -> Result<RunInfo, RegistryError> {
        let run = RunInfo {
            run_id: Uuid::new_v4().simple().to_string(),
            experiment: experiment.to_string(),
            run_name: run_name.to_string(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
        };
        Self::put_json(&self.runs, &run.run_id, &run)?;
        Ok(run)
    }

    fn get_run(&self, run_id: &str) -> Result<RunInfo, RegistryError> {
        self.load_run(run_id)
    }

    fn log_params(
        &self,
        run_id: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(), RegistryError> {
        self.update_active_run(run_id, |run| {
            run.params
                .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        })
    }

    fn log_metrics(
        &self,
        run_id: &str,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<(), RegistryError> {
        self.update_active_run(run_id, |run| {
            run.metrics
                .extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
        })
    }

    fn set_run_tag(&self, run_id: &str, key: &str, value: &str) -> Result<(), RegistryError> {
        self.update_active_run(run_id, |run| {
            run.tags.insert(key.to_string(), value.to_string());
        })
    }

    fn log_model(
        &self,
        run_id: &str,
        artifact_path: &str,
        model_bytes: &[u8],
        signature: &ModelSignature,
        input_example: &[Vec<f64>],
    ) -> Result<LoggedModel, RegistryError> {
        let run = self.load_run(run_id)?;
        if run.status != RunStatus::Running {
            return Err(RegistryError::RunNotActive(run_id.to_string()));
        }
        let key = format!("{run_id}/{artifact_path}");
        let blob = ArtifactBlob::describe(model_uri(run_id, artifact_path), model_bytes);
        let logged = LoggedModel {
            run_id: run_id.to_string(),
            artifact_path: artifact_path.to_string(),
            signature: signature.clone(),
            input_example: input_example.to_vec(),
            size_bytes: blob.size_bytes,
            md5: blob.md5,
        };
        self.run_artifacts.insert(key.as_bytes(), model_bytes)?;
        Self::put_json(&self.logged_models, &key, &logged)?;
        debug!(run_id, artifact_path, bytes = model_bytes.len(), "Model logged");
        Ok(logged)
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<(), RegistryError> {
        let mut run = self.load_run(run_id)?;
        run.status = status;
        run.end_time = Some(Utc::now());
        Self::put_json(&self.runs, run_id, &run)?;
        self.db.flush()?;
        Ok(())
    }

    fn register_model(
        &self,
        name: &str,
        model_uri: &str,
        run_id: &str,
    ) -> Result<RegisteredModelVersion, RegistryError> {
        check_name(name)?;
        let registered = (&self.counters, &self.versions)
            .transaction(|(counters, versions)| {
                let last = match counters.get(name.as_bytes())? {
                    Some(bytes) => decode_u64(&bytes).ok_or_else(|| {
                        abort(RegistryError::Corrupt(format!("version counter of '{name}'")))
                    })?,
                    None => 0,
                };
                let record = RegisteredModelVersion {
                    name: name.to_string(),
                    version: last + 1,
                    source: model_uri.to_string(),
                    run_id: run_id.to_string(),
                    created_at: Utc::now(),
                    tags: BTreeMap::new(),
                    aliases: Vec::new(),
                };
                let bytes = serde_json::to_vec(&record).map_err(abort)?;
                counters.insert(name.as_bytes(), record.version.to_be_bytes().to_vec())?;
                versions.insert(version_key(name, record.version).as_bytes(), bytes)?;
                Ok(record)
            })
            .map_err(flatten)?;
        self.db.flush()?;
        Ok(registered)
    }

    fn set_version_tag(
        &self,
        name: &str,
        version: u64,
        key: &str,
        value: &str,
    ) -> Result<(), RegistryError> {
        let mut record = self.load_version(name, version)?;
        record.tags.insert(key.to_string(), value.to_string());
        Self::put_json(&self.versions, &version_key(name, version), &record)
    }

    fn set_alias(&self, name: &str, alias: &str, version: u64) -> Result<(), RegistryError> {
        check_name(name)?;
        check_name(alias)?;
        self.load_version(name, version)?;
        (&self.aliases, &self.versions)
            .transaction(|(aliases, versions)| {
                let key = alias_key(name, alias);
                if let Some(previous) = aliases.get(key.as_bytes())?.as_deref().and_then(decode_u64) {
                    let vkey = version_key(name, previous);
                    if let Some(bytes) = versions.get(vkey.as_bytes())? {
                        let mut holder: RegisteredModelVersion =
                            serde_json::from_slice(&bytes).map_err(abort)?;
                        holder.aliases.retain(|a| a != alias);
                        versions.insert(vkey.as_bytes(), serde_json::to_vec(&holder).map_err(abort)?)?;
                    }
                }

                let vkey = version_key(name, version);
                let bytes = versions.get(vkey.as_bytes())?.ok_or_else(|| {
                    abort(RegistryError::VersionNotFound {
                        name: name.to_string(),
                        version,
                    })
                })?;
                let mut target: RegisteredModelVersion =
                    serde_json::from_slice(&bytes).map_err(abort)?;
                if !target.aliases.iter().any(|a| a == alias) {
                    target.aliases.push(alias.to_string());
                }
                versions.insert(vkey.as_bytes(), serde_json::to_vec(&target).map_err(abort)?)?;
                aliases.insert(key.as_bytes(), version.to_be_bytes().to_vec())?;
                Ok(())
            })
            .map_err(flatten)?;
        self.db.flush()?;
        Ok(())
    }

    fn get_version_by_alias(
        &self,
        name: &str,
        alias: &str,
    ) -> Result<RegisteredModelVersion, RegistryError> {
        let not_set = || RegistryError::AliasNotFound {
            name: name.to_string(),
            alias: alias.to_string(),
        };
        let bytes = self
            .aliases
            .get(alias_key(name, alias).as_bytes())?
            .ok_or_else(not_set)?;
        let version = decode_u64(&bytes)
            .ok_or_else(|| RegistryError::Corrupt(format!("alias '{alias}' of '{name}'")))?;
        self.load_version(name, version)
    }

    fn download_model(&self, model_uri: &str) -> Result<Vec<u8>, RegistryError> {
        let (run_id, path) = parse_model_uri(model_uri)
            .ok_or_else(|| RegistryError::InvalidModelUri(model_uri.to_string()))?;
        self.run_artifacts
            .get(format!("{run_id}/{path}").as_bytes())?
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| RegistryError::ArtifactNotFound(model_uri.to_string()))
    }
}
