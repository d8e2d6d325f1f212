//! Configuration resolution.
//!
//! Resolution turns a request (service specifiers, a changeset, a mode flag and
//! a requested variation) into the per-key chain of applicable values:
//!
//! 1. Resolve specifiers to service versions, enforcing the production guards.
//! 2. Resolve the evaluation timestamp from the changeset.
//! 3. Fetch visible rows and group them feature -> key in first-seen order.
//! 4. Filter every candidate against the requested variation and rank it.
//! 5. Sort by rank and reduce: the least specific candidate seeds the base
//!    entry, candidates with open dimensions are appended, fully resolved
//!    candidates overlay the base.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use strata_core::ids::{ChangesetId, FeatureId, KeyId, ServiceTypeId, ServiceVersionId};
use strata_core::{merge_into, DataType, Hierarchy, VariationMap, VariationNameMap};
use strata_traits::{
    ConfigurationRow, ConfigurationStore, ServiceVersionRow, ServiceVersionSpecifier, TraitError,
};

use crate::error::{EngineError, EngineResult};
use crate::variation_context::VariationContextService;

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

fn head() -> ChangesetId {
    ChangesetId::HEAD
}

/// A configuration resolution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRequest {
    /// Service version specifiers: `name`, `name:latest` or `name:<version>`.
    pub services: Vec<String>,
    /// Changeset to resolve as of; `0` means head.
    #[serde(default = "head")]
    pub changeset_id: ChangesetId,
    /// Production mode only serves published versions and applied changesets.
    #[serde(default)]
    pub production: bool,
    /// Requested variation, property name to value.
    #[serde(default)]
    pub variation: VariationNameMap,
}

impl ConfigurationRequest {
    /// Request the head state of the given services.
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: services.into_iter().map(Into::into).collect(),
            changeset_id: ChangesetId::HEAD,
            production: false,
            variation: VariationNameMap::new(),
        }
    }

    /// Set the requested variation.
    pub fn with_variation<I, K, V>(mut self, variation: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.variation = variation
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Resolve as of a changeset.
    pub fn at_changeset(mut self, changeset_id: ChangesetId) -> Self {
        self.changeset_id = changeset_id;
        self
    }

    /// Enable production mode.
    pub fn production(mut self) -> Self {
        self.production = true;
        self
    }
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Changeset the configuration reflects. For head requests this is the
    /// latest applied changeset, or head when nothing has been applied yet.
    pub changeset_id: ChangesetId,
    /// Features in first-seen order.
    pub features: Vec<FeatureConfiguration>,
}

impl Configuration {
    /// Find a feature by service and name.
    pub fn feature(&self, service: &str, name: &str) -> Option<&FeatureConfiguration> {
        self.features
            .iter()
            .find(|f| f.service == service && f.name == name)
    }
}

/// Keys of one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfiguration {
    /// Owning service name.
    pub service: String,
    /// Resolved service version.
    pub version: u32,
    /// Feature name.
    pub name: String,
    /// Keys in first-seen order.
    pub keys: Vec<KeyConfiguration>,
}

impl FeatureConfiguration {
    /// Find a key by name.
    pub fn key(&self, name: &str) -> Option<&KeyConfiguration> {
        self.keys.iter().find(|k| k.name == name)
    }
}

/// Applicable values of one key, least specific first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfiguration {
    /// Key name.
    pub name: String,
    /// Declared data type.
    pub data_type: DataType,
    /// Values with non-decreasing rank. Entry 0 is the base value.
    pub values: Vec<ResolvedValue>,
}

/// One emitted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedValue {
    /// Payload.
    pub data: String,
    /// Dimensions the request left open, by property name.
    pub variation: VariationNameMap,
    /// Specificity rank of the contributing candidate.
    pub rank: u64,
}

// =============================================================================
// CANDIDATES
// =============================================================================

/// A stored value that survived filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub data: String,
    pub residual: VariationMap,
    pub rank: u64,
    pub order: Vec<u32>,
}

/// Sorts candidates by `(rank, order)` and reduces them to the emitted chain.
///
/// Candidates with a non-empty residual are appended as they come. The first
/// candidate with an empty residual becomes the base entry and keeps its rank;
/// later ones overlay it, deep-merged for JSON keys and replaced otherwise.
/// Usually the base is the lowest-ranked candidate and therefore entry 0. When
/// a less specific candidate still has open dimensions it stays a separate
/// entry ahead of the base, so no candidate is relabelled or lost.
pub(crate) fn reduce_candidates(
    key_name: &str,
    data_type: DataType,
    mut candidates: Vec<Candidate>,
) -> EngineResult<Vec<Candidate>> {
    candidates.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.order.cmp(&b.order)));

    let mut output: Vec<Candidate> = Vec::with_capacity(candidates.len());
    let mut base: Option<usize> = None;
    let mut merged: Option<Value> = None;

    for candidate in candidates {
        if !candidate.residual.is_empty() {
            output.push(candidate);
            continue;
        }
        let Some(index) = base else {
            base = Some(output.len());
            output.push(candidate);
            continue;
        };
        if data_type.is_json() {
            let mut value = match merged.take() {
                Some(value) => value,
                None => parse_json(key_name, &output[index].data)?,
            };
            merge_into(&mut value, &parse_json(key_name, &candidate.data)?);
            merged = Some(value);
        } else {
            output[index].data = candidate.data;
        }
    }

    if let (Some(index), Some(value)) = (base, merged) {
        output[index].data = serde_json::to_string(&value)
            .map_err(|e| EngineError::Internal(format!("key '{key_name}': {e}")))?;
    }
    Ok(output)
}

fn parse_json(key_name: &str, data: &str) -> EngineResult<Value> {
    serde_json::from_str(data)
        .map_err(|e| EngineError::Internal(format!("key '{key_name}' holds invalid JSON: {e}")))
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Resolves configuration requests against a configuration store.
pub struct ConfigurationResolver {
    store: Arc<dyn ConfigurationStore>,
}

struct KeyGroup {
    name: String,
    data_type: DataType,
    rows: Vec<ConfigurationRow>,
}

struct FeatureGroup {
    version: usize,
    name: String,
    keys: IndexMap<KeyId, KeyGroup>,
}

impl ConfigurationResolver {
    /// Create a new resolver.
    pub fn new(store: Arc<dyn ConfigurationStore>) -> Self {
        Self { store }
    }

    /// Resolve a request.
    #[instrument(skip(self, hierarchy, contexts), fields(services = ?request.services))]
    pub async fn resolve(
        &self,
        hierarchy: &Hierarchy,
        contexts: &VariationContextService,
        request: &ConfigurationRequest,
    ) -> EngineResult<Configuration> {
        if request.services.is_empty() {
            return Err(EngineError::InvalidInput(
                "at least one service must be requested".into(),
            ));
        }

        let versions = self.resolve_versions(request).await?;
        let (changeset_id, at) = self.resolve_changeset(request).await?;
        let requested = hierarchy.variation_id_map(&request.variation)?;

        let version_ids: Vec<ServiceVersionId> = versions.iter().map(|v| v.id).collect();
        let rows = self
            .store
            .fetch_configuration_rows(&version_ids, at, request.changeset_id)
            .await?;
        debug!(rows = rows.len(), %at, "fetched configuration rows");

        let positions: HashMap<ServiceVersionId, usize> = versions
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id, i))
            .collect();
        let groups = group_rows(rows, &positions)?;

        let mut features = Vec::with_capacity(groups.len());
        for group in groups.into_values() {
            let version = &versions[group.version];
            let mut keys = Vec::with_capacity(group.keys.len());
            for key in group.keys.into_values() {
                keys.push(
                    self.resolve_key(hierarchy, contexts, version.service_type_id, &requested, key)
                        .await?,
                );
            }
            features.push(FeatureConfiguration {
                service: version.service_name.clone(),
                version: version.version,
                name: group.name,
                keys,
            });
        }

        Ok(Configuration {
            changeset_id,
            features,
        })
    }

    async fn resolve_versions(&self, request: &ConfigurationRequest) -> EngineResult<Vec<ServiceVersionRow>> {
        let mut versions: Vec<ServiceVersionRow> = Vec::with_capacity(request.services.len());
        for raw in &request.services {
            let specifier: ServiceVersionSpecifier = raw.parse().map_err(|e| match e {
                TraitError::InvalidInput(msg) => EngineError::InvalidInput(msg),
                other => EngineError::from(other),
            })?;
            let version = self
                .store
                .find_service_version(&specifier.service_name, specifier.selector)
                .await?
                .ok_or_else(|| EngineError::not_found("service version", &specifier))?;

            if request.production && !version.published {
                warn!(%specifier, version = version.version, "unpublished version in production request");
                return Err(EngineError::InvalidOperation(format!(
                    "service version {}:{} is not published",
                    version.service_name, version.version
                )));
            }
            if !versions.iter().any(|v| v.id == version.id) {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    async fn resolve_changeset(
        &self,
        request: &ConfigurationRequest,
    ) -> EngineResult<(ChangesetId, chrono::DateTime<Utc>)> {
        let now = Utc::now();
        if request.changeset_id.is_head() {
            let latest = self
                .store
                .latest_applied_changeset()
                .await?
                .map_or(ChangesetId::HEAD, |c| c.id);
            return Ok((latest, now));
        }

        let changeset = self
            .store
            .get_changeset(request.changeset_id)
            .await?
            .ok_or_else(|| EngineError::not_found("changeset", request.changeset_id))?;
        match changeset.applied_at {
            Some(applied_at) => Ok((changeset.id, applied_at)),
            None if request.production => {
                warn!(changeset_id = %changeset.id, "unapplied changeset in production request");
                Err(EngineError::InvalidOperation(format!(
                    "changeset {} is not applied",
                    changeset.id
                )))
            }
            None => Ok((changeset.id, now)),
        }
    }

    async fn resolve_key(
        &self,
        hierarchy: &Hierarchy,
        contexts: &VariationContextService,
        service_type_id: ServiceTypeId,
        requested: &VariationMap,
        key: KeyGroup,
    ) -> EngineResult<KeyConfiguration> {
        // A service type without linked properties ranks every candidate 0.
        let ranked = hierarchy.has_service_type(service_type_id);
        let mut candidates = Vec::with_capacity(key.rows.len());
        for row in key.rows {
            let variation = contexts
                .get_variation_context_values(hierarchy, row.variation_context_id)
                .await?;
            let Some(residual) = hierarchy.filter(&variation, requested) else {
                continue;
            };
            let (rank, order) = if ranked {
                (
                    hierarchy.rank(service_type_id, &variation)?,
                    hierarchy.order(service_type_id, &variation)?,
                )
            } else {
                (0, Vec::new())
            };
            candidates.push(Candidate {
                data: row.data,
                residual,
                rank,
                order,
            });
        }

        let reduced = reduce_candidates(&key.name, key.data_type, candidates)?;
        let values = reduced
            .into_iter()
            .map(|c| {
                Ok(ResolvedValue {
                    data: c.data,
                    variation: hierarchy.variation_string_map(&c.residual)?,
                    rank: c.rank,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(KeyConfiguration {
            name: key.name,
            data_type: key.data_type,
            values,
        })
    }
}

/// Groups rows by `(service version, feature)` and then key, preserving the
/// first-seen order of both.
fn group_rows(
    rows: Vec<ConfigurationRow>,
    positions: &HashMap<ServiceVersionId, usize>,
) -> EngineResult<IndexMap<(ServiceVersionId, FeatureId), FeatureGroup>> {
    let mut features: IndexMap<(ServiceVersionId, FeatureId), FeatureGroup> = IndexMap::new();
    for row in rows {
        let version = *positions.get(&row.service_version_id).ok_or_else(|| {
            EngineError::Internal(format!(
                "store returned a row for unrequested service version {}",
                row.service_version_id
            ))
        })?;
        let feature = features
            .entry((row.service_version_id, row.feature_id))
            .or_insert_with(|| FeatureGroup {
                version,
                name: row.feature_name.clone(),
                keys: IndexMap::new(),
            });
        feature
            .keys
            .entry(row.key_id)
            .or_insert_with(|| KeyGroup {
                name: row.key_name.clone(),
                data_type: row.data_type,
                rows: Vec::new(),
            })
            .rows
            .push(row);
    }
    Ok(features)
}
