use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{
    CategoryId, Dataset, DatasetId, Principal, SpectralSample, UserId, iso_timestamp,
};
use crate::error::SpectraError;
use crate::store::{Store, Tables};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_SAMPLE_PAGE_SIZE: usize = 100;
pub const MAX_SAMPLE_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub spectral_type: Option<String>,
    #[serde(default)]
    pub wavelength_range: Option<String>,
    #[serde(default = "default_wavelength_unit")]
    pub wavelength_unit: String,
    #[serde(default)]
    pub num_bands: Option<u64>,
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extra_metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub is_public: bool,
}

impl DatasetDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            category_id: None,
            spectral_type: None,
            wavelength_range: None,
            wavelength_unit: default_wavelength_unit(),
            num_bands: None,
            file_format: None,
            tags: Vec::new(),
            extra_metadata: BTreeMap::new(),
            is_public: true,
        }
    }
}

fn default_wavelength_unit() -> String {
    "nm".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub spectral_type: Option<String>,
    #[serde(default)]
    pub wavelength_range: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub extra_metadata: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct DatasetFilter {
    pub search: Option<String>,
    pub category_id: Option<CategoryId>,
    pub spectral_type: Option<String>,
    pub tags: Vec<String>,
    pub min_samples: Option<u64>,
    pub max_samples: Option<u64>,
    pub is_verified: Option<bool>,
    pub owner_id: Option<UserId>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl DatasetFilter {
    fn matches(&self, dataset: &Dataset) -> bool {
        if !dataset.is_public {
            return false;
        }
        if let Some(search) = &self.search {
            let in_name = dataset.name.contains(search.as_str());
            let in_description = dataset
                .description
                .as_deref()
                .is_some_and(|description| description.contains(search.as_str()));
            if !in_name && !in_description {
                return false;
            }
        }
        if self.category_id.is_some() && dataset.category_id != self.category_id {
            return false;
        }
        if self.spectral_type.is_some() && dataset.spectral_type != self.spectral_type {
            return false;
        }
        if !self.tags.iter().all(|tag| dataset.tags.contains(tag)) {
            return false;
        }
        if self.min_samples.is_some_and(|min| dataset.num_samples < min) {
            return false;
        }
        if self.max_samples.is_some_and(|max| dataset.num_samples > max) {
            return false;
        }
        if self
            .is_verified
            .is_some_and(|verified| dataset.is_verified != verified)
        {
            return false;
        }
        if self.owner_id.is_some_and(|owner| dataset.owner_id != owner) {
            return false;
        }
        true
    }
}

pub struct DatasetRegistry<'a> {
    store: &'a Store,
}

impl<'a> DatasetRegistry<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn create(
        &self,
        principal: &Principal,
        draft: DatasetDraft,
    ) -> Result<Dataset, SpectraError> {
        let dataset = self.store.transaction(|tables| {
            ensure_category(tables, draft.category_id)?;
            let now = iso_timestamp();
            let dataset = Dataset {
                id: tables.next_dataset_id(),
                name: draft.name,
                description: draft.description,
                category_id: draft.category_id,
                owner_id: principal.user_id,
                spectral_type: draft.spectral_type,
                wavelength_range: draft.wavelength_range,
                wavelength_unit: draft.wavelength_unit,
                num_samples: 0,
                num_bands: draft.num_bands,
                file_format: draft.file_format,
                file_size: None,
                file_path: None,
                tags: draft.tags,
                extra_metadata: draft.extra_metadata,
                download_count: 0,
                view_count: 0,
                is_public: draft.is_public,
                is_verified: false,
                created_at: now.clone(),
                updated_at: now,
            };
            tables.insert_dataset(dataset.clone());
            Ok(dataset)
        })?;
        tracing::info!(id = %dataset.id, owner = %dataset.owner_id, "created dataset");
        Ok(dataset)
    }

    pub fn get(&self, id: DatasetId) -> Result<Dataset, SpectraError> {
        self.store
            .read(|tables| tables.dataset(id).cloned())?
            .ok_or(SpectraError::DatasetNotFound(id))
    }

    pub fn view(&self, id: DatasetId) -> Result<Dataset, SpectraError> {
        self.store.transaction(|tables| {
            let dataset = tables
                .dataset_mut(id)
                .ok_or(SpectraError::DatasetNotFound(id))?;
            dataset.view_count += 1;
            Ok(dataset.clone())
        })
    }

    pub fn update(
        &self,
        principal: &Principal,
        id: DatasetId,
        patch: DatasetPatch,
    ) -> Result<Dataset, SpectraError> {
        let dataset = self.store.transaction(|tables| {
            let current = tables
                .dataset(id)
                .ok_or(SpectraError::DatasetNotFound(id))?;
            principal.ensure_can_modify(current)?;
            ensure_category(tables, patch.category_id)?;

            let dataset = tables
                .dataset_mut(id)
                .ok_or(SpectraError::DatasetNotFound(id))?;
            if let Some(name) = patch.name {
                dataset.name = name;
            }
            if let Some(description) = patch.description {
                dataset.description = Some(description);
            }
            if let Some(category_id) = patch.category_id {
                dataset.category_id = Some(category_id);
            }
            if let Some(spectral_type) = patch.spectral_type {
                dataset.spectral_type = Some(spectral_type);
            }
            if let Some(wavelength_range) = patch.wavelength_range {
                dataset.wavelength_range = Some(wavelength_range);
            }
            if let Some(tags) = patch.tags {
                dataset.tags = tags;
            }
            if let Some(extra_metadata) = patch.extra_metadata {
                dataset.extra_metadata = extra_metadata;
            }
            if let Some(is_public) = patch.is_public {
                dataset.is_public = is_public;
            }
            dataset.updated_at = iso_timestamp();
            Ok(dataset.clone())
        })?;
        tracing::info!(id = %dataset.id, "updated dataset");
        Ok(dataset)
    }

    pub fn set_verified(
        &self,
        principal: &Principal,
        id: DatasetId,
        verified: bool,
    ) -> Result<Dataset, SpectraError> {
        if !principal.is_superuser {
            return Err(SpectraError::SuperuserRequired);
        }
        self.store.transaction(|tables| {
            let dataset = tables
                .dataset_mut(id)
                .ok_or(SpectraError::DatasetNotFound(id))?;
            dataset.is_verified = verified;
            dataset.updated_at = iso_timestamp();
            Ok(dataset.clone())
        })
    }

    pub fn delete(&self, principal: &Principal, id: DatasetId) -> Result<(), SpectraError> {
        self.store.transaction(|tables| {
            let dataset = tables
                .dataset(id)
                .ok_or(SpectraError::DatasetNotFound(id))?;
            principal.ensure_can_modify(dataset)?;
            tables.remove_dataset(id);
            Ok(())
        })?;
        tracing::info!(id = %id, "deleted dataset");
        Ok(())
    }

    pub fn list(&self, filter: &DatasetFilter) -> Result<Vec<Dataset>, SpectraError> {
        let limit = clamp_limit(filter.limit, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
        self.store.read(|tables| {
            tables
                .datasets()
                .filter(|dataset| filter.matches(dataset))
                .skip(filter.skip)
                .take(limit)
                .cloned()
                .collect()
        })
    }

    pub fn samples(
        &self,
        id: DatasetId,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<SpectralSample>, SpectraError> {
        let limit = clamp_limit(limit, DEFAULT_SAMPLE_PAGE_SIZE, MAX_SAMPLE_PAGE_SIZE);
        self.store
            .read(|tables| {
                tables.dataset(id)?;
                Some(
                    tables
                        .samples_of(id)
                        .skip(skip)
                        .take(limit)
                        .cloned()
                        .collect(),
                )
            })?
            .ok_or(SpectraError::DatasetNotFound(id))
    }
}

fn ensure_category(tables: &Tables, category_id: Option<CategoryId>) -> Result<(), SpectraError> {
    match category_id {
        Some(id) if tables.category(id).is_none() => Err(SpectraError::CategoryNotFound(id)),
        _ => Ok(()),
    }
}

fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}
