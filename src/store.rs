use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::domain::{
    Category, CategoryId, Dataset, DatasetId, SampleId, SpectralSample, iso_timestamp,
};
use crate::error::SpectraError;

/// In-process row store. Every mutation runs inside [`Store::transaction`],
/// which works on a copy of the tables and only publishes it once the
/// commit-time constraint check passes.
#[derive(Debug)]
pub struct Store {
    path: Option<Utf8PathBuf>,
    tables: Mutex<Tables>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn open(path: Utf8PathBuf) -> Result<Self, SpectraError> {
        let tables = if path.as_std_path().exists() {
            let content = fs::read_to_string(path.as_std_path())
                .map_err(|err| SpectraError::Filesystem(format!("read {path}: {err}")))?;
            let snapshot: Snapshot = serde_json::from_str(&content)
                .map_err(|err| SpectraError::Storage(format!("corrupt snapshot {path}: {err}")))?;
            Tables::from(snapshot)
        } else {
            Tables::default()
        };
        tracing::debug!(path = %path, "opened store");
        Ok(Self {
            path: Some(path),
            tables: Mutex::new(tables),
        })
    }

    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, SpectraError> {
        let guard = self.lock()?;
        Ok(f(&guard))
    }

    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, SpectraError>,
    ) -> Result<T, SpectraError> {
        let mut guard = self.lock()?;
        let mut working = guard.clone();
        let value = f(&mut working)?;
        working.check_constraints()?;
        if let Some(path) = &self.path {
            write_snapshot(path, &working)?;
        }
        *guard = working;
        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, SpectraError> {
        self.tables
            .lock()
            .map_err(|_| SpectraError::Storage("store lock poisoned".to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Tables {
    categories: BTreeMap<CategoryId, Category>,
    datasets: BTreeMap<DatasetId, Dataset>,
    samples: BTreeMap<SampleId, SpectralSample>,
    sequences: Sequences,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Sequences {
    category: u64,
    dataset: u64,
    sample: u64,
}

impl Tables {
    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.values()
    }

    pub fn category(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(&id)
    }

    pub fn category_mut(&mut self, id: CategoryId) -> Option<&mut Category> {
        self.categories.get_mut(&id)
    }

    pub fn children_of(&self, id: CategoryId) -> impl Iterator<Item = &Category> {
        self.categories
            .values()
            .filter(move |category| category.parent_id == Some(id))
    }

    pub fn find_sibling(
        &self,
        name: &str,
        parent_id: Option<CategoryId>,
        excluding: Option<CategoryId>,
    ) -> Option<&Category> {
        self.categories.values().find(|category| {
            category.name == name
                && category.parent_id == parent_id
                && Some(category.id) != excluding
        })
    }

    pub fn next_category_id(&mut self) -> CategoryId {
        self.sequences.category += 1;
        CategoryId::new(self.sequences.category)
    }

    pub fn insert_category(&mut self, category: Category) {
        self.categories.insert(category.id, category);
    }

    pub fn remove_category(&mut self, id: CategoryId) -> Option<Category> {
        self.categories.remove(&id)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.values()
    }

    pub fn dataset(&self, id: DatasetId) -> Option<&Dataset> {
        self.datasets.get(&id)
    }

    pub fn dataset_mut(&mut self, id: DatasetId) -> Option<&mut Dataset> {
        self.datasets.get_mut(&id)
    }

    pub fn datasets_mut(&mut self) -> impl Iterator<Item = &mut Dataset> {
        self.datasets.values_mut()
    }

    pub fn next_dataset_id(&mut self) -> DatasetId {
        self.sequences.dataset += 1;
        DatasetId::new(self.sequences.dataset)
    }

    pub fn insert_dataset(&mut self, dataset: Dataset) {
        self.datasets.insert(dataset.id, dataset);
    }

    /// Removes the dataset together with all of its samples.
    pub fn remove_dataset(&mut self, id: DatasetId) -> Option<Dataset> {
        let removed = self.datasets.remove(&id)?;
        self.samples.retain(|_, sample| sample.dataset_id != id);
        Some(removed)
    }

    pub fn samples_of(&self, dataset_id: DatasetId) -> impl Iterator<Item = &SpectralSample> {
        self.samples
            .values()
            .filter(move |sample| sample.dataset_id == dataset_id)
    }

    pub fn sample_count(&self, dataset_id: DatasetId) -> u64 {
        self.samples_of(dataset_id).count() as u64
    }

    pub fn insert_sample(
        &mut self,
        dataset_id: DatasetId,
        sample_name: String,
        sample_label: Option<String>,
        wavelengths: Vec<f64>,
        intensities: Vec<f64>,
    ) -> SampleId {
        self.sequences.sample += 1;
        let id = SampleId::new(self.sequences.sample);
        self.samples.insert(
            id,
            SpectralSample {
                id,
                dataset_id,
                sample_name,
                sample_label,
                wavelengths,
                intensities,
                created_at: iso_timestamp(),
            },
        );
        id
    }

    fn check_constraints(&self) -> Result<(), SpectraError> {
        let mut siblings = HashSet::new();
        for category in self.categories.values() {
            if let Some(parent_id) = category.parent_id {
                if !self.categories.contains_key(&parent_id) {
                    return Err(SpectraError::CategoryHasChildren(parent_id));
                }
            }
            if !siblings.insert((category.parent_id, category.name.as_str())) {
                return Err(SpectraError::DuplicateCategory {
                    name: category.name.clone(),
                    parent_id: category.parent_id,
                });
            }
        }

        for dataset in self.datasets.values() {
            if let Some(category_id) = dataset.category_id {
                if !self.categories.contains_key(&category_id) {
                    return Err(SpectraError::CategoryNotFound(category_id));
                }
            }
        }

        for sample in self.samples.values() {
            if !self.datasets.contains_key(&sample.dataset_id) {
                return Err(SpectraError::DatasetNotFound(sample.dataset_id));
            }
            if sample.wavelengths.len() != sample.intensities.len() {
                return Err(SpectraError::SampleLengthMismatch {
                    sample: sample.sample_name.clone(),
                    wavelengths: sample.wavelengths.len(),
                    intensities: sample.intensities.len(),
                });
            }
            if !sample
                .wavelengths
                .iter()
                .chain(&sample.intensities)
                .all(|value| value.is_finite())
            {
                return Err(SpectraError::NonFiniteValue {
                    sample: sample.sample_name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    sequences: Sequences,
    #[serde(default)]
    categories: Vec<Category>,
    #[serde(default)]
    datasets: Vec<Dataset>,
    #[serde(default)]
    samples: Vec<SpectralSample>,
}

impl From<Snapshot> for Tables {
    fn from(value: Snapshot) -> Self {
        Self {
            categories: value
                .categories
                .into_iter()
                .map(|category| (category.id, category))
                .collect(),
            datasets: value
                .datasets
                .into_iter()
                .map(|dataset| (dataset.id, dataset))
                .collect(),
            samples: value
                .samples
                .into_iter()
                .map(|sample| (sample.id, sample))
                .collect(),
            sequences: value.sequences,
        }
    }
}

impl From<&Tables> for Snapshot {
    fn from(value: &Tables) -> Self {
        Self {
            sequences: value.sequences,
            categories: value.categories.values().cloned().collect(),
            datasets: value.datasets.values().cloned().collect(),
            samples: value.samples.values().cloned().collect(),
        }
    }
}

fn write_snapshot(path: &Utf8Path, tables: &Tables) -> Result<(), SpectraError> {
    let parent = path
        .parent()
        .ok_or_else(|| SpectraError::Filesystem(format!("invalid store path: {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| SpectraError::Filesystem(err.to_string()))?;
    let content = serde_json::to_vec_pretty(&Snapshot::from(tables))
        .map_err(|err| SpectraError::Storage(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix("spectra-repo-store")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SpectraError::Filesystem(err.to_string()))?;
    temp.write_all(&content)
        .map_err(|err| SpectraError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| SpectraError::Filesystem(err.to_string()))?;
    Ok(())
}

/// Writes bytes next to their final location and renames them into place.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SpectraError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SpectraError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| SpectraError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| SpectraError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn category(tables: &mut Tables, name: &str, parent_id: Option<CategoryId>) -> CategoryId {
        let id = tables.next_category_id();
        tables.insert_category(Category {
            id,
            name: name.to_string(),
            description: None,
            parent_id,
            created_at: iso_timestamp(),
        });
        id
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = Store::in_memory();
        store
            .transaction(|tables| {
                category(tables, "Visible", None);
                Ok(())
            })
            .unwrap();

        let err = store
            .transaction(|tables| {
                category(tables, "NIR", None);
                category(tables, "Visible", None);
                Ok(())
            })
            .unwrap_err();
        assert_matches!(err, SpectraError::DuplicateCategory { .. });

        let names = store
            .read(|tables| {
                tables
                    .categories()
                    .map(|category| category.name.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap();
        assert_eq!(names, vec!["Visible".to_string()]);
    }

    #[test]
    fn orphaned_child_is_rejected_at_commit() {
        let store = Store::in_memory();
        let root = store
            .transaction(|tables| {
                let root = category(tables, "Raman", None);
                category(tables, "SERS", Some(root));
                Ok(root)
            })
            .unwrap();

        let err = store
            .transaction(|tables| {
                tables.remove_category(root);
                Ok(())
            })
            .unwrap_err();
        assert_matches!(err, SpectraError::CategoryHasChildren(id) if id == root);
    }
}
