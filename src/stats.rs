use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::Dataset;
use crate::error::SpectraError;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryStats {
    pub total_datasets: u64,
    pub total_samples: u64,
    pub total_downloads: u64,
    pub datasets_by_category: BTreeMap<String, u64>,
    pub datasets_by_type: BTreeMap<String, u64>,
}

pub struct Statistics<'a> {
    store: &'a Store,
}

impl<'a> Statistics<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn summary(&self) -> Result<RepositoryStats, SpectraError> {
        self.store.read(|tables| {
            let mut stats = RepositoryStats {
                total_datasets: 0,
                total_samples: 0,
                total_downloads: 0,
                datasets_by_category: BTreeMap::new(),
                datasets_by_type: BTreeMap::new(),
            };
            for dataset in tables.datasets() {
                stats.total_datasets += 1;
                stats.total_samples += dataset.num_samples;
                stats.total_downloads += dataset.download_count;
                if let Some(category) = dataset.category_id.and_then(|id| tables.category(id)) {
                    *stats
                        .datasets_by_category
                        .entry(category.name.clone())
                        .or_default() += 1;
                }
                if let Some(spectral_type) = dataset
                    .spectral_type
                    .as_deref()
                    .filter(|value| !value.is_empty())
                {
                    *stats
                        .datasets_by_type
                        .entry(spectral_type.to_string())
                        .or_default() += 1;
                }
            }
            stats
        })
    }

    /// Public datasets ranked by views plus twice their downloads.
    pub fn trending(&self, limit: usize) -> Result<Vec<Dataset>, SpectraError> {
        self.store.read(|tables| {
            let mut public = tables
                .datasets()
                .filter(|dataset| dataset.is_public)
                .collect::<Vec<_>>();
            public.sort_by(|a, b| {
                trending_score(b)
                    .cmp(&trending_score(a))
                    .then_with(|| a.id.cmp(&b.id))
            });
            public.into_iter().take(limit).cloned().collect()
        })
    }
}

fn trending_score(dataset: &Dataset) -> u64 {
    dataset.view_count + dataset.download_count * 2
}
