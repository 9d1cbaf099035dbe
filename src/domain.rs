use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpectraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(u64);

impl CategoryId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CategoryId {
    type Err = SpectraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_id(value).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(u64);

impl DatasetId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetId {
    type Err = SpectraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_id(value).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(u64);

impl SampleId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = SpectraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_id(value).map(Self)
    }
}

fn parse_id(value: &str) -> Result<u64, SpectraError> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| SpectraError::InvalidId(value.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub description: Option<String>,
    pub category_id: Option<CategoryId>,
    pub owner_id: UserId,
    pub spectral_type: Option<String>,
    pub wavelength_range: Option<String>,
    pub wavelength_unit: String,
    pub num_samples: u64,
    pub num_bands: Option<u64>,
    pub file_format: Option<String>,
    pub file_size: Option<u64>,
    pub file_path: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub extra_metadata: BTreeMap<String, serde_json::Value>,
    pub download_count: u64,
    pub view_count: u64,
    pub is_public: bool,
    pub is_verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralSample {
    pub id: SampleId,
    pub dataset_id: DatasetId,
    pub sample_name: String,
    pub sample_label: Option<String>,
    pub wavelengths: Vec<f64>,
    pub intensities: Vec<f64>,
    pub created_at: String,
}

/// The authenticated caller, as established by whatever front end sits on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: UserId,
    pub is_superuser: bool,
}

impl Principal {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            is_superuser: false,
        }
    }

    pub fn superuser(user_id: UserId) -> Self {
        Self {
            user_id,
            is_superuser: true,
        }
    }

    pub fn can_modify(&self, dataset: &Dataset) -> bool {
        dataset.owner_id == self.user_id || self.is_superuser
    }

    pub fn ensure_can_modify(&self, dataset: &Dataset) -> Result<(), SpectraError> {
        if self.can_modify(dataset) {
            Ok(())
        } else {
            Err(SpectraError::PermissionDenied {
                user: self.user_id,
                dataset: dataset.id,
            })
        }
    }
}

pub(crate) fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_ids() {
        let id: CategoryId = " 12 ".parse().unwrap();
        assert_eq!(id, CategoryId::new(12));

        let err = "0".parse::<DatasetId>().unwrap_err();
        assert_matches!(err, SpectraError::InvalidId(_));

        let err = "abc".parse::<UserId>().unwrap_err();
        assert_matches!(err, SpectraError::InvalidId(_));
    }
}
