use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::{CategoryId, DatasetId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Forbidden,
    Internal,
}

#[derive(Debug, Error, Diagnostic)]
pub enum SpectraError {
    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("category not found: {0}")]
    CategoryNotFound(CategoryId),

    #[error("parent category not found: {0}")]
    ParentCategoryNotFound(CategoryId),

    #[error("dataset not found: {0}")]
    DatasetNotFound(DatasetId),

    #[error("dataset {0} has no downloadable data")]
    NothingToExport(DatasetId),

    #[error("category {name:?} already exists under {}", parent_label(.parent_id))]
    #[diagnostic(help("sibling categories must have distinct names"))]
    DuplicateCategory {
        name: String,
        parent_id: Option<CategoryId>,
    },

    #[error("category {0} has subcategories")]
    #[diagnostic(help("delete or move the subcategories first"))]
    CategoryHasChildren(CategoryId),

    #[error("category {id} cannot be moved under its own subtree ({parent_id})")]
    CategoryCycle {
        id: CategoryId,
        parent_id: CategoryId,
    },

    #[error("category name must not be empty")]
    EmptyCategoryName,

    #[error("table must have at least a header and one data row")]
    EmptyTable,

    #[error("malformed table: {0}")]
    MalformedTable(String),

    #[error("column headers must be numeric wavelengths: column {column} is {value:?}")]
    NonNumericHeader { column: usize, value: String },

    #[error("row {row}, column {column}: {value:?} is not a number")]
    InvalidIntensity {
        row: usize,
        column: usize,
        value: String,
    },

    #[error("row {row} has {found} cells, header has {expected}")]
    RowLengthMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("sample {sample:?} has {wavelengths} wavelengths but {intensities} intensities")]
    SampleLengthMismatch {
        sample: String,
        wavelengths: usize,
        intensities: usize,
    },

    #[error("sample {sample:?} holds a non-finite value")]
    NonFiniteValue { sample: String },

    #[error("label must not be empty")]
    EmptyLabel,

    #[error("file too large: {size} bytes (maximum {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("user {user} may not modify dataset {dataset}")]
    PermissionDenied { user: UserId, dataset: DatasetId },

    #[error("superuser privileges required")]
    SuperuserRequired,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SpectraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpectraError::CategoryNotFound(_)
            | SpectraError::ParentCategoryNotFound(_)
            | SpectraError::DatasetNotFound(_)
            | SpectraError::NothingToExport(_) => ErrorKind::NotFound,
            SpectraError::DuplicateCategory { .. } | SpectraError::CategoryHasChildren(_) => {
                ErrorKind::Conflict
            }
            SpectraError::InvalidId(_)
            | SpectraError::CategoryCycle { .. }
            | SpectraError::EmptyCategoryName
            | SpectraError::EmptyTable
            | SpectraError::MalformedTable(_)
            | SpectraError::NonNumericHeader { .. }
            | SpectraError::InvalidIntensity { .. }
            | SpectraError::RowLengthMismatch { .. }
            | SpectraError::SampleLengthMismatch { .. }
            | SpectraError::NonFiniteValue { .. }
            | SpectraError::EmptyLabel
            | SpectraError::FileTooLarge { .. } => ErrorKind::Validation,
            SpectraError::PermissionDenied { .. } | SpectraError::SuperuserRequired => {
                ErrorKind::Forbidden
            }
            SpectraError::ConfigRead(_)
            | SpectraError::ConfigParse(_)
            | SpectraError::Storage(_)
            | SpectraError::Filesystem(_) => ErrorKind::Internal,
        }
    }
}

fn parent_label(parent_id: &Option<CategoryId>) -> String {
    match parent_id {
        Some(id) => format!("parent {id}"),
        None => "the root".to_string(),
    }
}
