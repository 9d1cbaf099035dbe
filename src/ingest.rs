use std::fs;

use camino::Utf8Path;
use serde::Serialize;

use crate::config::Settings;
use crate::domain::{DatasetId, Principal};
use crate::error::SpectraError;
use crate::store::{Store, Tables, write_bytes_atomic};

/// Header names that mark the sample-name column, highest priority first.
pub const DESIGNATOR_PRIORITY: [&str; 3] = ["sample_name", "label", "name"];

const LABEL_HEADER: &str = "label";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn parse(content: &[u8]) -> Result<Self, SpectraError> {
        let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
        let mut records = read_records(content)?.into_iter();
        let header = records.next().unwrap_or_default();
        Ok(Self {
            header,
            rows: records.collect(),
        })
    }

    pub fn from_rows<S: AsRef<str>>(header: &[S], rows: &[Vec<S>]) -> Self {
        Self {
            header: header.iter().map(|cell| cell.as_ref().to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| cell.as_ref().to_string()).collect())
                .collect(),
        }
    }

    fn ensure_not_empty(&self) -> Result<(), SpectraError> {
        if self.header.is_empty() || self.rows.is_empty() {
            return Err(SpectraError::EmptyTable);
        }
        Ok(())
    }
}

fn read_records(content: &[u8]) -> Result<Vec<Vec<String>>, SpectraError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);
    reader
        .records()
        .map(|record| {
            record
                .map(|record| record.iter().map(str::to_string).collect())
                .map_err(|err| SpectraError::MalformedTable(err.to_string()))
        })
        .collect()
}

/// Picks the sample-name column by fixed priority rather than by position.
pub fn designator_column(header: &[String]) -> Option<usize> {
    DESIGNATOR_PRIORITY
        .iter()
        .find_map(|name| header.iter().position(|cell| cell.trim() == *name))
}

#[derive(Debug, Clone, PartialEq)]
struct ColumnLayout {
    name_column: Option<usize>,
    label_column: Option<usize>,
    wavelength_columns: Vec<usize>,
    wavelengths: Vec<f64>,
}

impl ColumnLayout {
    fn from_header(header: &[String]) -> Result<Self, SpectraError> {
        let name_column = designator_column(header);
        let label_column = name_column
            .filter(|index| header[*index].trim() == DESIGNATOR_PRIORITY[0])
            .and_then(|_| header.iter().position(|cell| cell.trim() == LABEL_HEADER));

        let wavelength_columns = (0..header.len())
            .filter(|index| Some(*index) != name_column && Some(*index) != label_column)
            .collect::<Vec<_>>();
        let wavelengths = wavelength_columns
            .iter()
            .map(|index| {
                parse_float(&header[*index]).ok_or_else(|| SpectraError::NonNumericHeader {
                    column: index + 1,
                    value: header[*index].clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name_column,
            label_column,
            wavelength_columns,
            wavelengths,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedSample {
    name: String,
    label: Option<String>,
    intensities: Vec<f64>,
}

fn parse_float(cell: &str) -> Option<f64> {
    cell.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

fn parse_intensities(
    row: &[String],
    columns: &[usize],
    row_number: usize,
) -> Result<Vec<f64>, SpectraError> {
    columns
        .iter()
        .map(|index| {
            parse_float(&row[*index]).ok_or_else(|| SpectraError::InvalidIntensity {
                row: row_number,
                column: index + 1,
                value: row[*index].clone(),
            })
        })
        .collect()
}

fn parse_wavelength_columns(
    table: &Table,
) -> Result<(Vec<f64>, Vec<ParsedSample>), SpectraError> {
    table.ensure_not_empty()?;
    let layout = ColumnLayout::from_header(&table.header)?;

    let mut samples = Vec::with_capacity(table.rows.len());
    for (idx, row) in table.rows.iter().enumerate() {
        let row_number = idx + 1;
        if row.len() != table.header.len() {
            return Err(SpectraError::RowLengthMismatch {
                row: row_number,
                expected: table.header.len(),
                found: row.len(),
            });
        }
        let intensities = parse_intensities(row, &layout.wavelength_columns, row_number)?;
        let (name, label) = match layout.name_column {
            Some(name_column) => {
                let name = row[name_column].trim().to_string();
                let label = match layout.label_column {
                    Some(label_column) => {
                        Some(row[label_column].trim().to_string()).filter(|label| !label.is_empty())
                    }
                    None => Some(name.clone()),
                };
                (name, label)
            }
            None => (format!("sample_{idx}"), None),
        };
        samples.push(ParsedSample {
            name,
            label,
            intensities,
        });
    }
    Ok((layout.wavelengths, samples))
}

fn parse_labeled(
    table: &Table,
    label: &str,
) -> Result<(Vec<f64>, Vec<ParsedSample>, Vec<usize>), SpectraError> {
    table.ensure_not_empty()?;
    let all_columns = (0..table.header.len()).collect::<Vec<_>>();
    let wavelengths = all_columns
        .iter()
        .map(|index| {
            parse_float(&table.header[*index]).ok_or_else(|| SpectraError::NonNumericHeader {
                column: index + 1,
                value: table.header[*index].clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut samples = Vec::with_capacity(table.rows.len());
    let mut skipped = Vec::new();
    for (idx, row) in table.rows.iter().enumerate() {
        let row_number = idx + 1;
        if row.len() != wavelengths.len() {
            tracing::debug!(
                row = row_number,
                expected = wavelengths.len(),
                found = row.len(),
                "skipping row with wrong cell count"
            );
            skipped.push(row_number);
            continue;
        }
        match parse_intensities(row, &all_columns, row_number) {
            Ok(intensities) => samples.push(ParsedSample {
                name: format!("{label}_{row_number}"),
                label: Some(label.to_string()),
                intensities,
            }),
            Err(err) => {
                tracing::debug!(row = row_number, error = %err, "skipping unparsable row");
                skipped.push(row_number);
            }
        }
    }
    Ok((wavelengths, samples, skipped))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplesUpload {
    pub dataset_id: DatasetId,
    pub samples_created: u64,
    pub num_bands: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabeledUpload {
    pub dataset_id: DatasetId,
    pub samples_created: u64,
    pub label: String,
    pub total_dataset_samples: u64,
    pub skipped_rows: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawUpload {
    pub dataset_id: DatasetId,
    pub file_path: String,
    pub file_size: u64,
}

pub struct Ingestor<'a> {
    store: &'a Store,
    settings: &'a Settings,
}

impl<'a> Ingestor<'a> {
    pub fn new(store: &'a Store, settings: &'a Settings) -> Self {
        Self { store, settings }
    }

    /// Wavelength-columns mode: all rows land or none do, and the dataset
    /// counters describe this upload alone.
    pub fn upload_samples_table(
        &self,
        principal: &Principal,
        dataset_id: DatasetId,
        table: &Table,
    ) -> Result<SamplesUpload, SpectraError> {
        let result = self.store.transaction(|tables| {
            ensure_writable(tables, principal, dataset_id)?;
            let (wavelengths, samples) = parse_wavelength_columns(table)?;
            let samples_created = samples.len() as u64;
            let num_bands = wavelengths.len() as u64;
            insert_samples(tables, dataset_id, &wavelengths, samples);

            let dataset = tables
                .dataset_mut(dataset_id)
                .ok_or(SpectraError::DatasetNotFound(dataset_id))?;
            dataset.num_samples = samples_created;
            dataset.num_bands = Some(num_bands);
            dataset.updated_at = crate::domain::iso_timestamp();
            Ok(SamplesUpload {
                dataset_id,
                samples_created,
                num_bands,
            })
        })?;
        tracing::info!(
            dataset = %dataset_id,
            samples = result.samples_created,
            bands = result.num_bands,
            "ingested sample table"
        );
        Ok(result)
    }

    /// Pre-labeled mode: malformed rows are dropped, and `num_samples` is
    /// recounted from everything stored for the dataset.
    pub fn upload_labeled_file(
        &self,
        principal: &Principal,
        dataset_id: DatasetId,
        label: &str,
        table: &Table,
    ) -> Result<LabeledUpload, SpectraError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(SpectraError::EmptyLabel);
        }
        let result = self.store.transaction(|tables| {
            ensure_writable(tables, principal, dataset_id)?;
            let (wavelengths, samples, skipped_rows) = parse_labeled(table, label)?;
            let samples_created = samples.len() as u64;
            insert_samples(tables, dataset_id, &wavelengths, samples);

            let total_dataset_samples = tables.sample_count(dataset_id);
            let dataset = tables
                .dataset_mut(dataset_id)
                .ok_or(SpectraError::DatasetNotFound(dataset_id))?;
            dataset.num_samples = total_dataset_samples;
            dataset.num_bands = Some(wavelengths.len() as u64);
            dataset.updated_at = crate::domain::iso_timestamp();
            Ok(LabeledUpload {
                dataset_id,
                samples_created,
                label: label.to_string(),
                total_dataset_samples,
                skipped_rows,
            })
        })?;
        tracing::info!(
            dataset = %dataset_id,
            label = %result.label,
            samples = result.samples_created,
            skipped = result.skipped_rows.len(),
            "ingested labeled file"
        );
        Ok(result)
    }

    pub fn attach_raw_file(
        &self,
        principal: &Principal,
        dataset_id: DatasetId,
        file_name: &str,
        content: &[u8],
    ) -> Result<RawUpload, SpectraError> {
        self.store
            .read(|tables| ensure_writable(tables, principal, dataset_id))??;

        let file_size = content.len() as u64;
        if file_size > self.settings.max_upload_size {
            return Err(SpectraError::FileTooLarge {
                size: file_size,
                limit: self.settings.max_upload_size,
            });
        }

        let extension = Utf8Path::new(file_name)
            .extension()
            .map(|ext| ext.to_string());
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let stored_name = match &extension {
            Some(ext) => format!("dataset_{dataset_id}_{timestamp}.{ext}"),
            None => format!("dataset_{dataset_id}_{timestamp}"),
        };
        let path = self.settings.upload_dir.join(&stored_name);
        write_bytes_atomic(&path, content)?;

        let row_count = match &extension {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => match read_records(content) {
                Ok(records) => Some(records.len().saturating_sub(1) as u64),
                Err(err) => {
                    tracing::warn!(file = %stored_name, error = %err, "could not count csv rows");
                    None
                }
            },
            _ => None,
        };

        let committed = self.store.transaction(|tables| {
            ensure_writable(tables, principal, dataset_id)?;
            let dataset = tables
                .dataset_mut(dataset_id)
                .ok_or(SpectraError::DatasetNotFound(dataset_id))?;
            dataset.file_path = Some(stored_name.clone());
            dataset.file_size = Some(file_size);
            dataset.file_format = extension.clone();
            if let Some(rows) = row_count {
                dataset.num_samples = rows;
            }
            dataset.updated_at = crate::domain::iso_timestamp();
            Ok(())
        });
        if let Err(err) = committed {
            if let Err(remove_err) = fs::remove_file(path.as_std_path()) {
                tracing::warn!(
                    path = %path,
                    error = %remove_err,
                    "failed to remove orphaned upload"
                );
            }
            return Err(err);
        }

        tracing::info!(
            dataset = %dataset_id,
            file = %stored_name,
            size = file_size,
            "attached raw file"
        );
        Ok(RawUpload {
            dataset_id,
            file_path: stored_name,
            file_size,
        })
    }
}

fn ensure_writable(
    tables: &Tables,
    principal: &Principal,
    dataset_id: DatasetId,
) -> Result<(), SpectraError> {
    let dataset = tables
        .dataset(dataset_id)
        .ok_or(SpectraError::DatasetNotFound(dataset_id))?;
    principal.ensure_can_modify(dataset)
}

fn insert_samples(
    tables: &mut Tables,
    dataset_id: DatasetId,
    wavelengths: &[f64],
    samples: Vec<ParsedSample>,
) {
    for sample in samples {
        tables.insert_sample(
            dataset_id,
            sample.name,
            sample.label,
            wavelengths.to_vec(),
            sample.intensities,
        );
    }
}
