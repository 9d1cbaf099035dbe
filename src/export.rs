use serde::Serialize;

use crate::domain::{Dataset, DatasetId, SpectralSample};
use crate::error::SpectraError;
use crate::store::Store;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetExport {
    Table(TableExport),
    File(FileReference),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableExport {
    pub file_name: String,
    pub content_type: String,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl TableExport {
    /// RFC 5987 attachment header so non-ASCII dataset names survive.
    pub fn content_disposition(&self) -> String {
        format!(
            "attachment; filename*=UTF-8''{}",
            urlencoding::encode(&self.file_name)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReference {
    pub download_url: String,
    pub file_name: String,
    pub file_size: Option<u64>,
}

pub struct Exporter<'a> {
    store: &'a Store,
}

impl<'a> Exporter<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn export_dataset(&self, dataset_id: DatasetId) -> Result<DatasetExport, SpectraError> {
        let export = self.store.transaction(|tables| {
            let dataset = tables
                .dataset(dataset_id)
                .ok_or(SpectraError::DatasetNotFound(dataset_id))?;
            let samples = tables.samples_of(dataset_id).collect::<Vec<_>>();

            let export = if !samples.is_empty() {
                DatasetExport::Table(TableExport {
                    file_name: format!("{}.csv", dataset.name),
                    content_type: "text/csv".to_string(),
                    content: encode_samples(&samples)?,
                })
            } else if let Some(reference) = file_reference(dataset) {
                DatasetExport::File(reference)
            } else {
                return Err(SpectraError::NothingToExport(dataset_id));
            };

            let dataset = tables
                .dataset_mut(dataset_id)
                .ok_or(SpectraError::DatasetNotFound(dataset_id))?;
            dataset.download_count += 1;
            Ok(export)
        })?;
        tracing::info!(dataset = %dataset_id, "exported dataset");
        Ok(export)
    }
}

fn file_reference(dataset: &Dataset) -> Option<FileReference> {
    let file_path = dataset.file_path.as_ref()?;
    Some(FileReference {
        download_url: format!("/uploads/{file_path}"),
        file_name: dataset.name.clone(),
        file_size: dataset.file_size,
    })
}

fn encode_samples(samples: &[&SpectralSample]) -> Result<Vec<u8>, SpectraError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(UTF8_BOM.to_vec());

    let mut header = vec!["sample_name".to_string(), "label".to_string()];
    if let Some(first) = samples.first() {
        header.extend(first.wavelengths.iter().map(|value| value.to_string()));
    }
    writer
        .write_record(&header)
        .map_err(|err| SpectraError::Storage(err.to_string()))?;

    for sample in samples {
        let name = if sample.sample_name.is_empty() {
            format!("sample_{}", sample.id)
        } else {
            sample.sample_name.clone()
        };
        let mut row = vec![name, sample.sample_label.clone().unwrap_or_default()];
        row.extend(sample.intensities.iter().map(|value| value.to_string()));
        writer
            .write_record(&row)
            .map_err(|err| SpectraError::Storage(err.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|err| SpectraError::Storage(err.to_string()))
}
