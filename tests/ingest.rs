use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use spectra_repo::config::Settings;
use spectra_repo::dataset::{DatasetDraft, DatasetRegistry};
use spectra_repo::domain::{Dataset, DatasetId, Principal, UserId};
use spectra_repo::error::{ErrorKind, SpectraError};
use spectra_repo::ingest::{Ingestor, Table};
use spectra_repo::store::Store;

fn settings() -> Settings {
    Settings::with_root(Utf8PathBuf::from("/nonexistent/spectra-repo"))
}

fn owner() -> Principal {
    Principal::user(UserId::new(1))
}

fn dataset(store: &Store) -> Dataset {
    DatasetRegistry::new(store)
        .create(&owner(), DatasetDraft::new("leaf reflectance"))
        .unwrap()
}

#[test]
fn designator_column_names_samples() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let table = Table::from_rows(&["sample_name", "400", "410"], &[vec!["s1", "0.1", "0.2"]]);

    let result = Ingestor::new(&store, &settings)
        .upload_samples_table(&owner(), dataset.id, &table)
        .unwrap();
    assert_eq!(result.samples_created, 1);
    assert_eq!(result.num_bands, 2);

    let samples = DatasetRegistry::new(&store)
        .samples(dataset.id, 0, None)
        .unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].sample_name, "s1");
    assert_eq!(samples[0].sample_label.as_deref(), Some("s1"));
    assert_eq!(samples[0].wavelengths, vec![400.0, 410.0]);
    assert_eq!(samples[0].intensities, vec![0.1, 0.2]);

    let dataset = DatasetRegistry::new(&store).get(dataset.id).unwrap();
    assert_eq!(dataset.num_samples, 1);
    assert_eq!(dataset.num_bands, Some(2));
}

#[test]
fn rows_without_designator_get_ordinal_names() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let table = Table::parse(b"400,500,600\n1,2,3\n4,5,6\n").unwrap();

    Ingestor::new(&store, &settings)
        .upload_samples_table(&owner(), dataset.id, &table)
        .unwrap();

    let samples = DatasetRegistry::new(&store)
        .samples(dataset.id, 0, None)
        .unwrap();
    let names = samples
        .iter()
        .map(|sample| sample.sample_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["sample_0", "sample_1"]);
    assert!(samples.iter().all(|sample| sample.sample_label.is_none()));
    assert_eq!(samples[1].intensities, vec![4.0, 5.0, 6.0]);
}

#[test]
fn non_numeric_header_persists_nothing() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let table = Table::from_rows(&["wavelength", "400"], &[vec!["0.1", "0.2"]]);

    let err = Ingestor::new(&store, &settings)
        .upload_samples_table(&owner(), dataset.id, &table)
        .unwrap_err();
    assert_matches!(err, SpectraError::NonNumericHeader { column: 1, .. });
    assert_eq!(err.kind(), ErrorKind::Validation);

    let samples = DatasetRegistry::new(&store)
        .samples(dataset.id, 0, None)
        .unwrap();
    assert!(samples.is_empty());
}

#[test]
fn bad_intensity_aborts_whole_upload() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let table = Table::from_rows(
        &["name", "400", "410"],
        &[vec!["a", "0.1", "0.2"], vec!["b", "0.3", "oops"]],
    );

    let err = Ingestor::new(&store, &settings)
        .upload_samples_table(&owner(), dataset.id, &table)
        .unwrap_err();
    assert_matches!(
        err,
        SpectraError::InvalidIntensity {
            row: 2,
            column: 3,
            ..
        }
    );

    let reloaded = DatasetRegistry::new(&store).get(dataset.id).unwrap();
    assert_eq!(reloaded.num_samples, 0);
    assert_eq!(reloaded.num_bands, None);
    assert!(
        DatasetRegistry::new(&store)
            .samples(dataset.id, 0, None)
            .unwrap()
            .is_empty()
    );
}

#[test]
fn header_only_table_is_rejected() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let table = Table::parse(b"400,410\n").unwrap();

    let err = Ingestor::new(&store, &settings)
        .upload_samples_table(&owner(), dataset.id, &table)
        .unwrap_err();
    assert_matches!(err, SpectraError::EmptyTable);
}

#[test]
fn strict_upload_overwrites_counters() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let ingestor = Ingestor::new(&store, &settings);

    let first = Table::from_rows(&["400", "410"], &[vec!["1", "2"], vec!["3", "4"]]);
    ingestor
        .upload_samples_table(&owner(), dataset.id, &first)
        .unwrap();
    let second = Table::from_rows(&["400", "410", "420"], &[vec!["1", "2", "3"]]);
    ingestor
        .upload_samples_table(&owner(), dataset.id, &second)
        .unwrap();

    let reloaded = DatasetRegistry::new(&store).get(dataset.id).unwrap();
    assert_eq!(reloaded.num_samples, 1);
    assert_eq!(reloaded.num_bands, Some(3));
    assert_eq!(
        DatasetRegistry::new(&store)
            .samples(dataset.id, 0, None)
            .unwrap()
            .len(),
        3
    );
}

#[test]
fn labeled_upload_skips_malformed_rows() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let table = Table::from_rows(
        &["400", "410"],
        &[vec!["0.1", "0.2"], vec!["0.3", "0.4", "0.5"]],
    );

    let result = Ingestor::new(&store, &settings)
        .upload_labeled_file(&owner(), dataset.id, "A", &table)
        .unwrap();
    assert_eq!(result.samples_created, 1);
    assert_eq!(result.label, "A");
    assert_eq!(result.skipped_rows, vec![2]);

    let samples = DatasetRegistry::new(&store)
        .samples(dataset.id, 0, None)
        .unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].sample_name, "A_1");
    assert_eq!(samples[0].sample_label.as_deref(), Some("A"));

    let reloaded = DatasetRegistry::new(&store).get(dataset.id).unwrap();
    assert_eq!(reloaded.num_samples, samples.len() as u64);
    assert_eq!(result.total_dataset_samples, samples.len() as u64);
}

#[test]
fn labeled_upload_recounts_all_samples() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let ingestor = Ingestor::new(&store, &settings);

    let healthy = Table::from_rows(&["400", "410"], &[vec!["1", "2"], vec!["3", "4"]]);
    ingestor
        .upload_labeled_file(&owner(), dataset.id, "healthy", &healthy)
        .unwrap();
    let diseased = Table::from_rows(&["400", "410"], &[vec!["5", "6"]]);
    let result = ingestor
        .upload_labeled_file(&owner(), dataset.id, "diseased", &diseased)
        .unwrap();

    assert_eq!(result.samples_created, 1);
    assert_eq!(result.total_dataset_samples, 3);
    let reloaded = DatasetRegistry::new(&store).get(dataset.id).unwrap();
    assert_eq!(reloaded.num_samples, 3);
    assert_eq!(reloaded.num_bands, Some(2));
}

#[test]
fn labeled_upload_requires_numeric_header() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let table = Table::from_rows(&["sample_name", "400"], &[vec!["a", "1"]]);

    let err = Ingestor::new(&store, &settings)
        .upload_labeled_file(&owner(), dataset.id, "A", &table)
        .unwrap_err();
    assert_matches!(err, SpectraError::NonNumericHeader { column: 1, .. });
}

#[test]
fn labeled_upload_rejects_blank_label() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let table = Table::from_rows(&["400"], &[vec!["1"]]);

    let err = Ingestor::new(&store, &settings)
        .upload_labeled_file(&owner(), dataset.id, "  ", &table)
        .unwrap_err();
    assert_matches!(err, SpectraError::EmptyLabel);
}

#[test]
fn uploads_require_owner_or_superuser() {
    let store = Store::in_memory();
    let settings = settings();
    let dataset = dataset(&store);
    let ingestor = Ingestor::new(&store, &settings);
    let table = Table::from_rows(&["400"], &[vec!["1"]]);

    let stranger = Principal::user(UserId::new(2));
    let err = ingestor
        .upload_samples_table(&stranger, dataset.id, &table)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let admin = Principal::superuser(UserId::new(3));
    ingestor
        .upload_samples_table(&admin, dataset.id, &table)
        .unwrap();
}

#[test]
fn upload_to_missing_dataset_is_not_found() {
    let store = Store::in_memory();
    let settings = settings();
    let table = Table::from_rows(&["400"], &[vec!["1"]]);

    let err = Ingestor::new(&store, &settings)
        .upload_samples_table(&owner(), DatasetId::new(7), &table)
        .unwrap_err();
    assert_matches!(err, SpectraError::DatasetNotFound(_));
}

#[test]
fn raw_csv_attachment_counts_rows() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let settings = Settings::with_root(root);
    let store = Store::in_memory();
    let dataset = dataset(&store);

    let result = Ingestor::new(&store, &settings)
        .attach_raw_file(&owner(), dataset.id, "scan.csv", b"400,410\n1,2\n3,4\n")
        .unwrap();
    assert!(result.file_path.starts_with(&format!("dataset_{}_", dataset.id)));
    assert!(result.file_path.ends_with(".csv"));
    assert_eq!(result.file_size, 16);
    assert!(settings.upload_dir.join(&result.file_path).exists());

    let reloaded = DatasetRegistry::new(&store).get(dataset.id).unwrap();
    assert_eq!(reloaded.file_format.as_deref(), Some("csv"));
    assert_eq!(reloaded.file_size, Some(16));
    assert_eq!(reloaded.num_samples, 2);
}

#[test]
fn oversized_attachment_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let mut settings = Settings::with_root(root);
    settings.max_upload_size = 4;
    let store = Store::in_memory();
    let dataset = dataset(&store);

    let err = Ingestor::new(&store, &settings)
        .attach_raw_file(&owner(), dataset.id, "scan.mat", b"0123456789")
        .unwrap_err();
    assert_matches!(err, SpectraError::FileTooLarge { size: 10, limit: 4 });
    assert!(!settings.upload_dir.exists());
    assert_eq!(
        DatasetRegistry::new(&store).get(dataset.id).unwrap().file_path,
        None
    );
}
