use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use spectra_repo::config::{Config, ConfigLoader, DEFAULT_MAX_UPLOAD_SIZE};
use spectra_repo::error::SpectraError;

#[test]
fn parse_config_overrides() {
    let config: Config = serde_json::from_str(
        r#"{
            "schema_version": 1,
            "data_root": "/var/lib/spectra",
            "upload_dir": "files",
            "max_upload_size": 1024,
            "default_page_size": 500
        }"#,
    )
    .unwrap();

    let settings = ConfigLoader::resolve_config(config, Utf8PathBuf::from("/ignored")).unwrap();
    assert_eq!(settings.data_root, Utf8PathBuf::from("/var/lib/spectra"));
    assert_eq!(settings.upload_dir, Utf8PathBuf::from("/var/lib/spectra/files"));
    assert_eq!(
        settings.store_file,
        Utf8PathBuf::from("/var/lib/spectra/catalog.json")
    );
    assert_eq!(settings.max_upload_size, 1024);
    assert_eq!(settings.default_page_size, 100);
}

#[test]
fn empty_config_uses_defaults() {
    let config: Config = serde_json::from_str("{}").unwrap();
    let settings = ConfigLoader::resolve_config(config, Utf8PathBuf::from("/data")).unwrap();
    assert_eq!(settings.max_upload_size, DEFAULT_MAX_UPLOAD_SIZE);
    assert_eq!(settings.default_page_size, 20);
}

#[test]
fn zero_upload_limit_is_rejected() {
    let config = Config {
        max_upload_size: Some(0),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config, Utf8PathBuf::from("/data")).unwrap_err();
    assert_matches!(err, SpectraError::ConfigParse(_));
}

#[test]
fn explicit_missing_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("nope.json");
    let err = ConfigLoader::resolve(missing.to_str(), false).unwrap_err();
    assert_matches!(err, SpectraError::ConfigRead(_));
}
