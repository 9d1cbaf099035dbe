use crate::category::CategoryTree;
use crate::config::Settings;
use crate::dataset::DatasetRegistry;
use crate::error::SpectraError;
use crate::export::Exporter;
use crate::ingest::Ingestor;
use crate::stats::Statistics;
use crate::store::Store;

pub struct App {
    store: Store,
    settings: Settings,
}

impl App {
    pub fn new(store: Store, settings: Settings) -> Self {
        Self { store, settings }
    }

    pub fn open(settings: Settings) -> Result<Self, SpectraError> {
        let store = Store::open(settings.store_file.clone())?;
        Ok(Self::new(store, settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn categories(&self) -> CategoryTree<'_> {
        CategoryTree::new(&self.store)
    }

    pub fn datasets(&self) -> DatasetRegistry<'_> {
        DatasetRegistry::new(&self.store)
    }

    pub fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(&self.store, &self.settings)
    }

    pub fn exporter(&self) -> Exporter<'_> {
        Exporter::new(&self.store)
    }

    pub fn statistics(&self) -> Statistics<'_> {
        Statistics::new(&self.store)
    }
}
