use std::sync::Arc;

use crate::{
    config::Config,
    membership::{LedgerHandles, MarketplaceService, SettlementWorkflow},
    store::database::DataStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DataStore>,
    pub ledger: LedgerHandles,
    pub config: Config,
}

impl AppState {
    /// Standard startup: no ledger clients wired, so free communities work
    /// end to end and paid flows report a configuration error.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::with_ledger(config, LedgerHandles::default()).await
    }

    /// Startup with ledger clients supplied by the embedder (or by tests).
    pub async fn with_ledger(config: Config, ledger: LedgerHandles) -> anyhow::Result<Self> {
        let store = DataStore::new(&config.database.url, config.cache.capacity).await?;
        store.init().await?;

        Ok(Self {
            store: Arc::new(store),
            ledger,
            config,
        })
    }

    pub fn workflow(&self) -> SettlementWorkflow<'_> {
        SettlementWorkflow::new(&self.store, &self.ledger, &self.config.chain)
    }

    pub fn marketplace(&self) -> MarketplaceService<'_> {
        MarketplaceService::new(&self.ledger, &self.config.chain)
    }
}
