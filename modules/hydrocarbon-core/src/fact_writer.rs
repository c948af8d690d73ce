//! Fact Writer: the single path by which a handler's output reaches
//! durable storage. Thin by design — dedup and persistence live in the
//! `Store` implementation; this module is the seam the Scrape Runner
//! calls through, so runner logic never depends on `hydrocarbon-store`
//! directly.

use std::sync::Arc;

use hydrocarbon_common::{Fact, Result};
use tracing::debug;
use uuid::Uuid;

use crate::store::Store;

pub struct FactWriter {
    store: Arc<dyn Store>,
}

impl FactWriter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persists a single fact produced while running `scrape_id`. The
    /// store is responsible for content-hash dedup and upsert semantics;
    /// a duplicate is not an error here.
    pub async fn write(&self, scrape_id: Uuid, fact: Fact) -> Result<()> {
        debug!(%scrape_id, "writing fact");
        self.store.write_fact(scrape_id, fact).await
    }
}
