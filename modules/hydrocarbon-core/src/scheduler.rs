//! Scheduler: keeps every feed supplied with a future `WAITING` scrape.
//!
//! Each tick finds feeds missing one (`Store::find_missing_schedules`),
//! asks the owning plugin's `propose_schedule` for zero or more future
//! scrapes given recent history, and persists the proposals. A plugin
//! that proposes nothing leaves that feed unscheduled until the next
//! tick — this is a plugin decision, not a Scheduler error.

use std::sync::Arc;
use std::time::Duration;

use hydrocarbon_common::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::registry::PluginRegistry;
use crate::store::Store;

pub struct Scheduler {
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    batch_size: usize,
    history_limit: usize,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<PluginRegistry>,
        batch_size: usize,
        history_limit: usize,
        tick_interval: Duration,
    ) -> Self {
        Self { store, registry, batch_size, history_limit, tick_interval }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "scheduler tick failed, backing off");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        let requests = self
            .store
            .find_missing_schedules(self.batch_size as i64, self.history_limit as i64)
            .await?;
        debug!(count = requests.len(), "feeds missing a waiting scrape");

        for request in requests {
            let Some(plugin) = self.registry.by_name(&request.feed.plugin) else {
                warn!(feed_id = %request.feed.id, plugin = request.feed.plugin, "unregistered plugin, skipping");
                continue;
            };

            let proposals = plugin.propose_schedule(&request);
            if proposals.is_empty() {
                continue;
            }

            self.store.insert_schedule(request.feed.id, &request.feed.plugin, &proposals).await?;
        }

        Ok(())
    }
}
