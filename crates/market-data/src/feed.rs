use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::store::{MarketDataStore, TickUpdate};

/// Spawn the background feed handler: the single writer pushing ticks into
/// the store while scan cycles read from it. The producer side of the
/// channel belongs to the broker adapter; dropping it stops the task, which
/// is the shutdown path (disconnect the feed before anything else).
pub fn spawn_feed_handler(
    store: Arc<MarketDataStore>,
    mut rx: mpsc::Receiver<TickUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks: u64 = 0;
        while let Some(tick) = rx.recv().await {
            store.apply_tick(tick);
            ticks += 1;
            if ticks % 10_000 == 0 {
                tracing::debug!("Feed handler processed {} ticks", ticks);
            }
        }
        tracing::info!("Feed channel closed after {} ticks, handler exiting", ticks);
    })
}
