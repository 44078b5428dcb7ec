//! Store Queue
//!
//! Cache writes are handed to a fixed pool of workers over a bounded
//! channel so the proxy never waits on the store. When the channel is full
//! the write is dropped and counted.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, ContentEntry};
use crate::stats::Collector;

/// A pending cache write.
#[derive(Debug)]
pub struct StoreJob {
    pub key: String,
    pub entry: ContentEntry,
}

/// Sending side of the queue. Cheap to clone.
///
/// Workers exit once every clone has been dropped and the backlog drained.
#[derive(Clone)]
pub struct StoreQueue {
    sender: mpsc::Sender<StoreJob>,
    collector: Arc<dyn Collector>,
}

impl StoreQueue {
    /// Spawns `workers` tasks writing into `cache`, with room for
    /// `capacity` pending jobs.
    pub fn spawn(
        cache: Arc<dyn CacheStore>,
        collector: Arc<dyn Collector>,
        workers: usize,
        capacity: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|id| {
                let cache = cache.clone();
                let receiver = receiver.clone();
                tokio::spawn(run_worker(id, cache, receiver))
            })
            .collect();

        info!(
            "Started {} store workers with a queue of {}",
            workers.max(1),
            capacity.max(1)
        );

        (Self { sender, collector }, handles)
    }

    /// Enqueues a write without waiting. Returns false if it was dropped.
    pub fn submit(&self, key: String, entry: ContentEntry) -> bool {
        match self.sender.try_send(StoreJob { key, entry }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("store queue full, dropping write for {}", job.key);
                self.collector.store_dropped(&job.key);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!("store queue closed, dropping write for {}", job.key);
                self.collector.store_dropped(&job.key);
                false
            }
        }
    }
}

async fn run_worker(
    id: usize,
    cache: Arc<dyn CacheStore>,
    receiver: Arc<Mutex<mpsc::Receiver<StoreJob>>>,
) {
    loop {
        let job = { receiver.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        match cache.store(&job.key, job.entry).await {
            Ok(()) => debug!("stored {}", job.key),
            Err(e) => warn!("unable to store {}: {}", job.key, e),
        }
    }
    debug!("store worker {} stopped", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::error::Result;
    use crate::stats::{NoopCollector, Stats};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    fn entry() -> ContentEntry {
        ContentEntry::new("body", "text/css", HashMap::new(), 60, 1)
    }

    /// Store that never finishes a write.
    struct StuckStore;

    #[async_trait]
    impl CacheStore for StuckStore {
        fn is_cachable(&self, _content_type: &str) -> bool {
            true
        }

        async fn lookup(&self, _key: &str) -> Result<Option<ContentEntry>> {
            Ok(None)
        }

        async fn store(&self, _key: &str, _entry: ContentEntry) -> Result<()> {
            std::future::pending().await
        }

        async fn purge(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_jobs_reach_the_store() {
        let cache = Arc::new(MemoryStore::new(Default::default(), Arc::new(NoopCollector)));
        let (queue, handles) = StoreQueue::spawn(cache.clone(), Arc::new(NoopCollector), 2, 16);

        assert!(queue.submit("a".to_string(), entry()));
        assert!(queue.submit("b".to_string(), entry()));

        // Dropping the only sender lets the workers drain and exit.
        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(cache.lookup("a").await.unwrap().is_some());
        assert!(cache.lookup("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unbounded_ttl_keeps_worker_alive() {
        let cache = Arc::new(MemoryStore::new(Default::default(), Arc::new(NoopCollector)));
        let (queue, handles) = StoreQueue::spawn(cache.clone(), Arc::new(NoopCollector), 1, 16);

        let forever = ContentEntry::new("body", "text/css", HashMap::new(), u64::MAX, 1);
        assert!(queue.submit("http://a.com/forever.css".to_string(), forever));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.submit("http://a.com/good.css".to_string(), entry()));

        drop(queue);
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(cache.lookup("http://a.com/forever.css").await.unwrap().is_some());
        assert!(cache.lookup("http://a.com/good.css").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_full_queue_drops_writes() {
        let stats = Arc::new(Stats::new());
        let (queue, handles) = StoreQueue::spawn(Arc::new(StuckStore), stats.clone(), 1, 1);

        // The worker takes the first job and blocks on it, the second fills
        // the queue, the third has nowhere to go.
        assert!(queue.submit("first".to_string(), entry()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.submit("second".to_string(), entry()));
        assert!(!queue.submit("third".to_string(), entry()));

        assert_eq!(stats.snapshot().dropped_stores, 1);

        for handle in handles {
            handle.abort();
        }
    }
}
