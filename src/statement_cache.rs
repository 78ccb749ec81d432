use crate::cache::SingleFlightLru;
use crate::error::DaoError;
use crate::transport::{PreparedStatement, Transport};
use std::sync::Arc;

/// Prepared-statement handles keyed by statement text.
///
/// Concurrent misses on the same text issue a single prepare round trip.
#[derive(Clone)]
pub struct StatementCache {
    transport: Arc<dyn Transport>,
    entries: Arc<SingleFlightLru<Arc<str>, PreparedStatement>>,
}

impl StatementCache {
    pub fn new(transport: Arc<dyn Transport>, capacity: usize) -> Self {
        Self {
            transport,
            entries: Arc::new(SingleFlightLru::new(capacity)),
        }
    }

    pub async fn prepare(&self, text: &str) -> Result<PreparedStatement, DaoError> {
        let key: Arc<str> = Arc::from(text);
        self.entries
            .get_or_try_load(key, || async {
                tracing::debug!(statement = text, "preparing statement");
                self.transport
                    .prepare(text)
                    .await
                    .map_err(DaoError::from)
            })
            .await
    }

    pub fn get(&self, text: &str) -> Option<PreparedStatement> {
        self.entries.get(&Arc::from(text))
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
        tracing::warn!("prepared statement cache invalidated");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::StatementCache;
    use crate::test_support::ScriptedTransport;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn repeated_text_prepares_once() {
        let transport = Arc::new(ScriptedTransport::new());
        let cache = StatementCache::new(transport.clone(), 150);

        let a = cache
            .prepare("SELECT * FROM hotel.hotels WHERE id = ?")
            .await
            .expect("prepare");
        let b = cache
            .prepare("SELECT * FROM hotel.hotels WHERE id = ?")
            .await
            .expect("prepare");
        assert_eq!(a, b);
        assert_eq!(transport.prepare_calls(), 1);

        cache
            .prepare("SELECT name FROM hotel.hotels WHERE id = ?")
            .await
            .expect("prepare");
        assert_eq!(transport.prepare_calls(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_prepare_once() {
        let transport =
            Arc::new(ScriptedTransport::new().with_prepare_delay(Duration::from_millis(30)));
        let cache = StatementCache::new(transport.clone(), 150);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache
                        .prepare("UPDATE hotel.rooms SET beds = beds + ? WHERE id = ?")
                        .await
                })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.expect("join").expect("prepare").id);
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(transport.prepare_calls(), 1);
    }

    #[tokio::test]
    async fn invalidation_forces_reprepare() {
        let transport = Arc::new(ScriptedTransport::new());
        let cache = StatementCache::new(transport.clone(), 150);
        cache.prepare("SELECT * FROM a.b").await.expect("prepare");
        cache.invalidate_all();
        assert!(cache.is_empty());
        assert!(cache.get("SELECT * FROM a.b").is_none());
        cache.prepare("SELECT * FROM a.b").await.expect("prepare");
        assert_eq!(transport.prepare_calls(), 2);
    }
}
