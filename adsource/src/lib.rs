pub mod adapters;
pub mod coordinator;
pub mod error;
pub mod protocol;

pub use adapters::{
    sample_ads, HttpAdSource, MockAdSource, MockChangeHandle, MockChangeStream, WsChangeStream,
};
pub use coordinator::{FetchCoordinator, FetchStats, RetryPolicy};
pub use error::SourceError;
pub use protocol::{
    AdSource, ChangeEvent, ChangeKind, ChangeStream, ADVERTISEMENTS_TABLE, STORES_TABLE,
    STORE_STATUS_COLUMN,
};

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use ads::{AdCache, Advertisement};

    use super::{AdSource, FetchCoordinator, RetryPolicy, SourceError};

    struct FlakySource {
        failures_before_success: u32,
        attempts: AtomicU32,
    }

    impl FlakySource {
        fn new(failures_before_success: u32) -> Self {
            Self {
                failures_before_success,
                attempts: AtomicU32::new(0),
            }
        }
    }

    impl AdSource for FlakySource {
        fn fetch_active(
            &self,
        ) -> impl Future<Output = Result<Vec<Advertisement>, SourceError>> + Send {
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let outcome = if attempt <= self.failures_before_success {
                Err(SourceError::Transport("socket closed".to_string()))
            } else {
                Ok(vec![Advertisement {
                    advertisement_id: attempt as i64,
                    store_id: 1,
                    store_name: "store-1".to_string(),
                    url: "https://cdn.example/banner.png".to_string(),
                    link: None,
                }])
            };
            async move { outcome }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flaky_source_recovers_within_the_retry_limit() {
        let cache = Arc::new(AdCache::new());
        let coordinator = FetchCoordinator::with_policy(
            FlakySource::new(2),
            cache.clone(),
            RetryPolicy {
                base_delay_ms: 5,
                max_retries: 2,
            },
        );

        coordinator.request_fetch().await;

        let stats = coordinator.stats();
        assert_eq!(stats.requests_issued, 3);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.degraded_settles, 0);
        assert_eq!(cache.list().len(), 1);
    }
}
