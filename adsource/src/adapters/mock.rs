use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ads::Advertisement;
use crossbeam::queue::SegQueue;

use crate::error::SourceError;
use crate::protocol::{AdSource, ChangeEvent, ChangeStream};

/// Deterministic advertisement fixtures for tests and the demo.
pub fn sample_ads(count: usize) -> Vec<Advertisement> {
    (1..=count as i64)
        .map(|id| Advertisement {
            advertisement_id: id,
            store_id: id * 10,
            store_name: format!("store-{}", id),
            url: format!("https://cdn.example/banner-{}.png", id),
            link: if id % 2 == 0 {
                Some(format!("https://brand-{}.example", id))
            } else {
                None
            },
        })
        .collect()
}

/// Scripted ad source: plays back a queue of outcomes, then keeps
/// returning the fallback list. Counts every request it serves.
pub struct MockAdSource {
    script: Mutex<VecDeque<Result<Vec<Advertisement>, SourceError>>>,
    fallback: Vec<Advertisement>,
    latency: Duration,
    requests: AtomicUsize,
}

impl MockAdSource {
    /// Always answer with the same list.
    pub fn returning(ads: Vec<Advertisement>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: ads,
            latency: Duration::ZERO,
            requests: AtomicUsize::new(0),
        }
    }

    /// Play back the given outcomes in order; once exhausted, answer
    /// with an empty list.
    pub fn scripted(outcomes: Vec<Result<Vec<Advertisement>, SourceError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            fallback: Vec::new(),
            latency: Duration::ZERO,
            requests: AtomicUsize::new(0),
        }
    }

    /// Delay every response, so tests can interleave callers while a
    /// request is in flight.
    pub fn with_latency_ms(mut self, millis: u64) -> Self {
        self.latency = Duration::from_millis(millis);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Queue one more outcome at the end of the script.
    pub fn push_outcome(&self, outcome: Result<Vec<Advertisement>, SourceError>) {
        self.script
            .lock()
            .expect("mock ad source lock poisoned")
            .push_back(outcome);
    }
}

impl AdSource for MockAdSource {
    fn fetch_active(
        &self,
    ) -> impl Future<Output = Result<Vec<Advertisement>, SourceError>> + Send {
        let outcome = {
            let mut script = self.script.lock().expect("mock ad source lock poisoned");
            script.pop_front()
        };
        let outcome = outcome.unwrap_or_else(|| Ok(self.fallback.clone()));
        self.requests.fetch_add(1, Ordering::Relaxed);
        let latency = self.latency;
        async move {
            if latency > Duration::ZERO {
                tokio::time::sleep(latency).await;
            }
            outcome
        }
    }
}

/// In-memory change channel for tests and the demo: the handle pushes
/// events, the stream polls them off once connected.
pub struct MockChangeStream {
    events: Arc<SegQueue<ChangeEvent>>,
    connected: bool,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct MockChangeHandle {
    events: Arc<SegQueue<ChangeEvent>>,
    connects: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl MockChangeStream {
    pub fn channel() -> (Self, MockChangeHandle) {
        let events = Arc::new(SegQueue::new());
        let connects = Arc::new(AtomicUsize::new(0));
        let disconnects = Arc::new(AtomicUsize::new(0));
        let stream = Self {
            events: events.clone(),
            connected: false,
            connects: connects.clone(),
            disconnects: disconnects.clone(),
        };
        let handle = MockChangeHandle {
            events,
            connects,
            disconnects,
        };
        (stream, handle)
    }
}

impl MockChangeHandle {
    pub fn push(&self, event: ChangeEvent) {
        self.events.push(event);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::Relaxed)
    }
}

impl ChangeStream for MockChangeStream {
    fn connect(&mut self) -> Result<(), SourceError> {
        self.connected = true;
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<ChangeEvent>, SourceError> {
        if !self.connected {
            return Err(SourceError::NotConnected);
        }
        Ok(self.events.pop())
    }

    fn disconnect(&mut self) -> Result<(), SourceError> {
        self.connected = false;
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{sample_ads, MockAdSource, MockChangeStream};
    use crate::error::SourceError;
    use crate::protocol::{AdSource, ChangeEvent, ChangeKind, ChangeStream};

    #[tokio::test]
    async fn scripted_source_plays_outcomes_then_falls_back_empty() {
        let source = MockAdSource::scripted(vec![
            Err(SourceError::Status(500)),
            Ok(sample_ads(2)),
        ]);

        assert!(source.fetch_active().await.is_err());
        assert_eq!(source.fetch_active().await.expect("scripted ok").len(), 2);
        assert!(source.fetch_active().await.expect("fallback").is_empty());
        assert_eq!(source.request_count(), 3);
    }

    #[test]
    fn change_stream_requires_connect_before_poll() {
        let (mut stream, handle) = MockChangeStream::channel();
        handle.push(ChangeEvent {
            kind: ChangeKind::Insert,
            table: "advertisements".to_string(),
            column: None,
        });

        assert!(matches!(
            stream.poll_event(),
            Err(SourceError::NotConnected)
        ));

        stream.connect().expect("mock stream should connect");
        let event = stream
            .poll_event()
            .expect("poll should succeed")
            .expect("event should exist");
        assert!(event.is_relevant());
        assert!(stream.poll_event().expect("poll should succeed").is_none());
    }
}
