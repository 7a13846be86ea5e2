//! Shared, lazily started discovery feed
//!
//! One upstream subscription is multicast to any number of observers over a
//! `tokio::sync::broadcast` channel. The upstream starts with the first
//! observer. When the last observer leaves, a keep-alive timer starts; if no
//! observer returns before it fires, the upstream is torn down and the next
//! observer starts a fresh one.

use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

type Upstream<T> = Box<dyn Fn() -> BoxStream<'static, T> + Send + Sync>;

struct FeedState<T> {
    sender: Option<broadcast::Sender<T>>,
    pump: Option<JoinHandle<()>>,
    idle_timer: Option<JoinHandle<()>>,
    observers: usize,
    // Bumped on every upstream start so stale timers and pumps can tell
    // they no longer own the feed
    epoch: u64,
}

struct FeedInner<T> {
    label: String,
    upstream: Upstream<T>,
    keep_alive: Duration,
    capacity: usize,
    runtime: Handle,
    state: Mutex<FeedState<T>>,
}

/// Ref-counted multicast of one upstream stream
pub struct SharedFeed<T> {
    inner: Arc<FeedInner<T>>,
}

impl<T> Clone for SharedFeed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> SharedFeed<T> {
    /// `upstream` opens a new upstream subscription each time the feed starts
    pub fn new<F>(label: impl Into<String>, runtime: Handle, keep_alive: Duration, capacity: usize, upstream: F) -> Self
    where
        F: Fn() -> BoxStream<'static, T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FeedInner {
                label: label.into(),
                upstream: Box::new(upstream),
                keep_alive,
                capacity: capacity.max(1),
                runtime,
                state: Mutex::new(FeedState {
                    sender: None,
                    pump: None,
                    idle_timer: None,
                    observers: 0,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Add an observer, starting the upstream if it is not running
    ///
    /// The observer sees only items published after this call.
    pub fn subscribe(&self) -> FeedSubscription<T> {
        let mut state = self.inner.state.lock();
        state.observers += 1;

        if let Some(timer) = state.idle_timer.take() {
            timer.abort();
            tracing::debug!("Feed '{}' observed again, keep-alive timer cancelled", self.inner.label);
        }

        let receiver = match &state.sender {
            Some(sender) => sender.subscribe(),
            None => {
                let (sender, receiver) = broadcast::channel(self.inner.capacity);
                state.epoch += 1;
                let epoch = state.epoch;
                state.pump = Some(self.spawn_pump(sender.clone(), epoch));
                state.sender = Some(sender);
                tracing::info!("Feed '{}' started upstream (epoch {})", self.inner.label, epoch);
                receiver
            }
        };

        tracing::debug!("Feed '{}' has {} observer(s)", self.inner.label, state.observers);

        FeedSubscription {
            stream: BroadcastStream::new(receiver),
            _guard: ObserverGuard {
                feed: Arc::clone(&self.inner),
            },
        }
    }

    fn spawn_pump(&self, sender: broadcast::Sender<T>, epoch: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let mut upstream = (self.inner.upstream)();
        self.inner.runtime.spawn(async move {
            while let Some(item) = upstream.next().await {
                // No receivers only means every observer is gone; the idle
                // timer decides when to stop
                let _ = sender.send(item);
            }

            tracing::info!("Feed '{}' upstream completed", inner.label);
            let mut state = inner.state.lock();
            if state.epoch == epoch {
                state.sender = None;
                state.pump = None;
            }
        })
    }

    pub fn observer_count(&self) -> usize {
        self.inner.state.lock().observers
    }

    /// Whether an upstream subscription is currently open
    pub fn is_active(&self) -> bool {
        self.inner.state.lock().sender.is_some()
    }

    /// Tear the upstream down immediately, ending every observer's stream
    pub fn shutdown(&self) {
        self.inner.stop_upstream("shutdown");
    }
}

impl<T> FeedInner<T> {
    fn stop_upstream(&self, reason: &str) {
        let (pump, timer) = {
            let mut state = self.state.lock();
            if state.sender.is_none() && state.pump.is_none() {
                return;
            }
            state.sender = None;
            state.epoch += 1;
            (state.pump.take(), state.idle_timer.take())
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(timer) = timer {
            timer.abort();
        }
        tracing::info!("Feed '{}' upstream stopped ({})", self.label, reason);
    }
}

impl<T: Send + 'static> FeedInner<T> {
    fn release_observer(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.observers = state.observers.saturating_sub(1);
        if state.observers > 0 || state.sender.is_none() {
            return;
        }

        let epoch = state.epoch;
        let feed = Arc::clone(self);
        let keep_alive = self.keep_alive;
        tracing::debug!("Feed '{}' has no observers, keeping upstream alive for {:?}", self.label, keep_alive);
        state.idle_timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(keep_alive).await;
            let still_idle = {
                let state = feed.state.lock();
                state.observers == 0 && state.epoch == epoch
            };
            if still_idle {
                feed.stop_upstream("keep-alive expired");
            }
        }));
    }
}

struct ObserverGuard<T: Send + 'static> {
    feed: Arc<FeedInner<T>>,
}

impl<T: Send + 'static> Drop for ObserverGuard<T> {
    fn drop(&mut self) {
        self.feed.release_observer();
    }
}

/// One observer of a [`SharedFeed`]; dropping it releases the observation
pub struct FeedSubscription<T: Clone + Send + 'static> {
    stream: BroadcastStream<T>,
    _guard: ObserverGuard<T>,
}

impl<T: Clone + Send + 'static> Stream for FeedSubscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        loop {
            match this.stream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(item))) => return Poll::Ready(Some(item)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    tracing::warn!("Feed observer lagged behind, skipped {} item(s)", skipped);
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    /// Upstream that counts how often it was opened and is fed by the test
    fn counting_feed(keep_alive: Duration) -> (SharedFeed<u32>, Arc<AtomicUsize>, Arc<Mutex<Vec<mpsc::UnboundedSender<u32>>>>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let senders = Arc::new(Mutex::new(Vec::new()));
        let (o, s) = (Arc::clone(&opened), Arc::clone(&senders));
        let feed = SharedFeed::new("test", Handle::current(), keep_alive, 16, move || {
            o.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            s.lock().push(tx);
            UnboundedReceiverStream::new(rx).boxed()
        });
        (feed, opened, senders)
    }

    #[tokio::test]
    async fn test_single_upstream_for_many_observers() {
        let (feed, opened, senders) = counting_feed(Duration::from_secs(5));

        let mut a = feed.subscribe();
        let mut b = feed.subscribe();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(feed.observer_count(), 2);

        senders.lock()[0].send(42).unwrap();
        assert_eq!(a.next().await, Some(42));
        assert_eq!(b.next().await, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_teardown_and_restart() {
        let (feed, opened, _senders) = counting_feed(Duration::from_secs(5));

        drop(feed.subscribe());
        assert!(feed.is_active());

        // Re-observed within the keep-alive window: same upstream
        tokio::time::sleep(Duration::from_secs(2)).await;
        let sub = feed.subscribe();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        drop(sub);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!feed.is_active());

        let _sub = feed.subscribe();
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_ends_observers() {
        let (feed, _opened, _senders) = counting_feed(Duration::from_secs(5));
        let mut sub = feed.subscribe();
        feed.shutdown();
        assert_eq!(sub.next().await, None);
        assert!(!feed.is_active());
    }
}
