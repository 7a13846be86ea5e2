//! Discovery port fed by the host platform
//!
//! On Android the OS scan callback lives on the Java side. The host starts an
//! OS scan when told to, then pushes every result in through
//! [`HostDiscovery::push`]; results are routed to the open subscriptions whose
//! filters match.

use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{DiscoveryEvent, DiscoveryPort, ScanFilter};

/// Instruction for the host's OS scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanControl {
    Start { subscription: u64, filters: Vec<ScanFilter> },
    Stop { subscription: u64 },
}

pub type ScanControlListener = Arc<dyn Fn(ScanControl) + Send + Sync>;

struct Subscription {
    id: u64,
    filters: Vec<ScanFilter>,
    sender: mpsc::UnboundedSender<DiscoveryEvent>,
}

#[derive(Default)]
struct HostInner {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    control: RwLock<Option<ScanControlListener>>,
}

impl HostInner {
    fn notify(&self, control: ScanControl) {
        let listener = self.control.read().clone();
        match listener {
            Some(listener) => listener(control),
            None => tracing::debug!("No scan control listener for {:?}", control),
        }
    }

    fn close(&self, id: u64) {
        let removed = {
            let mut subscriptions = self.subscriptions.lock();
            let before = subscriptions.len();
            subscriptions.retain(|s| s.id != id);
            subscriptions.len() != before
        };
        if removed {
            tracing::info!("Host discovery subscription #{} closed", id);
            self.notify(ScanControl::Stop { subscription: id });
        }
    }
}

/// Channel-backed [`DiscoveryPort`]
#[derive(Clone, Default)]
pub struct HostDiscovery {
    inner: Arc<HostInner>,
}

impl HostDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive start/stop instructions for the OS scanner
    pub fn set_control_listener(&self, listener: ScanControlListener) {
        *self.inner.control.write() = Some(listener);
    }

    /// Route one OS scan result. Returns how many subscriptions received it.
    pub fn push(&self, event: DiscoveryEvent) -> usize {
        let mut subscriptions = self.inner.subscriptions.lock();
        let mut delivered = 0;
        subscriptions.retain(|s| {
            if !ScanFilter::any_matches(&s.filters, &event) {
                return true;
            }
            match s.sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        tracing::trace!("Routed discovery of {} to {} subscription(s)", event.address, delivered);
        delivered
    }

    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }
}

impl DiscoveryPort for HostDiscovery {
    fn open_subscription(&self, filters: &[ScanFilter]) -> BoxStream<'static, DiscoveryEvent> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.subscriptions.lock().push(Subscription {
            id,
            filters: filters.to_vec(),
            sender,
        });
        tracing::info!("Host discovery subscription #{} opened with {} filter(s)", id, filters.len());
        self.inner.notify(ScanControl::Start {
            subscription: id,
            filters: filters.to_vec(),
        });

        HostSubscription {
            id,
            events: UnboundedReceiverStream::new(receiver),
            host: Arc::clone(&self.inner),
        }
        .boxed()
    }
}

struct HostSubscription {
    id: u64,
    events: UnboundedReceiverStream<DiscoveryEvent>,
    host: Arc<HostInner>,
}

impl Stream for HostSubscription {
    type Item = DiscoveryEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<DiscoveryEvent>> {
        self.events.poll_next_unpin(cx)
    }
}

impl Drop for HostSubscription {
    fn drop(&mut self) {
        self.host.close(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::ScanRecord;

    #[tokio::test]
    async fn test_push_routes_by_filter() {
        let host = HostDiscovery::new();
        let mut all = host.open_subscription(&[]);
        let mut named = host.open_subscription(&[ScanFilter::by_name("Sensor")]);

        assert_eq!(host.push(ScanRecord::new("AA:01", -60, true)), 1);
        assert_eq!(host.push(ScanRecord::new("AA:02", -60, true).with_name("Sensor")), 2);

        assert_eq!(all.next().await.map(|r| r.address.to_string()), Some("AA:01".to_string()));
        assert_eq!(all.next().await.map(|r| r.address.to_string()), Some("AA:02".to_string()));
        assert_eq!(named.next().await.map(|r| r.address.to_string()), Some("AA:02".to_string()));
    }

    #[test]
    fn test_control_notifications() {
        let host = HostDiscovery::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        host.set_control_listener(Arc::new(move |control| sink.lock().push(control)));

        let subscription = host.open_subscription(&[]);
        assert_eq!(host.active_subscriptions(), 1);
        drop(subscription);
        assert_eq!(host.active_subscriptions(), 0);

        assert_eq!(
            *seen.lock(),
            vec![
                ScanControl::Start { subscription: 0, filters: vec![] },
                ScanControl::Stop { subscription: 0 }
            ]
        );
    }
}
