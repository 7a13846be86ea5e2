//! Desktop radio and discovery through btleplug
//!
//! Desktop stacks have no user-mediated enable flow: an adapter that btleplug
//! can open is treated as powered, and every advertising peripheral is
//! reported as connectable.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter as BtScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::runtime::Handle;

use super::{AdapterInfo, BleError, DiscoveryEvent, DiscoveryPort, RadioPort, ScanFilter, ScanRecord};

impl From<btleplug::Error> for BleError {
    fn from(err: btleplug::Error) -> Self {
        BleError::PlatformError(err.to_string())
    }
}

/// First btleplug adapter of the host
#[derive(Clone)]
pub struct DesktopRadio {
    adapter: Adapter,
    info: AdapterInfo,
}

impl DesktopRadio {
    pub async fn open() -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleError::AdapterNotAvailable)?;

        let name = adapter
            .adapter_info()
            .await
            .unwrap_or_else(|_| "Bluetooth adapter".to_string());
        let info = AdapterInfo::new(std::env::consts::OS, name, "unknown", true);
        tracing::info!("Opened desktop adapter: {}", info);

        Ok(Self { adapter, info })
    }

    /// Discovery port sharing this radio's adapter
    pub fn discovery(&self) -> DesktopDiscovery {
        DesktopDiscovery {
            adapter: self.adapter.clone(),
        }
    }
}

impl RadioPort for DesktopRadio {
    fn adapter(&self) -> Option<AdapterInfo> {
        Some(self.info.clone())
    }

    fn request_enable(&self) -> Result<(), BleError> {
        Err(BleError::OperationNotSupported(
            "enabling the radio from the application on desktop".to_string(),
        ))
    }
}

#[derive(Clone)]
pub struct DesktopDiscovery {
    adapter: Adapter,
}

async fn discovered(adapter: &Adapter, id: &PeripheralId) -> Option<ScanRecord> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;

    let mut record = ScanRecord::new(properties.address.to_string(), properties.rssi.unwrap_or(i16::MIN), true);
    record.name = properties.local_name;
    record.service_uuids = properties.services;
    Some(record)
}

impl DiscoveryPort for DesktopDiscovery {
    fn open_subscription(&self, filters: &[ScanFilter]) -> BoxStream<'static, DiscoveryEvent> {
        let adapter = self.adapter.clone();
        let services = filters.iter().flat_map(|f| f.service_uuids.iter().copied()).collect();

        let events = stream::once(async move {
            if let Err(e) = adapter.start_scan(BtScanFilter { services }).await {
                tracing::warn!("Failed to start desktop scan: {}", e);
                return stream::empty().boxed();
            }
            match adapter.events().await {
                Ok(events) => events
                    .filter_map(move |event| {
                        let adapter = adapter.clone();
                        async move {
                            match event {
                                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                                    discovered(&adapter, &id).await
                                }
                                _ => None,
                            }
                        }
                    })
                    .boxed(),
                Err(e) => {
                    tracing::warn!("Failed to subscribe to desktop adapter events: {}", e);
                    stream::empty().boxed()
                }
            }
        })
        .flatten();

        let filters = filters.to_vec();
        let filtered = events.filter(move |record| futures::future::ready(ScanFilter::any_matches(&filters, record)));

        StopOnDrop {
            inner: filtered.boxed(),
            adapter: self.adapter.clone(),
        }
        .boxed()
    }
}

/// Stops the OS scan when the subscription is dropped
struct StopOnDrop {
    inner: BoxStream<'static, DiscoveryEvent>,
    adapter: Adapter,
}

impl Stream for StopOnDrop {
    type Item = DiscoveryEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<DiscoveryEvent>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        let adapter = self.adapter.clone();
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = adapter.stop_scan().await {
                        tracing::warn!("Failed to stop desktop scan: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("Desktop scan dropped outside a runtime, OS scan left running"),
        }
    }
}
