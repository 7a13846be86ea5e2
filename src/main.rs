//! BLE common demonstration
//!
//! Negotiates capabilities, scans for a named device, prints every snapshot,
//! stops at the first connectable match and hands it to the GATT connector.
//!
//! Environment (a `.env` file is honoured):
//! - `BLE_COMMON_CONFIG`: optional config file
//! - `BLE_COMMON_TARGET_NAME`: advertised name to look for (default: any device)
//! - `BLE_COMMON_SCAN_SECS`: give up after this many seconds (default: 30)

use anyhow::Context;
use ble_common::ble::{DiscoveryPort, GattConnector, RadioPort, ScanFilter, ScanRecord, UnsupportedGatt};
use ble_common::config::GateConfig;
use ble_common::logging;
use ble_common::permission::{CapabilityRequest, Permission, PermissionPort};
use ble_common::BleCommon;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

/// Desktop stacks have no runtime permission model
struct NoRuntimePermissions;

impl PermissionPort for NoRuntimePermissions {
    fn check_granted(&self, _permission: &Permission) -> bool {
        true
    }

    fn should_show_rationale(&self, _permission: &Permission) -> bool {
        false
    }

    fn request(&self, _permissions: &[Permission]) -> Result<(), ble_common::ble::BleError> {
        Ok(())
    }

    fn open_settings(&self) -> Result<(), ble_common::ble::BleError> {
        Ok(())
    }
}

type Ports = (Arc<dyn RadioPort>, Arc<dyn DiscoveryPort>);

#[cfg(feature = "ble")]
async fn platform_ports() -> anyhow::Result<Ports> {
    let radio = ble_common::ble::desktop::DesktopRadio::open()
        .await
        .context("Failed to open a Bluetooth adapter")?;
    let discovery = radio.discovery();
    Ok((Arc::new(radio), Arc::new(discovery)))
}

/// Without a Bluetooth stack the demo runs against a simulated neighbourhood
#[cfg(not(feature = "ble"))]
async fn platform_ports() -> anyhow::Result<Ports> {
    use ble_common::ble::{AdapterInfo, BleError, HostDiscovery};

    struct SimulatedRadio;

    impl RadioPort for SimulatedRadio {
        fn adapter(&self) -> Option<AdapterInfo> {
            Some(AdapterInfo::new("Simulated", "sim0", "00:00:00:00:00:00", true))
        }

        fn request_enable(&self) -> Result<(), BleError> {
            Ok(())
        }
    }

    warn!("Built without the `ble` feature, using simulated devices");
    let discovery = HostDiscovery::new();
    let feed = discovery.clone();
    tokio::spawn(async move {
        let devices = [
            ScanRecord::new("C4:7C:8D:00:00:01", -71, false).with_name("Beacon"),
            ScanRecord::new("C4:7C:8D:00:00:02", -64, true).with_name("Thermometer"),
            ScanRecord::new("C4:7C:8D:00:00:03", -58, true).with_name("Heart Rate"),
        ];
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        for device in devices.iter().cycle() {
            interval.tick().await;
            feed.push(device.clone());
        }
    });

    Ok((Arc::new(SimulatedRadio), Arc::new(discovery)))
}

fn load_config() -> anyhow::Result<GateConfig> {
    #[cfg(feature = "config-file")]
    {
        let path = std::env::var("BLE_COMMON_CONFIG").ok();
        Ok(GateConfig::load(path.as_deref().map(std::path::Path::new))?)
    }
    #[cfg(not(feature = "config-file"))]
    {
        Ok(GateConfig::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = load_config().context("Failed to load configuration")?;
    logging::init_logging(&config.logging);

    info!("🚀 Starting BLE common demonstration...");

    let (radio, discovery) = platform_ports().await?;
    let core = BleCommon::new(config, Arc::new(NoRuntimePermissions), radio, discovery, Handle::current())?;

    let adapter = match core.negotiate(CapabilityRequest::default()).await {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("❌ Bluetooth is not usable: {}", e);
            return Ok(());
        }
    };
    info!("✅ Radio ready: {}", adapter);

    let target = std::env::var("BLE_COMMON_TARGET_NAME").ok();
    let scan_secs: u64 = std::env::var("BLE_COMMON_SCAN_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    let filters: Vec<ScanFilter> = target.iter().map(ScanFilter::by_name).collect();
    core.scan(filters)?;
    info!("🔍 Scanning for {}", target.as_deref().unwrap_or("any device"));

    let mut snapshots = core.snapshots();
    let found = tokio::time::timeout(Duration::from_secs(scan_secs), async {
        loop {
            snapshots.changed().await?;
            let snapshot = snapshots.borrow_and_update().clone();
            info!("📊 {} connectable device(s)", snapshot.len());
            for record in snapshot.iter() {
                info!(
                    "   {} {} rssi {}",
                    record.address,
                    record.name.as_deref().unwrap_or("<unnamed>"),
                    record.rssi
                );
            }
            if let Some(first) = snapshot.iter().next() {
                return Ok::<ScanRecord, anyhow::Error>(first.clone());
            }
        }
    })
    .await;

    core.stop_scan();

    match found {
        Ok(Ok(device)) => {
            info!("📱 Found {}", device.address);
            if let Err(e) = UnsupportedGatt.connect(&device).await {
                warn!("GATT session not started: {}", e);
            }
        }
        Ok(Err(e)) => error!("❌ Scan ended unexpectedly: {}", e),
        Err(_) => info!("No matching device within {}s", scan_secs),
    }

    Ok(())
}
