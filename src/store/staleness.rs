use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

use super::model::DeviceFilter;
use super::DeviceStore;

/// Emitted on the per-process staleness bus when a background scan finds a
/// device past its staleness threshold (§4.2). Discovery handlers may
/// subscribe and refresh opportunistically; an explicit refresh tool call
/// always takes precedence over this signal.
#[derive(Debug, Clone)]
pub struct StaleDeviceEvent {
    pub device_id: i64,
    pub hostname: Option<String>,
}

pub fn start_staleness_scanner(
    store: Arc<DeviceStore>,
    threshold: chrono::Duration,
    scan_interval: Duration,
) -> broadcast::Receiver<StaleDeviceEvent> {
    let (tx, rx) = broadcast::channel(128);
    tokio::spawn(async move {
        let mut ticker = interval(scan_interval);
        loop {
            ticker.tick().await;
            let filter = DeviceFilter {
                stale_only: true,
                staleness_hours: Some(threshold.num_hours()),
                ..Default::default()
            };
            match store.list(&filter).await {
                Ok(devices) => {
                    for device in devices {
                        let _ = tx.send(StaleDeviceEvent {
                            device_id: device.id,
                            hostname: device.hostname.clone(),
                        });
                    }
                    tracing::debug!(count = %threshold.num_hours(), "staleness scan complete");
                }
                Err(err) => {
                    tracing::warn!(?err, "staleness scan failed");
                }
            }
        }
    });
    rx
}
