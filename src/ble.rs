// btleplug backend
//
// Implements the radio traits on the platform BLE stack. Scanning is
// unfiltered and matched on the application side: CoreBluetooth's scan
// filter only sees UUIDs in the primary advertisement, and many watches put
// their 128-bit UUIDs in the scan response instead.

use crate::ble_common;
use crate::error::{OtaError, Result};
use crate::settings::Settings;
use crate::transport::{Advertisement, Central, Peripheral, SelectionFilter};
use async_trait::async_trait;
use btleplug::api::{
    Central as _, CharPropFlags, Characteristic, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Peripheral as PlatformPeripheral};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Interval between peripheral-list polls during a scan.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ============================================================================
// Central
// ============================================================================

pub struct BleCentral {
    adapter: Adapter,
    scan_duration: Duration,
    watchdog_interval: Duration,
}

impl BleCentral {
    /// Bind to the first system adapter.
    pub async fn new(settings: &Settings) -> Result<Self> {
        let adapter = ble_common::ensure_adapter()
            .await
            .map_err(OtaError::Adapter)?;
        Ok(Self {
            adapter,
            scan_duration: Duration::from_millis(settings.scan_duration_ms),
            watchdog_interval: Duration::from_millis(settings.watchdog_interval_ms),
        })
    }

    /// Collect every peripheral seen during the scan window.
    async fn scan(
        &self,
        filter: &SelectionFilter,
    ) -> std::result::Result<Vec<(Advertisement, PlatformPeripheral)>, String> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| format!("Failed to start BLE scan: {e}"))?;

        tlog!(
            "[ble] Scan started (prefix {:?}, device {:?})",
            filter.name_prefix,
            filter.device_id
        );

        let mut seen_ids = HashSet::new();
        let mut found = Vec::new();
        let polls = (self.scan_duration.as_millis() / SCAN_POLL_INTERVAL.as_millis()).max(1);

        'poll: for _ in 0..polls {
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;

            let peripherals = match self.adapter.peripherals().await {
                Ok(p) => p,
                Err(e) => {
                    tlog!("[ble] Failed to list peripherals: {e}");
                    continue;
                }
            };

            for peripheral in peripherals {
                let id = peripheral.id().to_string();
                if seen_ids.contains(&id) {
                    continue;
                }

                let props = match peripheral.properties().await.ok().flatten() {
                    Some(p) => p,
                    None => continue,
                };
                seen_ids.insert(id.clone());

                let mut services = props.services.clone();
                services.extend(props.service_data.keys().copied());
                let adv = Advertisement {
                    id,
                    name: props.local_name.clone(),
                    rssi: props.rssi,
                    services,
                };

                if filter.accepts(&adv) {
                    tlog!("[ble] Matched: {:?} ({}), RSSI: {:?}", adv.name, adv.id, adv.rssi);
                }
                let exact_hit = filter.device_id.as_deref() == Some(adv.id.as_str());
                found.push((adv, peripheral));
                if exact_hit {
                    break 'poll;
                }
            }
        }

        let _ = self.adapter.stop_scan().await;
        tlog!("[ble] Scan finished, {} peripherals seen", found.len());
        Ok(found)
    }
}

#[async_trait]
impl Central for BleCentral {
    async fn select_peripheral(
        &self,
        filter: &SelectionFilter,
    ) -> std::result::Result<Option<Arc<dyn Peripheral>>, String> {
        let found = self.scan(filter).await?;
        let advertisements: Vec<Advertisement> = found.iter().map(|(adv, _)| adv.clone()).collect();

        let Some(chosen) = filter.select(&advertisements) else {
            return Ok(None);
        };
        let chosen_id = chosen.id.clone();
        let name = chosen.name.clone().unwrap_or_else(|| chosen_id.clone());

        Ok(found
            .into_iter()
            .find(|(adv, _)| adv.id == chosen_id)
            .map(|(_, peripheral)| {
                Arc::new(BlePeripheral {
                    inner: peripheral,
                    name,
                    watchdog_interval: self.watchdog_interval,
                }) as Arc<dyn Peripheral>
            }))
    }
}

// ============================================================================
// Peripheral
// ============================================================================

pub struct BlePeripheral {
    inner: PlatformPeripheral,
    name: String,
    watchdog_interval: Duration,
}

impl BlePeripheral {
    fn find_characteristic(&self, service: Uuid, uuid: Uuid) -> Option<Characteristic> {
        self.inner
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == uuid)
    }

    fn require_characteristic(
        &self,
        service: Uuid,
        uuid: Uuid,
    ) -> std::result::Result<Characteristic, String> {
        self.find_characteristic(service, uuid)
            .ok_or_else(|| format!("Characteristic {uuid} not found"))
    }
}

#[async_trait]
impl Peripheral for BlePeripheral {
    fn id(&self) -> String {
        self.inner.id().to_string()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    async fn connect(&self) -> std::result::Result<(), String> {
        self.inner.connect().await.map_err(|e| e.to_string())
    }

    async fn discover_services(&self) -> std::result::Result<Vec<Uuid>, String> {
        self.inner
            .discover_services()
            .await
            .map_err(|e| format!("Failed to discover services: {e}"))?;
        Ok(self.inner.services().iter().map(|s| s.uuid).collect())
    }

    async fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool {
        match self.find_characteristic(service, characteristic) {
            Some(c) => {
                if !c.properties.contains(CharPropFlags::WRITE) {
                    tlog!(
                        "[ble] {} lacks WRITE (properties: {:?})",
                        characteristic,
                        c.properties
                    );
                }
                true
            }
            None => false,
        }
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> std::result::Result<(), String> {
        let c = self.require_characteristic(service, characteristic)?;
        self.inner
            .write(&c, data, WriteType::WithResponse)
            .await
            .map_err(|e| format!("Failed to write: {e}"))
    }

    async fn read(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> std::result::Result<Vec<u8>, String> {
        let c = self.require_characteristic(service, characteristic)?;
        self.inner
            .read(&c)
            .await
            .map_err(|e| format!("Failed to read: {e}"))
    }

    async fn disconnect(&self) -> std::result::Result<(), String> {
        self.inner.disconnect().await.map_err(|e| e.to_string())
    }

    async fn wait_disconnected(&self) {
        loop {
            tokio::time::sleep(self.watchdog_interval).await;
            if !self.inner.is_connected().await.unwrap_or(false) {
                break;
            }
        }
    }
}
