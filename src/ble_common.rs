// Shared BLE definitions
//
// Well-known GATT identifiers of the watch's update service, plus the
// singleton btleplug manager/adapter used by the `ble` backend.

use btleplug::api::Manager as _;
use btleplug::platform::{Adapter, Manager};
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

// ============================================================================
// GATT UUIDs
// ============================================================================

/// 16-bit main service advertised by the watch.
pub const MAIN_SERVICE_UUID_16: u16 = 0x6006;

pub const MAIN_SERVICE_UUID: Uuid = uuid_from_u16(MAIN_SERVICE_UUID_16);

/// OTA update service: 00010203-0405-0607-0809-0a0b0c0d1912
pub const OTA_SERVICE_UUID: Uuid =
    uuid_from_fields(0x00010203, 0x0405, 0x0607, 0x0809, 0x0a0b0c0d1912);

/// OTA data characteristic: 00010203-0405-0607-0809-0a0b0c0d2b12
pub const OTA_CHARACTERISTIC_UUID: Uuid =
    uuid_from_fields(0x00010203, 0x0405, 0x0607, 0x0809, 0x0a0b0c0d2b12);

/// Largest chunk one acknowledged write can carry: the 247-byte ATT MTU
/// negotiated by BLE 4.2+ stacks minus the 3-byte write header.
pub const MAX_CHUNK_LEN: usize = 244;

// ============================================================================
// Shared adapter state
// ============================================================================

pub struct BleAdapterState {
    manager: Option<Manager>,
    pub adapter: Option<Adapter>,
}

pub static BLE_ADAPTER: Lazy<Arc<Mutex<BleAdapterState>>> = Lazy::new(|| {
    Arc::new(Mutex::new(BleAdapterState {
        manager: None,
        adapter: None,
    }))
});

/// Initialise the BLE manager and adapter if not already done and return
/// a handle to the adapter.
pub async fn ensure_adapter() -> Result<Adapter, String> {
    let mut state = BLE_ADAPTER.lock().await;
    if let Some(adapter) = &state.adapter {
        return Ok(adapter.clone());
    }
    let manager =
        Manager::new().await.map_err(|e| format!("BLE manager init failed: {e}"))?;
    let adapters = manager
        .adapters()
        .await
        .map_err(|e| format!("Failed to list BLE adapters: {e}"))?;
    let adapter = adapters.into_iter().next().ok_or("No BLE adapter found")?;
    state.adapter = Some(adapter.clone());
    state.manager = Some(manager);
    Ok(adapter)
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Build a 128-bit UUID from its five dash-separated fields.
pub const fn uuid_from_fields(a: u32, b: u16, c: u16, d: u16, e: u64) -> Uuid {
    let hi: u64 = (a as u64) << 32 | (b as u64) << 16 | c as u64;
    let lo: u64 = (d as u64) << 48 | e;
    Uuid::from_u128(((hi as u128) << 64) | lo as u128)
}

/// Expand a 16-bit assigned number with the Bluetooth base UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    uuid_from_fields(short as u32, 0x0000, 0x1000, 0x8000, 0x00805f9b34fb)
}
