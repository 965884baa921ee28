// Radio abstraction
//
// The link manager and the transfer engine only ever talk to these traits.
// `ble` implements them on btleplug; tests implement them in memory.

use crate::ble_common::{MAIN_SERVICE_UUID, OTA_SERVICE_UUID};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// What a scan learned about one peripheral.
#[derive(Clone, Debug, Default)]
pub struct Advertisement {
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Service UUIDs seen in the advertisement or its service data
    pub services: Vec<Uuid>,
}

/// Which peripheral `discover_and_connect` is allowed to pick.
#[derive(Clone, Debug, Default)]
pub struct SelectionFilter {
    /// Only names starting with this prefix are eligible. Disables the
    /// accept-any-advertiser fallback.
    pub name_prefix: Option<String>,
    /// Exact platform peripheral id.
    pub device_id: Option<String>,
}

impl SelectionFilter {
    pub fn with_name_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: Some(prefix.into()),
            device_id: None,
        }
    }

    /// Whether a scanned peripheral may be selected.
    pub fn accepts(&self, adv: &Advertisement) -> bool {
        if let Some(id) = &self.device_id {
            if adv.id != *id {
                return false;
            }
        }
        match self.name_prefix.as_deref() {
            Some(prefix) => adv
                .name
                .as_deref()
                .map(|name| name.starts_with(prefix))
                .unwrap_or(false),
            // An explicit id is enough on its own
            None if self.device_id.is_some() => true,
            None => {
                adv.services.contains(&MAIN_SERVICE_UUID)
                    || adv.services.contains(&OTA_SERVICE_UUID)
            }
        }
    }

    /// Pick the eligible advertisement with the strongest signal.
    pub fn select<'a>(&self, candidates: &'a [Advertisement]) -> Option<&'a Advertisement> {
        candidates
            .iter()
            .filter(|adv| self.accepts(adv))
            .max_by_key(|adv| adv.rssi.unwrap_or(i16::MIN))
    }
}

/// Entry point of a radio stack: finds the peripheral to update.
#[async_trait]
pub trait Central: Send + Sync {
    /// Scan and return the chosen peripheral, or `None` when nothing
    /// eligible was found.
    async fn select_peripheral(
        &self,
        filter: &SelectionFilter,
    ) -> Result<Option<Arc<dyn Peripheral>>, String>;
}

/// One remote device. All operations are single request/response steps;
/// callers never have more than one outstanding at a time.
#[async_trait]
pub trait Peripheral: Send + Sync {
    fn id(&self) -> String;

    /// Advertised name, falling back to the id.
    fn name(&self) -> String;

    async fn connect(&self) -> Result<(), String>;

    /// Discover the GATT table and return the primary service UUIDs.
    async fn discover_services(&self) -> Result<Vec<Uuid>, String>;

    /// Whether `characteristic` exists inside `service`. Only meaningful
    /// after `discover_services`.
    async fn has_characteristic(&self, service: Uuid, characteristic: Uuid) -> bool;

    /// Write with response: returns once the peripheral acknowledged it.
    async fn write(&self, service: Uuid, characteristic: Uuid, data: &[u8]) -> Result<(), String>;

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>, String>;

    async fn disconnect(&self) -> Result<(), String>;

    /// Resolves once the link is lost after a successful `connect`.
    async fn wait_disconnected(&self);
}
