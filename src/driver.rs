//! The driver registry
//!
//! A [`Driver`] owns every attached microphone. Create one when the host
//! starts, hand it devices with [`probe()`](Driver::probe) as the bus reports
//! them, and drop it (or call [`shutdown()`](Driver::shutdown)) to detach
//! everything.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use crate::{
    config::Config,
    descriptor::AltSetting,
    device::Device,
    error::{Error, Result},
    transfer::Transport,
    PRODUCT_ID, VENDOR_ID,
};

/// Identifies a device within its [`Driver`]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DeviceId(pub usize);

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Indicates if the driver handles this vendor / product pair
pub fn supports(vendor: u16, product: u16) -> bool {
    (vendor, product) == (VENDOR_ID, PRODUCT_ID)
}

/// Owns zero or more attached devices
pub struct Driver {
    config: Config,
    devices: Mutex<BTreeMap<DeviceId, Arc<Device>>>,
    next_id: AtomicUsize,
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new(Config::default())
    }
}

impl Driver {
    /// Create a driver that applies `config` to every device it attaches
    pub fn new(config: Config) -> Self {
        Driver {
            config,
            devices: Mutex::new(BTreeMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<DeviceId, Arc<Device>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Attach a device the bus reported
    ///
    /// `setting` is the active alternate setting of the device's streaming
    /// interface, and `transport` executes its transfers. Fails with
    /// `UnsupportedDevice` if the ids aren't in the id table, or with
    /// `NoCaptureEndpoint` if the setting has nothing to capture from.
    pub fn probe(
        &self,
        vendor: u16,
        product: u16,
        setting: &AltSetting,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Device>> {
        if !supports(vendor, product) {
            debug!("Ignoring {:04x}:{:04x}", vendor, product);
            return Err(Error::UnsupportedDevice { vendor, product });
        }
        let id = DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let device = Arc::new(Device::attach(
            id,
            vendor,
            product,
            setting,
            transport,
            self.config,
        )?);
        self.lock().insert(id, device.clone());
        Ok(device)
    }

    pub fn device(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.lock().get(&id).cloned()
    }

    /// Ids of every attached device, in attach order
    pub fn devices(&self) -> Vec<DeviceId> {
        self.lock().keys().copied().collect()
    }

    /// Detach a device the bus reported gone
    ///
    /// Any running session is stopped and closed first. Returns `false` if
    /// the id is unknown.
    pub fn disconnect(&self, id: DeviceId) -> bool {
        let device = self.lock().remove(&id);
        match device {
            Some(device) => {
                device.detach();
                true
            }
            None => false,
        }
    }

    pub fn suspend(&self, id: DeviceId) -> Result<()> {
        self.device(id).ok_or(Error::NotAttached)?.suspend();
        Ok(())
    }

    pub fn resume(&self, id: DeviceId) -> Result<()> {
        self.device(id).ok_or(Error::NotAttached)?.resume();
        Ok(())
    }

    /// Detach every device
    pub fn shutdown(&self) {
        let devices = core::mem::take(&mut *self.lock());
        for device in devices.into_values() {
            device.detach();
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
