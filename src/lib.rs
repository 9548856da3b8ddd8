//! A capture driver for the Blue Snowball USB microphone
//!
//! `snowball-audio` turns a continuous stream of bulk IN transfers into a
//! capture device for a host audio subsystem. It sits between two
//! collaborators that you supply:
//!
//! - a [`Transport`], the USB host-controller layer that executes transfers
//!   and reports their completions.
//! - a [`PeriodListener`], the audio subsystem, notified each time a period
//!   of capture data is ready.
//!
//! Create a [`Driver`], and [`probe()`](Driver::probe) each device the bus
//! reports. Open a [`CaptureSession`] on the returned [`Device`], then drive
//! it through configure, prepare, and start:
//!
//! ```no_run
//! use snowball_audio::{
//!     AltSetting, Driver, Format, HwParams, Transport, PRODUCT_ID, VENDOR_ID,
//! };
//! use std::sync::Arc;
//!
//! # fn host_controller() -> Arc<dyn Transport> { unimplemented!() }
//! # fn interface_descriptors() -> &'static [u8] { &[] }
//! # fn main() -> snowball_audio::Result<()> {
//! let driver = Driver::default();
//! let setting = AltSetting::parse(interface_descriptors())?;
//! let device = driver.probe(VENDOR_ID, PRODUCT_ID, &setting, host_controller())?;
//!
//! let session = device.open(Arc::new(|position: usize| {
//!     println!("period elapsed at frame {position}");
//! }))?;
//! session.configure(HwParams::new(Format::MONO_S16LE_44100, 88_200, 1024))?;
//! session.prepare()?;
//! session.start()?;
//! # Ok(()) }
//! ```
//!
//! The driver uses the `log` facade. Enable the `defmt-03` feature for
//! `defmt` formatting of the state and status types.

// defmt's macros expand to `defmt::` paths
#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;

mod config;
mod descriptor;
mod device;
mod driver;
mod error;
mod pipeline;
mod ring;
mod session;
mod transfer;

#[cfg(test)]
mod mock;

pub use config::{
    Config, EndpointPreference, Format, Hardware, HwParams, OverrunPolicy, SampleFormat,
    DEFAULT_SCRATCH_LEN, HARDWARE,
};
pub use descriptor::{find_capture_endpoint, AltSetting, CaptureEndpoint, EndpointDescriptor};
pub use device::Device;
pub use driver::{supports, DeviceId, Driver};
pub use error::{Error, Result};
pub use pipeline::{PeriodListener, Stats};
pub use ring::CaptureRing;
pub use session::{CaptureSession, State};
pub use transfer::{Rejected, Status, Transfer, Transport};

/// Blue Microphones vendor id
pub const VENDOR_ID: u16 = 0x0d8c;
/// Snowball product id
pub const PRODUCT_ID: u16 = 0x0013;
