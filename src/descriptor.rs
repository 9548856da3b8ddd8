//! Interface and endpoint descriptors, and capture endpoint discovery

use crate::config::EndpointPreference;
use crate::error::{Error, Result};
use usb_device::{
    endpoint::{
        EndpointAddress, EndpointType, IsochronousSynchronizationType, IsochronousUsageType,
    },
    UsbDirection,
};

const DESCRIPTOR_INTERFACE: u8 = 4;
const DESCRIPTOR_ENDPOINT: u8 = 5;

/// A standard endpoint descriptor
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub kind: EndpointType,
    pub max_packet_size: u16,
    pub interval: u8,
}

impl EndpointDescriptor {
    /// The length of a standard endpoint descriptor
    pub const LEN: usize = 7;

    /// Parse a standard endpoint descriptor
    ///
    /// `raw` must start with the descriptor's `bLength`. Trailing bytes past
    /// `bLength` are ignored, so audio-class endpoints (9 bytes) parse too.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let len = *raw.first().ok_or(Error::MalformedDescriptor)? as usize;
        if len < Self::LEN || raw.len() < len || raw[1] != DESCRIPTOR_ENDPOINT {
            return Err(Error::MalformedDescriptor);
        }
        Ok(EndpointDescriptor {
            address: EndpointAddress::from(raw[2]),
            kind: endpoint_type(raw[3])?,
            max_packet_size: u16::from_le_bytes([raw[4], raw[5]]) & 0x7FF,
            interval: raw[6],
        })
    }

    /// Indicates if the endpoint moves data towards the host
    pub fn is_in(&self) -> bool {
        self.address.direction() == UsbDirection::In
    }
}

/// Decode `bmAttributes` into a transfer type
fn endpoint_type(attributes: u8) -> Result<EndpointType> {
    Ok(match attributes & 0b11 {
        0 => EndpointType::Control,
        1 => EndpointType::Isochronous {
            synchronization: match (attributes >> 2) & 0b11 {
                0 => IsochronousSynchronizationType::NoSynchronization,
                1 => IsochronousSynchronizationType::Asynchronous,
                2 => IsochronousSynchronizationType::Adaptive,
                _ => IsochronousSynchronizationType::Synchronous,
            },
            usage: match (attributes >> 4) & 0b11 {
                0 => IsochronousUsageType::Data,
                1 => IsochronousUsageType::Feedback,
                2 => IsochronousUsageType::ImplicitFeedbackData,
                _ => return Err(Error::MalformedDescriptor),
            },
        },
        2 => EndpointType::Bulk,
        _ => EndpointType::Interrupt,
    })
}

/// The active alternate setting of an interface
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct AltSetting {
    pub interface: u8,
    pub alternate: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl AltSetting {
    /// Walk an interface descriptor followed by its endpoint descriptors
    ///
    /// Class-specific descriptors between them are skipped. Parsing stops at
    /// the next interface descriptor.
    pub fn parse(mut raw: &[u8]) -> Result<Self> {
        let mut setting: Option<AltSetting> = None;
        while !raw.is_empty() {
            let len = raw[0] as usize;
            if len < 2 || raw.len() < len {
                return Err(Error::MalformedDescriptor);
            }
            let (desc, rest) = raw.split_at(len);
            match (desc[1], setting.as_mut()) {
                (DESCRIPTOR_INTERFACE, None) => {
                    if len < 9 {
                        return Err(Error::MalformedDescriptor);
                    }
                    setting = Some(AltSetting {
                        interface: desc[2],
                        alternate: desc[3],
                        endpoints: Vec::with_capacity(desc[4] as usize),
                    });
                }
                (DESCRIPTOR_INTERFACE, Some(_)) => break,
                (DESCRIPTOR_ENDPOINT, Some(setting)) => {
                    setting.endpoints.push(EndpointDescriptor::parse(desc)?)
                }
                _ => trace!("skip descriptor type {:#04x}", desc[1]),
            }
            raw = rest;
        }
        setting.ok_or(Error::MalformedDescriptor)
    }
}

/// The IN endpoint selected for capture
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CaptureEndpoint {
    pub address: EndpointAddress,
    pub kind: EndpointType,
    pub max_packet_size: u16,
}

fn accepts(prefer: EndpointPreference, kind: EndpointType) -> bool {
    match (prefer, kind) {
        (EndpointPreference::Bulk, EndpointType::Bulk) => true,
        (EndpointPreference::Isochronous, EndpointType::Isochronous { .. }) => true,
        (EndpointPreference::Any, EndpointType::Bulk | EndpointType::Isochronous { .. }) => true,
        _ => false,
    }
}

/// Select the capture endpoint from the active alternate setting
///
/// Returns the first IN endpoint, in descriptor order, whose transfer type
/// `prefer` accepts.
pub fn find_capture_endpoint(
    setting: &AltSetting,
    prefer: EndpointPreference,
) -> Result<CaptureEndpoint> {
    for ep in &setting.endpoints {
        if !ep.is_in() && ep.kind == EndpointType::Bulk {
            debug!("Found bulk OUT endpoint: {:#04x}", u8::from(ep.address));
        }
    }

    let ep = setting
        .endpoints
        .iter()
        .find(|ep| ep.is_in() && accepts(prefer, ep.kind))
        .ok_or_else(|| {
            error!(
                "No audio input endpoint on interface {} alt {}",
                setting.interface, setting.alternate
            );
            Error::NoCaptureEndpoint
        })?;

    info!(
        "Found {:?} IN endpoint: {:#04x}, max packet {}",
        ep.kind,
        u8::from(ep.address),
        ep.max_packet_size
    );
    Ok(CaptureEndpoint {
        address: ep.address,
        kind: ep.kind,
        max_packet_size: ep.max_packet_size,
    })
}
