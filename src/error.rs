//! Driver errors

use crate::session::State;

/// Errors returned by the capture driver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The active alternate setting has no usable IN endpoint.
    ///
    /// Fatal to attachment; the device is rejected.
    #[error("no capture endpoint on the active alternate setting")]
    NoCaptureEndpoint,

    /// Requested sample format isn't mono, S16_LE, 44100 Hz.
    #[error("unsupported sample format")]
    UnsupportedFormat,

    /// Buffer or period sizes fall outside the capability descriptor.
    #[error("invalid buffer geometry: buffer {buffer_bytes} bytes, period {period_bytes} bytes")]
    InvalidParams {
        buffer_bytes: usize,
        period_bytes: usize,
    },

    /// A session, buffer, or transfer request couldn't be allocated.
    #[error("out of resources")]
    OutOfResources,

    /// The transport refused the initial submission on start.
    #[error("transfer submission failed ({0})")]
    TransferSubmitFailed(i32),

    /// The operation isn't valid from the session's current state.
    #[error("cannot {op} from state {from}")]
    InvalidStateTransition { from: State, op: &'static str },

    /// A capture session is already open on this device.
    #[error("device busy")]
    Busy,

    /// The device has been detached.
    #[error("device not attached")]
    NotAttached,

    /// A descriptor was truncated or carried reserved values.
    #[error("malformed descriptor")]
    MalformedDescriptor,

    /// The vendor / product pair isn't in the id table.
    #[error("unsupported device {vendor:04x}:{product:04x}")]
    UnsupportedDevice { vendor: u16, product: u16 },
}

/// Driver result type
pub type Result<T> = core::result::Result<T, Error>;
