//! Transfer requests, and the transport that executes them
//!
//! A [`Transfer`] is one asynchronous bulk / isochronous IN operation with
//! its own scratch buffer. Ownership of the transfer moves into the
//! [`Transport`] on submission, and comes back to the driver when the
//! transport calls [`Transfer::complete()`]. While the transport owns it,
//! nothing in the driver can touch the scratch buffer.

use std::sync::Weak;

use crate::{
    error::{Error, Result},
    pipeline::Pipeline,
};
use usb_device::endpoint::{EndpointAddress, EndpointType};

bitflags::bitflags! {
    /// Transfer completion status
    ///
    /// An empty status, or one with only `ACTIVE` set, is a success.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status : u32 {
        /// Set by the driver when the transfer is handed to the transport
        const ACTIVE = 1 << 7;
        /// The endpoint stalled
        const HALTED = 1 << 6;
        const DATA_BUS_ERROR = 1 << 5;
        /// CRC, bit stuffing, or timeout error on the bus
        const TRANSACTION_ERROR = 1 << 3;
        /// The transfer was cancelled before it completed
        const CANCELLED = 1 << 8;
        /// The device went away
        const DISCONNECTED = 1 << 9;
    }
}

impl Status {
    const ERRORS: Status = Status::HALTED
        .union(Status::DATA_BUS_ERROR)
        .union(Status::TRANSACTION_ERROR)
        .union(Status::CANCELLED)
        .union(Status::DISCONNECTED);

    /// Indicates that the transfer moved data without error
    pub fn is_success(self) -> bool {
        !self.intersects(Status::ERRORS)
    }
}

#[cfg(feature = "defmt-03")]
impl defmt_03::Format for Status {
    fn format(&self, f: defmt_03::Formatter) {
        defmt_03::write!(f, "Status({=u32:#x})", self.bits())
    }
}

/// A transfer request and its scratch buffer
pub struct Transfer {
    endpoint: EndpointAddress,
    kind: EndpointType,
    buffer: Box<[u8]>,
    actual_length: usize,
    status: Status,
    owner: Weak<Pipeline>,
}

impl Transfer {
    /// Allocate a zeroed scratch buffer of `len` bytes
    pub(crate) fn allocate_buffer(len: usize) -> Result<Box<[u8]>> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| Error::OutOfResources)?;
        buffer.resize(len, 0);
        Ok(buffer.into_boxed_slice())
    }

    pub(crate) fn new(
        endpoint: EndpointAddress,
        kind: EndpointType,
        buffer: Box<[u8]>,
        owner: Weak<Pipeline>,
    ) -> Self {
        Transfer {
            endpoint,
            kind,
            buffer,
            actual_length: 0,
            status: Status::empty(),
            owner,
        }
    }

    /// Returns the endpoint this transfer reads from
    pub fn endpoint(&self) -> EndpointAddress {
        self.endpoint
    }

    /// Returns the endpoint's transfer type
    pub fn kind(&self) -> EndpointType {
        self.kind
    }

    /// Returns the scratch buffer length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Indicates if the scratch buffer is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the scratch buffer for the transport to fill
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Returns the bytes received by the last completion
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_length]
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn actual_length(&self) -> usize {
        self.actual_length
    }

    /// Mark the transfer as handed to the transport
    pub(crate) fn prime(&mut self) {
        self.status = Status::ACTIVE;
        self.actual_length = 0;
    }

    /// Give the transfer back to the driver
    ///
    /// Called by the transport, from its completion context, once the
    /// transfer finishes or is cancelled. `actual_length` is clamped to the
    /// scratch buffer length. A transfer whose session is already gone is
    /// dropped here.
    pub fn complete(mut self, status: Status, actual_length: usize) {
        self.status = status.difference(Status::ACTIVE);
        self.actual_length = actual_length.min(self.buffer.len());
        match self.owner.upgrade() {
            Some(pipeline) => pipeline.complete(self),
            None => debug!(
                "EP{} stale completion {:?}, dropping",
                self.endpoint.index(),
                self.status
            ),
        }
    }
}

impl core::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transfer")
            .field("endpoint", &self.endpoint)
            .field("kind", &self.kind)
            .field("len", &self.buffer.len())
            .field("actual_length", &self.actual_length)
            .field("status", &self.status)
            .finish()
    }
}

/// A transfer the transport refused to queue
#[derive(Debug)]
pub struct Rejected {
    /// The refused transfer, returned to the driver
    pub transfer: Transfer,
    /// Transport-specific error code
    pub code: i32,
}

impl Rejected {
    pub fn new(transfer: Transfer, code: i32) -> Self {
        Rejected { transfer, code }
    }
}

/// The USB host-controller layer
///
/// # Contract
///
/// - `submit()` queues the transfer and returns without blocking. It must
///   never call [`Transfer::complete()`] before it returns; completions
///   are delivered later, from the transport's own context.
/// - `cancel()` asks the transport to finish the transfer in flight on
///   `endpoint` with [`Status::CANCELLED`]. It must not block, and must not
///   complete the transfer before it returns. It's a no-op if nothing is in
///   flight.
/// - Every submitted transfer is eventually completed exactly once.
pub trait Transport: Send + Sync {
    /// Queue `transfer` on its endpoint
    fn submit(&self, transfer: Transfer) -> core::result::Result<(), Rejected>;
    /// Cancel the transfer in flight on `endpoint`
    fn cancel(&self, endpoint: EndpointAddress);
}
