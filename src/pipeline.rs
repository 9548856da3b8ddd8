//! The transfer completion loop
//!
//! Each prepared session owns one [`Pipeline`], which owns exactly one
//! transfer request. There's only one transfer in flight at a time, so
//! completions for a session never run concurrently, and the ring's
//! producer side needs no extra locking.
//!
//! The pipeline tracks where its transfer is in a small slot:
//!
//! ```text
//!   Idle(transfer) --start()--> Submitted --complete()--> Submitted (resubmitted)
//!        ^                          |                         |
//!        |                     quiesce()                      | inactive, or
//!        |                          v                         | resubmit refused
//!        +------complete()------ Cancelling                   |
//!        +----------------------------------------------------+
//! ```
//!
//! The slot lock is only held for bookkeeping and for the non-blocking
//! `Transport::submit()`. The ring copy and the period notifications run
//! without it.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
};

use crate::{
    config::OverrunPolicy,
    descriptor::CaptureEndpoint,
    error::{Error, Result},
    ring::CaptureRing,
    transfer::{Rejected, Status, Transfer, Transport},
};

/// Receives period-elapsed notifications from the completion path
///
/// Called from the transport's completion context, once per period
/// boundary crossed. Implementations must not block, and must not stop or
/// close the session from inside the callback.
pub trait PeriodListener: Send + Sync {
    /// A period of capture data is ready. `position` is the producer
    /// position, in frames.
    fn period_elapsed(&self, position: usize);
}

impl<F> PeriodListener for F
where
    F: Fn(usize) + Send + Sync,
{
    fn period_elapsed(&self, position: usize) {
        self(position)
    }
}

/// Runtime statistics from the completion path
#[derive(Debug, Default)]
pub struct Stats {
    pub completions: AtomicU64,
    pub bytes_captured: AtomicU64,
    pub transport_errors: AtomicU64,
    pub overruns: AtomicU64,
    pub periods: AtomicU64,
    pub resubmit_failures: AtomicU64,
}

enum Slot {
    /// Owned by the pipeline
    Idle(Transfer),
    /// Owned by the transport
    Submitted,
    /// Owned by the transport, and cancellation was requested
    Cancelling,
}

pub(crate) struct Pipeline {
    endpoint: CaptureEndpoint,
    transport: Arc<dyn Transport>,
    active: Arc<AtomicBool>,
    ring: Arc<CaptureRing>,
    listener: Arc<dyn PeriodListener>,
    stats: Arc<Stats>,
    overrun: OverrunPolicy,
    slot: Mutex<Slot>,
    parked: Condvar,
}

/// Everything a pipeline borrows from its session
pub(crate) struct Binding {
    pub endpoint: CaptureEndpoint,
    pub transport: Arc<dyn Transport>,
    pub active: Arc<AtomicBool>,
    pub ring: Arc<CaptureRing>,
    pub listener: Arc<dyn PeriodListener>,
    pub stats: Arc<Stats>,
    pub overrun: OverrunPolicy,
}

impl Pipeline {
    /// Allocate the transfer request and its scratch buffer
    pub(crate) fn new(binding: Binding, scratch_len: usize) -> Result<Arc<Self>> {
        let buffer = Transfer::allocate_buffer(scratch_len)?;
        Ok(Arc::new_cyclic(|owner| {
            let transfer = Transfer::new(
                binding.endpoint.address,
                binding.endpoint.kind,
                buffer,
                owner.clone(),
            );
            Pipeline {
                endpoint: binding.endpoint,
                transport: binding.transport,
                active: binding.active,
                ring: binding.ring,
                listener: binding.listener,
                stats: binding.stats,
                overrun: binding.overrun,
                slot: Mutex::new(Slot::Idle(transfer)),
                parked: Condvar::new(),
            }
        }))
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Indicates if the transfer is parked with the pipeline
    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        matches!(*self.lock(), Slot::Idle(_))
    }

    /// Raise the activity flag and submit the transfer
    ///
    /// If the transport refuses the transfer, the flag is cleared again and
    /// the transfer stays parked.
    pub(crate) fn start(&self) -> Result<()> {
        let mut slot = self.lock();
        let mut transfer = match core::mem::replace(&mut *slot, Slot::Submitted) {
            Slot::Idle(transfer) => transfer,
            busy => {
                *slot = busy;
                return Err(Error::Busy);
            }
        };

        self.active.store(true, Ordering::Release);
        transfer.prime();
        match self.transport.submit(transfer) {
            Ok(()) => Ok(()),
            Err(Rejected { transfer, code }) => {
                self.active.store(false, Ordering::Release);
                *slot = Slot::Idle(transfer);
                error!(
                    "Failed to submit transfer on EP{}: {}",
                    self.endpoint.address.index(),
                    code
                );
                Err(Error::TransferSubmitFailed(code))
            }
        }
    }

    /// Clear the activity flag, cancel the transfer, and wait until it's parked
    ///
    /// This is the one blocking rendezvous with the completion path. When it
    /// returns, the transport no longer owns the transfer.
    pub(crate) fn quiesce(&self) {
        self.active.store(false, Ordering::Release);

        let mut slot = self.lock();
        if matches!(*slot, Slot::Submitted) {
            *slot = Slot::Cancelling;
            drop(slot);
            self.transport.cancel(self.endpoint.address);
            slot = self.lock();
        }
        while !matches!(*slot, Slot::Idle(_)) {
            slot = self
                .parked
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Handle a finished transfer
    ///
    /// Runs in the transport's completion context.
    pub(crate) fn complete(&self, transfer: Transfer) {
        let status = transfer.status();
        self.stats.completions.fetch_add(1, Ordering::Relaxed);
        trace!(
            "EP{} complete {:?} {}",
            self.endpoint.address.index(),
            status,
            transfer.actual_length()
        );

        if status.is_success() {
            self.capture(transfer.data());
        } else if !status.contains(Status::CANCELLED) {
            self.stats.transport_errors.fetch_add(1, Ordering::Relaxed);
            debug!(
                "EP{} transfer error {:?}",
                self.endpoint.address.index(),
                status
            );
        }

        let mut slot = self.lock();
        let resubmit = matches!(*slot, Slot::Submitted) && self.active.load(Ordering::Acquire);
        if resubmit {
            let mut transfer = transfer;
            transfer.prime();
            match self.transport.submit(transfer) {
                Ok(()) => return,
                Err(Rejected { transfer, code }) => {
                    self.stats.resubmit_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "Failed to resubmit transfer on EP{}: {}",
                        self.endpoint.address.index(),
                        code
                    );
                    *slot = Slot::Idle(transfer);
                }
            }
        } else {
            *slot = Slot::Idle(transfer);
        }
        drop(slot);
        self.parked.notify_all();
    }

    /// Copy a completed payload into the ring, and signal elapsed periods
    fn capture(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if self.overrun == OverrunPolicy::Drop && data.len() > self.ring.free() {
            let overruns = self.stats.overruns.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "Capture overrun, dropped {} bytes ({} overruns)",
                data.len(),
                overruns
            );
            return;
        }

        self.ring.write(data);
        self.stats
            .bytes_captured
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        let periods = self.ring.take_elapsed_periods();
        if periods > 0 {
            self.stats.periods.fetch_add(periods, Ordering::Relaxed);
            let position = self.ring.position();
            for _ in 0..periods {
                self.listener.period_elapsed(position);
            }
        }
    }
}
