//! Test doubles for the transport and the audio subsystem

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use crate::{
    pipeline::PeriodListener,
    transfer::{Rejected, Status, Transfer, Transport},
};
use usb_device::endpoint::EndpointAddress;

/// A host controller that completes transfers when a test says so
#[derive(Default)]
pub(crate) struct MockTransport {
    in_flight: Mutex<VecDeque<Transfer>>,
    submits: AtomicUsize,
    cancels: AtomicUsize,
    fail_submits: AtomicUsize,
    complete_on_cancel: AtomicBool,
    givebacks: Mutex<Vec<JoinHandle<()>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse the next `count` submissions with -19 (no device)
    pub(crate) fn fail_next_submits(&self, count: usize) {
        self.fail_submits.store(count, Ordering::SeqCst);
    }

    /// Complete cancelled transfers from a separate thread
    pub(crate) fn complete_on_cancel(&self, enable: bool) {
        self.complete_on_cancel.store(enable, Ordering::SeqCst);
    }

    /// Take the oldest in-flight transfer, without completing it
    pub(crate) fn take(&self) -> Option<Transfer> {
        self.in_flight.lock().unwrap().pop_front()
    }

    /// Fill the oldest in-flight transfer with `payload` and complete it
    ///
    /// Returns `false` if nothing was in flight.
    pub(crate) fn complete(&self, status: Status, payload: &[u8]) -> bool {
        match self.take() {
            Some(transfer) => {
                Self::finish(transfer, status, payload);
                true
            }
            None => false,
        }
    }

    pub(crate) fn finish(mut transfer: Transfer, status: Status, payload: &[u8]) {
        let len = payload.len().min(transfer.len());
        transfer.buffer_mut()[..len].copy_from_slice(&payload[..len]);
        transfer.complete(status, len);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    pub(crate) fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub(crate) fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Wait for every give-back thread
    pub(crate) fn join(&self) {
        let handles: Vec<_> = self.givebacks.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

impl Transport for MockTransport {
    fn submit(&self, transfer: Transfer) -> Result<(), Rejected> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let refuse = self
            .fail_submits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(Rejected::new(transfer, -19));
        }
        self.in_flight.lock().unwrap().push_back(transfer);
        Ok(())
    }

    fn cancel(&self, endpoint: EndpointAddress) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if !self.complete_on_cancel.load(Ordering::SeqCst) {
            return;
        }
        let cancelled = {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight
                .iter()
                .position(|transfer| transfer.endpoint() == endpoint)
                .and_then(|idx| in_flight.remove(idx))
        };
        if let Some(transfer) = cancelled {
            let handle = thread::spawn(move || transfer.complete(Status::CANCELLED, 0));
            self.givebacks.lock().unwrap().push(handle);
        }
    }
}

/// Counts period-elapsed notifications
#[derive(Default)]
pub(crate) struct CountingListener {
    count: AtomicUsize,
    position: AtomicUsize,
}

impl CountingListener {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub(crate) fn last_position(&self) -> usize {
        self.position.load(Ordering::SeqCst)
    }
}

impl PeriodListener for CountingListener {
    fn period_elapsed(&self, position: usize) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.position.store(position, Ordering::SeqCst);
    }
}
