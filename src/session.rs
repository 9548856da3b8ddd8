//! The capture state machine
//!
//! ```text
//!   Closed -> Opened -> Configured -> Prepared -> Running <-> Stopped
//!                ^          |            |                     |
//!                +---- hw_free() --------+---------------------+
//!                                                Stopped -> Prepared
//!   close() from anywhere -> Closed
//! ```
//!
//! Every transition holds the session's control lock. The current state is
//! mirrored into an atomic so that [`pointer()`](CaptureSession::pointer)
//! and the consumer data path never take that lock.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use crate::{
    config::{HwParams, HARDWARE},
    device::DeviceHandle,
    error::{Error, Result},
    pipeline::{Binding, PeriodListener, Pipeline, Stats},
    ring::CaptureRing,
};

/// Capture session states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Closed = 0,
    Opened = 1,
    /// Hardware parameters accepted
    Configured = 2,
    /// Transfer request allocated, cursors reset
    Prepared = 3,
    /// Transfer in flight
    Running = 4,
    /// Transfer parked; buffer and cursors kept
    Stopped = 5,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Opened,
            2 => Self::Configured,
            3 => Self::Prepared,
            4 => Self::Running,
            5 => Self::Stopped,
            _ => Self::Closed,
        }
    }
}

impl core::fmt::Display for State {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Opened => write!(f, "opened"),
            Self::Configured => write!(f, "configured"),
            Self::Prepared => write!(f, "prepared"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(feature = "defmt-03")]
impl defmt_03::Format for State {
    fn format(&self, f: defmt_03::Formatter) {
        let name = match self {
            Self::Closed => "closed",
            Self::Opened => "opened",
            Self::Configured => "configured",
            Self::Prepared => "prepared",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        defmt_03::write!(f, "{=str}", name)
    }
}

/// State guarded by the control lock
struct Control {
    params: Option<HwParams>,
    pipeline: Option<Arc<Pipeline>>,
}

/// One open-to-close capture session on a device
pub struct CaptureSession {
    device: Arc<DeviceHandle>,
    listener: Arc<dyn PeriodListener>,
    ring: Arc<CaptureRing>,
    stats: Arc<Stats>,
    state: AtomicU8,
    control: Mutex<Control>,
}

impl CaptureSession {
    /// Allocate a session and its capture storage, in the `Opened` state
    pub(crate) fn open(
        device: Arc<DeviceHandle>,
        listener: Arc<dyn PeriodListener>,
    ) -> Result<Self> {
        let ring = CaptureRing::new(HARDWARE.buffer_bytes_max, HARDWARE.format.frame_bytes())?;
        debug!("session opened");
        Ok(CaptureSession {
            device,
            listener,
            ring: Arc::new(ring),
            stats: Arc::new(Stats::default()),
            state: AtomicU8::new(State::Opened as u8),
            control: Mutex::new(Control {
                params: None,
                pipeline: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a new state
    ///
    /// Takes the control guard to prove that the caller holds the lock.
    fn set_state(&self, _control: &mut Control, state: State) {
        let from = self.state.swap(state as u8, Ordering::AcqRel);
        debug!("{} -> {}", State::from_u8(from), state);
    }

    /// Fails unless the current state is one of `allowed`
    fn require(&self, op: &'static str, allowed: &[State]) -> Result<State> {
        let from = self.state();
        if allowed.contains(&from) {
            Ok(from)
        } else {
            debug!("reject {} from {}", op, from);
            Err(Error::InvalidStateTransition { from, op })
        }
    }

    /// Current state
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Negotiated hardware parameters, if configured
    pub fn params(&self) -> Option<HwParams> {
        self.lock().params
    }

    /// Runtime statistics from the completion path
    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Indicates if a transfer request is allocated
    pub fn has_transfer(&self) -> bool {
        self.lock().pipeline.is_some()
    }

    /// Accept hardware parameters
    ///
    /// Only the fixed mono / S16_LE / 44.1 kHz format is accepted. The
    /// buffer must also hold at least one full transfer, or every completion
    /// would overrun. On failure, the session stays `Opened`.
    pub fn configure(&self, params: HwParams) -> Result<()> {
        let mut control = self.lock();
        self.require("configure", &[State::Opened])?;
        params.validate(&HARDWARE)?;
        let scratch_len = self.device.config().scratch_len();
        if scratch_len > params.buffer_bytes {
            debug!(
                "buffer {} smaller than transfer {}",
                params.buffer_bytes, scratch_len
            );
            return Err(Error::InvalidParams {
                buffer_bytes: params.buffer_bytes,
                period_bytes: params.period_bytes,
            });
        }
        self.ring
            .configure(params.buffer_bytes, params.period_bytes)?;
        control.params = Some(params);
        self.set_state(&mut control, State::Configured);
        Ok(())
    }

    /// Allocate the transfer request, and reset the capture cursors
    ///
    /// Valid from `Configured`, or from `Stopped` to restart from the top of
    /// the buffer. A stopped session reuses its parked transfer.
    pub fn prepare(&self) -> Result<()> {
        let mut control = self.lock();
        self.require("prepare", &[State::Configured, State::Stopped])?;
        if control.pipeline.is_none() {
            let binding = Binding {
                endpoint: self.device.endpoint(),
                transport: self.device.transport(),
                active: self.device.activity(),
                ring: self.ring.clone(),
                listener: self.listener.clone(),
                stats: self.stats.clone(),
                overrun: self.device.config().overrun(),
            };
            let pipeline = Pipeline::new(binding, self.device.config().scratch_len())?;
            control.pipeline = Some(pipeline);
        }
        self.ring.reset();
        self.set_state(&mut control, State::Prepared);
        Ok(())
    }

    /// Start capturing
    ///
    /// Raises the device's activity flag and submits the transfer. If the
    /// transport refuses it, the flag is cleared, the state is unchanged, and
    /// the call fails with `TransferSubmitFailed`.
    pub fn start(&self) -> Result<()> {
        let mut control = self.lock();
        self.require("start", &[State::Prepared, State::Stopped])?;
        if !self.device.is_attached() {
            return Err(Error::NotAttached);
        }
        let pipeline = control.pipeline.clone().ok_or(Error::OutOfResources)?;
        pipeline.start()?;
        self.set_state(&mut control, State::Running);
        Ok(())
    }

    /// Stop capturing
    ///
    /// Clears the activity flag, cancels the transfer, and waits for any
    /// completion in progress to finish.
    pub fn stop(&self) -> Result<()> {
        let mut control = self.lock();
        self.require("stop", &[State::Running])?;
        if let Some(pipeline) = &control.pipeline {
            pipeline.quiesce();
        }
        self.set_state(&mut control, State::Stopped);
        Ok(())
    }

    /// Quiesce a running session for suspend
    ///
    /// Leaves the session `Stopped` with its buffer, transfer, and cursors
    /// intact. Capture resumes on the next `start()`.
    pub(crate) fn suspend(&self) {
        let mut control = self.lock();
        if self.state() == State::Running {
            if let Some(pipeline) = &control.pipeline {
                pipeline.quiesce();
            }
            self.set_state(&mut control, State::Stopped);
        }
    }

    /// Release the transfer request, and return to `Opened`
    pub fn hw_free(&self) -> Result<()> {
        let mut control = self.lock();
        self.require(
            "hw_free",
            &[State::Configured, State::Prepared, State::Stopped],
        )?;
        control.pipeline = None;
        control.params = None;
        self.set_state(&mut control, State::Opened);
        Ok(())
    }

    /// Tear the session down
    ///
    /// Cancels any in-flight transfer and waits for it, then frees the
    /// transfer request and the capture buffer. Valid from any state; closing a closed session does
    /// nothing.
    pub fn close(&self) {
        let mut control = self.lock();
        if self.state() == State::Closed {
            return;
        }
        if let Some(pipeline) = control.pipeline.take() {
            pipeline.quiesce();
        }
        control.params = None;
        self.set_state(&mut control, State::Closed);
        self.ring.release();
    }

    /// Producer position in frames
    ///
    /// Meaningful in `Prepared`, `Running`, and `Stopped`; zero otherwise.
    /// Never blocks.
    pub fn pointer(&self) -> usize {
        match self.state() {
            State::Prepared | State::Running | State::Stopped => self.ring.position(),
            _ => 0,
        }
    }

    /// Unread capture bytes
    pub fn available(&self) -> usize {
        match self.state() {
            State::Closed | State::Opened => 0,
            _ => self.ring.available(),
        }
    }

    /// Copy unread capture data into `dst`
    ///
    /// Returns the number of bytes copied. Never takes the control lock.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        match self.state() {
            State::Closed | State::Opened => 0,
            _ => self.ring.read(dst),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}
