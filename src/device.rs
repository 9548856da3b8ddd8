//! The device manager
//!
//! A [`Device`] owns the handle for one attached microphone and at most one
//! capture session. Its lock serializes the lifecycle of that session
//! against detach and suspend.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use crate::{
    config::Config,
    descriptor::{find_capture_endpoint, AltSetting, CaptureEndpoint},
    driver::DeviceId,
    error::{Error, Result},
    pipeline::PeriodListener,
    session::{CaptureSession, State},
    transfer::Transport,
};

/// What a session needs to know about its device
pub(crate) struct DeviceHandle {
    vendor: u16,
    product: u16,
    endpoint: CaptureEndpoint,
    transport: Arc<dyn Transport>,
    config: Config,
    /// Resubmit completed transfers while set
    active: Arc<AtomicBool>,
    attached: AtomicBool,
}

impl DeviceHandle {
    pub(crate) fn endpoint(&self) -> CaptureEndpoint {
        self.endpoint
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub(crate) fn activity(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn for_test(transport: Arc<dyn Transport>, config: Config) -> Self {
        use usb_device::endpoint::{EndpointAddress, EndpointType};
        DeviceHandle {
            vendor: crate::VENDOR_ID,
            product: crate::PRODUCT_ID,
            endpoint: CaptureEndpoint {
                address: EndpointAddress::from(0x81),
                kind: EndpointType::Bulk,
                max_packet_size: 64,
            },
            transport,
            config,
            active: Arc::new(AtomicBool::new(false)),
            attached: AtomicBool::new(true),
        }
    }
}

/// An attached microphone
pub struct Device {
    id: DeviceId,
    handle: Arc<DeviceHandle>,
    suspended: AtomicBool,
    session: Mutex<Option<Arc<CaptureSession>>>,
}

impl Device {
    /// Discover the capture endpoint, and take ownership of the device
    ///
    /// Fails with `NoCaptureEndpoint` if `setting` has no usable IN
    /// endpoint. The device must then be rejected.
    pub(crate) fn attach(
        id: DeviceId,
        vendor: u16,
        product: u16,
        setting: &AltSetting,
        transport: Arc<dyn Transport>,
        config: Config,
    ) -> Result<Self> {
        let endpoint = find_capture_endpoint(setting, config.endpoint_preference())?;
        info!(
            "Attached {:04x}:{:04x} as device {}, capture EP{}",
            vendor,
            product,
            id,
            endpoint.address.index()
        );
        Ok(Device {
            id,
            handle: Arc::new(DeviceHandle {
                vendor,
                product,
                endpoint,
                transport,
                config,
                active: Arc::new(AtomicBool::new(false)),
                attached: AtomicBool::new(true),
            }),
            suspended: AtomicBool::new(false),
            session: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<CaptureSession>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn vendor(&self) -> u16 {
        self.handle.vendor
    }

    pub fn product(&self) -> u16 {
        self.handle.product
    }

    /// The endpoint selected for capture
    pub fn endpoint(&self) -> CaptureEndpoint {
        self.handle.endpoint
    }

    pub fn config(&self) -> &Config {
        self.handle.config()
    }

    /// Indicates if completed transfers are being resubmitted
    pub fn is_active(&self) -> bool {
        self.handle.active.load(Ordering::Acquire)
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_attached()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Open a capture session
    ///
    /// Only one session may be open at a time; a second open fails with
    /// `Busy` until the first is closed. Period notifications go to
    /// `listener`.
    pub fn open(&self, listener: Arc<dyn PeriodListener>) -> Result<Arc<CaptureSession>> {
        let mut session = self.lock();
        if !self.is_attached() {
            return Err(Error::NotAttached);
        }
        if let Some(open) = session.as_ref() {
            if open.state() != State::Closed {
                return Err(Error::Busy);
            }
        }
        let opened = Arc::new(CaptureSession::open(self.handle.clone(), listener)?);
        *session = Some(opened.clone());
        Ok(opened)
    }

    /// The open session, if any
    ///
    /// A session closed directly is dropped from the device here.
    pub fn session(&self) -> Option<Arc<CaptureSession>> {
        let mut session = self.lock();
        if session
            .as_ref()
            .is_some_and(|session| session.state() == State::Closed)
        {
            *session = None;
        }
        session.clone()
    }

    /// Close the open session, if any
    pub fn close(&self) {
        if let Some(session) = self.lock().take() {
            session.close();
        }
    }

    /// Force-stop and close any session, then release the device
    ///
    /// When this returns, no transfer for this device is in flight.
    pub(crate) fn detach(&self) {
        let mut session = self.lock();
        self.handle.attached.store(false, Ordering::Release);
        if let Some(session) = session.take() {
            if let Err(err) = session.stop() {
                debug!("Device {} detach: {}", self.id, err);
            }
            session.close();
        }
        self.handle.active.store(false, Ordering::Release);
        info!("Detached device {}", self.id);
    }

    /// Stop resubmitting transfers, keeping all session state
    ///
    /// A running session is quiesced and left `Stopped`. Capture resumes on
    /// the next `start()`.
    pub fn suspend(&self) {
        let session = self.lock();
        self.suspended.store(true, Ordering::Release);
        self.handle.active.store(false, Ordering::Release);
        if let Some(session) = session.as_ref() {
            session.suspend();
        }
        debug!("Suspended device {}", self.id);
    }

    /// Mark the device resumed
    ///
    /// Nothing is resubmitted until the next `start()`.
    pub fn resume(&self) {
        let _session = self.lock();
        self.suspended.store(false, Ordering::Release);
        debug!("Resumed device {}", self.id);
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("vendor", &self.handle.vendor)
            .field("product", &self.handle.product)
            .field("endpoint", &self.handle.endpoint)
            .field("attached", &self.is_attached())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Device;
    use crate::{
        config::{Config, Format, HwParams},
        descriptor::{tests::SNOWBALL_INTERFACE, AltSetting},
        driver::DeviceId,
        error::Error,
        mock::{CountingListener, MockTransport},
        session::{CaptureSession, State},
        transfer::Status,
        PRODUCT_ID, VENDOR_ID,
    };
    use std::sync::Arc;
    use usb_device::endpoint::EndpointAddress;

    fn attach() -> (Device, Arc<MockTransport>) {
        let transport = MockTransport::new();
        let setting = AltSetting::parse(SNOWBALL_INTERFACE).unwrap();
        let device = Device::attach(
            DeviceId(0),
            VENDOR_ID,
            PRODUCT_ID,
            &setting,
            transport.clone(),
            Config::default(),
        )
        .unwrap();
        transport.complete_on_cancel(true);
        (device, transport)
    }

    fn running(device: &Device) -> Arc<CaptureSession> {
        let session = device.open(Arc::new(CountingListener::default())).unwrap();
        session
            .configure(HwParams::new(Format::MONO_S16LE_44100, 88_200, 1024))
            .unwrap();
        session.prepare().unwrap();
        session.start().unwrap();
        session
    }

    #[test]
    fn attach_selects_bulk_in() {
        let (device, _) = attach();
        assert_eq!(device.endpoint().address, EndpointAddress::from(0x81));
        assert!(device.is_attached());
        assert!(!device.is_active());
    }

    #[test]
    fn attach_without_capture_endpoint() {
        let setting = AltSetting::parse(&[
            9, 4, 0, 0, 1, 0xFF, 0, 0, 0, //
            7, 5, 0x02, 0x02, 0x40, 0x00, 0,
        ])
        .unwrap();
        let result = Device::attach(
            DeviceId(0),
            VENDOR_ID,
            PRODUCT_ID,
            &setting,
            MockTransport::new(),
            Config::default(),
        );
        assert!(matches!(result, Err(Error::NoCaptureEndpoint)));
    }

    #[test]
    fn one_session_at_a_time() {
        let (device, _) = attach();
        let listener = Arc::new(CountingListener::default());
        let first = device.open(listener.clone()).unwrap();
        assert!(matches!(device.open(listener.clone()), Err(Error::Busy)));

        first.close();
        assert!(device.session().is_none());
        let second = device.open(listener.clone()).unwrap();
        device.close();
        assert_eq!(second.state(), State::Closed);
        device.open(listener).unwrap();
    }

    #[test]
    fn detach_stops_running_session() {
        let (device, transport) = attach();
        let session = running(&device);
        assert!(device.is_active());
        transport.complete(Status::empty(), &[0; 1024]);

        device.detach();
        assert_eq!(session.state(), State::Closed);
        assert!(!session.has_transfer());
        assert!(!device.is_active());
        assert_eq!(transport.in_flight(), 0);
        assert_eq!(transport.cancels(), 1);
        assert!(matches!(
            device.open(Arc::new(CountingListener::default())),
            Err(Error::NotAttached)
        ));
        transport.join();
    }

    #[test]
    fn detach_closes_idle_session() {
        let (device, transport) = attach();
        let session = device.open(Arc::new(CountingListener::default())).unwrap();
        session
            .configure(HwParams::new(Format::MONO_S16LE_44100, 4096, 1024))
            .unwrap();
        session.prepare().unwrap();

        device.detach();
        assert_eq!(session.state(), State::Closed);
        assert!(!session.has_transfer());
        assert_eq!(transport.submits(), 0);
        assert_eq!(transport.cancels(), 0);
        assert!(!device.is_attached());
    }

    #[test]
    fn suspend_keeps_session_state() {
        let (device, transport) = attach();
        let session = running(&device);
        transport.complete(Status::empty(), &[0; 1024]);

        device.suspend();
        assert!(device.is_suspended());
        assert!(!device.is_active());
        assert_eq!(session.state(), State::Stopped);
        assert!(session.has_transfer());
        assert_eq!(session.pointer(), 512);
        assert_eq!(transport.in_flight(), 0);

        let submits = transport.submits();
        device.resume();
        assert!(!device.is_suspended());
        assert_eq!(transport.submits(), submits);
        assert_eq!(session.state(), State::Stopped);

        session.start().unwrap();
        assert!(device.is_active());
        assert_eq!(transport.in_flight(), 1);
        device.detach();
        transport.join();
    }

    #[test]
    fn suspend_without_session() {
        let (device, _) = attach();
        device.suspend();
        assert!(!device.is_active());
        device.resume();
        assert!(device.open(Arc::new(CountingListener::default())).is_ok());
    }
}
