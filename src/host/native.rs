//! Native libusb transport

use rusb::{Device, DeviceHandle, UsbContext};
use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::{
    classify::AccessoryProduct,
    descriptor::{CONFIGURATION, DEVICE},
    transport::{EndpointRecord, EndpointTable, TaskState, TransferError, Transport},
};

/// `bmRequestType` of a standard request from device to host.
const STANDARD_IN: u8 = 0x80;
const GET_DESCRIPTOR: u8 = 0x06;

/// Interface of the accessory bulk endpoints.
const ACCESSORY_INTERFACE: u8 = 0;

const TIMEOUT: Duration = Duration::from_secs(1);

/// Time granted per NAK of a bulk read.
const NAK_TIME: Duration = Duration::from_micros(125);

pub(crate) fn to_transfer_err(error: rusb::Error) -> TransferError {
    match error {
        rusb::Error::Io => TransferError::Io,
        rusb::Error::InvalidParam => TransferError::Other,
        rusb::Error::Access => TransferError::Other,
        rusb::Error::NoDevice => TransferError::NoDevice,
        rusb::Error::NotFound => TransferError::NoDevice,
        rusb::Error::Busy => TransferError::Busy,
        rusb::Error::Timeout => TransferError::Timeout,
        rusb::Error::Overflow => TransferError::Io,
        rusb::Error::Pipe => TransferError::Stall,
        rusb::Error::Interrupted => TransferError::Io,
        rusb::Error::NoMem => TransferError::Other,
        rusb::Error::NotSupported => TransferError::Other,
        rusb::Error::BadDescriptor => TransferError::Io,
        rusb::Error::Other => TransferError::Other,
    }
}

fn nak_timeout(nak_limit: u32) -> Duration {
    (NAK_TIME * nak_limit).max(Duration::from_millis(1))
}

struct OpenDevice<C: UsbContext> {
    hnd: Arc<DeviceHandle<C>>,
    bus: u8,
    address: u8,
}

/// Accessory transport on top of libusb.
///
/// Each [`tick`](Transport::tick) rescans the bus. When no device is open, the first device that
/// is in accessory mode or matches one of the configured vendor and product ids is opened and
/// reported as [`TaskState::Addressed`]. When the open device disappears, the state becomes
/// [`TaskState::Detached`].
///
/// libusb assigns device addresses itself, so the `addr` argument of the transfers only selects
/// the endpoint table.
pub struct RusbTransport<C: UsbContext> {
    context: C,
    candidates: Vec<(u16, u16)>,
    device: Option<OpenDevice<C>>,
    state: TaskState,
    tables: HashMap<u8, EndpointTable>,
}

impl<C: UsbContext> std::fmt::Debug for RusbTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RusbTransport")
            .field("candidates", &self.candidates)
            .field("device", &self.device.as_ref().map(|dev| (dev.bus, dev.address)))
            .field("state", &self.state)
            .finish()
    }
}

impl<C: UsbContext> RusbTransport<C> {
    /// Creates a transport that opens devices already in accessory mode.
    pub fn new(context: C) -> Self {
        Self { context, candidates: Vec::new(), device: None, state: TaskState::Detached, tables: HashMap::new() }
    }

    /// Also opens devices with the specified vendor and product id, so that they can be switched
    /// into accessory mode.
    #[must_use]
    pub fn with_device(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.candidates.push((vendor_id, product_id));
        self
    }

    /// Handle of the open device.
    pub fn handle(&self) -> Option<Arc<DeviceHandle<C>>> {
        self.device.as_ref().map(|dev| dev.hnd.clone())
    }

    /// Bus number and address of the open device.
    pub fn location(&self) -> Option<(u8, u8)> {
        self.device.as_ref().map(|dev| (dev.bus, dev.address))
    }

    fn is_candidate(&self, vendor_id: u16, product_id: u16) -> bool {
        AccessoryProduct::from_ids(vendor_id, product_id).is_some() || self.candidates.contains(&(vendor_id, product_id))
    }

    fn hnd(&self) -> Result<&DeviceHandle<C>, TransferError> {
        self.device.as_ref().map(|dev| &*dev.hnd).ok_or(TransferError::NoDevice)
    }

    fn open(&mut self, dev: &Device<C>) -> rusb::Result<()> {
        let desc = dev.device_descriptor()?;
        let mut hnd = dev.open()?;
        if let Err(err) = hnd.set_auto_detach_kernel_driver(true) {
            tracing::debug!("kernel driver auto detach unavailable: {err}");
        }

        tracing::info!(
            "opened device {:04x}:{:04x} at {}-{}",
            desc.vendor_id(),
            desc.product_id(),
            dev.bus_number(),
            dev.address()
        );
        self.tables.clear();
        self.tables.insert(0, EndpointTable::new(EndpointRecord::control(desc.max_packet_size().into())));
        self.device = Some(OpenDevice { hnd: Arc::new(hnd), bus: dev.bus_number(), address: dev.address() });
        self.state = TaskState::Addressed;
        Ok(())
    }
}

impl<C: UsbContext> Transport for RusbTransport<C> {
    fn tick(&mut self) {
        let devices = match self.context.devices() {
            Ok(devices) => devices,
            Err(err) => {
                tracing::warn!("cannot list USB devices: {err}");
                return;
            }
        };

        if let Some(open) = &self.device {
            let present = devices.iter().any(|dev| dev.bus_number() == open.bus && dev.address() == open.address);
            if !present {
                tracing::info!("device at {}-{} detached", open.bus, open.address);
                self.device = None;
                self.tables.clear();
                self.state = TaskState::Detached;
            }
            return;
        }

        for dev in devices.iter() {
            let Ok(desc) = dev.device_descriptor() else { continue };
            if !self.is_candidate(desc.vendor_id(), desc.product_id()) {
                continue;
            }
            match self.open(&dev) {
                Ok(()) => return,
                Err(err) => tracing::warn!("cannot open device at {}-{}: {err}", dev.bus_number(), dev.address()),
            }
        }
    }

    fn task_state(&self) -> TaskState {
        self.state
    }

    fn set_task_state(&mut self, state: TaskState) {
        self.state = state;
    }

    fn control_in(
        &mut self, _addr: u8, request_type: u8, request: u8, value: u16, index: u16, buf: &mut [u8],
    ) -> Result<usize, TransferError> {
        self.hnd()?.read_control(request_type, request, value, index, buf, TIMEOUT).map_err(to_transfer_err)
    }

    fn control_out(
        &mut self, _addr: u8, request_type: u8, request: u8, value: u16, index: u16, data: &[u8],
    ) -> Result<usize, TransferError> {
        self.hnd()?.write_control(request_type, request, value, index, data, TIMEOUT).map_err(to_transfer_err)
    }

    fn device_descriptor(&mut self, _addr: u8, buf: &mut [u8]) -> Result<usize, TransferError> {
        let value = u16::from(DEVICE) << 8;
        self.hnd()?.read_control(STANDARD_IN, GET_DESCRIPTOR, value, 0, buf, TIMEOUT).map_err(to_transfer_err)
    }

    fn config_descriptor(&mut self, _addr: u8, buf: &mut [u8]) -> Result<usize, TransferError> {
        let value = u16::from(CONFIGURATION) << 8;
        self.hnd()?.read_control(STANDARD_IN, GET_DESCRIPTOR, value, 0, buf, TIMEOUT).map_err(to_transfer_err)
    }

    fn set_configuration(&mut self, _addr: u8, value: u8) -> Result<(), TransferError> {
        let hnd = self.hnd()?;
        hnd.set_active_configuration(value).map_err(to_transfer_err)?;
        hnd.claim_interface(ACCESSORY_INTERFACE).map_err(to_transfer_err)
    }

    fn bulk_in(&mut self, _addr: u8, endpoint: u8, buf: &mut [u8], nak_limit: u32) -> Result<usize, TransferError> {
        self.hnd()?.read_bulk(endpoint | 0x80, buf, nak_timeout(nak_limit)).map_err(to_transfer_err)
    }

    fn bulk_out(&mut self, _addr: u8, endpoint: u8, data: &[u8]) -> Result<usize, TransferError> {
        self.hnd()?.write_bulk(endpoint, data, TIMEOUT).map_err(to_transfer_err)
    }

    fn endpoint_table(&self, addr: u8) -> Option<EndpointTable> {
        self.tables.get(&addr).cloned()
    }

    fn set_endpoint_table(&mut self, addr: u8, table: EndpointTable) {
        self.tables.insert(addr, table);
    }
}
