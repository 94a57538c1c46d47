//! USB host transport abstraction.
//!
//! The accessory logic never touches the host controller directly. Everything it needs, from
//! control transfers to per-device endpoint bookkeeping, goes through [`Transport`].

use std::{collections::BTreeMap, io::ErrorKind};

/// `bmRequestType` of a vendor request from device to host with device recipient.
pub const VENDOR_IN: u8 = 0xc0;
/// `bmRequestType` of a vendor request from host to device with device recipient.
pub const VENDOR_OUT: u8 = 0x40;

/// Highest valid endpoint number.
pub const MAX_ENDPOINT: u8 = 15;

/// Failure reported by a transport for a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum TransferError {
    /// Endpoint stalled the request.
    #[error("endpoint stalled")]
    Stall,
    /// Transfer did not complete within its time or NAK budget.
    #[error("transfer timed out")]
    Timeout,
    /// Device is gone.
    #[error("no device")]
    NoDevice,
    /// Resource is in use.
    #[error("resource busy")]
    Busy,
    /// Input/output error on the bus.
    #[error("input/output error")]
    Io,
    /// Any other host controller failure.
    #[error("host controller error")]
    Other,
}

impl TransferError {
    /// Matching IO error kind.
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::Stall => ErrorKind::BrokenPipe,
            Self::Timeout => ErrorKind::TimedOut,
            Self::NoDevice => ErrorKind::NotFound,
            Self::Busy => ErrorKind::ResourceBusy,
            Self::Io => ErrorKind::ConnectionAborted,
            Self::Other => ErrorKind::Other,
        }
    }
}

/// State of the transport's own enumeration task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// No device attached, waiting for one.
    Detached,
    /// Device attached and being reset or addressed.
    Attached,
    /// Device addressed, not yet configured.
    Addressed,
    /// Device is being configured by its driver.
    Configuring,
    /// Device is configured and in use.
    Running,
    /// Enumeration failed.
    Error,
}

impl TaskState {
    /// Whether a device sits addressed at the slot waiting to be configured.
    pub fn is_addressed(self) -> bool {
        matches!(self, Self::Addressed | Self::Configuring)
    }
}

/// Data toggle of an endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toggle {
    /// DATA0 packet id.
    #[default]
    Data0,
    /// DATA1 packet id.
    Data1,
}

/// Endpoint record kept in a device's endpoint table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointRecord {
    /// Endpoint address with the direction bit stripped.
    pub address: u8,
    /// `bmAttributes` of the endpoint descriptor.
    pub attributes: u8,
    /// Maximum packet size.
    pub max_packet_size: u16,
    /// Send data toggle.
    pub send_toggle: Toggle,
    /// Receive data toggle.
    pub receive_toggle: Toggle,
}

impl EndpointRecord {
    /// Transfer type bits of `bmAttributes`.
    pub const TRANSFER_TYPE_MASK: u8 = 0x03;
    /// Transfer type value of bulk endpoints.
    pub const TRANSFER_TYPE_BULK: u8 = 0x02;

    /// Creates a record with both toggles at DATA0.
    pub const fn new(address: u8, attributes: u8, max_packet_size: u16) -> Self {
        Self { address, attributes, max_packet_size, send_toggle: Toggle::Data0, receive_toggle: Toggle::Data0 }
    }

    /// Creates the record of the default control endpoint.
    pub const fn control(max_packet_size: u16) -> Self {
        Self::new(0, 0, max_packet_size)
    }

    /// Whether the endpoint uses bulk transfers.
    pub fn is_bulk(&self) -> bool {
        self.attributes & Self::TRANSFER_TYPE_MASK == Self::TRANSFER_TYPE_BULK
    }
}

/// Endpoint table of one device, keyed by endpoint address.
///
/// Entry 0 always holds the control endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTable {
    records: BTreeMap<u8, EndpointRecord>,
}

impl EndpointTable {
    /// Creates a table containing only the control endpoint.
    pub fn new(control: EndpointRecord) -> Self {
        let mut records = BTreeMap::new();
        records.insert(0, EndpointRecord { address: 0, ..control });
        Self { records }
    }

    /// The control endpoint.
    pub fn control(&self) -> &EndpointRecord {
        &self.records[&0]
    }

    /// Inserts a data endpoint, replacing any record with the same address.
    ///
    /// Returns `false` and leaves the table unchanged if the address is 0 or out of range.
    pub fn insert(&mut self, record: EndpointRecord) -> bool {
        if record.address == 0 || record.address > MAX_ENDPOINT {
            return false;
        }
        self.records.insert(record.address, record);
        true
    }

    /// Looks up an endpoint by address.
    pub fn get(&self, address: u8) -> Option<&EndpointRecord> {
        self.records.get(&address)
    }

    /// Number of endpoints including the control endpoint.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always `false`, since the control endpoint is present.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over all records in address order.
    pub fn iter(&self) -> impl Iterator<Item = &EndpointRecord> {
        self.records.values()
    }
}

impl Default for EndpointTable {
    fn default() -> Self {
        Self::new(EndpointRecord::control(8))
    }
}

/// USB host controller operations used by the accessory logic.
///
/// All transfers are synchronous. `addr` is the USB device address; endpoint numbers passed to
/// bulk transfers have the direction bit stripped.
pub trait Transport {
    /// Advances the transport's own enumeration state machine.
    fn tick(&mut self);

    /// Current state of the enumeration task.
    fn task_state(&self) -> TaskState;

    /// Overrides the state of the enumeration task.
    fn set_task_state(&mut self, state: TaskState);

    /// Vendor or class control transfer from device to host.
    ///
    /// Returns the number of bytes received.
    fn control_in(
        &mut self, addr: u8, request_type: u8, request: u8, value: u16, index: u16, buf: &mut [u8],
    ) -> Result<usize, TransferError>;

    /// Vendor or class control transfer from host to device.
    ///
    /// Returns the number of bytes sent.
    fn control_out(
        &mut self, addr: u8, request_type: u8, request: u8, value: u16, index: u16, data: &[u8],
    ) -> Result<usize, TransferError>;

    /// Reads the device descriptor into `buf`, at most `buf.len()` bytes.
    fn device_descriptor(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, TransferError>;

    /// Reads the first `buf.len()` bytes of configuration descriptor 0.
    fn config_descriptor(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, TransferError>;

    /// Selects a configuration.
    fn set_configuration(&mut self, addr: u8, value: u8) -> Result<(), TransferError>;

    /// Bulk IN transfer giving up after `nak_limit` NAKs.
    fn bulk_in(&mut self, addr: u8, endpoint: u8, buf: &mut [u8], nak_limit: u32) -> Result<usize, TransferError>;

    /// Bulk OUT transfer.
    fn bulk_out(&mut self, addr: u8, endpoint: u8, data: &[u8]) -> Result<usize, TransferError>;

    /// Endpoint table of the device at `addr`.
    fn endpoint_table(&self, addr: u8) -> Option<EndpointTable>;

    /// Replaces the endpoint table of the device at `addr`.
    fn set_endpoint_table(&mut self, addr: u8, table: EndpointTable);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn tick(&mut self) {
        (**self).tick()
    }

    fn task_state(&self) -> TaskState {
        (**self).task_state()
    }

    fn set_task_state(&mut self, state: TaskState) {
        (**self).set_task_state(state)
    }

    fn control_in(
        &mut self, addr: u8, request_type: u8, request: u8, value: u16, index: u16, buf: &mut [u8],
    ) -> Result<usize, TransferError> {
        (**self).control_in(addr, request_type, request, value, index, buf)
    }

    fn control_out(
        &mut self, addr: u8, request_type: u8, request: u8, value: u16, index: u16, data: &[u8],
    ) -> Result<usize, TransferError> {
        (**self).control_out(addr, request_type, request, value, index, data)
    }

    fn device_descriptor(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, TransferError> {
        (**self).device_descriptor(addr, buf)
    }

    fn config_descriptor(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, TransferError> {
        (**self).config_descriptor(addr, buf)
    }

    fn set_configuration(&mut self, addr: u8, value: u8) -> Result<(), TransferError> {
        (**self).set_configuration(addr, value)
    }

    fn bulk_in(&mut self, addr: u8, endpoint: u8, buf: &mut [u8], nak_limit: u32) -> Result<usize, TransferError> {
        (**self).bulk_in(addr, endpoint, buf, nak_limit)
    }

    fn bulk_out(&mut self, addr: u8, endpoint: u8, data: &[u8]) -> Result<usize, TransferError> {
        (**self).bulk_out(addr, endpoint, data)
    }

    fn endpoint_table(&self, addr: u8) -> Option<EndpointTable> {
        (**self).endpoint_table(addr)
    }

    fn set_endpoint_table(&mut self, addr: u8, table: EndpointTable) {
        (**self).set_endpoint_table(addr, table)
    }
}
