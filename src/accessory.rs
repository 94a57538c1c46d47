//! Accessory session.
//!
//! An [`Accessory`] owns the transport of one attached-device slot and is driven by calling
//! [`Accessory::poll`] from the application's control loop. Each poll advances the transport
//! and, when a new device has been addressed, either configures it directly (it already is in
//! accessory mode) or sends the accessory handshake so that it re-enumerates in accessory mode.
//!
//! A session is created either for the generic accessory mode ([`Accessory::new`]) or for the
//! HID-only mode ([`Accessory::new_hid`]). The HID mode skips identification and configuration
//! select and registers a virtual HID device instead.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::{
    classify::AccessoryProduct,
    descriptor::{find_endpoints, DeviceDescriptor, Endpoints, CONFIG_DESCRIPTOR_CAPACITY},
    error::{Error, Result},
    hid::{self, HidDevice},
    identity::AccessoryIdentity,
    negotiate::{self, DETACH_TIMEOUT},
    transport::{EndpointRecord, EndpointTable, TaskState, TransferError, Transport},
    ACCESSORY_CONFIGURATION, DEFAULT_ADDRESS,
};

/// Default NAK retry budget of a bulk read.
pub const NAK_LIMIT: u32 = 32_000;

/// Connection state of an accessory session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No device, or device not yet addressed.
    Idle,
    /// Handshake sent, waiting for the device to detach before `deadline`.
    Negotiating {
        /// Time after which the handshake is considered failed.
        deadline: Instant,
    },
    /// Endpoints installed, accessory usable.
    Connected,
    /// Device detached; becomes [`Idle`](Self::Idle) on the next poll.
    Disconnected,
}

enum Mode {
    Accessory(AccessoryIdentity),
    Hid(HidDevice),
}

/// Host side of an Android accessory connection.
pub struct Accessory<T> {
    transport: T,
    mode: Mode,
    address: u8,
    detach_timeout: Duration,
    descriptor_capacity: usize,
    state: ConnectionState,
    first_time: bool,
    protocol: Option<u16>,
    endpoints: Option<Endpoints>,
    table: Option<EndpointTable>,
    last_error: Option<Error>,
}

impl<T> fmt::Debug for Accessory<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mode = match &self.mode {
            Mode::Accessory(_) => "accessory",
            Mode::Hid(_) => "hid",
        };
        f.debug_struct("Accessory")
            .field("mode", &mode)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl<T: Transport> Accessory<T> {
    /// Creates a session that switches devices into accessory mode using `identity`.
    pub fn new(transport: T, identity: AccessoryIdentity) -> Self {
        Self::with_mode(transport, Mode::Accessory(identity))
    }

    /// Creates a session that registers `hid` on AOA 2.0 devices.
    ///
    /// The device must already have been prepared for accessory use; no identification strings
    /// are sent and no configuration is selected.
    pub fn new_hid(transport: T, hid: HidDevice) -> Self {
        Self::with_mode(transport, Mode::Hid(hid))
    }

    fn with_mode(transport: T, mode: Mode) -> Self {
        Self {
            transport,
            mode,
            address: DEFAULT_ADDRESS,
            detach_timeout: DETACH_TIMEOUT,
            descriptor_capacity: CONFIG_DESCRIPTOR_CAPACITY,
            state: ConnectionState::Idle,
            first_time: false,
            protocol: None,
            endpoints: None,
            table: None,
            last_error: None,
        }
    }

    /// Sets the USB address of the device slot.
    #[must_use]
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Sets the time a device is given to detach after the start request.
    #[must_use]
    pub fn with_detach_timeout(mut self, timeout: Duration) -> Self {
        self.detach_timeout = timeout;
        self
    }

    /// Sets the maximum size of a configuration descriptor.
    #[must_use]
    pub fn with_descriptor_capacity(mut self, capacity: usize) -> Self {
        self.descriptor_capacity = capacity;
        self
    }

    /// Advances the transport and the connection state.
    ///
    /// Returns whether the accessory is connected.
    /// Failures are recorded in [`last_error`](Self::last_error) and retried on later polls.
    pub fn poll(&mut self) -> bool {
        self.transport.tick();
        let task = self.transport.task_state();

        if task == TaskState::Detached {
            if self.is_connected() {
                tracing::info!("accessory disconnected");
            }
            self.state = match self.state {
                ConnectionState::Idle | ConnectionState::Disconnected => ConnectionState::Idle,
                _ => ConnectionState::Disconnected,
            };
            self.first_time = false;
            self.endpoints = None;
            self.table = None;
            return false;
        }

        if let ConnectionState::Negotiating { deadline } = self.state {
            if Instant::now() < deadline {
                return false;
            }
            tracing::warn!("device did not re-enumerate within {:?} ({task:?})", self.detach_timeout);
            self.last_error = Some(Error::NegotiationTimedOut);
            self.state = ConnectionState::Idle;
            return false;
        }

        if !self.is_connected() && task.is_addressed() {
            if let Err(err) = self.attach() {
                tracing::debug!("attaching device failed: {err}");
                self.last_error = Some(err);
            }
        }

        self.is_connected()
    }

    fn attach(&mut self) -> Result<()> {
        tracing::debug!("device addressed, requesting device descriptor");
        let desc = DeviceDescriptor::fetch(&mut self.transport, self.address).inspect_err(|err| {
            tracing::debug!("device descriptor cannot be retrieved, trying again: {err}");
        })?;

        if let Mode::Hid(_) = self.mode {
            self.configure_hid()?;
            self.connect();
            return Ok(());
        }

        if let Some(product) = AccessoryProduct::from_ids(desc.vendor_id, desc.product_id) {
            tracing::info!("found accessory device {:04x}:{:04x} ({product:?})", desc.vendor_id, desc.product_id);
            self.configure()?;
            self.connect();
            return Ok(());
        }

        tracing::info!(
            "found possible device {:04x}:{:04x}, switching to accessory mode",
            desc.vendor_id,
            desc.product_id
        );
        let Mode::Accessory(identity) = &self.mode else {
            return Err(Error::WrongMode);
        };
        match negotiate::switch_device(&mut self.transport, self.address, identity) {
            Ok(protocol) => {
                self.protocol = Some(protocol);
                self.state = ConnectionState::Negotiating { deadline: Instant::now() + self.detach_timeout };
            }
            Err(err) => {
                if let Error::UnsupportedProtocol(protocol) = err {
                    self.protocol = Some(protocol);
                }
                self.state = ConnectionState::Idle;
                return Err(err);
            }
        }

        Ok(())
    }

    fn connect(&mut self) {
        self.state = ConnectionState::Connected;
        self.first_time = true;
        self.last_error = None;
    }

    fn control_endpoint(&self) -> EndpointRecord {
        self.transport
            .endpoint_table(self.address)
            .or_else(|| self.transport.endpoint_table(0))
            .map(|table| *table.control())
            .unwrap_or_default()
    }

    /// Installs the bulk endpoints of an accessory-mode device and selects its configuration.
    fn configure(&mut self) -> Result<()> {
        let endpoints = find_endpoints(&mut self.transport, self.address, self.descriptor_capacity)?;
        tracing::debug!("bulk IN endpoint {:#04x}", endpoints.input.address);
        tracing::debug!("bulk OUT endpoint {:#04x}", endpoints.output.address);

        let mut table = EndpointTable::new(self.control_endpoint());
        table.insert(endpoints.input);
        if endpoints.output.address != endpoints.input.address {
            table.insert(endpoints.output);
        }
        self.transport.set_endpoint_table(self.address, table.clone());

        self.transport.set_configuration(self.address, ACCESSORY_CONFIGURATION).map_err(|err| {
            tracing::warn!("cannot set configuration {ACCESSORY_CONFIGURATION}: {err}");
            Error::ConfigurationFailed(err)
        })?;
        self.transport.set_task_state(TaskState::Running);

        self.endpoints = Some(endpoints);
        self.table = Some(table);
        Ok(())
    }

    /// Carries over the control endpoint and registers the HID device.
    fn configure_hid(&mut self) -> Result<()> {
        let Mode::Hid(hid) = &self.mode else {
            return Err(Error::WrongMode);
        };

        let protocol = negotiate::get_protocol(&mut self.transport, self.address)?;
        self.protocol = Some(protocol);
        if protocol < 2 {
            tracing::debug!("HID requires AOA protocol 2, device supports {protocol}");
            return Err(Error::UnsupportedProtocol(protocol));
        }

        let table = EndpointTable::new(self.control_endpoint());
        let max_packet_size = table.control().max_packet_size;
        self.transport.set_endpoint_table(self.address, table.clone());

        let size =
            u16::try_from(hid.report_descriptor.len()).map_err(|_| Error::PayloadTooLarge(hid.report_descriptor.len()))?;
        hid::register(&mut self.transport, self.address, hid.id, size)?;
        hid::set_report_descriptor(&mut self.transport, self.address, hid.id, &hid.report_descriptor, max_packet_size)?;
        self.transport.set_task_state(TaskState::Running);

        self.table = Some(table);
        Ok(())
    }

    /// Whether the accessory is connected.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether the connection was established since the last [`clear_first_time`](Self::clear_first_time).
    pub fn is_first_time(&self) -> bool {
        self.first_time
    }

    /// Acknowledges a new connection.
    pub fn clear_first_time(&mut self) {
        self.first_time = false;
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// AOA protocol version reported by the device, if it has been queried.
    ///
    /// A version of 0 means that the device does not support accessory mode.
    pub fn protocol_version(&self) -> Option<u16> {
        self.protocol
    }

    /// Bulk endpoints of the connected accessory.
    pub fn endpoints(&self) -> Option<&Endpoints> {
        self.endpoints.as_ref()
    }

    /// Endpoint table installed for the connected accessory.
    pub fn endpoint_table(&self) -> Option<&EndpointTable> {
        self.table.as_ref()
    }

    /// Failure of the most recent connection attempt.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// USB address of the device slot.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consumes the session, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn data_endpoints(&self) -> Result<Endpoints> {
        if let Mode::Hid(_) = self.mode {
            return Err(Error::WrongMode);
        }
        match (self.is_connected(), self.endpoints) {
            (true, Some(endpoints)) => Ok(endpoints),
            _ => Err(Error::NotConnected),
        }
    }

    /// Reads from the bulk IN endpoint, giving up after `nak_limit` NAKs.
    ///
    /// Returns the number of bytes received.
    pub fn read(&mut self, buf: &mut [u8], nak_limit: u32) -> Result<usize> {
        let endpoints = self.data_endpoints()?;
        self.transport.bulk_in(self.address, endpoints.input.address, buf, nak_limit).map_err(|err| match err {
            TransferError::Timeout => Error::Timeout,
            err => Error::Transport(err),
        })
    }

    /// Writes to the bulk OUT endpoint.
    ///
    /// Returns the number of bytes sent.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let endpoints = self.data_endpoints()?;
        Ok(self.transport.bulk_out(self.address, endpoints.output.address, data)?)
    }

    fn control_max_packet_size(&self) -> Result<u16> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(self.table.as_ref().map(|table| table.control().max_packet_size).unwrap_or_default())
    }

    /// Registers HID device `id` with a report descriptor of `descriptor_size` bytes.
    pub fn hid_register(&mut self, id: u16, descriptor_size: u16) -> Result<()> {
        self.control_max_packet_size()?;
        hid::register(&mut self.transport, self.address, id, descriptor_size)
    }

    /// Unregisters HID device `id`.
    pub fn hid_unregister(&mut self, id: u16) -> Result<()> {
        self.control_max_packet_size()?;
        hid::unregister(&mut self.transport, self.address, id)
    }

    /// Uploads the report descriptor of HID device `id` in control-packet-sized chunks.
    pub fn hid_set_report_descriptor(&mut self, id: u16, descriptor: &[u8]) -> Result<()> {
        let max_packet_size = self.control_max_packet_size()?;
        hid::set_report_descriptor(&mut self.transport, self.address, id, descriptor, max_packet_size)
    }

    /// Sends one input report of HID device `id`.
    pub fn hid_send_event(&mut self, id: u16, event: &[u8]) -> Result<()> {
        self.control_max_packet_size()?;
        hid::send_event(&mut self.transport, self.address, id, event)
    }
}
