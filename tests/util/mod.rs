#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Once,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aoa::{
    descriptor::{CONFIGURATION, DEVICE, ENDPOINT, INTERFACE},
    EndpointRecord, EndpointTable, TaskState, TransferError, Transport,
};

pub const CONTROL_PACKET_SIZE: u16 = 64;

pub fn init_log() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::registry().with(fmt::layer().with_test_writer()).with(EnvFilter::from_default_env()).init();
        tracing_log::LogTracer::init().unwrap();
    });
}

/// Raw device descriptor.
pub fn device_descriptor(vendor_id: u16, product_id: u16) -> Vec<u8> {
    let [vl, vh] = vendor_id.to_le_bytes();
    let [pl, ph] = product_id.to_le_bytes();
    vec![18, DEVICE, 0x00, 0x02, 0, 0, 0, CONTROL_PACKET_SIZE as u8, vl, vh, pl, ph, 0x00, 0x01, 1, 2, 3, 1]
}

pub fn interface_descriptor(number: u8, endpoints: u8) -> Vec<u8> {
    vec![9, INTERFACE, number, 0, endpoints, 0xff, 0xff, 0, 0]
}

pub fn endpoint_descriptor(address: u8, attributes: u8, max_packet_size: u16) -> Vec<u8> {
    let [l, h] = max_packet_size.to_le_bytes();
    vec![7, ENDPOINT, address, attributes, l, h, 0]
}

/// Configuration descriptor with correct total length around `body`.
pub fn config_descriptor(body: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = body.concat();
    let [l, h] = u16::try_from(9 + body.len()).unwrap().to_le_bytes();
    let mut desc = vec![9, CONFIGURATION, l, h, 1, 1, 0, 0x80, 50];
    desc.extend(body);
    desc
}

/// Configuration of an accessory with bulk IN 0x81 and bulk OUT 0x02.
pub fn accessory_config() -> Vec<u8> {
    config_descriptor(&[
        interface_descriptor(0, 2),
        endpoint_descriptor(0x81, 0x02, 512),
        endpoint_descriptor(0x02, 0x02, 512),
    ])
}

/// Recorded transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ControlIn { request: u8, value: u16, index: u16, len: usize },
    ControlOut { request: u8, value: u16, index: u16, data: Vec<u8> },
    DeviceDescriptor,
    ConfigDescriptor { len: usize },
    SetConfiguration(u8),
    BulkIn { endpoint: u8, len: usize, nak_limit: u32 },
    BulkOut { endpoint: u8, data: Vec<u8> },
}

/// Scripted transport.
///
/// Every tick takes the next entry of `states`, if any.
pub struct MockTransport {
    pub states: VecDeque<TaskState>,
    pub state: TaskState,
    pub device: Option<Vec<u8>>,
    pub config: Vec<u8>,
    pub protocol: Option<u16>,
    /// Control OUT request that fails after the given number of successful transfers.
    pub fail_request: Option<(u8, usize)>,
    pub set_configuration_error: Option<TransferError>,
    pub bulk_in: VecDeque<Result<Vec<u8>, TransferError>>,
    pub tables: HashMap<u8, EndpointTable>,
    pub calls: Vec<Call>,
}

impl MockTransport {
    pub fn new() -> Self {
        let mut tables = HashMap::new();
        tables.insert(0, EndpointTable::new(EndpointRecord::control(CONTROL_PACKET_SIZE)));
        Self {
            states: VecDeque::new(),
            state: TaskState::Detached,
            device: None,
            config: accessory_config(),
            protocol: None,
            fail_request: None,
            set_configuration_error: None,
            bulk_in: VecDeque::new(),
            tables,
            calls: Vec::new(),
        }
    }

    pub fn with_device(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.device = Some(device_descriptor(vendor_id, product_id));
        self
    }

    pub fn with_protocol(mut self, protocol: u16) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_states(mut self, states: impl IntoIterator<Item = TaskState>) -> Self {
        self.states.extend(states);
        self
    }

    /// Control OUT transfers with the specified request.
    pub fn control_outs(&self, request: u8) -> Vec<(u16, u16, Vec<u8>)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::ControlOut { request: r, value, index, data } if *r == request => {
                    Some((*value, *index, data.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn count(&self, request: u8) -> usize {
        self.control_outs(request).len()
    }
}

impl Transport for MockTransport {
    fn tick(&mut self) {
        if let Some(state) = self.states.pop_front() {
            self.state = state;
        }
    }

    fn task_state(&self) -> TaskState {
        self.state
    }

    fn set_task_state(&mut self, state: TaskState) {
        self.state = state;
    }

    fn control_in(
        &mut self, _addr: u8, _request_type: u8, request: u8, value: u16, index: u16, buf: &mut [u8],
    ) -> Result<usize, TransferError> {
        self.calls.push(Call::ControlIn { request, value, index, len: buf.len() });
        let protocol = self.protocol.ok_or(TransferError::Stall)?;
        let bytes = protocol.to_le_bytes();
        let n = buf.len().min(bytes.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn control_out(
        &mut self, _addr: u8, _request_type: u8, request: u8, value: u16, index: u16, data: &[u8],
    ) -> Result<usize, TransferError> {
        if let Some((failing, after)) = self.fail_request {
            if failing == request && self.count(request) >= after {
                return Err(TransferError::Stall);
            }
        }
        self.calls.push(Call::ControlOut { request, value, index, data: data.to_vec() });
        Ok(data.len())
    }

    fn device_descriptor(&mut self, _addr: u8, buf: &mut [u8]) -> Result<usize, TransferError> {
        self.calls.push(Call::DeviceDescriptor);
        let device = self.device.as_ref().ok_or(TransferError::Timeout)?;
        let n = buf.len().min(device.len());
        buf[..n].copy_from_slice(&device[..n]);
        Ok(n)
    }

    fn config_descriptor(&mut self, _addr: u8, buf: &mut [u8]) -> Result<usize, TransferError> {
        self.calls.push(Call::ConfigDescriptor { len: buf.len() });
        let n = buf.len().min(self.config.len());
        buf[..n].copy_from_slice(&self.config[..n]);
        Ok(n)
    }

    fn set_configuration(&mut self, _addr: u8, value: u8) -> Result<(), TransferError> {
        self.calls.push(Call::SetConfiguration(value));
        match self.set_configuration_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn bulk_in(&mut self, _addr: u8, endpoint: u8, buf: &mut [u8], nak_limit: u32) -> Result<usize, TransferError> {
        self.calls.push(Call::BulkIn { endpoint, len: buf.len(), nak_limit });
        let data = self.bulk_in.pop_front().unwrap_or(Err(TransferError::Timeout))?;
        let n = buf.len().min(data.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn bulk_out(&mut self, _addr: u8, endpoint: u8, data: &[u8]) -> Result<usize, TransferError> {
        self.calls.push(Call::BulkOut { endpoint, data: data.to_vec() });
        Ok(data.len())
    }

    fn endpoint_table(&self, addr: u8) -> Option<EndpointTable> {
        self.tables.get(&addr).cloned()
    }

    fn set_endpoint_table(&mut self, addr: u8, table: EndpointTable) {
        self.tables.insert(addr, table);
    }
}
