//! USB descriptor decoding and accessory endpoint discovery.

use crate::{
    error::{Error, Result},
    transport::{EndpointRecord, Transport, MAX_ENDPOINT},
};

/// Descriptor type of a device descriptor.
pub const DEVICE: u8 = 0x01;
/// Descriptor type of a configuration descriptor.
pub const CONFIGURATION: u8 = 0x02;
/// Descriptor type of an interface descriptor.
pub const INTERFACE: u8 = 0x04;
/// Descriptor type of an endpoint descriptor.
pub const ENDPOINT: u8 = 0x05;

/// Size of a device descriptor.
pub const DEVICE_DESCRIPTOR_SIZE: usize = 18;

/// Default capacity of the configuration descriptor buffer.
pub const CONFIG_DESCRIPTOR_CAPACITY: usize = 256;

const ENDPOINT_DESCRIPTOR_SIZE: usize = 7;
const DIRECTION_IN: u8 = 0x80;
const ADDRESS_MASK: u8 = 0x7f;

/// Standard USB device descriptor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// USB specification release (BCD).
    pub usb: u16,
    /// Device class code.
    pub class: u8,
    /// Device subclass code.
    pub sub_class: u8,
    /// Device protocol code.
    pub protocol: u8,
    /// Max packet size of endpoint 0.
    pub max_packet_size_0: u8,
    /// Vendor id.
    pub vendor_id: u16,
    /// Product id.
    pub product_id: u16,
    /// Device release (BCD).
    pub device: u16,
    /// Manufacturer string index.
    pub index_manufacturer: u8,
    /// Product string index.
    pub index_product: u8,
    /// Serial number string index.
    pub index_serial_number: u8,
    /// Number of configurations.
    pub num_configurations: u8,
}

impl DeviceDescriptor {
    /// Decodes a raw device descriptor including its length and type header.
    pub fn from_raw(buf: &[u8]) -> Result<Self> {
        if buf.len() < DEVICE_DESCRIPTOR_SIZE || usize::from(buf[0]) < DEVICE_DESCRIPTOR_SIZE || buf[1] != DEVICE {
            return Err(Error::MalformedDescriptor);
        }

        let u16_at = |i: usize| u16::from_le_bytes([buf[i], buf[i + 1]]);
        Ok(Self {
            usb: u16_at(2),
            class: buf[4],
            sub_class: buf[5],
            protocol: buf[6],
            max_packet_size_0: buf[7],
            vendor_id: u16_at(8),
            product_id: u16_at(10),
            device: u16_at(12),
            index_manufacturer: buf[14],
            index_product: buf[15],
            index_serial_number: buf[16],
            num_configurations: buf[17],
        })
    }

    /// Reads the device descriptor of the device at `addr`.
    pub fn fetch(transport: &mut impl Transport, addr: u8) -> Result<Self> {
        let mut buf = [0; DEVICE_DESCRIPTOR_SIZE];
        let n = transport.device_descriptor(addr, &mut buf)?;
        Self::from_raw(&buf[..n])
    }
}

/// Bulk endpoint pair of an accessory interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoints {
    /// Bulk IN endpoint.
    pub input: EndpointRecord,
    /// Bulk OUT endpoint.
    pub output: EndpointRecord,
}

/// Finds the first bulk IN and first bulk OUT endpoint in a raw configuration descriptor.
///
/// Descriptors are walked by their own length field. Endpoints of other transfer types are skipped.
pub fn parse_endpoints(buf: &[u8]) -> Result<Endpoints> {
    let mut input = None;
    let mut output = None;
    let mut rest = buf;

    while !rest.is_empty() {
        let len = usize::from(rest[0]);
        if len < 2 || len > rest.len() {
            tracing::warn!("descriptor of length {len} exceeds remaining {} bytes", rest.len());
            return Err(Error::MalformedDescriptor);
        }

        match rest[1] {
            CONFIGURATION => tracing::trace!("configuration descriptor"),
            INTERFACE => tracing::trace!("interface descriptor"),
            ENDPOINT => {
                if len < ENDPOINT_DESCRIPTOR_SIZE {
                    return Err(Error::MalformedDescriptor);
                }

                let raw_address = rest[2];
                let address = raw_address & ADDRESS_MASK;
                if address == 0 || address > MAX_ENDPOINT {
                    tracing::warn!("invalid endpoint address {raw_address:#04x}");
                    return Err(Error::MalformedDescriptor);
                }

                let record = EndpointRecord::new(address, rest[3], u16::from_le_bytes([rest[4], rest[5]]));
                if !record.is_bulk() {
                    tracing::trace!("skipping non-bulk endpoint {raw_address:#04x}");
                } else if raw_address & DIRECTION_IN != 0 {
                    input.get_or_insert(record);
                } else {
                    output.get_or_insert(record);
                }
            }
            ty => tracing::trace!("unknown descriptor type {ty:#04x}"),
        }

        rest = &rest[len..];
    }

    match (input, output) {
        (Some(input), Some(output)) => Ok(Endpoints { input, output }),
        _ => {
            tracing::warn!("cannot find accessory endpoints");
            Err(Error::EndpointsNotFound)
        }
    }
}

/// Reads configuration descriptor 0 of the device at `addr` and finds its bulk endpoints.
///
/// The descriptor may be at most `capacity` bytes long.
pub fn find_endpoints(transport: &mut impl Transport, addr: u8, capacity: usize) -> Result<Endpoints> {
    let mut head = [0; 4];
    let n = transport.config_descriptor(addr, &mut head).inspect_err(|err| {
        tracing::warn!("cannot get configuration descriptor length: {err}");
    })?;
    if n < head.len() {
        return Err(Error::MalformedDescriptor);
    }

    let length = usize::from(u16::from_le_bytes([head[2], head[3]]));
    if length > capacity {
        tracing::warn!("configuration descriptor too large: {length} bytes");
        return Err(Error::DescriptorTooLarge { length, capacity });
    }

    let mut buf = vec![0; length];
    let n = transport.config_descriptor(addr, &mut buf).inspect_err(|err| {
        tracing::warn!("cannot get configuration descriptor: {err}");
    })?;
    buf.truncate(n);

    parse_endpoints(&buf)
}
