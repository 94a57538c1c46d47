//! AOA 2.0 HID extension.
//!
//! The host registers virtual HID devices on the Android device, uploads their report
//! descriptors over the control endpoint and then delivers input reports.

use crate::{
    error::{Error, Result},
    transport::{Transport, VENDOR_OUT},
    ACCESSORY_REGISTER_HID, ACCESSORY_SEND_HID_EVENT, ACCESSORY_SET_HID_REPORT_DESC, ACCESSORY_UNREGISTER_HID,
};

/// Smallest allowed max packet size of a default control endpoint.
pub const MIN_CONTROL_PACKET_SIZE: u16 = 8;

/// Virtual HID device registered on connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidDevice {
    /// Host-chosen HID id.
    pub id: u16,
    /// HID report descriptor.
    pub report_descriptor: Vec<u8>,
}

impl HidDevice {
    /// Creates a new HID device description.
    pub fn new(id: u16, report_descriptor: impl Into<Vec<u8>>) -> Self {
        Self { id, report_descriptor: report_descriptor.into() }
    }
}

fn control_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::PayloadTooLarge(len))
}

/// Registers HID device `id` whose report descriptor is `descriptor_size` bytes long.
pub fn register(transport: &mut impl Transport, addr: u8, id: u16, descriptor_size: u16) -> Result<()> {
    tracing::debug!("registering HID {id} with report descriptor of {descriptor_size} bytes");
    transport.control_out(addr, VENDOR_OUT, ACCESSORY_REGISTER_HID, id, descriptor_size, &[])?;
    Ok(())
}

/// Unregisters HID device `id`.
pub fn unregister(transport: &mut impl Transport, addr: u8, id: u16) -> Result<()> {
    tracing::debug!("unregistering HID {id}");
    transport.control_out(addr, VENDOR_OUT, ACCESSORY_UNREGISTER_HID, id, 0, &[])?;
    Ok(())
}

/// Uploads the report descriptor of HID device `id`.
///
/// The descriptor is split into chunks of at most `max_packet_size` bytes, numbered from 0 in
/// the request's index field. A failed chunk aborts the upload; chunks already sent stay sent.
pub fn set_report_descriptor(
    transport: &mut impl Transport, addr: u8, id: u16, descriptor: &[u8], max_packet_size: u16,
) -> Result<()> {
    control_len(descriptor.len())?;
    let chunk_size = usize::from(max_packet_size.max(MIN_CONTROL_PACKET_SIZE));

    for (index, chunk) in descriptor.chunks(chunk_size).enumerate() {
        let index = control_len(index)?;
        tracing::trace!("sending report descriptor chunk {index} of {} bytes", chunk.len());
        transport.control_out(addr, VENDOR_OUT, ACCESSORY_SET_HID_REPORT_DESC, id, index, chunk)?;
    }

    Ok(())
}

/// Sends one HID input report of device `id`.
pub fn send_event(transport: &mut impl Transport, addr: u8, id: u16, event: &[u8]) -> Result<()> {
    control_len(event.len())?;
    transport.control_out(addr, VENDOR_OUT, ACCESSORY_SEND_HID_EVENT, id, 0, event)?;
    Ok(())
}
