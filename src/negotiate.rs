//! Switching a device into accessory mode.
//!
//! The host queries the protocol version, sends its identification strings, optionally enables
//! audio and finally issues the start request. The device then disconnects and re-enumerates with
//! an accessory product id.

use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    error::{Error, Result},
    identity::{AccessoryIdentity, AudioMode, StringSlot},
    transport::{TaskState, Transport, VENDOR_IN, VENDOR_OUT},
    ACCESSORY_GET_PROTOCOL, ACCESSORY_SEND_STRING, ACCESSORY_SET_AUDIO_MODE, ACCESSORY_START,
};

/// Time a device is given to detach after the start request.
pub const DETACH_TIMEOUT: Duration = Duration::from_secs(5);

/// Queries the AOA protocol version of the device.
///
/// Returns 0 if the device does not support accessory mode.
pub fn get_protocol(transport: &mut impl Transport, addr: u8) -> Result<u16> {
    let mut buf = [0; 2];
    let n = transport.control_in(addr, VENDOR_IN, ACCESSORY_GET_PROTOCOL, 0, 0, &mut buf)?;
    if n < buf.len() {
        return Ok(0);
    }
    Ok(u16::from_le_bytes(buf))
}

/// Sends one null-terminated identification string.
pub fn send_string(transport: &mut impl Transport, addr: u8, slot: StringSlot, value: &str) -> Result<()> {
    let mut data = Vec::with_capacity(value.len() + 1);
    data.extend_from_slice(value.as_bytes());
    data.push(0);
    if data.len() > usize::from(u16::MAX) {
        return Err(Error::PayloadTooLarge(data.len()));
    }

    tracing::debug!("sending {slot:?} string");
    transport.control_out(addr, VENDOR_OUT, ACCESSORY_SEND_STRING, 0, slot.index(), &data)?;
    Ok(())
}

/// Sets the audio mode of an AOA 2.0 device.
pub fn set_audio_mode(transport: &mut impl Transport, addr: u8, mode: AudioMode) -> Result<()> {
    tracing::debug!("setting audio mode {mode:?}");
    transport.control_out(addr, VENDOR_OUT, ACCESSORY_SET_AUDIO_MODE, mode.value(), 0, &[])?;
    Ok(())
}

/// Requests the device to restart in accessory mode.
pub fn start(transport: &mut impl Transport, addr: u8) -> Result<()> {
    tracing::debug!("starting accessory mode");
    transport.control_out(addr, VENDOR_OUT, ACCESSORY_START, 0, 0, &[])?;
    Ok(())
}

/// Sends the accessory handshake up to and including the start request.
///
/// Failures to send identification strings or the audio mode are logged and do not abort the
/// handshake. Returns the protocol version of the device.
pub fn switch_device(transport: &mut impl Transport, addr: u8, identity: &AccessoryIdentity) -> Result<u16> {
    let protocol = get_protocol(transport, addr)?;
    if protocol < 1 {
        tracing::warn!("device does not support accessory mode");
        return Err(Error::UnsupportedProtocol(protocol));
    }
    tracing::info!("device supports AOA protocol {protocol}");

    for slot in identity.slots(protocol) {
        if let Err(err) = send_string(transport, addr, slot, identity.string(slot)) {
            tracing::warn!("sending {slot:?} string failed: {err}");
        }
    }

    if protocol >= 2 && identity.audio_mode() != AudioMode::None {
        if let Err(err) = set_audio_mode(transport, addr, identity.audio_mode()) {
            tracing::warn!("setting audio mode failed: {err}");
        }
    }

    start(transport, addr)?;
    Ok(protocol)
}

/// Ticks the transport until it reports the device detached.
pub fn wait_for_detach(transport: &mut impl Transport, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        transport.tick();
        if transport.task_state() == TaskState::Detached {
            return Ok(());
        }
        if Instant::now() >= deadline {
            tracing::warn!("device did not detach within {timeout:?}");
            return Err(Error::NegotiationTimedOut);
        }
        thread::yield_now();
    }
}

/// Switches the device into accessory mode and waits until it has detached.
///
/// Returns the protocol version of the device.
pub fn negotiate(
    transport: &mut impl Transport, addr: u8, identity: &AccessoryIdentity, timeout: Duration,
) -> Result<u16> {
    let protocol = switch_device(transport, addr, identity)?;
    wait_for_detach(transport, timeout)?;
    Ok(protocol)
}
