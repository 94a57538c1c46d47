//! Android Open Accessory (AOA) host library.
//!
//! Switches an attached Android device into accessory mode, discovers its bulk endpoints and
//! exposes a byte channel plus the AOA 2.0 HID extension.
//!
//! The USB host controller is abstracted by the [`Transport`] trait.
//! A libusb-based implementation is available with crate feature `host`.

pub mod accessory;
pub mod classify;
pub mod descriptor;
pub mod error;
pub mod hid;
pub mod identity;
pub mod negotiate;
pub mod transport;

#[cfg(feature = "host")]
pub mod host;

pub use accessory::{Accessory, ConnectionState};
pub use classify::{is_accessory_device, AccessoryProduct};
pub use error::{Error, Result};
pub use hid::HidDevice;
pub use identity::{AccessoryIdentity, AudioMode, StringSlot};
pub use transport::{EndpointRecord, EndpointTable, TaskState, Toggle, TransferError, Transport};

/// Queries the AOA protocol version supported by the device.
pub const ACCESSORY_GET_PROTOCOL: u8 = 51;
/// Sends one identification string.
pub const ACCESSORY_SEND_STRING: u8 = 52;
/// Starts accessory mode; the device re-enumerates.
pub const ACCESSORY_START: u8 = 53;
/// Registers a HID device (AOA 2.0).
pub const ACCESSORY_REGISTER_HID: u8 = 54;
/// Unregisters a HID device (AOA 2.0).
pub const ACCESSORY_UNREGISTER_HID: u8 = 55;
/// Uploads a chunk of a HID report descriptor (AOA 2.0).
pub const ACCESSORY_SET_HID_REPORT_DESC: u8 = 56;
/// Delivers a HID input report (AOA 2.0).
pub const ACCESSORY_SEND_HID_EVENT: u8 = 57;
/// Enables or disables audio output (AOA 2.0).
pub const ACCESSORY_SET_AUDIO_MODE: u8 = 58;

/// Vendor id used by devices in accessory mode.
pub const ACCESSORY_VENDOR_ID: u16 = 0x18d1;

/// Device address of the single attached-device slot.
pub const DEFAULT_ADDRESS: u8 = 1;

/// Configuration value selected once in accessory mode.
pub const ACCESSORY_CONFIGURATION: u8 = 1;
