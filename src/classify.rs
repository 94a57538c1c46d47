//! Accessory device classification.

use crate::{descriptor::DeviceDescriptor, ACCESSORY_VENDOR_ID};

/// Product id of a device that is already in accessory mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AccessoryProduct {
    /// AOA 1.0 accessory.
    Accessory = 0x2d00,
    /// AOA 1.0 accessory with ADB.
    AccessoryAdb = 0x2d01,
    /// AOA 2.0 audio.
    Audio = 0x2d02,
    /// AOA 2.0 audio with ADB.
    AudioAdb = 0x2d03,
    /// AOA 2.0 accessory and audio.
    AccessoryAudio = 0x2d04,
    /// AOA 2.0 accessory and audio with ADB.
    AccessoryAudioAdb = 0x2d05,
}

impl AccessoryProduct {
    /// Classifies a product id.
    pub const fn from_product_id(product_id: u16) -> Option<Self> {
        match product_id {
            0x2d00 => Some(Self::Accessory),
            0x2d01 => Some(Self::AccessoryAdb),
            0x2d02 => Some(Self::Audio),
            0x2d03 => Some(Self::AudioAdb),
            0x2d04 => Some(Self::AccessoryAudio),
            0x2d05 => Some(Self::AccessoryAudioAdb),
            _ => None,
        }
    }

    /// Classifies a vendor and product id pair.
    pub const fn from_ids(vendor_id: u16, product_id: u16) -> Option<Self> {
        if vendor_id != ACCESSORY_VENDOR_ID {
            return None;
        }
        Self::from_product_id(product_id)
    }

    /// USB product id.
    pub const fn product_id(self) -> u16 {
        self as u16
    }

    /// Whether the ADB interface is present as well.
    pub const fn has_adb(self) -> bool {
        matches!(self, Self::AccessoryAdb | Self::AudioAdb | Self::AccessoryAudioAdb)
    }

    /// Whether the audio interface is present.
    pub const fn has_audio(self) -> bool {
        matches!(self, Self::Audio | Self::AudioAdb | Self::AccessoryAudio | Self::AccessoryAudioAdb)
    }

    /// Whether the accessory bulk interface is present.
    pub const fn has_accessory(self) -> bool {
        !matches!(self, Self::Audio | Self::AudioAdb)
    }
}

/// Whether the device is already in accessory mode.
pub fn is_accessory_device(desc: &DeviceDescriptor) -> bool {
    AccessoryProduct::from_ids(desc.vendor_id, desc.product_id).is_some()
}
