//! Accessory identification.

use std::fmt;

/// Slot of an identification string sent with `ACCESSORY_SEND_STRING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum StringSlot {
    /// Manufacturer name.
    Manufacturer = 0,
    /// Model name.
    Model = 1,
    /// Description.
    Description = 2,
    /// Version.
    Version = 3,
    /// URI, shown when no app handles the accessory.
    Uri = 4,
    /// Serial number.
    Serial = 5,
}

impl StringSlot {
    /// All slots in index order.
    pub const ALL: [Self; 6] =
        [Self::Manufacturer, Self::Model, Self::Description, Self::Version, Self::Uri, Self::Serial];

    /// Index sent in the request's `wIndex` field.
    pub const fn index(self) -> u16 {
        self as u16
    }
}

/// Audio output requested from an AOA 2.0 device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioMode {
    /// No audio.
    #[default]
    None,
    /// 2 channel, 16-bit PCM at 44100 Hz.
    Pcm16Stereo44k,
}

impl AudioMode {
    /// Value sent in the `wValue` field of `ACCESSORY_SET_AUDIO_MODE`.
    pub const fn value(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Pcm16Stereo44k => 1,
        }
    }
}

/// Identity the host presents to the Android device.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessoryIdentity {
    manufacturer: String,
    model: String,
    description: String,
    version: String,
    uri: String,
    serial: String,
    audio_mode: AudioMode,
    no_app: bool,
}

impl fmt::Debug for AccessoryIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AccessoryIdentity")
            .field("manufacturer", &self.manufacturer)
            .field("model", &self.model)
            .field("version", &self.version)
            .field("audio_mode", &self.audio_mode)
            .field("no_app", &self.no_app)
            .finish_non_exhaustive()
    }
}

impl AccessoryIdentity {
    /// Creates a new accessory identity without audio.
    pub fn new(
        manufacturer: impl Into<String>, model: impl Into<String>, description: impl Into<String>,
        version: impl Into<String>, uri: impl Into<String>, serial: impl Into<String>,
    ) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            model: model.into(),
            description: description.into(),
            version: version.into(),
            uri: uri.into(),
            serial: serial.into(),
            audio_mode: AudioMode::None,
            no_app: false,
        }
    }

    /// Requests audio output when the device supports AOA 2.0.
    #[must_use]
    pub fn with_audio_mode(mut self, audio_mode: AudioMode) -> Self {
        self.audio_mode = audio_mode;
        self
    }

    /// Omits manufacturer and model on AOA 2.0 devices, so that no companion app is looked up.
    #[must_use]
    pub fn without_app(mut self, no_app: bool) -> Self {
        self.no_app = no_app;
        self
    }

    /// The string stored for `slot`.
    pub fn string(&self, slot: StringSlot) -> &str {
        match slot {
            StringSlot::Manufacturer => &self.manufacturer,
            StringSlot::Model => &self.model,
            StringSlot::Description => &self.description,
            StringSlot::Version => &self.version,
            StringSlot::Uri => &self.uri,
            StringSlot::Serial => &self.serial,
        }
    }

    /// Requested audio mode.
    pub fn audio_mode(&self) -> AudioMode {
        self.audio_mode
    }

    /// Whether manufacturer and model are skipped on AOA 2.0 devices.
    pub fn no_app(&self) -> bool {
        self.no_app
    }

    /// Slots to send to a device speaking `protocol`, in index order.
    pub fn slots(&self, protocol: u16) -> impl Iterator<Item = StringSlot> {
        let skip_app = protocol >= 2 && self.no_app;
        StringSlot::ALL
            .into_iter()
            .filter(move |slot| !(skip_app && matches!(slot, StringSlot::Manufacturer | StringSlot::Model)))
    }
}
