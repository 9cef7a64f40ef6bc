use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Zone identifier (1-based)
pub type ZoneId = u8;

/// Input identifier (1-based)
pub type InputId = u8;

/// Number of zones on a DAX88-class amplifier
pub const DEFAULT_ZONE_COUNT: u8 = 8;

/// Number of selectable inputs on a DAX88-class amplifier
pub const DEFAULT_INPUT_COUNT: u8 = 8;

pub const VOLUME_MIN: u8 = 0;
pub const VOLUME_MAX: u8 = 38;
pub const BALANCE_MIN: i8 = -100;
pub const BALANCE_MAX: i8 = 100;
pub const TONE_MIN: i8 = -12;
pub const TONE_MAX: i8 = 12;

/// Longest zone or input name the device accepts, in bytes
pub const MAX_NAME_LEN: usize = 20;

pub(crate) const DEFAULT_MODEL: &str = "Matrio Control Compatible";
pub(crate) const DEFAULT_MANUFACTURER: &str = "Dayton Audio";

/// A single controllable zone field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneField {
    Power,
    Volume,
    Mute,
    Balance,
    Bass,
    Treble,
    Input,
    Name,
}

impl fmt::Display for ZoneField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ZoneField::Power => "power",
            ZoneField::Volume => "volume",
            ZoneField::Mute => "mute",
            ZoneField::Balance => "balance",
            ZoneField::Bass => "bass",
            ZoneField::Treble => "treble",
            ZoneField::Input => "input",
            ZoneField::Name => "name",
        };
        f.write_str(name)
    }
}

/// A value for one zone field, in application units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "field", content = "value")]
pub enum Setting {
    Power(bool),
    Volume(u8),
    Mute(bool),
    Balance(i8),
    Bass(i8),
    Treble(i8),
    Input(InputId),
}

impl Setting {
    /// The field this setting writes
    pub fn field(&self) -> ZoneField {
        match self {
            Setting::Power(_) => ZoneField::Power,
            Setting::Volume(_) => ZoneField::Volume,
            Setting::Mute(_) => ZoneField::Mute,
            Setting::Balance(_) => ZoneField::Balance,
            Setting::Bass(_) => ZoneField::Bass,
            Setting::Treble(_) => ZoneField::Treble,
            Setting::Input(_) => ZoneField::Input,
        }
    }

    /// Clamp the value into its documented range
    pub(crate) fn clamped(self, input_count: u8) -> Self {
        match self {
            Setting::Volume(v) => Setting::Volume(v.clamp(VOLUME_MIN, VOLUME_MAX)),
            Setting::Balance(v) => Setting::Balance(v.clamp(BALANCE_MIN, BALANCE_MAX)),
            Setting::Bass(v) => Setting::Bass(v.clamp(TONE_MIN, TONE_MAX)),
            Setting::Treble(v) => Setting::Treble(v.clamp(TONE_MIN, TONE_MAX)),
            Setting::Input(v) => Setting::Input(v.clamp(1, input_count.max(1))),
            other => other,
        }
    }
}

/// Last known state of one zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneState {
    pub id: ZoneId,
    pub power: bool,

    /// Volume level (0-38)
    pub volume: u8,
    pub mute: bool,

    /// Balance (-100 full left, +100 full right)
    pub balance: i8,

    /// Bass (-12 to +12)
    pub bass: i8,

    /// Treble (-12 to +12)
    pub treble: i8,

    /// Active input (1-based)
    pub input: InputId,
    pub name: String,
}

impl ZoneState {
    pub fn new(id: ZoneId) -> Self {
        Self {
            id,
            power: false,
            volume: VOLUME_MIN,
            mute: false,
            balance: 0,
            bass: 0,
            treble: 0,
            input: 1,
            name: default_zone_name(id),
        }
    }

    /// Read back a field as a setting
    pub fn setting(&self, field: ZoneField) -> Option<Setting> {
        match field {
            ZoneField::Power => Some(Setting::Power(self.power)),
            ZoneField::Volume => Some(Setting::Volume(self.volume)),
            ZoneField::Mute => Some(Setting::Mute(self.mute)),
            ZoneField::Balance => Some(Setting::Balance(self.balance)),
            ZoneField::Bass => Some(Setting::Bass(self.bass)),
            ZoneField::Treble => Some(Setting::Treble(self.treble)),
            ZoneField::Input => Some(Setting::Input(self.input)),
            ZoneField::Name => None,
        }
    }

    /// Write a setting, clamping it first. Returns true if the visible value changed.
    pub(crate) fn apply(&mut self, setting: Setting, input_count: u8) -> bool {
        let setting = setting.clamped(input_count);
        if self.setting(setting.field()) == Some(setting) {
            return false;
        }
        match setting {
            Setting::Power(v) => self.power = v,
            Setting::Volume(v) => self.volume = v,
            Setting::Mute(v) => self.mute = v,
            Setting::Balance(v) => self.balance = v,
            Setting::Bass(v) => self.bass = v,
            Setting::Treble(v) => self.treble = v,
            Setting::Input(v) => self.input = v,
        }
        true
    }

    pub(crate) fn set_name(&mut self, name: &str) -> bool {
        if self.name == name {
            return false;
        }
        self.name = name.to_string();
        true
    }
}

/// Device identity learned from the amplifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Name configured by the caller for display
    pub display_name: String,

    /// `host:port` the client connects to
    pub address: String,

    /// Device name reported in the name table (e.g. "DAX 88_616E")
    pub device_name: Option<String>,
    pub model: String,
    pub manufacturer: String,

    /// Not reported by the binary protocol
    pub firmware: Option<String>,
    pub mac_address: Option<String>,
}

impl DeviceInfo {
    pub fn new(display_name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            address: address.into(),
            device_name: None,
            model: DEFAULT_MODEL.to_string(),
            manufacturer: DEFAULT_MANUFACTURER.to_string(),
            firmware: None,
            mac_address: None,
        }
    }
}

/// Read-only copy of everything the client knows about the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device: DeviceInfo,
    pub zones: BTreeMap<ZoneId, ZoneState>,
    pub inputs: BTreeMap<InputId, String>,

    /// True while the values may not reflect the device (connection lost or not yet synced)
    pub stale: bool,
}

impl DeviceSnapshot {
    /// Get the state of one zone
    pub fn zone(&self, id: ZoneId) -> Option<&ZoneState> {
        self.zones.get(&id)
    }

    /// Get the name of an input
    pub fn input_name(&self, id: InputId) -> Option<&str> {
        self.inputs.get(&id).map(String::as_str)
    }

    /// Get the name of the input a zone is currently playing
    pub fn active_input_name(&self, zone: ZoneId) -> Option<&str> {
        self.zone(zone).and_then(|z| self.input_name(z.input))
    }
}

/// Lifecycle state of the connection to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

pub(crate) fn default_zone_name(id: ZoneId) -> String {
    format!("Zone {}", id)
}

/// Fallback input name; the last input of a DAX88 is its Wi-Fi streamer
pub(crate) fn default_input_name(id: InputId, input_count: u8) -> String {
    if id == input_count && input_count == DEFAULT_INPUT_COUNT {
        "Wi-Fi".to_string()
    } else {
        format!("Input{}", id)
    }
}
