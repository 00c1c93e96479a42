//! Device-facing type definitions
//!
//! This module defines the command index table and the typed values read
//! from or reported by the filter firmware: operating state, interrupt
//! kinds, firmware version, and the tuning range.

use serde::{Deserialize, Serialize};

/// Command indices understood by the filter firmware
///
/// These values are the firmware contract and are carried in the `wIndex`
/// field of every vendor control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Command {
    /// Enable or disable the optical filter stage
    FilterEnable = 0x00,
    /// Read the current operating state
    GetLctfState = 0x01,
    /// Enable or disable automatic retuning
    AutotuneEnable = 0x03,
    /// Read the lower wavelength bound (float response)
    WavelengthMin = 0x10,
    /// Read the upper wavelength bound (float response)
    WavelengthMax = 0x11,
    /// Read the tuning step size (float response)
    WavelengthStep = 0x12,
    /// Tune to a target wavelength (float payload)
    SetWavelength = 0x13,
    /// Read the internal temperature (float response)
    GetTemperature = 0x21,
    /// Start a calibration cycle
    Calibrate = 0x32,
    /// Enable or disable overdrive switching
    OverdriveEnable = 0xF9,
}

/// Operating state reported by the device
///
/// Read on demand via [`Command::GetLctfState`]; also carried in byte 1 of
/// every interrupt notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceState {
    /// No state reported yet
    None = 0x00,
    /// Idle and ready for commands
    Ready = 0x01,
    /// Mid-operation, rejecting new commands
    Busy = 0x02,
    /// Tuning to a new wavelength
    Tuning = 0x03,
    /// Running a calibration cycle
    Calibrating = 0x04,
}

impl DeviceState {
    /// Decode a raw state byte, `None` for values outside the contract
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::None),
            0x01 => Some(Self::Ready),
            0x02 => Some(Self::Busy),
            0x03 => Some(Self::Tuning),
            0x04 => Some(Self::Calibrating),
            _ => None,
        }
    }
}

/// Interrupt notification kinds
///
/// Byte 0 of every notification payload. Kinds outside this table are
/// ignored by the dispatcher, not treated as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum InterruptKind {
    /// Device-side fault during an operation
    Error = 0x00,
    /// A tune reached its target wavelength
    TuningDone = 0x01,
    /// A calibration cycle finished
    CalibrationDone = 0x02,
    /// Operating state transition
    StateChanged = 0x03,
    /// Command rejected because a prior operation is still running
    Busy = 0x04,
}

impl InterruptKind {
    /// Decode a raw kind byte, `None` for values outside the contract
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::Error),
            0x01 => Some(Self::TuningDone),
            0x02 => Some(Self::CalibrationDone),
            0x03 => Some(Self::StateChanged),
            0x04 => Some(Self::Busy),
            _ => None,
        }
    }
}

/// A decoded interrupt notification
///
/// Raw kind and state bytes are preserved so unknown values can still be
/// logged. The wavelength is meaningful for TuningDone, StateChanged, Busy
/// and Error notifications and carries garbage otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Raw interrupt kind (byte 0)
    pub kind: u8,
    /// Raw device state at emission time (byte 1)
    pub state: u8,
    /// Wavelength, truncated from the float in bytes 4-7
    pub wavelength: u32,
}

impl Notification {
    /// Typed interrupt kind, `None` for kinds outside the contract
    pub fn interrupt_kind(&self) -> Option<InterruptKind> {
        InterruptKind::from_raw(self.kind)
    }

    /// Typed device state, `None` for states outside the contract
    pub fn device_state(&self) -> Option<DeviceState> {
        DeviceState::from_raw(self.state)
    }
}

/// Oldest firmware revision the driver supports
pub const MIN_FIRMWARE_VERSION: FirmwareVersion = FirmwareVersion::from_bcd(0x0107);

/// Firmware version as reported in the USB `bcdDevice` field
///
/// Stored as binary-coded decimal, so `0x0107` displays as "1.07" and
/// ordering follows the numeric BCD value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FirmwareVersion(u16);

impl FirmwareVersion {
    /// Wrap a raw `bcdDevice` value
    pub const fn from_bcd(bcd: u16) -> Self {
        Self(bcd)
    }

    /// Major revision digit(s)
    pub fn major(&self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Minor revision digits, still in BCD (0x07 displays as "07")
    pub fn minor(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    /// Raw BCD value
    pub fn bcd(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}.{:02x}", self.major(), self.minor())
    }
}

/// Tuning range supported by an attached device, in integer wavelength units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningRange {
    /// Lowest tunable wavelength
    pub min: u32,
    /// Highest tunable wavelength
    pub max: u32,
    /// Granularity between adjacent tunable wavelengths
    pub step: u32,
}

impl TuningRange {
    /// Build a range from the float readings reported by the firmware
    ///
    /// The firmware reports bounds as floats that can drift slightly off
    /// the integral value; they are rounded to the nearest integer rather
    /// than assumed exact.
    pub fn from_readings(min: f32, max: f32, step: f32) -> Self {
        Self {
            min: round_reading(min),
            max: round_reading(max),
            step: round_reading(step),
        }
    }

    /// Whether `target` lies inside `[min, max]`
    pub fn contains(&self, target: u32) -> bool {
        target >= self.min && target <= self.max
    }
}

/// Round a firmware float reading to the nearest integer
fn round_reading(x: f32) -> u32 {
    (x + 0.5).floor() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_indices() {
        assert_eq!(Command::FilterEnable as u16, 0x00);
        assert_eq!(Command::GetLctfState as u16, 0x01);
        assert_eq!(Command::AutotuneEnable as u16, 0x03);
        assert_eq!(Command::WavelengthMin as u16, 0x10);
        assert_eq!(Command::WavelengthMax as u16, 0x11);
        assert_eq!(Command::WavelengthStep as u16, 0x12);
        assert_eq!(Command::SetWavelength as u16, 0x13);
        assert_eq!(Command::GetTemperature as u16, 0x21);
        assert_eq!(Command::Calibrate as u16, 0x32);
        assert_eq!(Command::OverdriveEnable as u16, 0xF9);
    }

    #[test]
    fn test_state_from_raw() {
        assert_eq!(DeviceState::from_raw(0x01), Some(DeviceState::Ready));
        assert_eq!(DeviceState::from_raw(0x04), Some(DeviceState::Calibrating));
        assert_eq!(DeviceState::from_raw(0x05), None);
        assert_eq!(DeviceState::from_raw(0xFF), None);
    }

    #[test]
    fn test_kind_from_raw() {
        assert_eq!(InterruptKind::from_raw(0x01), Some(InterruptKind::TuningDone));
        assert_eq!(InterruptKind::from_raw(0x04), Some(InterruptKind::Busy));
        assert_eq!(InterruptKind::from_raw(0x7F), None);
    }

    #[test]
    fn test_firmware_version_display() {
        assert_eq!(FirmwareVersion::from_bcd(0x0107).to_string(), "1.07");
        assert_eq!(FirmwareVersion::from_bcd(0x0210).to_string(), "2.10");
    }

    #[test]
    fn test_firmware_version_ordering() {
        assert!(FirmwareVersion::from_bcd(0x0106) < MIN_FIRMWARE_VERSION);
        assert!(FirmwareVersion::from_bcd(0x0107) >= MIN_FIRMWARE_VERSION);
        assert!(FirmwareVersion::from_bcd(0x0200) > MIN_FIRMWARE_VERSION);
    }

    #[test]
    fn test_range_rounding() {
        // Readings drift slightly below and above the integral value
        let range = TuningRange::from_readings(419.9997, 730.0002, 1.0);
        assert_eq!(range.min, 420);
        assert_eq!(range.max, 730);
        assert_eq!(range.step, 1);
    }

    #[test]
    fn test_range_contains() {
        let range = TuningRange::from_readings(420.0, 730.0, 1.0);
        assert!(range.contains(420));
        assert!(range.contains(532));
        assert!(range.contains(730));
        assert!(!range.contains(419));
        assert!(!range.contains(731));
    }
}
