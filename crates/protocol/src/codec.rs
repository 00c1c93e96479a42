//! Control-transfer encoding and response decoding
//!
//! Every exchange with the device is a vendor control transfer with a fixed
//! shape:
//!
//! ```text
//! Get: requestType 0b1100_0000, request 0x80, value = aux byte,
//!      index = command, response read separately (1 or 4 bytes LE)
//! Set: requestType 0b0100_0000, request 0x81, value = bool 0/1,
//!      index = command, optional 4-byte LE IEEE-754 float payload
//! ```
//!
//! Interrupt notifications arrive on a separate endpoint as a fixed 8-byte
//! buffer: byte 0 = kind, byte 1 = state, bytes 2-3 reserved, bytes 4-7 =
//! little-endian float wavelength.

use crate::error::{CodecError, Result};
use crate::types::{Command, Notification};

/// Request type for device-to-host vendor transfers
pub const REQUEST_TYPE_GET: u8 = 0b1100_0000;
/// Request type for host-to-device vendor transfers
pub const REQUEST_TYPE_SET: u8 = 0b0100_0000;
/// Request code for get commands
pub const REQUEST_CODE_GET: u8 = 0x80;
/// Request code for set commands
pub const REQUEST_CODE_SET: u8 = 0x81;
/// Fixed size of an interrupt notification payload
pub const NOTIFICATION_LEN: usize = 8;

/// An encoded vendor control request
///
/// Maps one-to-one onto the fields of a USB control transfer. `payload` is
/// `Some` only for float set requests; get requests read their response in
/// a separate buffer sized by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex (the command index)
    pub index: u16,
    /// Outbound payload, little-endian float bits
    pub payload: Option<[u8; 4]>,
}

impl ControlRequest {
    /// Encode a device-to-host get request
    ///
    /// `aux` rides in the value field and defaults to 0 for every command
    /// in the current table.
    pub fn get(command: Command, aux: u8) -> Self {
        Self {
            request_type: REQUEST_TYPE_GET,
            request: REQUEST_CODE_GET,
            value: u16::from(aux),
            index: command as u16,
            payload: None,
        }
    }

    /// Encode a host-to-device set request carrying a float payload
    pub fn set_f32(command: Command, value: f32) -> Self {
        Self {
            request_type: REQUEST_TYPE_SET,
            request: REQUEST_CODE_SET,
            value: 0,
            index: command as u16,
            payload: Some(value.to_le_bytes()),
        }
    }

    /// Encode a host-to-device set request carrying a boolean in the value field
    pub fn set_bool(command: Command, enabled: bool) -> Self {
        Self {
            request_type: REQUEST_TYPE_SET,
            request: REQUEST_CODE_SET,
            value: u16::from(enabled),
            index: command as u16,
            payload: None,
        }
    }

    /// Whether this request reads from the device
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// Decode a 1-byte response (state and index reads)
pub fn decode_u8(buf: &[u8]) -> Result<u8> {
    match buf.first() {
        Some(&b) => Ok(b),
        None => Err(CodecError::ShortResponse { needed: 1, got: 0 }),
    }
}

/// Decode a 4-byte little-endian IEEE-754 float response
/// (wavelength bounds, step, temperature)
pub fn decode_f32(buf: &[u8]) -> Result<f32> {
    if buf.len() < 4 {
        return Err(CodecError::ShortResponse {
            needed: 4,
            got: buf.len(),
        });
    }
    Ok(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Decode an interrupt notification payload
///
/// Fails only on short buffers. Unknown kind and state bytes decode into
/// the raw form; callers decide whether to ignore them.
pub fn decode_notification(buf: &[u8]) -> Result<Notification> {
    if buf.len() < NOTIFICATION_LEN {
        return Err(CodecError::ShortNotification {
            needed: NOTIFICATION_LEN,
            got: buf.len(),
        });
    }
    let wavelength = f32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    Ok(Notification {
        kind: buf[0],
        state: buf[1],
        // Truncation, not rounding: matches the device's own display
        wavelength: wavelength as u32,
    })
}

/// Encode a notification payload, the inverse of [`decode_notification`]
///
/// The firmware is the only real producer; this exists for simulated
/// devices in tests.
pub fn encode_notification(kind: u8, state: u8, wavelength: f32) -> [u8; NOTIFICATION_LEN] {
    let mut buf = [0u8; NOTIFICATION_LEN];
    buf[0] = kind;
    buf[1] = state;
    buf[4..8].copy_from_slice(&wavelength.to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceState, InterruptKind};

    #[test]
    fn test_get_request_shape() {
        let req = ControlRequest::get(Command::GetTemperature, 0);
        assert_eq!(req.request_type, 0b1100_0000);
        assert_eq!(req.request, 0x80);
        assert_eq!(req.value, 0);
        assert_eq!(req.index, 0x21);
        assert_eq!(req.payload, None);
        assert!(req.is_in());
    }

    #[test]
    fn test_set_f32_request_shape() {
        let req = ControlRequest::set_f32(Command::SetWavelength, 532.0);
        assert_eq!(req.request_type, 0b0100_0000);
        assert_eq!(req.request, 0x81);
        assert_eq!(req.value, 0);
        assert_eq!(req.index, 0x13);
        assert_eq!(req.payload, Some(532.0f32.to_le_bytes()));
        assert!(!req.is_in());
    }

    #[test]
    fn test_set_bool_request_shape() {
        let on = ControlRequest::set_bool(Command::FilterEnable, true);
        assert_eq!(on.value, 1);
        assert_eq!(on.index, 0x00);
        assert_eq!(on.payload, None);

        let off = ControlRequest::set_bool(Command::OverdriveEnable, false);
        assert_eq!(off.value, 0);
        assert_eq!(off.index, 0xF9);
    }

    #[test]
    fn test_decode_u8() {
        assert_eq!(decode_u8(&[0x03]), Ok(0x03));
        assert_eq!(decode_u8(&[0x01, 0xFF]), Ok(0x01));
        assert_eq!(
            decode_u8(&[]),
            Err(CodecError::ShortResponse { needed: 1, got: 0 })
        );
    }

    #[test]
    fn test_decode_f32() {
        let bytes = 23.5f32.to_le_bytes();
        assert_eq!(decode_f32(&bytes), Ok(23.5));
        assert_eq!(
            decode_f32(&bytes[..3]),
            Err(CodecError::ShortResponse { needed: 4, got: 3 })
        );
    }

    #[test]
    fn test_decode_notification() {
        let buf = encode_notification(
            InterruptKind::TuningDone as u8,
            DeviceState::Ready as u8,
            532.0,
        );
        let notif = decode_notification(&buf).unwrap();
        assert_eq!(notif.interrupt_kind(), Some(InterruptKind::TuningDone));
        assert_eq!(notif.device_state(), Some(DeviceState::Ready));
        assert_eq!(notif.wavelength, 532);
    }

    #[test]
    fn test_decode_notification_truncates_wavelength() {
        let buf = encode_notification(0x01, 0x01, 531.9);
        assert_eq!(decode_notification(&buf).unwrap().wavelength, 531);
    }

    #[test]
    fn test_decode_notification_unknown_kind() {
        let buf = encode_notification(0x7F, 0x01, 600.0);
        let notif = decode_notification(&buf).unwrap();
        assert_eq!(notif.kind, 0x7F);
        assert_eq!(notif.interrupt_kind(), None);
    }

    #[test]
    fn test_decode_notification_short() {
        assert_eq!(
            decode_notification(&[0x01, 0x01, 0, 0]),
            Err(CodecError::ShortNotification { needed: 8, got: 4 })
        );
    }
}
