//! Control protocol for the liquid-crystal tunable filter
//!
//! This crate defines the vendor control-transfer contract spoken by the
//! filter firmware: the command index table, the fixed request shapes for
//! get/set commands, and the decoders for response buffers and asynchronous
//! interrupt notifications. It performs no I/O; the driver crate feeds the
//! encoded requests to a USB transport and hands raw buffers back for
//! decoding.
//!
//! # Example
//!
//! ```
//! use protocol::{Command, ControlRequest};
//!
//! // Tune to 532 wavelength units
//! let req = ControlRequest::set_f32(Command::SetWavelength, 532.0);
//! assert_eq!(req.index, Command::SetWavelength as u16);
//! assert_eq!(req.payload, Some(532.0f32.to_le_bytes()));
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{
    ControlRequest, NOTIFICATION_LEN, decode_f32, decode_notification, decode_u8,
    encode_notification,
};
pub use error::{CodecError, Result};
pub use types::{
    Command, DeviceState, FirmwareVersion, InterruptKind, MIN_FIRMWARE_VERSION, Notification,
    TuningRange,
};
