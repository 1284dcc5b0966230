//! Wire-level types shared between the CAN bus side and the operator
//! gateway: the frame codec (C1) and the JSON gateway schemas (C8).

pub mod codec;
pub mod gateway;

pub use codec::{CodecError, Frame};
