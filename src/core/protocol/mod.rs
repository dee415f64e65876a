// src/core/protocol/mod.rs

pub mod resp_frame;
pub mod state_machine;
pub use resp_frame::{RespFrame, RespFrameCodec};
pub use state_machine::RespStateMachine;
