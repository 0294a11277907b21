//! Shared types for the RTSP matrix: channel ids, configuration, platform
//! paths, the control-socket wire protocol, persisted state and named views.

pub mod channel;
pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;
pub mod views;

pub use channel::ChannelId;
