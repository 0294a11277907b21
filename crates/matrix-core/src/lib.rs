pub mod coordinator;
pub mod event;
pub mod grid;
pub mod media;
pub mod resolver;
pub mod scripted;
pub mod scroll;
pub mod tile;

pub use matrix_proto::ChannelId;
