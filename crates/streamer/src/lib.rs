pub mod format;
pub mod render;
pub mod sink;
pub mod streamer;

pub use sink::ChatSink;
pub use streamer::{EventStreamer, MAX_MESSAGE_BYTES};
