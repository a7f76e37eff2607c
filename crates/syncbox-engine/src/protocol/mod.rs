//! Connector stdout demultiplexing and forwarding.
//!
//! Bytes from a container's stdout are cut into lines by [`LineBuffer`],
//! classified and filtered by [`StreamProcessor`], and written to an
//! [`OutputSink`]. [`pump`] ties the three together over an async reader.

pub mod lines;
pub mod processor;
pub mod pump;
pub mod sink;

pub use lines::LineBuffer;
pub use processor::{StreamProcessor, StreamStats};
pub use pump::{drain, pump};
pub use sink::OutputSink;
