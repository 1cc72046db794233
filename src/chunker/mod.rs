//! Upstream connection and frame extraction
//!
//! One [`Chunker`] per configured source. It holds the only connection to
//! the camera, decodes the multipart body into frames, and pushes them to
//! the owning hub.

mod body;
mod multipart;
mod reader;

pub use multipart::WireFormat;
pub use reader::{AuthMode, Chunker};
