//! Frame type shared across subscribers
//!
//! One frame is one JPEG image from the upstream stream. Frames are
//! reference counted via `Bytes`, so cloning during a fan-out step shares
//! the allocation instead of copying it.

use bytes::Bytes;

/// One still image from the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    /// Wrap a decoded image payload
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Image bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Image size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_len_tracks_payload() {
        let frame = Frame::new(Bytes::from_static(b"jpeg"));
        assert_eq!(frame.len(), 4);
        assert!(!frame.is_empty());

        let empty = Frame::new(Bytes::new());
        assert_eq!(empty.len(), 0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_clone_shares_data() {
        let frame = Frame::new(Bytes::from_static(b"jpeg"));
        let copy = frame.clone();

        assert_eq!(frame, copy);
        // Same backing allocation, not a copy
        assert_eq!(frame.data().as_ptr(), copy.data().as_ptr());
    }
}
