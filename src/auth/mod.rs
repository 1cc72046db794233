//! Upstream authentication
//!
//! Basic auth is attached preemptively by the chunker; this module covers
//! the RFC 2617 Digest challenge-response scheme some cameras require.

pub mod digest;

pub use digest::{authorization, digest_requested, parse_challenge, DigestChallenge};
