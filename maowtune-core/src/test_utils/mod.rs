// File: maowtune-core/src/test_utils/mod.rs
//
// In-memory stand-ins used by the crate's own tests and by integration tests.

pub mod voice;

pub use voice::{FakeVoiceTransport, VoiceCall};
