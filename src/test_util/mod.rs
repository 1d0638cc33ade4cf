//! This module contains utilities that are useful for testing transfers: in-memory destination
//!  files and send sockets that record or drop frames. They are used by the crate's own tests,
//!  but they are also exported for integration tests and application testing, which is why they
//!  are part of the regular (non-#[cfg(test)]) code.

pub mod sink;
pub mod socket;
