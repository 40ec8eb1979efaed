//! Foundation utilities shared by every backend
//!
//! Byte-range ownership for buffer uploads and the logging bootstrap.

pub mod logging;
pub mod memory;
