//! `auditai-core`: shared building blocks for the offline AI runtime.
//!
//! This crate holds the identifiers, the clock abstraction and the error type
//! that every other crate in the workspace agrees on. It has no IO.

pub mod clock;
pub mod compression;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use compression::CompressionLevel;
pub use error::{CoreError, CoreResult};
pub use id::{ClientId, ModelId, UpdateId};
