//! Common types, protocol documents, and errors shared across `payload-codec` crates.

pub mod error;
pub mod payload;
pub mod protocol;
pub mod wire;

pub use error::ServiceError;
pub use payload::Payload;
pub use wire::WireError;
