//! Shared types for the room restyling pipeline: requests, furniture
//! records, shopping links, model registry, run events and errors.

pub mod design;
pub mod error;
pub mod events;
pub mod models;

pub use error::{DecorError, DecorResult};
