//! Shared event contract for the fleet.
//!
//! This crate defines the wire-level agreement between every service
//! in the fleet: the closed [`Subject`] enumeration, the per-subject
//! payload shapes, and the [`EventData`] trait that binds a payload
//! type to its subject. Producers and consumers in different services
//! depend on this crate so that they serialize and deserialize the
//! exact same shapes.

pub mod payload;
pub mod subject;
pub mod types;

pub use payload::EventData;
pub use subject::Subject;
