//! Serialisable types a host forwards to its UI.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so hosts can
//! emit them as JSON without conversion.

pub mod events;
