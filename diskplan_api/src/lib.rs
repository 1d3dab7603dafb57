//! Serializable data model of diskplan: partition tables and their payloads,
//! customizations, path policies, platforms and image profiles, together
//! with the validation that does not depend on allocation.

pub mod config;
pub mod constants;
pub mod customizations;
pub mod disk;
pub mod error;
pub mod pathpolicy;
pub mod platform;
pub mod primitives;
