//! Disk layout planning for operating system images.
//!
//! A distribution supplies an [`diskplan_api::config::ImageProfile`] holding
//! a base partition table. [`allocator::build`] merges blueprint
//! customizations into it, sizes and grows it and assigns identifiers.
//! [`flatten::flatten`] turns the result into the devices and mounts of an
//! image pipeline.

pub mod allocator;
pub mod cli;
pub mod commands;
pub mod documents;
pub mod flatten;
pub mod idgen;
pub mod logging;

pub const DISKPLAN_VERSION: &str = env!("CARGO_PKG_VERSION");
