//! sysdefs (System Definitions) is a dependency-light crate meant exclusively
//! to contain definitions for simple, basic, or axiomatic system/OS concepts
//! used when laying out disks: architectures, filesystem kinds, well-known
//! partition type GUIDs and the identifiers found on block devices.
//!
//! As the name implies, the crate mainly provides definitions, and should
//! contain minimal or no behavior at all.
//!

pub mod arch;
pub mod filesystems;
pub mod osuuid;
pub mod partition_types;
