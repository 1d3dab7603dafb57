pub mod bytes;
pub mod path;
