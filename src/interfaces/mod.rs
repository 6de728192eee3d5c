//! Driver-side surfaces: the CSV batch format and team configuration files.

pub mod batch;
pub mod csv;
pub mod teams;
