//! Integration tests grouped by subsystem.

pub mod conles_properties;
pub mod link_properties;
