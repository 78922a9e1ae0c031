//! Graph writers: export a built [`ConfigGraph`](crate::graph::ConfigGraph)
//! for inspection or re-loading.

pub mod dot;
pub mod json;
pub mod xml;

pub use dot::write_dot;
pub use json::write_json;
pub use xml::write_xml;
