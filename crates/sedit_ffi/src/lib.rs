//! Flutter-facing bindings for the sedit core.

pub mod api;
mod host;
