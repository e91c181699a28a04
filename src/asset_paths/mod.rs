//! Helpers for resolving local assets and normalising their web paths.
//!
//! Resolution is split from path normalisation and URL classification so each step can be
//! tested on its own. URL classification is shared with the runtime network layer.

mod filters;
mod resolve;
mod web;

pub use filters::{is_external_url, strip_query};
pub use resolve::resolve_assets;
pub use web::{join_public_path, make_web_path};
