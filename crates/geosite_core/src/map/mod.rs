//! Map surface ownership, site rendering and view composition.
//!
//! # Responsibility
//! - Drive the external map library through the `MapBackend` seam.
//! - Keep one live surface per container and release everything it owns.
//! - Render the selected project's sites and route their interactions.

pub mod backend;
pub mod feed;
pub mod headless;
pub mod layer;
pub mod surface;
pub mod view;
