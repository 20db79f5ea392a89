//! Domain model for the project → site → analytics hierarchy.
//!
//! # Responsibility
//! - Define canonical records shared by repositories, services and the map.
//!
//! # Invariants
//! - Every record is identified by a stable UUID.
//! - A site belongs to exactly one project; an analytics record to exactly
//!   one site. Deletion is hard and cascades downward.

pub mod analytics;
pub mod project;
pub mod site;
