//! Interactive drawing of new sites.

pub mod session;
