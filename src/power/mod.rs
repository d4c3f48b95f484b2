//! Power request management
//!
//! Keeps the display and/or system awake through one shared native power
//! request, created lazily and released exactly once.

pub mod requirements;

pub use requirements::PowerRequirements;
