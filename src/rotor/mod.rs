//! # Rotor Control
//!
//! Azimuth and elevation rotors behind ASCII serial controllers.

pub mod controller;
pub mod protocol;

pub use controller::{RotorController, RotorSettings};
pub use protocol::HeadingQuery;
