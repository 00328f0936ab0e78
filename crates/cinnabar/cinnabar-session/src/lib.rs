//! `cinnabar-session`: scheduled session lifecycle around the engine.

pub mod controller;
pub mod schedule;

pub use controller::{SessionController, SessionError};
pub use schedule::{Phase, SessionSchedule, Window};
