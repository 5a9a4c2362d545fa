//! `step-driver-parker`
//!
//! Driver for the Parker Compumotor Gemini GT6 stepper drive, built on the
//! `step-core` session layer.
//!
//! The GT6 here fronts a rotation stage, so the public API speaks degrees
//! of rotation; the driver owns the translation into drive step counts and
//! the command sequences each motion requires.

pub mod gt6;

pub use gt6::{Gt6Config, Gt6Driver, GT6_MARKERS, GT6_PROFILE};
