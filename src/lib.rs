//! Rotates the enabled eSIM profile on every eUICC a host can reach.
//!
//! A rotation pass goes reader by reader: open a logical channel to the ISD-R,
//! clear the enable/disable notifications the previous switch left behind, read
//! the installed profiles, and enable the one after the currently enabled one.
//! See [`rotation::Rotator`].

pub mod apdu;
pub mod ber;
pub mod config;
pub mod errors;
pub mod euicc;
pub mod pcsc;
pub mod rotation;
pub mod service;
pub mod store;
pub mod transceiver;

pub use errors::{Error, Result};
