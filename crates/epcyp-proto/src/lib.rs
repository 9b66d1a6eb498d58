//! Shared model and feed logic for epcyp, a PeerCast YP channel browser.
//!
//! Everything in this crate is free of I/O except `config`, `settings` and
//! `platform`.  The daemon crate wires these pieces to the network, the
//! timer and the external processes.

pub mod channel;
pub mod config;
pub mod error;
pub mod favorite;
pub mod platform;
pub mod protocol;
pub mod reconcile;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod view;
pub mod yp;
