//! Simbay server: configuration, production adapters and process wiring.
//!
//! The binary in `main.rs` loads [`config::Config`], connects the Postgres store, builds
//! the Stripe and SMTP adapters, wires everything with [`bootstrap::build`] and serves
//! the router from `simbay-web` while the job scheduler runs alongside.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bootstrap;
pub mod config;
pub mod smtp;
pub mod stripe;
