//! Ghfixture - stub-or-proxy HTTP fixture server for GitHub API client tests
//!
//! Tests talk to a local server that replays recorded fixtures. Unknown
//! requests fail loudly with a 500, or, in proxy mode, are forwarded to
//! `https://api.github.com/` and can be recorded as new fixtures.

#![deny(unsafe_code)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::multiple_crate_versions
)]

pub mod config;
pub mod controller;
pub mod error;
pub mod fingerprint;
pub mod format;
pub mod message;
pub mod network;
pub mod recording;
pub mod stub;
pub mod transform;

pub use config::{FixtureConfig, ModeFlags};
pub use controller::{ControllerState, FixtureController};
pub use error::{FixtureError, Result};
pub use format::format_json_files;
