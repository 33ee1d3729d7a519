//! Updater: update distribution and program supervision for desktop apps.
//!
//! # Architecture
//!
//! - **Update orchestration** ([`update`]): find a newer release through an
//!   [`update::UpdateSource`], prompt through the host [`update::Context`],
//!   download and digest-check the asset, hand it to the host to apply.
//! - **Sources** ([`sources`]): GitHub release manifests, remote JSON, local files.
//! - **Download** ([`download`]): streaming HTTP fetch with conditional
//!   requests and digest verification.
//! - **Commands** ([`command`]): run external programs with a timeout.
//! - **Processes** ([`process`]): find and terminate processes by executable path.
//! - **Watchdog** ([`watchdog`]): keep a set of programs running.

pub mod apply;
pub mod command;
pub mod config;
pub mod digest;
pub mod download;
pub mod error;
pub mod logging;
pub mod platform;
pub mod process;
pub mod sources;
pub mod update;
pub mod version;
pub mod watchdog;

pub use config::UpdaterConfig;
pub use error::{Result, UpdateError};
pub use update::{Context, Update, UpdateOptions, Updater};
pub use watchdog::{WatchExit, Watchdog};
