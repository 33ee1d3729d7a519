//! Update orchestration.
//!
//! [`Updater`] asks an [`UpdateSource`] for a newer release, consults the
//! persisted auto-update preference in [`Config`], prompts through the host
//! [`Context`], downloads and digest-checks the asset, and hands it to the
//! host to apply. [`UpdateChecker`] repeats that on a timer.

pub mod checker;
pub mod context;
pub mod prompt;
pub mod state;
pub mod types;
pub mod updater;

pub use checker::UpdateChecker;
pub use context::{Config, Context, UpdateSource, UpdateUi};
pub use prompt::CommandPrompt;
pub use state::{StateStore, UpdateState};
pub use types::{
    Asset, Property, Update, UpdateAction, UpdateOptions, UpdatePromptOptions,
    UpdatePromptResponse,
};
pub use updater::Updater;
