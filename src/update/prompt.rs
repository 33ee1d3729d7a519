//! Update prompt backed by an external helper program.
//!
//! The helper is run with the prompt details as a single JSON argument and
//! must print an [`UpdatePromptResponse`] as JSON on stdout.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::context::UpdateUi;
use super::types::{Update, UpdateOptions, UpdatePromptOptions, UpdatePromptResponse};
use crate::command::{self, Program};

/// Arguments passed to the prompt helper.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgs {
    /// Dialog title.
    pub title: String,
    /// Dialog message.
    pub message: String,
    /// Version being offered.
    pub version: String,
    /// Initial state of the "update automatically" checkbox.
    pub auto_update: bool,
}

impl PromptArgs {
    /// Prompt text for `update`.
    pub fn for_update(update: &Update, options: &UpdateOptions, prompt: UpdatePromptOptions) -> Self {
        Self {
            title: format!("{} Update", options.app_name),
            message: format!(
                "There is an update available for {} ({} -> {}).",
                options.app_name, options.version, update.version
            ),
            version: update.version.clone(),
            auto_update: prompt.auto_update,
        }
    }
}

/// [`UpdateUi`] that asks through an external program.
#[derive(Debug, Clone)]
pub struct CommandPrompt {
    program: Program,
    timeout: Duration,
}

impl CommandPrompt {
    /// Prompt by running `program`, waiting at most `timeout` for an answer.
    pub fn new(program: Program, timeout: Duration) -> Self {
        Self { program, timeout }
    }
}

#[async_trait]
impl UpdateUi for CommandPrompt {
    async fn update_prompt(
        &self,
        update: &Update,
        options: &UpdateOptions,
        prompt_options: UpdatePromptOptions,
    ) -> anyhow::Result<Option<UpdatePromptResponse>> {
        let args = serde_json::to_string(&PromptArgs::for_update(update, options, prompt_options))?;
        debug!(program = %self.program.path, "running update prompt");
        let response: UpdatePromptResponse = command::exec_for_json(
            &self.program.path,
            &self.program.args_with(&[args]),
            self.timeout,
        )
        .await?;
        Ok(Some(response))
    }
}

#[cfg(all(test, unix))]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::update::types::UpdateAction;

    fn sh(script: &str) -> Program {
        Program {
            path: "sh".to_owned(),
            args: vec!["-c".to_owned(), script.to_owned(), "prompt".to_owned()],
        }
    }

    fn update() -> Update {
        Update {
            version: "1.1.0".to_owned(),
            need_update: true,
            ..Default::default()
        }
    }

    fn options() -> UpdateOptions {
        UpdateOptions {
            version: "1.0.0".to_owned(),
            app_name: "Keys".to_owned(),
            prerelease: false,
        }
    }

    #[test]
    fn prompt_args_describe_the_update() {
        let args = PromptArgs::for_update(&update(), &options(), UpdatePromptOptions { auto_update: true });
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["title"], "Keys Update");
        assert_eq!(json["version"], "1.1.0");
        assert_eq!(json["autoUpdate"], true);
        assert!(json["message"].as_str().unwrap().contains("1.0.0 -> 1.1.0"));
    }

    #[tokio::test]
    async fn helper_answer_is_decoded() {
        let prompt = CommandPrompt::new(
            sh(r#"echo '{"action":"snooze","autoUpdate":false,"snoozeDuration":86400000}'"#),
            Duration::from_secs(5),
        );
        let response = prompt
            .update_prompt(&update(), &options(), UpdatePromptOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.action, UpdateAction::Snooze);
        assert_eq!(response.snooze_duration, 86_400_000);
    }

    #[tokio::test]
    async fn helper_receives_prompt_args() {
        // Echo back whether the JSON argument carried the checkbox state.
        let prompt = CommandPrompt::new(
            sh(r#"case "$1" in *'"autoUpdate":true'*) echo '{"action":"apply","autoUpdate":true}';; *) echo '{"action":"cancel"}';; esac"#),
            Duration::from_secs(5),
        );
        let response = prompt
            .update_prompt(&update(), &options(), UpdatePromptOptions { auto_update: true })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.action, UpdateAction::Apply);
    }

    #[tokio::test]
    async fn garbage_answer_is_an_error() {
        let prompt = CommandPrompt::new(sh("echo nope"), Duration::from_secs(5));
        assert!(
            prompt
                .update_prompt(&update(), &options(), UpdatePromptOptions::default())
                .await
                .is_err()
        );
    }
}
