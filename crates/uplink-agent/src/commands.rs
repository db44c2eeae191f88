//! Recovery commands run as shell templates.
//!
//! Each action is one `sh -c` invocation with `{link}` replaced by the
//! single-quoted link id. Exit status 0 is success. The child is killed if
//! the orchestrator's command timeout drops the future.

use std::process::Stdio;

use uplink_core::{LinkId, RecoveryCommands};

use crate::config::CommandTemplates;

pub struct ShellCommands {
    templates: CommandTemplates,
}

impl ShellCommands {
    pub fn new(templates: CommandTemplates) -> Self {
        ShellCommands { templates }
    }

    async fn run(&self, action: &'static str, template: Option<&str>, link: &LinkId) -> bool {
        let Some(template) = template else {
            tracing::warn!(link = %link, action, "no command configured");
            return false;
        };
        let command = render(template, link);
        tracing::info!(link = %link, action, %command, "running recovery command");

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!(
                    link = %link,
                    action,
                    status = %output.status,
                    stderr = %stderr.trim(),
                    "recovery command failed"
                );
                false
            }
            Err(e) => {
                tracing::error!(link = %link, action, error = %e, "could not spawn recovery command");
                false
            }
        }
    }
}

impl RecoveryCommands for ShellCommands {
    async fn reconnect(&self, link: &LinkId) -> bool {
        self.run("reconnect", self.templates.reconnect.as_deref(), link)
            .await
    }

    async fn reboot(&self, link: &LinkId) -> bool {
        self.run("reboot", self.templates.reboot.as_deref(), link).await
    }

    async fn stow(&self, link: &LinkId) -> bool {
        self.run("stow", self.templates.stow.as_deref(), link).await
    }

    async fn unstow(&self, link: &LinkId) -> bool {
        self.run("unstow", self.templates.unstow.as_deref(), link).await
    }
}

/// Substitute `{link}` with the shell-quoted id.
fn render(template: &str, link: &LinkId) -> String {
    let quoted = format!("'{}'", link.as_str().replace('\'', r"'\''"));
    template.replace("{link}", &quoted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates(reconnect: &str) -> CommandTemplates {
        CommandTemplates {
            reconnect: Some(reconnect.to_string()),
            ..CommandTemplates::default()
        }
    }

    #[test]
    fn render_quotes_link() {
        let link = LinkId::from("dish-1");
        assert_eq!(render("ctl reboot {link}", &link), "ctl reboot 'dish-1'");

        let hostile = LinkId::from("a'; rm -rf /; '");
        assert_eq!(
            render("ctl {link}", &hostile),
            r"ctl 'a'\''; rm -rf /; '\'''"
        );
    }

    #[tokio::test]
    async fn exit_status_decides_success() {
        let link = LinkId::from("lte");
        assert!(ShellCommands::new(templates("test {link} = 'lte'")).reconnect(&link).await);
        assert!(!ShellCommands::new(templates("exit 3")).reconnect(&link).await);
    }

    #[tokio::test]
    async fn missing_template_reports_failure() {
        let commands = ShellCommands::new(templates("true"));
        assert!(!commands.reboot(&LinkId::from("lte")).await);
        assert!(!commands.stow(&LinkId::from("lte")).await);
    }
}
