use clap::Subcommand;
use serde_json::json;

use crate::cli::utils::{load_config, output_error, output_success};
use crate::cli::OutputFormat;
use crate::config::ConfigLoader;

#[derive(Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Load the configuration exactly as the server would and report the outcome")]
    Check {
        #[arg(long, help = "Also print the resolved document with secrets masked")]
        show: bool,
    },

    #[command(about = "Show which configuration file the current environment selects")]
    Path,
}

pub async fn handle(cmd: ConfigCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Check { show } => {
            let loaded = match load_config().await {
                Ok(loaded) => loaded,
                Err(e) => {
                    output_error(output_format, &e.to_string(), Some("CONFIG_INVALID"))?;
                    anyhow::bail!("configuration check failed");
                }
            };

            let report = &loaded.report;
            let mut data = json!({
                "profile": report.profile,
                "overrides": report.overrides,
                "offline": report.offline,
                "store": report.store,
                "resolution": report.resolution,
            });
            if let Some(source) = &report.source {
                data["source"] = json!(source.display().to_string());
            }
            if show {
                data["document"] = loaded.config.redacted_document();
            }

            let message = if report.resolution.is_complete() {
                "Configuration resolved".to_string()
            } else {
                format!(
                    "Configuration resolved with {} unresolved value(s)",
                    report.resolution.placeholders_unresolved.len()
                        + report.resolution.empty_unresolved.len()
                )
            };
            output_success(output_format, &message, Some(data))
        }
        ConfigCommands::Path => {
            let loader = ConfigLoader::from_process_env();
            let path = loader.config_path()?;
            output_success(
                output_format,
                "Configuration file",
                Some(json!({
                    "profile": loader.profile()?,
                    "path": path.display().to_string(),
                    "exists": path.is_file(),
                })),
            )
        }
    }
}
