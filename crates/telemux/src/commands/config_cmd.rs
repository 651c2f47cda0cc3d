//! Config subcommand handlers. These never open a connection.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let resolved = config::load(global)?;
            let rendered = match global.output {
                OutputFormat::Text => resolved
                    .to_toml()
                    .map_err(|e| CliError::from_config("<resolved>", e))?,
                OutputFormat::Json => serde_json::to_string_pretty(&resolved)?,
            };
            output::emit(rendered.trim_end())
        }
        ConfigCommand::Path => output::emit(&config::resolved_path(global).display().to_string()),
    }
}
