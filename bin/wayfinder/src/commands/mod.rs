pub mod chat;
pub mod onboard;
pub mod status;
pub mod tools_cmd;

use std::path::PathBuf;

use wayfinder_core::{Config, Paths};

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub backend_url: Option<String>,
    pub mcp_command: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut Config) {
        if let Some(model) = self.model {
            config.backend.model = model;
        }
        if let Some(url) = self.backend_url {
            config.backend.api_base = url;
        }
        if let Some(command) = self.mcp_command {
            config.transport.command = command;
        }
    }
}

pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| Paths::new().config_file())
}

/// File values, then `WAYFINDER_*` variables, then flags.
pub fn load_config(explicit: Option<PathBuf>, overrides: Overrides) -> anyhow::Result<Config> {
    let mut config = Config::load_or_default(&config_path(explicit))?;
    config.apply_env_overrides();
    overrides.apply(&mut config);
    Ok(config)
}
