use std::{env, path::PathBuf};

use super::schema::Settings;

/// Configuration loading helpers.
///
/// `Settings::load` layers struct defaults, an optional config file and
/// `PRESTOD__*` environment variables.
impl Settings {
    /// Load settings from environment and optional config file.
    pub fn load() -> Result<Self, ::config::ConfigError> {
        Self::load_from(resolve_config_path())
    }

    /// Like [`Settings::load`] with an explicit file (`--config`).
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self, ::config::ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = &config_path {
            builder = builder.add_source(::config::File::from(path.as_path()).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("PRESTOD")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build()?;
        let settings: Settings = cfg.try_deserialize()?;
        Ok(settings)
    }

    /// Perform basic validation checks on loaded settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.socket_path.as_os_str().is_empty() {
            return Err("server.socket_path must not be empty".to_string());
        }
        if self.audio.backends.is_empty() {
            return Err("audio.backends must name at least one backend".to_string());
        }
        if self.audio.output_buffer_ms < 50 {
            return Err("audio.output_buffer_ms must be >= 50".to_string());
        }
        if !(0..=100).contains(&self.audio.softmixer_level) {
            return Err("audio.softmixer_level must be within 0..=100".to_string());
        }
        if self.library.extensions.is_empty() {
            return Err("library.extensions must not be empty".to_string());
        }
        if self.equalizer.presets.is_empty() {
            return Err("equalizer.presets must not be empty".to_string());
        }
        if let Some(p) = self
            .equalizer
            .presets
            .iter()
            .find(|p| !(-24.0..=24.0).contains(&p.preamp_db))
        {
            return Err(format!(
                "equalizer preset `{}`: preamp_db must be within -24..=24",
                p.name
            ));
        }
        Ok(())
    }

    /// The effective settings as TOML, for `--print-config`.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Resolve the config path from `PRESTOD_CONFIG_PATH` or XDG defaults.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Some(p) = env::var_os("PRESTOD_CONFIG_PATH") {
        let p = PathBuf::from(p);
        return Some(p);
    }
    default_config_path()
}

/// Compute the default config path under `$XDG_CONFIG_HOME/prestod/config.toml`
/// or `~/.config/prestod/config.toml` when `XDG_CONFIG_HOME` is not set.
pub fn default_config_path() -> Option<PathBuf> {
    let config_home = if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        Some(PathBuf::from(xdg))
    } else if let Some(home) = env::var_os("HOME") {
        Some(PathBuf::from(home).join(".config"))
    } else {
        None
    };

    config_home.map(|d| d.join("prestod").join("config.toml"))
}
