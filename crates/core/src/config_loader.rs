use crate::config::AppConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

/// Default location of the base configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/Config.toml";

/// Environment variables with this prefix override file settings; nested
/// keys are separated by `__` (e.g. `AUTOTRADE_SESSION__STAKE_BASE=2`).
pub const ENV_PREFIX: &str = "AUTOTRADE_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration from `config/Config.toml` and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration sources cannot be parsed or the
    /// session settings are invalid.
    pub fn load() -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH, None)
    }

    /// Loads application configuration with a specific profile, layered
    /// over the base file as `Config.<profile>.toml` in the same directory.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration sources cannot be parsed or the
    /// session settings are invalid.
    pub fn load_with_profile(profile: &str) -> Result<AppConfig> {
        Self::load_from(DEFAULT_CONFIG_PATH, Some(profile))
    }

    /// Loads configuration rooted at an explicit base file. Missing files
    /// are skipped; built-in defaults fill any gaps.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration sources cannot be parsed or the
    /// session settings are invalid.
    pub fn load_from(path: impl AsRef<Path>, profile: Option<&str>) -> Result<AppConfig> {
        let figment = Self::figment(path.as_ref(), profile);
        let config: AppConfig = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.as_ref().display()))?;

        config
            .session
            .validate()
            .context("Invalid session configuration")?;

        tracing::debug!(
            path = %path.as_ref().display(),
            profile = profile.unwrap_or("default"),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn figment(path: &Path, profile: Option<&str>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(AppConfigDefaults::default()))
            .merge(Toml::file(path));

        if let Some(profile) = profile {
            let profile_file = path.with_file_name(format!("Config.{profile}.toml"));
            figment = figment.merge(Toml::file(profile_file));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

/// Serializable mirror of the defaults that have one, so partially filled
/// sections still extract.
#[derive(Debug, Default, serde::Serialize)]
struct AppConfigDefaults {
    engine: crate::config::EngineConfig,
    paper: crate::config::PaperConfig,
    session: crate::config::TradingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccountMode, SignalMode};
    use figment::Jail;
    use rust_decimal_macros::dec;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    #[test]
    fn missing_files_fall_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config = ConfigLoader::load().map_err(|e| e.to_string())?;
            assert_eq!(config.session.stake_base, dec!(1));
            assert_eq!(config.engine.idle_poll, Duration::from_secs(10));
            assert_eq!(config.credentials.email, "demo@localhost");
            Ok(())
        });
    }

    #[test]
    fn file_profile_and_env_are_layered() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/Config.toml",
                r#"
                [session]
                stake_base = 2
                martingale_steps = 4
                asset_default = "EURUSD"
                signal_mode = "Trend"

                [engine]
                idle_poll = 3

                [credentials]
                email = "trader@example.com"
                password = "from-file"
                "#,
            )?;
            jail.create_file(
                "config/Config.live.toml",
                r#"
                [session]
                account_mode = "Real"
                stop_win = 25
                "#,
            )?;
            jail.set_env("AUTOTRADE_SESSION__STAKE_BASE", "5");
            jail.set_env("AUTOTRADE_CREDENTIALS__PASSWORD", "from-env");

            let config = ConfigLoader::load_with_profile("live").map_err(|e| e.to_string())?;
            assert_eq!(config.session.stake_base, dec!(5));
            assert_eq!(config.session.martingale_steps, 4);
            assert_eq!(config.session.stop_win, dec!(25));
            assert_eq!(config.session.account_mode, AccountMode::Real);
            assert_eq!(config.session.signal_mode, SignalMode::Trend);
            assert_eq!(config.engine.idle_poll, Duration::from_secs(3));
            assert_eq!(config.engine.failure_backoff, Duration::from_secs(10));
            assert_eq!(config.credentials.email, "trader@example.com");
            assert_eq!(config.credentials.password.expose_secret(), "from-env");
            Ok(())
        });
    }

    #[test]
    fn invalid_session_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/Config.toml", "[session]\nstake_base = 0\n")?;
            let err = ConfigLoader::load().unwrap_err();
            assert!(format!("{err:#}").contains("stake_base"));
            Ok(())
        });
    }
}
