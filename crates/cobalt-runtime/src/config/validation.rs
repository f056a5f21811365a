//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, CobaltConfig, LogOutput, LoggingConfig, PluginsConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &CobaltConfig) -> ConfigResult<()> {
    validate_bot_config(&config.bot)?;
    validate_plugins_config(&config.plugins)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    if bot.command.is_empty() {
        return Err(ConfigError::validation("Admin command prefix cannot be empty"));
    }

    // The prefix is matched against the raw text before argument splitting.
    if bot.command.chars().any(char::is_whitespace) {
        return Err(ConfigError::validation(format!(
            "Admin command prefix cannot contain whitespace: {:?}",
            bot.command
        )));
    }

    Ok(())
}

fn validate_plugins_config(plugins: &PluginsConfig) -> ConfigResult<()> {
    if plugins.dir.as_os_str().is_empty() {
        return Err(ConfigError::missing_field("plugins.dir"));
    }
    if plugins.state_file.as_os_str().is_empty() {
        return Err(ConfigError::missing_field("plugins.state_file"));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.max_files == 0 {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }

    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_is_valid() {
        assert!(validate_config(&CobaltConfig::default()).is_ok());
    }

    #[test]
    fn test_command_prefix() {
        let mut config = CobaltConfig::default();
        config.bot.command = String::new();
        assert!(validate_config(&config).is_err());

        config.bot.command = "#co balt".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("whitespace"));

        config.bot.command = "/admin".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_logging() {
        let mut config = CobaltConfig::default();
        config.logging.max_files = 0;
        assert!(validate_config(&config).is_err());

        config.logging.max_files = 3;
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some(PathBuf::from("logs/cobalt.log"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_plugin_dir() {
        let mut config = CobaltConfig::default();
        config.plugins.dir = PathBuf::new();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "plugins.dir"
        ));
    }
}
