use anyhow::Result;
use colored::Colorize;
use log_sage::config::{self, Config};
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Displays the current configuration with secrets masked
pub fn show(config_path: Option<&Path>) -> Result<()> {
    info!("Loading configuration for display");

    let cfg = config::load_config(config_path)?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();
    println!("{}", toml::to_string_pretty(&sanitized)?);

    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: Option<&Path>) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());

    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    if !cfg.provider.has_credential() {
        println!(
            "{}",
            "! provider.api_key is empty: sessions will never be analysed".yellow()
        );
    }

    info!("Configuration validation successful");
    Ok(())
}

/// Mask the provider credential for safe display
fn sanitize_secrets(cfg: &Config) -> Config {
    let mut sanitized = cfg.clone();
    sanitized.provider.api_key = mask_api_key(&cfg.provider.api_key);
    sanitized
}

/// Mask an API key for safe display
///
/// Shows first 7 and last 4 characters
/// Example: "sk-1234567890abcdef" -> "sk-1234...cdef"
fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 11 {
        return "***".to_string();
    }

    let prefix: String = chars[..7].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", prefix, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_api_key() {
        assert_eq!(mask_api_key("sk-1234567890abcdef"), "sk-1234...cdef");
        assert_eq!(mask_api_key("short"), "***");
        assert_eq!(mask_api_key(""), "");
    }

    #[test]
    fn test_sanitize_secrets_only_touches_credential() {
        let mut cfg = Config::default();
        cfg.provider.api_key = "sk-proj-abcdefghijklmnop".to_string();

        let sanitized = sanitize_secrets(&cfg);
        assert_eq!(sanitized.provider.api_key, "sk-proj...mnop");
        assert_eq!(sanitized.provider.model, cfg.provider.model);
    }
}
