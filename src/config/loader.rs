//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config = parse_config(&content)?;
    tracing::debug!(path = ?path, c2s = config.c2s.len(), s2s = config.s2s.is_some(), "Configuration parsed");
    Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;
    use crate::transport::TransportKind;
    use std::io::Write;

    const SAMPLE: &str = r#"
[logging]
level = "debug"
format = "json"

[diagnostics]
port = 6060

[[c2s]]
id = "default"
domain = "localhost"
max_stanza_size = 65536
[c2s.transport]
type = "socket"
port = 5222

[[c2s]]
id = "ws"
domain = "localhost"
[c2s.transport]
type = "websocket"
port = 5280
url_path = "/xmpp"
tls = false

[s2s]
dial_timeout = 15
dialback_secret = "s3cr3t"
localdomain = "localhost"
"#;

    #[test]
    fn shipped_config_is_valid() {
        let config = parse_config(include_str!("../../streamgate.toml")).unwrap();
        assert_eq!(config.c2s.len(), 2);
        assert!(config.s2s.as_ref().is_some_and(|s2s| s2s.disabled));
    }

    #[test]
    fn parses_full_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.diagnostics.port, 6060);
        assert_eq!(config.c2s.len(), 2);
        assert_eq!(config.c2s[0].max_stanza_size, Some(65_536));
        assert_eq!(config.c2s[1].transport.kind, TransportKind::WebSocket);
        assert_eq!(config.c2s[1].transport.url_path, "/xmpp");
        assert!(!config.c2s[1].transport.tls);

        let s2s = config.s2s.as_ref().unwrap();
        assert_eq!(s2s.id, "s2s");
        assert_eq!(s2s.dial_timeout, Some(15));
        assert_eq!(s2s.local_domain, "localhost");
        assert_eq!(config.domains().len(), 3);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.c2s.is_empty());
        assert!(config.s2s.is_none());
        assert_eq!(config.diagnostics.port, 0);
    }

    #[test]
    fn rejects_missing_dialback_secret() {
        let err = parse_config("[s2s]\nlocaldomain = \"localhost\"\n").unwrap_err();
        match err {
            ConfigError::Validation(errors) => {
                assert!(matches!(errors.as_slice(), [ValidationError::MissingDialbackSecret]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(parse_config("[[c2s]\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.c2s[0].id, "default");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/streamgate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
