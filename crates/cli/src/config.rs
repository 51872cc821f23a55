use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use driver::ConnectionConfig;

const APP_NAME: &str = "supex";

/// Keys accepted by `config get` and `config set`
pub const CONFIG_KEYS: &[&str] = &[
    "connection.host",
    "connection.port",
    "connection.timeout_secs",
    "connection.connect_timeout_secs",
    "connection.agent",
    "connection.token",
    "connection.max_response_bytes",
    "connection.handshake",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionSection,
}

/// `[connection]` table; unset fields fall back to the built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: Option<f64>,
    pub connect_timeout_secs: Option<f64>,
    pub agent: Option<String>,
    pub token: Option<String>,
    pub max_response_bytes: Option<usize>,
    pub handshake: Option<bool>,
}

/// Values given on the command line, highest precedence
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_secs: Option<f64>,
}

pub fn get_config_dir() -> Result<PathBuf> {
    // SUPEX_CONFIG_PATH overrides the default config directory
    if let Ok(path) = std::env::var("SUPEX_CONFIG_PATH") {
        return Ok(PathBuf::from(path));
    }

    ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
        .context("Could not determine config directory")
}

pub fn get_config_file() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_file()?)
}

pub fn load_config_from(config_file: &Path) -> Result<Config> {
    if !config_file.exists() {
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(config_file)
        .with_context(|| format!("Failed to read config file: {}", config_file.display()))?;

    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", config_file.display()))
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(&get_config_file()?, config)
}

pub fn save_config_to(config_file: &Path, config: &Config) -> Result<()> {
    if let Some(config_dir) = config_file.parent() {
        if !config_dir.exists() {
            fs::create_dir_all(config_dir).with_context(|| {
                format!("Failed to create config directory: {}", config_dir.display())
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o700);
                fs::set_permissions(config_dir, perms)?;
            }
        }
    }

    let contents = toml::to_string_pretty(config)?;
    fs::write(config_file, contents)
        .with_context(|| format!("Failed to write config file: {}", config_file.display()))?;

    // The file may hold an auth token
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(config_file, perms)?;
    }

    Ok(())
}

/// Build the connection settings: defaults, then file, then environment, then flags
pub fn connection_config(
    config: &Config,
    overrides: &Overrides,
    default_agent: &str,
) -> Result<ConnectionConfig> {
    resolve(config, overrides, default_agent, |key| std::env::var(key).ok())
}

fn resolve(
    config: &Config,
    overrides: &Overrides,
    default_agent: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ConnectionConfig> {
    let file = &config.connection;
    let mut conn = ConnectionConfig::default().with_agent(default_agent);

    if let Some(host) = &file.host {
        conn.host = host.clone();
    }
    if let Some(port) = file.port {
        conn.port = port;
    }
    if let Some(secs) = file.timeout_secs {
        conn.request_timeout = seconds("connection.timeout_secs", secs)?;
    }
    if let Some(secs) = file.connect_timeout_secs {
        conn.connect_timeout = seconds("connection.connect_timeout_secs", secs)?;
    }
    if let Some(agent) = &file.agent {
        conn.agent = agent.clone();
    }
    if file.token.is_some() {
        conn.token = file.token.clone();
    }
    if let Some(max) = file.max_response_bytes {
        conn.max_response_bytes = frame_limit("connection.max_response_bytes", max)?;
    }
    if let Some(handshake) = file.handshake {
        conn.handshake = handshake;
    }

    if let Some(host) = env("SUPEX_HOST") {
        conn.host = host;
    }
    if let Some(port) = env("SUPEX_PORT") {
        conn.port = port
            .parse()
            .with_context(|| format!("Invalid SUPEX_PORT: {}", port))?;
    }
    if let Some(timeout) = env("SUPEX_TIMEOUT") {
        let secs: f64 = timeout
            .parse()
            .with_context(|| format!("Invalid SUPEX_TIMEOUT: {}", timeout))?;
        conn.request_timeout = seconds("SUPEX_TIMEOUT", secs)?;
    }
    if let Some(agent) = env("SUPEX_AGENT") {
        conn.agent = agent;
    }
    if let Some(token) = env("SUPEX_AUTH_TOKEN") {
        conn.token = Some(token).filter(|t| !t.is_empty());
    }
    if let Some(max) = env("SUPEX_MAX_RESPONSE") {
        let bytes = max
            .parse()
            .with_context(|| format!("Invalid SUPEX_MAX_RESPONSE: {}", max))?;
        conn.max_response_bytes = frame_limit("SUPEX_MAX_RESPONSE", bytes)?;
    }

    if let Some(host) = &overrides.host {
        conn.host = host.clone();
    }
    if let Some(port) = overrides.port {
        conn.port = port;
    }
    if let Some(secs) = overrides.timeout_secs {
        conn.request_timeout = seconds("--timeout", secs)?;
    }

    Ok(conn)
}

fn seconds(source: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("Invalid {}: {} (must be a positive number of seconds)", source, secs);
    }
    Ok(Duration::from_secs_f64(secs))
}

fn frame_limit(source: &str, bytes: usize) -> Result<usize> {
    if bytes == 0 {
        anyhow::bail!("Invalid {}: 0 (must be at least 1 byte)", source);
    }
    Ok(bytes)
}

pub fn get_config_value(config: &Config, key: &str) -> Option<String> {
    let c = &config.connection;
    match key {
        "connection.host" => c.host.clone(),
        "connection.port" => c.port.map(|p| p.to_string()),
        "connection.timeout_secs" => c.timeout_secs.map(|s| s.to_string()),
        "connection.connect_timeout_secs" => c.connect_timeout_secs.map(|s| s.to_string()),
        "connection.agent" => c.agent.clone(),
        "connection.token" => c.token.as_ref().map(|_| "********".to_string()), // Don't expose token
        "connection.max_response_bytes" => c.max_response_bytes.map(|m| m.to_string()),
        "connection.handshake" => c.handshake.map(|h| h.to_string()),
        _ => None,
    }
}

pub fn set_config_value(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let c = &mut config.connection;
    match key {
        "connection.host" => c.host = Some(value.to_string()),
        "connection.port" => {
            c.port = Some(value.parse().with_context(|| format!("Invalid port: {}", value))?)
        }
        "connection.timeout_secs" => {
            let secs = value.parse().with_context(|| format!("Invalid timeout: {}", value))?;
            seconds(key, secs)?;
            c.timeout_secs = Some(secs);
        }
        "connection.connect_timeout_secs" => {
            let secs = value.parse().with_context(|| format!("Invalid timeout: {}", value))?;
            seconds(key, secs)?;
            c.connect_timeout_secs = Some(secs);
        }
        "connection.agent" => c.agent = Some(value.to_string()),
        "connection.token" => c.token = Some(value.to_string()).filter(|t| !t.is_empty()),
        "connection.max_response_bytes" => {
            let bytes = value.parse().with_context(|| format!("Invalid size: {}", value))?;
            c.max_response_bytes = Some(frame_limit(key, bytes)?);
        }
        "connection.handshake" => {
            c.handshake = Some(value.parse().with_context(|| format!("Invalid bool: {}", value))?)
        }
        _ => anyhow::bail!("Unknown config key: {}", key),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let conn = resolve(&Config::default(), &Overrides::default(), "user", env_of(&[])).unwrap();
        assert_eq!(conn.host, "localhost");
        assert_eq!(conn.port, 9876);
        assert_eq!(conn.request_timeout, Duration::from_secs(15));
        assert_eq!(conn.agent, "user");
        assert!(conn.token.is_none());
        assert!(conn.handshake);
    }

    #[test]
    fn test_precedence_file_env_flags() {
        let mut config = Config::default();
        config.connection.host = Some("file-host".into());
        config.connection.port = Some(1111);
        config.connection.agent = Some("file-agent".into());
        config.connection.timeout_secs = Some(30.0);

        let env = env_of(&[("SUPEX_PORT", "2222"), ("SUPEX_AGENT", "env-agent")]);
        let overrides = Overrides {
            port: Some(3333),
            ..Default::default()
        };
        let conn = resolve(&config, &overrides, "user", env).unwrap();

        assert_eq!(conn.host, "file-host");
        assert_eq!(conn.port, 3333);
        assert_eq!(conn.agent, "env-agent");
        assert_eq!(conn.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_env_token_and_timeout() {
        let env = env_of(&[("SUPEX_AUTH_TOKEN", "s3cret"), ("SUPEX_TIMEOUT", "2.5")]);
        let conn = resolve(&Config::default(), &Overrides::default(), "mcp", env).unwrap();
        assert_eq!(conn.token.as_deref(), Some("s3cret"));
        assert_eq!(conn.request_timeout, Duration::from_millis(2500));
        assert_eq!(conn.agent, "mcp");
    }

    #[test]
    fn test_invalid_env_values_are_rejected() {
        let env = env_of(&[("SUPEX_PORT", "not-a-port")]);
        assert!(resolve(&Config::default(), &Overrides::default(), "user", env).is_err());

        let overrides = Overrides {
            timeout_secs: Some(-1.0),
            ..Default::default()
        };
        assert!(resolve(&Config::default(), &overrides, "user", env_of(&[])).is_err());
    }

    #[test]
    fn test_zero_response_limit_is_rejected() {
        let env = env_of(&[("SUPEX_MAX_RESPONSE", "0")]);
        assert!(resolve(&Config::default(), &Overrides::default(), "user", env).is_err());

        let mut config = Config::default();
        config.connection.max_response_bytes = Some(0);
        assert!(resolve(&config, &Overrides::default(), "user", env_of(&[])).is_err());

        assert!(set_config_value(&mut config, "connection.max_response_bytes", "0").is_err());

        let env = env_of(&[("SUPEX_MAX_RESPONSE", "4096")]);
        let conn = resolve(&Config::default(), &Overrides::default(), "user", env).unwrap();
        assert_eq!(conn.max_response_bytes, 4096);
    }

    #[test]
    fn test_get_and_set_values() {
        let mut config = Config::default();
        set_config_value(&mut config, "connection.port", "4000").unwrap();
        set_config_value(&mut config, "connection.token", "abc").unwrap();
        set_config_value(&mut config, "connection.handshake", "false").unwrap();

        assert_eq!(get_config_value(&config, "connection.port").as_deref(), Some("4000"));
        assert_eq!(get_config_value(&config, "connection.token").as_deref(), Some("********"));
        assert_eq!(get_config_value(&config, "connection.handshake").as_deref(), Some("false"));
        assert_eq!(get_config_value(&config, "connection.host"), None);

        assert!(set_config_value(&mut config, "connection.port", "99999").is_err());
        assert!(set_config_value(&mut config, "connection.timeout_secs", "0").is_err());
        assert!(set_config_value(&mut config, "daemon.socket_path", "/tmp").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("config.toml");

        assert_eq!(load_config_from(&file).unwrap(), Config::default());

        let mut config = Config::default();
        config.connection.host = Some("10.0.0.2".into());
        config.connection.timeout_secs = Some(7.5);
        save_config_to(&file, &config).unwrap();

        assert_eq!(load_config_from(&file).unwrap(), config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&file).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(&file, "[connection]\nport = \"nope\"\n").unwrap();
        assert!(load_config_from(&file).is_err());
    }
}
