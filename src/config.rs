use serde::{Deserialize, Serialize};

use std::{env, fmt, fs, path::Path, time::Duration};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to parse {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// TLS from the first byte, usually port 465.
    ImplicitTls,
    /// STARTTLS upgrade, the send fails if the server does not offer it.
    RequiredStartTls,
    /// STARTTLS when offered, plaintext otherwise.
    #[default]
    OpportunisticStartTls,
}

impl SmtpSecurity {
    pub const fn from_flags(secure: bool, require_tls: bool) -> Self {
        if secure {
            Self::ImplicitTls
        } else if require_tls {
            Self::RequiredStartTls
        } else {
            Self::OpportunisticStartTls
        }
    }

    pub const fn default_port(self) -> u16 {
        match self {
            Self::ImplicitTls => 465,
            Self::RequiredStartTls | Self::OpportunisticStartTls => 587,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub security: SmtpSecurity,
    #[serde(default = "default_smtp_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl SmtpConfig {
    /// Configured port, or the conventional one for the security mode.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.security.default_port())
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            username: None,
            password: None,
            security: SmtpSecurity::default(),
            timeout: DEFAULT_SMTP_TIMEOUT,
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("security", &self.security)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Sender mailbox, e.g. `Relay <noreply@example.com>`.
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub smtp: SmtpConfig,
    /// Log relay responses and Ethereal preview links after each send.
    #[serde(default)]
    pub test_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            api_secret: None,
            sender: None,
            smtp: SmtpConfig::default(),
            test_mode: false,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("sender", &self.sender)
            .field("smtp", &self.smtp)
            .field("test_mode", &self.test_mode)
            .finish()
    }
}

impl Config {
    /// Builds the configuration from a variable lookup, treating blank values as unset.
    ///
    /// `API_SECRET_KEY` is the exception: a blank secret is kept as-is so it still has to match.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| var(key).is_some_and(|v| parse_flag(&v));

        let port = var("PORT")
            .map(|v| parse_port("PORT", &v))
            .transpose()?
            .unwrap_or(DEFAULT_PORT);

        let smtp = SmtpConfig {
            host: var("SMTP_HOST").map(|v| v.trim().to_string()),
            port: var("SMTP_PORT")
                .map(|v| parse_port("SMTP_PORT", &v))
                .transpose()?,
            username: var("SMTP_USER"),
            password: var("SMTP_PASS"),
            security: SmtpSecurity::from_flags(flag("SMTP_SECURE"), flag("SMTP_REQUIRE_TLS")),
            timeout: var("SMTP_TIMEOUT")
                .map(|v| parse_timeout("SMTP_TIMEOUT", &v))
                .transpose()?
                .unwrap_or(DEFAULT_SMTP_TIMEOUT),
        };

        Ok(Self {
            port,
            api_secret: lookup("API_SECRET_KEY"),
            sender: var("FROM_EMAIL"),
            smtp,
            test_mode: flag("EMAIL_TEST_MODE"),
        })
    }

    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_yaml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        if config.smtp.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "smtp.timeout",
                message: "timeout must be greater than zero".to_string(),
            });
        }
        Ok(config)
    }

    fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        let config: Self = serde_yaml::from_str(contents)?;
        Ok(config.without_blank_values())
    }

    fn without_blank_values(mut self) -> Self {
        let blank_to_none = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        self.sender = blank_to_none(self.sender);
        self.smtp.host = blank_to_none(self.smtp.host);
        self.smtp.username = blank_to_none(self.smtp.username);
        self.smtp.password = blank_to_none(self.smtp.password);
        self
    }

    /// Settings whose absence lets the process start but degrades the endpoint.
    pub fn startup_warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if self.api_secret.as_deref().is_none_or(str::is_empty) {
            warnings.push("API_SECRET_KEY is not set. The /send-email endpoint will not be secure.");
        }
        if self.smtp.host.is_none() {
            warnings.push("SMTP configuration is missing. Email sending will likely fail.");
        }
        if self.sender.is_none() {
            warnings.push("FROM_EMAIL is not set. Email sending will fail.");
        }
        warnings
    }
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_smtp_timeout() -> Duration {
    DEFAULT_SMTP_TIMEOUT
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

fn parse_port(key: &'static str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| ConfigError::InvalidValue {
            key,
            message: format!("'{value}' is not a valid port: {e}"),
        })
}

fn parse_timeout(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let timeout = match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(value).map_err(|e| ConfigError::InvalidValue {
            key,
            message: format!("'{value}' is not a valid duration: {e}"),
        })?,
    };
    if timeout.is_zero() {
        return Err(ConfigError::InvalidValue {
            key,
            message: "timeout must be greater than zero".to_string(),
        });
    }
    Ok(timeout)
}

pub fn load_config() -> Result<Config, ConfigError> {
    // Retrieve env variable
    let explicit_path = env::var("EMAIL_RELAY_CONFIG").ok();
    let config_path = explicit_path
        .clone()
        .unwrap_or_else(|| "config.yaml".to_string());

    // Try config file
    if Path::new(&config_path).exists() {
        tracing::info!("Loading configuration from '{}'", config_path);
        return Config::from_yaml_file(&config_path);
    }

    if explicit_path.is_some() {
        tracing::warn!(
            "Config file '{}' not found, falling back to environment variables",
            config_path
        );
    }

    // Fallback to environment variables
    tracing::info!("Loading configuration from environment variables");
    Config::from_lookup(|key| env::var(key).ok())
}
