use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::aws::Credentials;
use crate::cli::Cli;
use crate::errors::ConfigError;

/// Refresh interval. No underscore after the prefix, so it is never read as
/// a declaration.
pub const FREQUENCY_VAR: &str = "SECRETSCTXFREQUENCY";
pub const RUNTIME_API_VAR: &str = "AWS_LAMBDA_RUNTIME_API";
pub const DEFAULT_PROXY_ADDR: &str = "127.0.0.1:8088";
pub const DEFAULT_TARGET_PID: i32 = 1;
const DEFAULT_EXTENSION_NAME: &str = "secretsctx";

#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` of the real runtime API, as handed to us by the platform.
    pub runtime_api: String,
    pub proxy_addr: SocketAddr,
    /// Process whose memory holds the runtime API address.
    pub target_pid: i32,
    /// Zero means resolve once and never refresh.
    pub refresh_interval: Duration,
    pub extension_name: String,
    /// Only needed when something is declared.
    pub region: Option<String>,
    /// Only needed when something is declared.
    pub credentials: Option<Credentials>,
    /// Set via AWS_ENDPOINT_URL_SSM.
    pub ssm_endpoint: Option<String>,
    /// Set via AWS_ENDPOINT_URL_SECRETS_MANAGER.
    pub secrets_manager_endpoint: Option<String>,
    /// Keep the last good context when a periodic refresh fails.
    pub tolerate_refresh_errors: bool,
    pub skip_patch: bool,
}

impl Config {
    /// Build from any variable lookup. `load` uses the process environment.
    /// `argv0` names the extension, as the platform expects.
    pub fn from_lookup<F>(lookup: F, argv0: Option<&str>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let runtime_api = var(RUNTIME_API_VAR).ok_or(ConfigError::MissingVar {
            var: RUNTIME_API_VAR,
        })?;

        let refresh_interval = match var(FREQUENCY_VAR) {
            Some(value) => parse_duration(&value)?,
            None => Duration::ZERO,
        };

        let region = var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION"));

        let credentials = match (var("AWS_ACCESS_KEY_ID"), var("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials {
                access_key_id,
                secret_access_key,
                session_token: var("AWS_SESSION_TOKEN"),
            }),
            _ => None,
        };

        Ok(Config {
            runtime_api,
            proxy_addr: parse_addr(DEFAULT_PROXY_ADDR)?,
            target_pid: DEFAULT_TARGET_PID,
            refresh_interval,
            extension_name: extension_name(argv0),
            region,
            credentials,
            ssm_endpoint: var("AWS_ENDPOINT_URL_SSM"),
            secrets_manager_endpoint: var("AWS_ENDPOINT_URL_SECRETS_MANAGER"),
            tolerate_refresh_errors: false,
            skip_patch: false,
        })
    }

    /// Apply command-line overrides on top of the environment.
    pub fn apply(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(addr) = &cli.proxy_addr {
            self.proxy_addr = parse_addr(addr)?;
        }
        if let Some(pid) = cli.target_pid {
            self.target_pid = pid;
        }
        self.skip_patch |= cli.skip_patch;
        self.tolerate_refresh_errors |= cli.tolerate_refresh_errors;
        Ok(())
    }

    /// Region for the backends. Only called when something is declared.
    pub fn require_region(&self) -> Result<String, ConfigError> {
        self.region
            .clone()
            .ok_or(ConfigError::MissingVar { var: "AWS_REGION" })
    }

    /// Credentials for the backends. Only called when something is declared.
    pub fn require_credentials(&self) -> Result<Credentials, ConfigError> {
        self.credentials.clone().ok_or(ConfigError::MissingVar {
            var: "AWS_ACCESS_KEY_ID",
        })
    }

    /// The address written over the runtime API address in the target's
    /// memory. Must be the same length as what it replaces.
    pub fn redirect(&self) -> Result<(String, String), ConfigError> {
        let search = self.runtime_api.clone();
        let replace = self.proxy_addr.to_string();
        if search.len() != replace.len() {
            return Err(ConfigError::LengthMismatch { search, replace });
        }
        Ok((search, replace))
    }
}

/// Environment plus command line. A `.env` file is only read for local runs
/// (`--skip-patch`): inside Lambda the working directory is the function's
/// task root, and a bundled `.env` must not add declarations.
pub fn load(cli: &Cli) -> anyhow::Result<Config> {
    if reads_dotenv(cli) {
        dotenvy::dotenv().ok();
    }
    let argv0 = std::env::args().next();
    let mut config = Config::from_lookup(|name| std::env::var(name).ok(), argv0.as_deref())?;
    config.apply(cli)?;
    Ok(config)
}

fn reads_dotenv(cli: &Cli) -> bool {
    cli.skip_patch
}

fn parse_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|e: std::net::AddrParseError| ConfigError::InvalidAddress {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn extension_name(argv0: Option<&str>) -> String {
    argv0
        .and_then(|arg| Path::new(arg).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_EXTENSION_NAME)
        .to_string()
}

/// Parse a duration such as `300ms`, `1.5h` or `2h45m`.
///
/// Units: `ns`, `us` (or `µs`/`μs`), `ms`, `s`, `m`, `h`. A bare `0` is
/// allowed; any other number needs a unit. Negative durations are rejected.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = value.strip_prefix('+').unwrap_or(value);
    if rest.starts_with('-') {
        return Err(invalid("negative durations are not allowed"));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(invalid("expected a number"));
        }
        let amount: f64 = number.parse().map_err(|_| invalid("malformed number"))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };

        total_nanos += amount * scale;
        rest = tail;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(invalid("duration out of range"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
