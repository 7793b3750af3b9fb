//! TCP router configuration.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

const ENV_PREFIX: &str = "TCP_ROUTER_";

/// Upper bound on the default route expiry, in seconds.
const MAX_DEFAULT_ROUTE_EXPIRY_SECS: u64 = 65535;

/// Client credentials for the OAuth server.
#[derive(Clone)]
pub struct OAuthConfig {
    /// OAuth server base URL (example: http://127.0.0.1:8443).
    pub token_endpoint: String,
    pub client_name: String,
    pub client_secret: String,
    /// Cached tokens are refreshed this long before they expire.
    pub token_expiration_buffer: Duration,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_name", &self.client_name)
            .field("client_secret", &"<redacted>")
            .field("token_expiration_buffer", &self.token_expiration_buffer)
            .finish()
    }
}

/// TCP router configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Routing registry base URL (example: http://127.0.0.1:3000).
    pub routing_api_url: String,

    /// OAuth settings; `None` when registry auth is disabled.
    pub oauth: Option<OAuthConfig>,

    /// Static HAProxy config prepended to the generated stanzas.
    pub haproxy_base_config: PathBuf,

    /// Generated HAProxy config file.
    pub haproxy_config: PathBuf,

    /// Optional script run after every config write.
    pub haproxy_reloader: Option<PathBuf>,

    /// Bulk sync cadence.
    pub sync_interval: Duration,

    /// Stale route pruning cadence.
    pub stale_route_check_interval: Duration,

    /// TTL for backends registered without one.
    pub default_route_expiry: Duration,

    /// Delay before resubscribing to the event stream.
    pub subscription_retry_interval: Duration,

    /// Ports used by co-located system components. Checked at startup
    /// against every router group's reservable ports.
    pub reserved_system_component_ports: Vec<u16>,

    /// Refuse to start when a router group claims a reserved port.
    pub fail_on_router_port_conflicts: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which receives full variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        let routing_api_url =
            var("ROUTING_API_URL").unwrap_or_else(|| "http://127.0.0.1:3000".to_string());

        let auth_disabled = var("AUTH_DISABLED")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let oauth = if auth_disabled {
            None
        } else {
            let token_endpoint = var("OAUTH_TOKEN_ENDPOINT")
                .unwrap_or_else(|| "http://127.0.0.1:8443".to_string());
            let client_name = var("OAUTH_CLIENT_NAME").context(
                "Missing OAuth client. Set TCP_ROUTER_OAUTH_CLIENT_NAME (or TCP_ROUTER_AUTH_DISABLED=true).",
            )?;
            let client_secret = var("OAUTH_CLIENT_SECRET")
                .context("Missing OAuth secret. Set TCP_ROUTER_OAUTH_CLIENT_SECRET.")?;
            let buffer_secs: u64 = parse_var(&var, "TOKEN_EXPIRATION_BUFFER_SECS", 30)?;

            Some(OAuthConfig {
                token_endpoint,
                client_name,
                client_secret,
                token_expiration_buffer: Duration::from_secs(buffer_secs),
            })
        };

        let haproxy_base_config = var("HAPROXY_BASE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/haproxy/haproxy.base.cfg"));
        let haproxy_config = var("HAPROXY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/haproxy/haproxy.cfg"));
        let haproxy_reloader = var("HAPROXY_RELOADER")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let sync_interval = Duration::from_secs(parse_var(&var, "SYNC_INTERVAL_SECS", 60)?);
        let stale_route_check_interval =
            Duration::from_secs(parse_var(&var, "STALE_ROUTE_CHECK_INTERVAL_SECS", 30)?);
        let default_route_expiry =
            Duration::from_secs(parse_var(&var, "DEFAULT_ROUTE_EXPIRY_SECS", 120)?);
        let subscription_retry_interval =
            Duration::from_secs(parse_var(&var, "SUBSCRIPTION_RETRY_INTERVAL_SECS", 5)?);

        let reserved_system_component_ports = var("RESERVED_SYSTEM_COMPONENT_PORTS")
            .map(|v| parse_port_list(&v))
            .transpose()
            .context(
                "TCP_ROUTER_RESERVED_SYSTEM_COMPONENT_PORTS must be a comma separated list of ports.",
            )?
            .unwrap_or_default();
        let fail_on_router_port_conflicts = var("FAIL_ON_ROUTER_PORT_CONFLICTS")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let log_level = var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let config = Self {
            routing_api_url,
            oauth,
            haproxy_base_config,
            haproxy_config,
            haproxy_reloader,
            sync_interval,
            stale_route_check_interval,
            default_route_expiry,
            subscription_retry_interval,
            reserved_system_component_ports,
            fail_on_router_port_conflicts,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.default_route_expiry.as_secs() > MAX_DEFAULT_ROUTE_EXPIRY_SECS {
            anyhow::bail!(
                "TCP_ROUTER_DEFAULT_ROUTE_EXPIRY_SECS must be at most {} (got {})",
                MAX_DEFAULT_ROUTE_EXPIRY_SECS,
                self.default_route_expiry.as_secs()
            );
        }

        if self.stale_route_check_interval > self.default_route_expiry {
            anyhow::bail!(
                "TCP_ROUTER_STALE_ROUTE_CHECK_INTERVAL_SECS ({}) must not exceed TCP_ROUTER_DEFAULT_ROUTE_EXPIRY_SECS ({})",
                self.stale_route_check_interval.as_secs(),
                self.default_route_expiry.as_secs()
            );
        }

        if self.sync_interval.is_zero() || self.stale_route_check_interval.is_zero() {
            anyhow::bail!("sync and stale route check intervals must be non-zero");
        }

        Ok(())
    }

    /// Default route expiry in whole seconds, as the routing table expects.
    pub fn default_ttl_secs(&self) -> u32 {
        // validate() bounds this to 65535
        u32::try_from(self.default_route_expiry.as_secs()).unwrap_or(u32::MAX)
    }
}

fn parse_var<T, F>(var: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|v| v.parse::<T>())
        .transpose()
        .with_context(|| format!("{ENV_PREFIX}{name} must be an integer (seconds)."))
        .map(|v| v.unwrap_or(default))
}

fn parse_port_list(value: &str) -> Result<Vec<u16>, std::num::ParseIntError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{k}"), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_with_auth_disabled() {
        let config = load(&[("AUTH_DISABLED", "true")]).unwrap();

        assert_eq!(config.routing_api_url, "http://127.0.0.1:3000");
        assert!(config.oauth.is_none());
        assert_eq!(
            config.haproxy_config,
            PathBuf::from("/etc/haproxy/haproxy.cfg")
        );
        assert!(config.haproxy_reloader.is_none());
        assert_eq!(config.sync_interval, Duration::from_secs(60));
        assert_eq!(config.stale_route_check_interval, Duration::from_secs(30));
        assert_eq!(config.default_ttl_secs(), 120);
        assert_eq!(config.subscription_retry_interval, Duration::from_secs(5));
        assert!(config.reserved_system_component_ports.is_empty());
        assert!(!config.fail_on_router_port_conflicts);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_reserved_system_component_ports() {
        let config = load(&[
            ("AUTH_DISABLED", "1"),
            ("RESERVED_SYSTEM_COMPONENT_PORTS", "8080, 9000,,15000"),
            ("FAIL_ON_ROUTER_PORT_CONFLICTS", "true"),
        ])
        .unwrap();
        assert_eq!(config.reserved_system_component_ports, vec![8080, 9000, 15000]);
        assert!(config.fail_on_router_port_conflicts);

        let err = load(&[
            ("AUTH_DISABLED", "1"),
            ("RESERVED_SYSTEM_COMPONENT_PORTS", "8080,70000"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("RESERVED_SYSTEM_COMPONENT_PORTS"));
    }

    #[test]
    fn test_oauth_requires_credentials() {
        let err = load(&[]).unwrap_err();
        assert!(err.to_string().contains("OAUTH_CLIENT_NAME"));

        let config = load(&[
            ("OAUTH_CLIENT_NAME", "tcp_router"),
            ("OAUTH_CLIENT_SECRET", "s3cret"),
        ])
        .unwrap();
        let oauth = config.oauth.unwrap();
        assert_eq!(oauth.client_name, "tcp_router");
        assert_eq!(oauth.token_expiration_buffer, Duration::from_secs(30));
        assert!(!format!("{oauth:?}").contains("s3cret"));
    }

    #[test]
    fn test_rejects_expiry_above_limit() {
        let err = load(&[
            ("AUTH_DISABLED", "1"),
            ("DEFAULT_ROUTE_EXPIRY_SECS", "65536"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("at most 65535"));
    }

    #[test]
    fn test_rejects_check_interval_above_expiry() {
        let err = load(&[
            ("AUTH_DISABLED", "1"),
            ("DEFAULT_ROUTE_EXPIRY_SECS", "20"),
            ("STALE_ROUTE_CHECK_INTERVAL_SECS", "30"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("must not exceed"));
    }

    #[test]
    fn test_rejects_non_numeric_interval() {
        let err = load(&[("AUTH_DISABLED", "1"), ("SYNC_INTERVAL_SECS", "1m")]).unwrap_err();
        assert!(err.to_string().contains("SYNC_INTERVAL_SECS"));
    }
}
