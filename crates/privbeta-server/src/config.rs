//! Server configuration for `privbeta`.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `PRIVBETA_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

use privbeta_core::gate::{DEFAULT_REDIRECT, GateConfig};
use privbeta_core::mail::SmtpSettings;

/// Default session lifetime: two weeks.
const DEFAULT_SESSION_TTL_SECS: u64 = 14 * 24 * 60 * 60;

/// Longest accepted session lifetime: ten years.
pub const MAX_SESSION_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Gate settings.
    pub gate: GateConfig,
    /// Where verified visitors are sent after redeeming a code.
    pub verified_redirect: String,
    /// Key for signing the invitation code cookie. Random per process when unset.
    pub secret_key: Option<String>,
    /// Absolute base URL used in invite links.
    pub public_url: String,
    /// Directory holding `invite_email*.{txt,html}` overrides.
    pub email_templates_dir: Option<PathBuf>,
    /// Sender address for invite emails.
    pub from_email: String,
    /// SMTP relay (None logs emails instead of sending them).
    pub smtp: Option<SmtpSettings>,
    /// Staff account created at startup if it does not exist.
    pub admin: Option<AdminAccount>,
    /// Lifetime of a session cookie, in seconds. At most
    /// [`MAX_SESSION_TTL_SECS`].
    pub session_ttl_secs: u64,
    /// Expired session purge interval, in seconds.
    pub session_purge_interval_secs: u64,
    /// Mark cookies `Secure` (HTTPS deployments).
    pub secure_cookies: bool,
    /// Directory served under `/static/`.
    pub static_dir: Option<PathBuf>,
}

/// Bootstrap staff account.
#[derive(Clone)]
pub struct AdminAccount {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAccount")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `PostgreSQL` persistent storage.
    Postgres { url: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT`: port to bind on (binds to `0.0.0.0`)
    /// - `PRIVBETA_BIND_ADDR`: full bind address (overrides `PORT`, default: `127.0.0.1:8000`)
    /// - `PRIVBETA_STORAGE`: `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL`: `PostgreSQL` connection string
    /// - `PRIVBETA_LOG_LEVEL`: log filter (default: `info`)
    /// - `PRIVBETA_ENABLE`: gate on or off (default: `true`)
    /// - `PRIVBETA_REDIRECT`: where uninvited visitors go (default: `/beta/not-in-beta`)
    /// - `PRIVBETA_VERIFIED_REDIRECT`: where redeemed codes go (default: `/beta/verified`)
    /// - `PRIVBETA_ALLOW_PATHS`: comma-separated public paths
    /// - `PRIVBETA_ALWAYS_ALLOW_PREFIXES`: comma-separated public path prefixes
    /// - `PRIVBETA_ALWAYS_ALLOW_VIEWS`: comma-separated public route patterns
    /// - `PRIVBETA_APPEND_SLASH`: match public paths with a trailing slash (default: `true`)
    /// - `PRIVBETA_SECRET_KEY`: cookie signing key
    /// - `PRIVBETA_PUBLIC_URL`: base URL for invite links
    /// - `PRIVBETA_EMAIL_TEMPLATES_DIR`: template override directory
    /// - `PRIVBETA_FROM_EMAIL`: invite sender (default: `privbeta@localhost`)
    /// - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_INSECURE`
    /// - `PRIVBETA_ADMIN_USERNAME`, `PRIVBETA_ADMIN_EMAIL`, `PRIVBETA_ADMIN_PASSWORD`
    /// - `PRIVBETA_SESSION_TTL_SECS`: session lifetime, 1 to `315360000` (default: two weeks)
    /// - `PRIVBETA_SESSION_PURGE_INTERVAL`: seconds between purges (default: `300`)
    /// - `PRIVBETA_SECURE_COOKIES`: mark cookies `Secure` (default: `false`)
    /// - `PRIVBETA_STATIC_DIR`: directory served under `/static/`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    #[must_use]
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        // Priority: PRIVBETA_BIND_ADDR > PORT > default 127.0.0.1:8000
        let bind_addr = if let Some(addr) = var("PRIVBETA_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8000)))
        } else if let Some(port_str) = var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8000);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8000))
        };

        let storage_backend = match var("PRIVBETA_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => {
                let url = var("DATABASE_URL")
                    .unwrap_or_else(|| "postgres://localhost/privbeta".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let log_level = var("PRIVBETA_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());

        let gate = GateConfig {
            enabled: flag(var("PRIVBETA_ENABLE"), true),
            redirect: var("PRIVBETA_REDIRECT").unwrap_or_else(|| DEFAULT_REDIRECT.to_owned()),
            allow_paths: list(var("PRIVBETA_ALLOW_PATHS")),
            allow_prefixes: list(var("PRIVBETA_ALWAYS_ALLOW_PREFIXES")),
            always_allow_views: list(var("PRIVBETA_ALWAYS_ALLOW_VIEWS")),
            append_slash: flag(var("PRIVBETA_APPEND_SLASH"), true),
        };

        let public_url = var("PRIVBETA_PUBLIC_URL").unwrap_or_else(|| format!("http://{bind_addr}"));

        // SMTP is enabled when SMTP_HOST is set.
        let smtp = var("SMTP_HOST").map(|host| SmtpSettings {
            host,
            port: var("SMTP_PORT").and_then(|p| p.parse().ok()).unwrap_or(587),
            username: var("SMTP_USERNAME").unwrap_or_default(),
            password: var("SMTP_PASSWORD").unwrap_or_default(),
            insecure: flag(var("SMTP_INSECURE"), false),
        });

        let admin = match (var("PRIVBETA_ADMIN_EMAIL"), var("PRIVBETA_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminAccount {
                username: var("PRIVBETA_ADMIN_USERNAME").unwrap_or_else(|| "admin".to_owned()),
                email,
                password,
            }),
            _ => None,
        };

        Self {
            bind_addr,
            storage_backend,
            log_level,
            gate,
            verified_redirect: var("PRIVBETA_VERIFIED_REDIRECT")
                .unwrap_or_else(|| "/beta/verified".to_owned()),
            secret_key: var("PRIVBETA_SECRET_KEY").filter(|k| !k.is_empty()),
            public_url,
            email_templates_dir: var("PRIVBETA_EMAIL_TEMPLATES_DIR").map(PathBuf::from),
            from_email: var("PRIVBETA_FROM_EMAIL")
                .unwrap_or_else(|| "privbeta@localhost".to_owned()),
            smtp,
            admin,
            session_ttl_secs: var("PRIVBETA_SESSION_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|v| (1..=MAX_SESSION_TTL_SECS).contains(v))
                .unwrap_or(DEFAULT_SESSION_TTL_SECS),
            session_purge_interval_secs: var("PRIVBETA_SESSION_PURGE_INTERVAL")
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(300),
            secure_cookies: flag(var("PRIVBETA_SECURE_COOKIES"), false),
            static_dir: var("PRIVBETA_STATIC_DIR").map(PathBuf::from),
        }
    }
}

fn flag(value: Option<String>, default: bool) -> bool {
    match value.as_deref().map(str::trim) {
        Some("true" | "1" | "yes" | "on") => true,
        Some("false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

fn list(value: Option<String>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_vars(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.bind_addr, SocketAddr::from(([127, 0, 0, 1], 8000)));
        assert_eq!(c.storage_backend, StorageBackendType::Memory);
        assert!(c.gate.enabled);
        assert_eq!(c.gate.redirect, "/beta/not-in-beta");
        assert_eq!(c.verified_redirect, "/beta/verified");
        assert_eq!(c.public_url, "http://127.0.0.1:8000");
        assert!(c.smtp.is_none());
        assert!(c.admin.is_none());
        assert!(c.secret_key.is_none());
    }

    #[test]
    fn port_and_bind_addr() {
        let c = config(&[("PORT", "9000")]);
        assert_eq!(c.bind_addr, SocketAddr::from(([0, 0, 0, 0], 9000)));

        let c = config(&[("PORT", "9000"), ("PRIVBETA_BIND_ADDR", "127.0.0.1:7000")]);
        assert_eq!(c.bind_addr, SocketAddr::from(([127, 0, 0, 1], 7000)));
    }

    #[test]
    fn gate_settings() {
        let c = config(&[
            ("PRIVBETA_ENABLE", "false"),
            ("PRIVBETA_ALLOW_PATHS", "/about/, /pricing/"),
            ("PRIVBETA_ALWAYS_ALLOW_VIEWS", "/docs/{page}"),
            ("PRIVBETA_APPEND_SLASH", "0"),
        ]);
        assert!(!c.gate.enabled);
        assert_eq!(c.gate.allow_paths, vec!["/about/", "/pricing/"]);
        assert_eq!(c.gate.always_allow_views, vec!["/docs/{page}"]);
        assert!(!c.gate.append_slash);
    }

    #[test]
    fn storage_and_smtp() {
        let c = config(&[
            ("PRIVBETA_STORAGE", "Postgres"),
            ("DATABASE_URL", "postgres://db/beta"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "2525"),
        ]);
        assert_eq!(
            c.storage_backend,
            StorageBackendType::Postgres {
                url: "postgres://db/beta".to_owned()
            }
        );
        let smtp = c.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 2525);
        assert!(!smtp.insecure);
    }

    #[test]
    fn session_ttl_out_of_range_falls_back() {
        assert_eq!(
            config(&[("PRIVBETA_SESSION_TTL_SECS", "3600")]).session_ttl_secs,
            3600
        );
        for bad in ["0", "100000000000000", "-5", "soon"] {
            let c = config(&[("PRIVBETA_SESSION_TTL_SECS", bad)]);
            assert_eq!(c.session_ttl_secs, DEFAULT_SESSION_TTL_SECS, "{bad}");
        }
        assert_eq!(
            config(&[("PRIVBETA_SESSION_TTL_SECS", &MAX_SESSION_TTL_SECS.to_string())])
                .session_ttl_secs,
            MAX_SESSION_TTL_SECS
        );
    }

    #[test]
    fn admin_requires_email_and_password() {
        assert!(config(&[("PRIVBETA_ADMIN_EMAIL", "a@example.com")]).admin.is_none());

        let c = config(&[
            ("PRIVBETA_ADMIN_EMAIL", "a@example.com"),
            ("PRIVBETA_ADMIN_PASSWORD", "correct horse"),
        ]);
        let admin = c.admin.unwrap();
        assert_eq!(admin.username, "admin");
        assert!(!format!("{admin:?}").contains("correct horse"));
    }
}
