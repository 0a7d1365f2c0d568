//! Run configuration: portal accounts and sink settings.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::util::env::{env_opt, env_parse};

/// One portal login. Some chains publish under passwordless accounts.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Load the account list from a `logins.json` file:
/// `[{"username": "...", "password": "..."}, ...]`.
pub fn load_accounts(path: impl AsRef<Path>) -> Result<Vec<Account>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading accounts file {}", path.display()))?;
    let accounts: Vec<Account> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing accounts file {}", path.display()))?;
    Ok(accounts)
}

/// Settings resolved from the environment, with the same defaults the
/// deployment has always used.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub accounts_file: String,
    pub portal_base_url: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub algolia_app_id: Option<String>,
    pub algolia_admin_key: Option<String>,
    /// Mirror the original deployment's disabled certificate verification.
    /// Off unless explicitly requested.
    pub insecure_tls: bool,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            accounts_file: env_opt("LOGINS_FILE").unwrap_or_else(|| "./logins.json".into()),
            portal_base_url: env_opt("PORTAL_BASE_URL")
                .unwrap_or_else(|| "https://url.publishedprices.co.il".into()),
            database_url: env_opt("DATABASE_URL").or_else(|| env_opt("DB_URL")),
            db_max_connections: env_parse("DB_MAX_CONNS", 5),
            algolia_app_id: env_opt("ALGOLIA_APP_ID"),
            algolia_admin_key: env_opt("ALGOLIA_ADMIN_KEY"),
            insecure_tls: crate::util::env::env_flag("INSECURE_TLS", false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_accounts_with_and_without_passwords() {
        let accounts: Vec<Account> = serde_json::from_str(
            r#"[{"username":"RamiLevi","password":"s3cret"},{"username":"TivTaam"}]"#,
        )
        .unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].password.as_deref(), Some("s3cret"));
        assert_eq!(accounts[1].password, None);
    }

    #[test]
    fn missing_accounts_file_is_an_error_with_context() {
        let err = load_accounts("/definitely/not/here/logins.json").unwrap_err();
        assert!(err.to_string().contains("logins.json"));
    }
}
