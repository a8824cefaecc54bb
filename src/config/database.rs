//! PostgreSQL settings for the billing store.

use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Apply the bundled schema migrations before serving
    #[serde(default)]
    pub run_migrations: bool,
}

impl DatabaseConfig {
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
    }

    /// Connection URL with any password masked, for startup logs.
    pub fn redacted_url(&self) -> String {
        let Some(scheme_end) = self.url.find("://") else {
            return self.url.clone();
        };
        let authority_start = scheme_end + 3;
        let Some(at) = self.url[authority_start..].find('@') else {
            return self.url.clone();
        };
        let userinfo = &self.url[authority_start..authority_start + at];
        match userinfo.split_once(':') {
            Some((user, _)) => format!(
                "{}{}:***{}",
                &self.url[..authority_start],
                user,
                &self.url[authority_start + at..]
            ),
            None => self.url.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.is_empty() {
            return Err(ValidationError::MissingRequired("database.url"));
        }
        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ValidationError::InvalidDatabaseUrl);
        }
        if !(1..=100).contains(&self.max_connections) {
            return Err(ValidationError::InvalidPoolSize);
        }
        if self.acquire_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            run_migrations: false,
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn pool_options_follow_config() {
        let config = DatabaseConfig {
            max_connections: 4,
            ..with_url("postgres://localhost/billing")
        };
        assert_eq!(config.pool_options().get_max_connections(), 4);
    }

    #[test]
    fn password_is_masked_in_logs() {
        let config = with_url("postgres://billing:s3cret@db:5432/billing");
        assert_eq!(config.redacted_url(), "postgres://billing:***@db:5432/billing");
    }

    #[test]
    fn url_without_password_is_unchanged() {
        let config = with_url("postgres://billing@db/billing");
        assert_eq!(config.redacted_url(), "postgres://billing@db/billing");
    }

    #[test]
    fn url_is_required() {
        assert!(matches!(
            DatabaseConfig::default().validate(),
            Err(ValidationError::MissingRequired("database.url"))
        ));
    }

    #[test]
    fn only_postgres_urls_are_accepted() {
        assert!(matches!(
            with_url("mysql://localhost/billing").validate(),
            Err(ValidationError::InvalidDatabaseUrl)
        ));
        assert!(with_url("postgresql://localhost/billing").validate().is_ok());
    }

    #[test]
    fn pool_size_must_be_in_range() {
        for size in [0, 101] {
            let config = DatabaseConfig {
                max_connections: size,
                ..with_url("postgres://localhost/billing")
            };
            assert!(matches!(config.validate(), Err(ValidationError::InvalidPoolSize)));
        }
    }
}
