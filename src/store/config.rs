//! Store configuration derived from the gateway settings

use crate::config::GatewayConfig;
use serde::Serialize;

pub const DEFAULT_SERVICE_NAME: &str = "go-generative-api-router";

const MASKED_CREDENTIALS: &str = "***:***";

/// Connection settings for the document store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    /// Store URI as configured, possibly carrying credentials
    pub uri: String,
    /// Normalized environment: production, development, local or test
    pub environment: String,
    /// `{env-prefix}-{service-name}`
    pub database_name: String,
    /// Service name as configured, reported to the store for connection tracking
    pub app_name: String,
}

impl DatabaseConfig {
    pub fn new(uri: impl Into<String>, environment: &str, service_name: &str) -> Self {
        let (prefix, environment) = environment_prefix(environment);

        let service_name = match service_name.trim() {
            "" => DEFAULT_SERVICE_NAME,
            name => name,
        };
        let mut db_service = normalize_service_name(service_name);
        if db_service.is_empty() {
            db_service = normalize_service_name(DEFAULT_SERVICE_NAME);
        }

        Self {
            uri: uri.into(),
            environment: environment.to_string(),
            database_name: format!("{}-{}", prefix, db_service),
            app_name: service_name.to_string(),
        }
    }

    /// Store settings for this process, `None` when no store URI is configured
    pub fn from_settings(settings: &GatewayConfig) -> Option<Self> {
        let uri = settings
            .database_uri
            .as_deref()
            .map(str::trim)
            .filter(|uri| !uri.is_empty())?;

        Some(Self::new(uri, &settings.environment, &settings.service_name))
    }

    /// Full connection string including the database
    ///
    /// A URI that already names a database file (or an in-memory database) is
    /// used as-is; otherwise it is taken as a directory holding one file per
    /// database.
    pub fn connection_string(&self) -> String {
        let (base, query) = match self.uri.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (self.uri.as_str(), None),
        };

        if base.ends_with(".db") || base.contains(":memory:") {
            return self.uri.clone();
        }

        let mut conn = format!("{}/{}.db", base.trim_end_matches('/'), self.database_name);
        if let Some(query) = query {
            conn.push('?');
            conn.push_str(query);
        }
        conn
    }

    /// Copy with any `user:password@` segment of the URI masked, for logging
    pub fn mask_sensitive_data(&self) -> Self {
        Self {
            uri: mask_uri_credentials(&self.uri),
            ..self.clone()
        }
    }
}

/// Map a raw environment name to its database prefix and normalized name
///
/// Unrecognized values, including empty ones, fall back to development.
pub fn environment_prefix(environment: &str) -> (&'static str, &'static str) {
    match environment.trim().to_ascii_lowercase().as_str() {
        "production" | "prod" => ("prod", "production"),
        "local" => ("loc", "local"),
        "test" => ("test", "test"),
        _ => ("dev", "development"),
    }
}

/// Underscores become hyphens and a leading `go-` is dropped
pub fn normalize_service_name(service_name: &str) -> String {
    let hyphenated = service_name.trim().replace('_', "-");
    match hyphenated.strip_prefix("go-") {
        Some(rest) => rest.to_string(),
        None => hyphenated,
    }
}

/// Replace a `user:password@` segment in `uri` with a fixed mask
pub fn mask_uri_credentials(uri: &str) -> String {
    let Some(scheme_end) = uri.find("//") else {
        return uri.to_string();
    };
    let authority_start = scheme_end + 2;
    let authority_end = uri[authority_start..]
        .find(['/', '?'])
        .map(|i| authority_start + i)
        .unwrap_or(uri.len());

    match uri[authority_start..authority_end].rfind('@') {
        Some(at) => format!(
            "{}{}@{}",
            &uri[..authority_start],
            MASKED_CREDENTIALS,
            &uri[authority_start + at + 1..]
        ),
        None => uri.to_string(),
    }
}
