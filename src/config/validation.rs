use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
};

use http::Method;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    config::models::{ALL_METHODS, ApiDefinition, Definition, ServerConfig},
    core::balancer::BalancerFactory,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$")
        .expect("hostname pattern is valid")
});

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, reporting every problem at
    /// once.
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) =
            Self::validate_duration("proxy.upstream_timeout", &config.proxy.upstream_timeout)
        {
            errors.push(e);
        }
        if let Err(e) =
            Self::validate_duration("proxy.pool_idle_timeout", &config.proxy.pool_idle_timeout)
        {
            errors.push(e);
        }

        if let Some(source) = &config.source {
            if let Err(e) = Self::validate_url(&source.url, "source.url") {
                errors.push(e);
            }
            if let Err(e) = Self::validate_duration("source.poll_interval", &source.poll_interval) {
                errors.push(e);
            }
        }

        errors.extend(Self::api_errors(&config.apis));

        Self::collect(errors)
    }

    /// Validate a definition set on its own, as delivered by a definition
    /// source on reload.
    pub fn validate_apis(apis: &[ApiDefinition]) -> ValidationResult<()> {
        Self::collect(Self::api_errors(apis))
    }

    fn api_errors(apis: &[ApiDefinition]) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut names = HashSet::new();
        let mut listen_paths: HashMap<&str, &str> = HashMap::new();

        for (index, api) in apis.iter().enumerate() {
            let label = if api.name.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("apis[{index}].name"),
                });
                format!("apis[{index}]")
            } else {
                if !names.insert(api.name.as_str()) {
                    errors.push(ValidationError::InvalidField {
                        field: format!("api '{}'", api.name),
                        message: "API names must be unique".to_string(),
                    });
                }
                format!("api '{}'", api.name)
            };

            errors.extend(Self::definition_errors(&label, &api.proxy));

            if api.active {
                if let Some(other) = listen_paths.insert(&api.proxy.listen_path, &api.name) {
                    errors.push(ValidationError::RouteConflict {
                        message: format!(
                            "listen path '{}' is used by both '{}' and '{}'",
                            api.proxy.listen_path, other, api.name
                        ),
                    });
                }
            }
        }

        errors
    }

    fn definition_errors(label: &str, definition: &Definition) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !definition.listen_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} listen_path"),
                message: format!(
                    "Listen paths must start with '/', got '{}'",
                    definition.listen_path
                ),
            });
        }

        if !BalancerFactory::is_supported(&definition.upstreams.balancing) {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} upstreams.balancing"),
                message: format!(
                    "Unknown balancing algorithm '{}', expected one of: {}",
                    definition.upstreams.balancing,
                    BalancerFactory::algorithms().collect::<Vec<_>>().join(", ")
                ),
            });
        }

        if definition.enable_load_balancing && definition.upstreams.targets.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} upstreams.targets"),
                message: "Load balanced definitions must have at least one target".to_string(),
            });
        }

        for (i, target) in definition.upstreams.targets.iter().enumerate() {
            let field = format!("{label} target {}", i + 1);
            if let Err(e) = Self::validate_url(&target.url, &field) {
                errors.push(e);
            }
            if target.weight < 0 {
                errors.push(ValidationError::InvalidField {
                    field,
                    message: format!("Weight must not be negative, got {}", target.weight),
                });
            }
        }

        if definition.methods.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} methods"),
                message: format!("At least one method is required (use '{ALL_METHODS}' for any)"),
            });
        }
        for method in &definition.methods {
            if !method.eq_ignore_ascii_case(ALL_METHODS)
                && Method::from_bytes(method.as_bytes()).is_err()
            {
                errors.push(ValidationError::InvalidField {
                    field: format!("{label} methods"),
                    message: format!("Invalid HTTP method '{method}'"),
                });
            }
        }

        for host in &definition.hosts {
            if let Err(e) = Self::validate_host(host, label) {
                errors.push(e);
            }
        }

        errors
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_duration(field: &str, value: &str) -> ValidationResult<()> {
        humantime::parse_duration(value)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Invalid duration '{value}': {e}"),
            })
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Validate host field format
    fn validate_host(host: &str, label: &str) -> ValidationResult<()> {
        if host.is_empty() {
            return Err(ValidationError::InvalidField {
                field: format!("{label} hosts"),
                message: "Host cannot be empty".to_string(),
            });
        }

        if host.contains("://") {
            return Err(ValidationError::InvalidField {
                field: format!("{label} hosts"),
                message: "Host should not contain protocol (e.g., use 'example.com' not 'http://example.com')".to_string(),
            });
        }

        if !HOSTNAME.is_match(host) {
            return Err(ValidationError::InvalidField {
                field: format!("{label} hosts"),
                message: format!("Invalid hostname format: '{host}'"),
            });
        }

        Ok(())
    }

    fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(&errors),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: &[ValidationError]) -> String {
        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
