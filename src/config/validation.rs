use std::collections::HashSet;

use crate::config::models::{ApiDefinition, Listener, ReactorConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Listener conflict detected: {message}")]
    ListenerConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Validates API definitions before a reactor is built from them.
pub struct ApiDefinitionValidator;

impl ApiDefinitionValidator {
    /// Validate the whole definition, reporting every problem at once.
    pub fn validate(api: &ApiDefinition) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("id", &api.id),
            ("name", &api.name),
            ("environment_id", &api.environment_id),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: field.to_string(),
                });
            }
        }

        if api.listeners.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "listeners".to_string(),
            });
        }

        for (index, listener) in api.listeners.iter().enumerate() {
            errors.extend(Self::validate_listener(index, listener));
        }

        errors.extend(Self::check_listener_conflicts(api));

        if api.failover.enabled {
            if api.failover.slow_call_duration_ms == 0 {
                errors.push(ValidationError::InvalidField {
                    field: "failover.slow_call_duration_ms".to_string(),
                    message: "Slow call duration must be greater than 0".to_string(),
                });
            }
            if api.failover.open_state_duration_ms == 0 {
                errors.push(ValidationError::InvalidField {
                    field: "failover.open_state_duration_ms".to_string(),
                    message: "Open state duration must be greater than 0".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: format_multiple_errors(errors),
            })
        }
    }

    fn validate_listener(index: usize, listener: &Listener) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        match listener {
            Listener::Http(http) => {
                if http.paths.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: format!("listeners[{index}].paths"),
                    });
                }
                for path in &http.paths {
                    if !path.path.starts_with('/') {
                        errors.push(ValidationError::InvalidField {
                            field: format!("listeners[{index}] path: {}", path.path),
                            message: "Listener paths must start with '/'".to_string(),
                        });
                    }
                    if let Some(host) = &path.host
                        && let Err(e) = validate_host(host, &format!("listeners[{index}] host"))
                    {
                        errors.push(e);
                    }
                }
            }
            Listener::Tcp(tcp) => {
                if tcp.hosts.is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: format!("listeners[{index}].hosts"),
                    });
                }
                for host in &tcp.hosts {
                    if let Err(e) = validate_host(host, &format!("listeners[{index}] host")) {
                        errors.push(e);
                    }
                }
            }
            Listener::Subscription(_) => {}
        }
        errors
    }

    /// Two HTTP paths on the same host, or two TCP listeners claiming the
    /// same SNI host, would make routing ambiguous.
    fn check_listener_conflicts(api: &ApiDefinition) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let mut seen_paths = HashSet::new();
        for listener in api.http_listeners() {
            for path in &listener.paths {
                let host = path.host.as_deref().unwrap_or("").to_ascii_lowercase();
                let normalized = normalize_path(&path.path);
                if !seen_paths.insert((host.clone(), normalized.clone())) {
                    errors.push(ValidationError::ListenerConflict {
                        message: format!(
                            "path '{normalized}' is declared twice for host '{}'",
                            if host.is_empty() { "<any>" } else { &host }
                        ),
                    });
                }
            }
        }

        let mut seen_hosts = HashSet::new();
        for listener in api.tcp_listeners() {
            for host in &listener.hosts {
                if !seen_hosts.insert(host.to_ascii_lowercase()) {
                    errors.push(ValidationError::ListenerConflict {
                        message: format!("tcp host '{host}' is declared twice"),
                    });
                }
            }
        }

        errors
    }
}

/// Validates the gateway-level reactor settings.
pub struct ReactorConfigValidator;

impl ReactorConfigValidator {
    pub fn validate(config: &ReactorConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.pending_requests_timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "pending_requests_timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Some(max_size) = &config.logging.max_size
            && parse_size(max_size).is_none()
        {
            errors.push(ValidationError::InvalidField {
                field: "logging.max_size".to_string(),
                message: format!("Invalid size '{max_size}', expected e.g. '512', '4KB' or '1MB'"),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: format_multiple_errors(errors),
            })
        }
    }
}

/// Parse a human size such as `512`, `4KB` or `1MB` into bytes.
pub fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim().to_ascii_uppercase();
    let (digits, multiplier) = if let Some(n) = value.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = value.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = value.strip_suffix('B') {
        (n, 1)
    } else {
        (value.as_str(), 1)
    };
    digits.trim().parse::<usize>().ok().map(|n| n * multiplier)
}

/// Collapse duplicate slashes and drop the trailing slash (except for root).
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    normalized.push('/');
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        normalized.push_str(segment);
    }
    normalized
}

fn validate_host(host: &str, field: &str) -> ValidationResult<()> {
    if host.is_empty() {
        return Err(ValidationError::InvalidField {
            field: field.to_string(),
            message: "Host cannot be empty".to_string(),
        });
    }

    if host.contains("://") {
        return Err(ValidationError::InvalidField {
            field: field.to_string(),
            message: "Host should not contain protocol (e.g., use 'example.com' not 'http://example.com')".to_string(),
        });
    }

    // Optional port suffix
    let name = match host.rsplit_once(':') {
        Some((name, port)) if port.parse::<u16>().is_ok() => name,
        _ => host,
    };

    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    };

    if !name.split('.').all(valid_label) {
        return Err(ValidationError::InvalidField {
            field: field.to_string(),
            message: format!("Invalid hostname format: '{host}'"),
        });
    }

    Ok(())
}

/// Format multiple validation errors into a single message
fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
    if errors.is_empty() {
        return "No errors".to_string();
    }

    if errors.len() == 1 {
        return errors[0].to_string();
    }

    let mut message = format!("Found {} validation errors:\n", errors.len());
    for (i, error) in errors.iter().enumerate() {
        message.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    message
}
