use std::{collections::HashSet, net::SocketAddr};

use crate::{
    config::models::{ControlConfig, RouteConfig},
    core::{
        controller::Controller,
        route::{ConfigError, FailoverInvoke, HOST_CONTROLLER_NAME, NIL_CONTROLLER_NAME, Traffic},
        store::RouteHandle,
    },
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Duplicate {traffic} route '{name}'")]
    DuplicateRoute { traffic: Traffic, name: String },

    #[error(transparent)]
    Route(#[from] ConfigError),

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Route file validator
pub struct RoutesConfigValidator;

impl RoutesConfigValidator {
    /// Validate the whole file. `invoke` stands in for the failover callback the embedding
    /// application registers routes with; `None` makes any failover section an error.
    pub fn validate(
        config: &ControlConfig,
        invoke: Option<&FailoverInvoke>,
    ) -> ValidationResult<()> {
        let errors = Self::collect_errors(config, invoke);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Every problem found in the file, in file order.
    pub fn collect_errors(
        config: &ControlConfig,
        invoke: Option<&FailoverInvoke>,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if !config.signal_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: "signal_path".to_string(),
                message: "Signal path must start with '/'".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for route in &config.routes {
            if !seen.insert((route.traffic, route.registered_name().to_string())) {
                errors.push(ValidationError::DuplicateRoute {
                    traffic: route.traffic,
                    name: route.name.clone(),
                });
            }
            errors.extend(Self::validate_single_route(route, invoke));
        }

        errors
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8090')".to_string(),
            });
        }
        Ok(())
    }

    fn validate_single_route(
        config: &RouteConfig,
        invoke: Option<&FailoverInvoke>,
    ) -> Vec<ValidationError> {
        if config.name.is_empty() {
            return vec![ConfigError::EmptyName.into()];
        }
        if config.name == NIL_CONTROLLER_NAME {
            return vec![ConfigError::ReservedName(config.name.clone()).into()];
        }
        if config.name == HOST_CONTROLLER_NAME && config.traffic == Traffic::Egress {
            return vec![ConfigError::HostOnEgress.into()];
        }

        let route = match config.to_route(invoke) {
            Ok(route) => route,
            Err(errors) => return errors,
        };
        Controller::from_route(&route, RouteHandle::detached(&route.name))
            .validate(route.traffic)
            .into_iter()
            .map(ValidationError::from)
            .collect()
    }

    /// Format multiple validation errors into a readable message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
