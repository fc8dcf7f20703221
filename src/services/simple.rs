//! A minimal built-in service, enough to run the control plane end to end.
//!
//! Real deployments register their own [`Service`](super::Service)
//! implementations; this one accepts any option object and derives the
//! resource tag from an optional `server` option.

use serde_json::json;

use crate::error::ServiceError;
use crate::services::Service;

/// Service whose resource tag is the `server` option, with a fallback.
pub struct SimpleService {
    display_name: String,
    default_resource: String,
}

impl SimpleService {
    pub fn new(display_name: impl Into<String>, default_resource: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            default_resource: default_resource.into(),
        }
    }
}

impl Service for SimpleService {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn describe(&self) -> serde_json::Value {
        json!({
            "server": {
                "type": "string",
                "description": "target resource pool",
                "default": self.default_resource,
            }
        })
    }

    fn check(&self, options: &serde_json::Value) -> Result<String, ServiceError> {
        if !options.is_object() {
            return Err(ServiceError::Invalid("options must be an object".to_string()));
        }
        if let Some(server) = options.get("server") {
            if !server.is_string() {
                return Err(ServiceError::Invalid("server option must be a string".to_string()));
            }
        }
        Ok(format!("options valid for {}", self.display_name))
    }

    fn resource_from_options(&self, options: &serde_json::Value) -> String {
        options
            .get("server")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.default_resource)
            .to_string()
    }
}
