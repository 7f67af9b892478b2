//! Handler registry: string-keyed dispatch to registered job handlers.
//!
//! Persisted task rows reference code by a `"Service.method"` string. To keep
//! that capability without turning the task API into an arbitrary-invocation
//! vector, the set of invocable targets is a closed map populated by explicit
//! registration at startup. Services registered without the schedulable
//! marker can be resolved as present but are rejected with
//! [`RegistryError::Insecure`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while resolving a service reference.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The service or the named method does not exist.
    #[error("task handler not found: {0}")]
    NotFound(String),

    /// The service exists but was not registered as schedulable.
    #[error("insecure task handler: {0} lacks the schedulable marker")]
    Insecure(String),

    /// The reference string is not in `"Service.method"` form.
    #[error("invalid service reference: {0}")]
    BadServiceRef(String),
}

/// Error returned by a handler invocation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvokeError(pub String);

impl InvokeError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Arguments passed to a handler, decoded from the task's `data` payload.
///
/// A JSON array spreads into positional arguments, any other JSON value is a
/// single argument, an empty payload is no arguments, and a payload that is
/// not valid JSON is passed through as a single string argument.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgs {
    None,
    One(Value),
    Many(Vec<Value>),
}

impl CallArgs {
    /// Decode a raw `data` payload.
    pub fn parse(data: &str) -> Self {
        if data.trim().is_empty() {
            return CallArgs::None;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(Value::Array(items)) => CallArgs::Many(items),
            Ok(value) => CallArgs::One(value),
            Err(_) => CallArgs::One(Value::String(data.to_string())),
        }
    }

    /// The first positional argument, if any.
    pub fn first(&self) -> Option<&Value> {
        match self {
            CallArgs::None => None,
            CallArgs::One(v) => Some(v),
            CallArgs::Many(items) => items.first(),
        }
    }
}

/// A parsed `"Service.method"` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    pub service: String,
    pub method: String,
}

impl ServiceRef {
    /// Parse a reference string; the method part is mandatory.
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let (service, method) = raw
            .split_once('.')
            .ok_or_else(|| RegistryError::BadServiceRef(raw.to_string()))?;
        if service.is_empty() || method.is_empty() {
            return Err(RegistryError::BadServiceRef(raw.to_string()));
        }
        Ok(Self {
            service: service.to_string(),
            method: method.to_string(),
        })
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.method)
    }
}

/// A unit of invocable code exposed to the scheduler.
///
/// One handler may expose several methods; `call` dispatches on the method
/// name from the persisted service reference.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Method names this handler exposes.
    fn methods(&self) -> &[&'static str];

    /// Invoke the named method with decoded arguments.
    async fn call(&self, method: &str, args: CallArgs) -> Result<(), InvokeError>;
}

struct Registered {
    handler: Arc<dyn JobHandler>,
    schedulable: bool,
}

/// Closed map from service name to handler, populated at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, Registered>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a handler with the schedulable marker.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.entries.insert(
            name.into(),
            Registered {
                handler,
                schedulable: true,
            },
        );
    }

    /// Register a plain service without the marker.
    ///
    /// Such a service resolves as present but is always rejected by the
    /// security check; this mirrors components that exist in the process but
    /// never opted into scheduling.
    pub fn register_unmarked(&mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.entries.insert(
            name.into(),
            Registered {
                handler,
                schedulable: false,
            },
        );
    }

    /// Resolve a reference, enforcing both the existence and the security
    /// checks.
    ///
    /// NotFound when the service or method is absent; Insecure when the
    /// service never opted in. The distinction matters: Insecure is a policy
    /// rejection and is never retried or auto-corrected.
    pub fn resolve(&self, service_ref: &ServiceRef) -> Result<Arc<dyn JobHandler>, RegistryError> {
        let entry = self
            .entries
            .get(&service_ref.service)
            .ok_or_else(|| RegistryError::NotFound(service_ref.to_string()))?;

        if !entry.handler.methods().contains(&service_ref.method.as_str()) {
            return Err(RegistryError::NotFound(service_ref.to_string()));
        }

        if !entry.schedulable {
            return Err(RegistryError::Insecure(service_ref.service.clone()));
        }

        Ok(Arc::clone(&entry.handler))
    }

    /// Check a raw reference string without invoking anything.
    pub fn check(&self, raw: &str) -> Result<(), RegistryError> {
        let service_ref = ServiceRef::parse(raw)?;
        self.resolve(&service_ref).map(|_| ())
    }
}
