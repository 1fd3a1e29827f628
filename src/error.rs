//! Error types for Rune Compose

use std::fmt;
use thiserror::Error;

/// Result type for Rune Compose operations
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum ComposeError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ComposeError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            ComposeError::Runtime(_) => 1,
            ComposeError::Cancelled => 130,
            ComposeError::Io(_) | ComposeError::Json(_) => 1,
            _ => 2,
        }
    }
}

/// Invalid or malformed compose declaration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Compose file parse error: {0}")]
    Parse(String),

    #[error("Service '{0}' must have either 'image' or 'build' specified")]
    MissingImage(String),

    #[error("Service '{0}' has both 'image' and 'build'; they are mutually exclusive")]
    ImageAndBuild(String),

    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Service '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Service '{service}' references undefined network '{network}'")]
    UnknownNetwork { service: String, network: String },

    #[error("Service '{service}' has invalid port '{spec}': {reason}")]
    InvalidPort {
        service: String,
        spec: String,
        reason: String,
    },

    #[error("Host port {port}/{protocol} is published by both '{first}' and '{second}'")]
    DuplicateHostPort {
        port: u16,
        protocol: String,
        first: String,
        second: String,
    },

    #[error("Service '{service}' maps container port {port}/{protocol} more than once")]
    DuplicateContainerPort {
        service: String,
        port: u16,
        protocol: String,
    },

    #[error("Service '{service}' has invalid duration '{value}'")]
    InvalidDuration { service: String, value: String },

    #[error("Service '{service}' has invalid environment entry '{entry}'")]
    InvalidEnvironment { service: String, entry: String },

    #[error("Service '{service}' has invalid volume mount '{spec}'")]
    InvalidVolume { service: String, spec: String },

    #[error("Invalid {kind} name '{name}': must match [a-zA-Z0-9][a-zA-Z0-9_.-]*")]
    InvalidName { kind: String, name: String },

    #[error("Compose file declares no services")]
    NoServices,
}

/// Dependency cycle between services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circular dependency between services: {}", services.join(", "))]
pub struct CycleError {
    /// Services on a dependency cycle, in declaration order
    pub services: Vec<String>,
}

/// Result type for runtime driver calls
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Opaque failure reported by the container runtime
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("runtime API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Thing a runtime operation acted on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Service(String),
    Network(String),
    Volume(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Service(name) => write!(f, "service '{}'", name),
            Subject::Network(name) => write!(f, "network '{}'", name),
            Subject::Volume(name) => write!(f, "volume '{}'", name),
        }
    }
}

/// Runtime operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CreateNetwork,
    RemoveNetwork,
    CreateVolume,
    RemoveVolume,
    Create,
    Start,
    Ready,
    Stop,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateNetwork => write!(f, "create network"),
            Operation::RemoveNetwork => write!(f, "remove network"),
            Operation::CreateVolume => write!(f, "create volume"),
            Operation::RemoveVolume => write!(f, "remove volume"),
            Operation::Create => write!(f, "create"),
            Operation::Start => write!(f, "start"),
            Operation::Ready => write!(f, "readiness"),
            Operation::Stop => write!(f, "stop"),
            Operation::Remove => write!(f, "remove"),
        }
    }
}

/// Driver failure tagged with what it happened to
#[derive(Error, Debug)]
#[error("{subject}: {operation} failed: {source}")]
pub struct RuntimeError {
    pub subject: Subject,
    pub operation: Operation,
    #[source]
    pub source: DriverError,
}

impl RuntimeError {
    pub fn service(name: &str, operation: Operation, source: DriverError) -> Self {
        Self {
            subject: Subject::Service(name.to_string()),
            operation,
            source,
        }
    }

    pub fn network(name: &str, operation: Operation, source: DriverError) -> Self {
        Self {
            subject: Subject::Network(name.to_string()),
            operation,
            source,
        }
    }

    pub fn volume(name: &str, operation: Operation, source: DriverError) -> Self {
        Self {
            subject: Subject::Volume(name.to_string()),
            operation,
            source,
        }
    }

    /// Name of the service this error belongs to, if any
    pub fn service_name(&self) -> Option<&str> {
        match &self.subject {
            Subject::Service(name) => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_display() {
        let err = RuntimeError::service("web", Operation::Start, DriverError::Other("boom".into()));
        assert_eq!(err.to_string(), "service 'web': start failed: boom");
        assert_eq!(err.service_name(), Some("web"));
    }

    #[test]
    fn test_exit_codes() {
        let cycle = ComposeError::from(CycleError {
            services: vec!["a".into(), "b".into()],
        });
        assert_eq!(cycle.exit_code(), 2);
        assert_eq!(cycle.to_string(), "Circular dependency between services: a, b");

        let runtime = ComposeError::from(RuntimeError::network(
            "net",
            Operation::CreateNetwork,
            DriverError::Conflict("exists".into()),
        ));
        assert_eq!(runtime.exit_code(), 1);
        assert_eq!(ComposeError::Cancelled.exit_code(), 130);
    }
}
