//! Error types for the CSI driver starter
//!
//! Provides structured error types for the admission predicate, the cluster
//! state adapters, driver runners and the supervisor, plus the classifier that
//! recognizes "resource kind does not exist yet" conditions.

use kube::error::DiscoveryError;
use std::time::Duration;
use thiserror::Error;

/// Message the API server returns when a resource type is not served
const RESOURCE_NOT_SERVED: &str = "could not find the requested resource";

/// Unified error type for the starter
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // API Discovery Errors
    // =========================================================================
    #[error("no matches for kind \"{kind}\" in group \"{group}\"")]
    NoKindMatch { group: String, kind: String },

    #[error("no matches for {group}/{version}, Resource={resource}")]
    NoResourceMatch {
        group: String,
        version: String,
        resource: String,
    },

    #[error("{}", join_errors(.0))]
    Aggregate(Vec<Error>),

    // =========================================================================
    // Driver Errors
    // =========================================================================
    #[error("Driver runner failed: {driver} - {reason}")]
    Runner { driver: String, reason: String },

    #[error("Driver asset error: {path} - {reason}")]
    Asset { path: String, reason: String },

    #[error("CSIDriver {driver} is installed but not managed by the operator")]
    DriverConflict { driver: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_errors(errors: &[Error]) -> String {
    match errors {
        [single] => single.to_string(),
        _ => {
            let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}

/// Action to take on error during a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry with exponential backoff
    RequeueWithBackoff,
    /// Retry after specific duration
    RequeueAfter(Duration),
    /// Don't retry, wait for changes
    NoRequeue,
}

impl Error {
    /// Build an aggregate, collapsing the trivial cases
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transient errors - retry with backoff
            Error::Kube(_)
            | Error::ResourceNotFound { .. }
            | Error::NoKindMatch { .. }
            | Error::NoResourceMatch { .. }
            | Error::Io(_) => ErrorAction::RequeueWithBackoff,

            // A runner that failed to start usually needs its assets fixed
            Error::Runner { .. } => ErrorAction::RequeueAfter(Duration::from_secs(60)),

            // Configuration/validation errors - don't retry automatically
            Error::Configuration(_)
            | Error::DriverConflict { .. }
            | Error::Asset { .. }
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorAction::NoRequeue,

            Error::Aggregate(errors) => {
                if errors.iter().all(|e| e.action() == ErrorAction::NoRequeue) {
                    ErrorAction::NoRequeue
                } else {
                    ErrorAction::RequeueWithBackoff
                }
            }

            // All other errors - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_)
                | Error::ResourceNotFound { .. }
                | Error::NoKindMatch { .. }
                | Error::NoResourceMatch { .. }
        )
    }

    /// Check if this error means a resource kind or type is unknown to the
    /// cluster, i.e. its CRD is not installed yet.
    ///
    /// Aggregates are unwrapped one level and match if any member matches.
    pub fn is_no_match(&self) -> bool {
        match self {
            Error::Aggregate(errors) => errors.iter().any(Error::is_direct_no_match),
            other => other.is_direct_no_match(),
        }
    }

    fn is_direct_no_match(&self) -> bool {
        match self {
            Error::NoKindMatch { .. } | Error::NoResourceMatch { .. } => true,
            Error::Kube(err) => is_kube_no_match(err),
            _ => false,
        }
    }
}

fn is_kube_no_match(err: &kube::Error) -> bool {
    match err {
        kube::Error::Discovery(
            DiscoveryError::MissingKind(_)
            | DiscoveryError::MissingApiGroup(_)
            | DiscoveryError::MissingResource(_),
        ) => true,
        kube::Error::Api(response) => {
            response.code == 404 && response.message.contains(RESOURCE_NOT_SERVED)
        }
        _ => false,
    }
}

/// Returns true when `err` is present and indicates a missing kind or resource
/// type. `None` is never a no-match.
pub fn is_no_match_error(err: Option<&Error>) -> bool {
    err.is_some_and(Error::is_no_match)
}

/// Result type alias for the starter
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;
    use std::io::ErrorKind;

    fn no_resource() -> Error {
        Error::NoResourceMatch {
            group: String::new(),
            version: "v1".into(),
            resource: "foos".into(),
        }
    }

    fn no_kind() -> Error {
        Error::NoKindMatch {
            group: String::new(),
            kind: "foo".into(),
        }
    }

    fn io(kind: ErrorKind) -> Error {
        Error::Io(std::io::Error::from(kind))
    }

    fn api_error(code: u16, message: &str) -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: "NotFound".into(),
            code,
        }))
    }

    #[test]
    fn test_no_match_none() {
        assert!(!is_no_match_error(None));
    }

    #[test]
    fn test_no_match_direct() {
        assert!(is_no_match_error(Some(&no_resource())));
        assert!(is_no_match_error(Some(&no_kind())));
    }

    #[test]
    fn test_no_match_unrelated() {
        let err = Error::DriverConflict {
            driver: "csi.test.openshift.io".into(),
        };
        assert!(!is_no_match_error(Some(&err)));
        assert!(!is_no_match_error(Some(&io(ErrorKind::PermissionDenied))));
    }

    #[test]
    fn test_no_match_aggregated() {
        let err = Error::Aggregate(vec![no_resource(), io(ErrorKind::PermissionDenied)]);
        assert!(is_no_match_error(Some(&err)));

        let err = Error::Aggregate(vec![io(ErrorKind::PermissionDenied), no_kind()]);
        assert!(is_no_match_error(Some(&err)));
    }

    #[test]
    fn test_no_match_aggregated_unrelated() {
        let err = Error::Aggregate(vec![
            io(ErrorKind::PermissionDenied),
            io(ErrorKind::AlreadyExists),
            io(ErrorKind::BrokenPipe),
        ]);
        assert!(!is_no_match_error(Some(&err)));
    }

    #[test]
    fn test_no_match_only_unwraps_one_level() {
        let nested = Error::Aggregate(vec![Error::Aggregate(vec![no_kind()])]);
        assert!(!nested.is_no_match());
    }

    #[test]
    fn test_no_match_kube_errors() {
        let missing = Error::Kube(kube::Error::Discovery(DiscoveryError::MissingKind(
            "ClusterCSIDriver".into(),
        )));
        assert!(missing.is_no_match());

        let unserved = api_error(404, "the server could not find the requested resource");
        assert!(unserved.is_no_match());

        let object_missing = api_error(404, "clustercsidrivers \"foo\" not found");
        assert!(!object_missing.is_no_match());

        let forbidden = api_error(403, "forbidden");
        assert!(!forbidden.is_no_match());
    }

    #[test]
    fn test_aggregate_constructor() {
        assert!(Error::aggregate(vec![]).is_none());
        assert!(matches!(
            Error::aggregate(vec![no_kind()]),
            Some(Error::NoKindMatch { .. })
        ));
        let err = Error::aggregate(vec![no_kind(), no_resource()]).unwrap();
        assert!(err.to_string().starts_with('['));
    }

    #[test]
    fn test_error_actions() {
        assert_eq!(no_kind().action(), ErrorAction::RequeueWithBackoff);

        let err = Error::Configuration("bad config".into());
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        // Resolved by the user; the CSIDriver watch triggers the next pass
        let err = Error::DriverConflict {
            driver: "csi.test.openshift.io".into(),
        };
        assert_eq!(err.action(), ErrorAction::NoRequeue);

        let err = Error::Runner {
            driver: "ebs.csi.aws.com".into(),
            reason: "boom".into(),
        };
        assert_eq!(
            err.action(),
            ErrorAction::RequeueAfter(Duration::from_secs(60))
        );

        let err = Error::Aggregate(vec![
            Error::Configuration("a".into()),
            Error::Configuration("b".into()),
        ]);
        assert_eq!(err.action(), ErrorAction::NoRequeue);
    }

    #[test]
    fn test_error_retryable() {
        let transient = no_resource();
        assert!(transient.is_retryable());
        assert!(transient.is_transient());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
        assert!(!config_err.is_transient());
    }
}
