//! AWS SDK error classification
//!
//! Every SDK call result goes through [`classify`], which maps the transport
//! failure or the service error code onto the provider error taxonomy the
//! reconciler acts on.

use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use std::error::Error as StdError;
use std::fmt::Debug;
use stratus_core::error::{ErrorKind, ProviderError};
use validator::{ValidationErrors, ValidationErrorsKind};

const NOT_FOUND: &[&str] = &[
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
    "ClusterNotFound",
    "ClusterNotFoundFault",
    "ResourceNotFoundException",
    "NamespaceNotFound",
    "OperationNotFound",
];

const TRANSIENT: &[&str] = &[
    "DuplicateRequest",
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "InternalFailure",
    "InternalServiceError",
];

const UNAVAILABLE: &[&str] = &["InvalidClusterState", "InvalidClusterStateFault"];

const VALIDATION: &[&str] = &[
    "InvalidParameterException",
    "InvalidParameterValue",
    "InvalidAttributeName",
    "InvalidParameterCombination",
    "ValidationException",
];

const AUTH: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnrecognizedClientException",
    "InvalidClientTokenId",
    "ExpiredToken",
    "SignatureDoesNotMatch",
];

/// Taxonomy entry for an AWS error code; unknown codes are transient
pub fn kind_for_code(code: &str) -> ErrorKind {
    let is = |codes: &[&str]| codes.contains(&code);
    if is(NOT_FOUND) {
        ErrorKind::NotFound
    } else if is(TRANSIENT) {
        ErrorKind::Transient
    } else if is(UNAVAILABLE) {
        ErrorKind::Unavailable
    } else if is(VALIDATION) {
        ErrorKind::Validation
    } else if is(AUTH) {
        ErrorKind::Auth
    } else {
        ErrorKind::Transient
    }
}

fn with_kind(kind: ErrorKind, message: String) -> ProviderError {
    match kind {
        ErrorKind::NotFound => ProviderError::NotFound(message),
        ErrorKind::Unavailable => ProviderError::Unavailable(message),
        ErrorKind::Validation => ProviderError::Validation(message),
        ErrorKind::Auth => ProviderError::Auth(message),
        ErrorKind::Internal => ProviderError::Internal(message),
        _ => ProviderError::Transient(message),
    }
}

/// Map an SDK error onto [`ProviderError`]
///
/// Transport failures are classified by variant before the service code is
/// consulted: timeouts and dispatch failures are transient, a request that
/// could not be built is internal.
pub fn classify<E, R>(err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            ProviderError::Transient(message)
        }
        SdkError::ConstructionFailure(_) => ProviderError::Internal(message),
        SdkError::ResponseError(_) => ProviderError::Transient(message),
        SdkError::ServiceError(ctx) => {
            let service = ctx.err();
            let code = service.code().unwrap_or_default();
            let message = match (service.code(), service.message()) {
                (Some(code), Some(msg)) => format!("{code}: {msg}"),
                (Some(code), None) => code.to_string(),
                _ => message,
            };
            with_kind(kind_for_code(code), message)
        }
        _ => ProviderError::Transient(message),
    }
}

/// Whether a service error means the object is already gone
pub fn is_not_found_code(code: Option<&str>) -> bool {
    code.is_some_and(|c| NOT_FOUND.contains(&c))
}

fn collect_field_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                out.extend(errs.iter().map(|e| {
                    let message = e.message.as_deref().unwrap_or(e.code.as_ref());
                    format!("{}: {}", path, message)
                }));
            }
            ValidationErrorsKind::Struct(nested) => collect_field_errors(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_field_errors(&format!("{path}[{index}]"), nested, out);
                }
            }
        }
    }
}

/// `field: message` pairs joined with `; `, nested fields dotted
pub fn validation_messages(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_field_errors("", errors, &mut messages);
    messages.sort();
    messages.join("; ")
}

/// Fold validator field errors into one `Validation` error
pub fn validation_failed(errors: &ValidationErrors) -> ProviderError {
    ProviderError::Validation(validation_messages(errors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_table() {
        assert_eq!(
            kind_for_code("AWS.SimpleQueueService.NonExistentQueue"),
            ErrorKind::NotFound
        );
        assert_eq!(kind_for_code("ClusterNotFoundFault"), ErrorKind::NotFound);
        assert_eq!(kind_for_code("NamespaceNotFound"), ErrorKind::NotFound);
        assert_eq!(kind_for_code("OperationNotFound"), ErrorKind::NotFound);
        assert_eq!(kind_for_code("DuplicateRequest"), ErrorKind::Transient);
        assert_eq!(kind_for_code("ThrottlingException"), ErrorKind::Transient);
        assert_eq!(kind_for_code("InvalidClusterStateFault"), ErrorKind::Unavailable);
        assert_eq!(
            kind_for_code("InvalidParameterException"),
            ErrorKind::Validation
        );
        assert_eq!(kind_for_code("ExpiredToken"), ErrorKind::Auth);
    }

    #[test]
    fn test_unknown_code_is_transient() {
        assert_eq!(kind_for_code("SomethingNew"), ErrorKind::Transient);
        assert_eq!(kind_for_code(""), ErrorKind::Transient);
    }

    #[test]
    fn test_with_kind_keeps_message() {
        let err = with_kind(ErrorKind::Unavailable, "resize in progress".into());
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.to_string(), "resize in progress");
    }

    #[test]
    fn test_validation_failed_joins_fields() {
        use validator::Validate;

        #[derive(Validate)]
        struct Params {
            #[validate(range(min = 0, max = 900, message = "must be between 0 and 900"))]
            delay_seconds: Option<i32>,
            #[validate(length(min = 1))]
            name: String,
        }

        let errors = Params {
            delay_seconds: Some(1000),
            name: String::new(),
        }
        .validate()
        .unwrap_err();
        let err = validation_failed(&errors);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            err.to_string(),
            "validation failed: delay_seconds: must be between 0 and 900; name: length"
        );
    }

    #[test]
    fn test_not_found_code() {
        assert!(is_not_found_code(Some("ResourceNotFoundException")));
        assert!(!is_not_found_code(Some("AccessDenied")));
        assert!(!is_not_found_code(None));
    }
}
