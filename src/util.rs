//! Small shared helpers

use tonic::Status;

/// Prefix a status message with operation context, keeping the code.
pub fn wrap_status(status: Status, context: &str) -> Status {
    Status::new(status.code(), format!("{}: {}", context, status.message()))
}
