/// The node error taxonomy: `NodeErrorKind`, `NodeApiError`, `ErrorResponse`.
pub mod error;
