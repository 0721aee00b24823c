//! Serializable error types and error kinds returned by the node core.
//!
//! Every error surfaced to a caller has a two-part shape: a numeric class
//! code (an HTTP status) and a symbolic reason string, e.g.
//! `(503, "PaymentRejectedByDestination")`. Callers can pattern-match on the
//! closed [`NodeErrorKind`] enum, or on the `(code, reason)` tuple if the
//! error crossed a process boundary.

use std::fmt;

use http::status::StatusCode;
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Associated constants can't be imported.
pub const CLIENT_400_BAD_REQUEST: StatusCode = StatusCode::BAD_REQUEST;
pub const CLIENT_404_NOT_FOUND: StatusCode = StatusCode::NOT_FOUND;
pub const CLIENT_409_CONFLICT: StatusCode = StatusCode::CONFLICT;
pub const SERVER_500_INTERNAL_SERVER_ERROR: StatusCode =
    StatusCode::INTERNAL_SERVER_ERROR;
pub const SERVER_501_NOT_IMPLEMENTED: StatusCode = StatusCode::NOT_IMPLEMENTED;
pub const SERVER_503_SERVICE_UNAVAILABLE: StatusCode =
    StatusCode::SERVICE_UNAVAILABLE;
pub const SERVER_504_GATEWAY_TIMEOUT: StatusCode = StatusCode::GATEWAY_TIMEOUT;

/// `ErrorCode` is the stable serialized representation of an error kind.
/// It is distinct from the HTTP status class, which several kinds share.
pub type ErrorCode = u16;

/// `ErrorResponse` is the serializable representation of a
/// [`NodeApiError`]. Transports convert to / from it.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub msg: String,
}

/// `ApiErrorKind` defines the methods required of all error kinds.
/// Implementations of this trait are derived by `api_error_kind!`.
pub trait ApiErrorKind:
    Copy
    + Clone
    + Default
    + Eq
    + PartialEq
    + fmt::Debug
    + fmt::Display
    + ToHttpStatus
    + ToReason
    + From<ErrorCode>
    + Sized
    + 'static
{
    /// An array of all known error kind variants, excluding `Unknown(_)`.
    const KINDS: &'static [Self];

    /// Returns `true` if the error kind is unrecognized (at least by this
    /// version of the software).
    fn is_unknown(&self) -> bool;

    /// Returns the variant name of this error kind.
    fn to_name(self) -> &'static str;

    /// Returns the human-readable message for this error kind. For a generated
    /// error kind, this is the same as the variant's doc string.
    fn to_msg(self) -> &'static str;

    /// Returns the serializable [`ErrorCode`] for this error kind.
    fn to_code(self) -> ErrorCode;

    /// Returns the error kind for this raw [`ErrorCode`].
    ///
    /// Infallible: unrecognized codes map to `Unknown(code)`.
    fn from_code(code: ErrorCode) -> Self;
}

/// The numeric class code of an error.
pub trait ToHttpStatus {
    fn to_http_status(&self) -> StatusCode;
}

/// The symbolic reason string of an error, e.g. `"MethodUnsupported"`.
pub trait ToReason {
    fn to_reason(&self) -> &'static str;
}

/// Takes an error kind enum declaration and generates impls for
/// [`ApiErrorKind`] and its dependent traits.
///
/// Each invocation should be paired with [`ToHttpStatus`] and [`ToReason`]
/// impls.
///
/// * The enum _must_ have an `Unknown(ErrorCode)` variant and it _must_ be
///   first. This preserves codes we don't recognize.
/// * Doc strings on the error variants are used for [`ApiErrorKind::to_msg`]
///   and the [`fmt::Display`] impl.
#[macro_export]
macro_rules! api_error_kind {
    {
        $(#[$enum_meta:meta])*
        pub enum $error_kind_name:ident {
            $( #[doc = $unknown_msg:literal] )*
            Unknown(ErrorCode),

            $(
                // use the doc string for the error message
                $( #[doc = $item_msg:literal] )*
                $item_name:ident = $item_code:literal
            ),*

            $(,)?
        }
    } => {
        $(#[$enum_meta])*
        pub enum $error_kind_name {
            $( #[doc = $unknown_msg] )*
            Unknown(ErrorCode),

            $(
                $( #[doc = $item_msg] )*
                $item_name
            ),*
        }

        // --- macro-generated impls --- //

        impl ApiErrorKind for $error_kind_name {
            const KINDS: &'static [Self] = &[
                $( Self::$item_name, )*
            ];

            #[inline]
            fn is_unknown(&self) -> bool {
                matches!(self, Self::Unknown(_))
            }

            fn to_name(self) -> &'static str {
                match self {
                    $( Self::$item_name => stringify!($item_name), )*
                    Self::Unknown(_) => "Unknown",
                }
            }

            fn to_msg(self) -> &'static str {
                let kind_msg = match self {
                    $( Self::$item_name => concat!($( $item_msg, )*), )*
                    Self::Unknown(_) => concat!($( $unknown_msg, )*),
                };
                kind_msg.trim_start()
            }

            fn to_code(self) -> ErrorCode {
                match self {
                    $( Self::$item_name => $item_code, )*
                    Self::Unknown(code) => code,
                }
            }

            fn from_code(code: ErrorCode) -> Self {
                // this deny attr makes duplicate codes a compile error : )
                #[deny(unreachable_patterns)]
                match code {
                    // make 0 the first entry so any variants with 0 code will
                    // raise a compile error.
                    0 => Self::Unknown(0),
                    $( $item_code => Self::$item_name, )*
                    _ => Self::Unknown(code),
                }
            }
        }

        // --- standard trait impls --- //

        impl Default for $error_kind_name {
            fn default() -> Self {
                Self::Unknown(0)
            }
        }

        impl fmt::Display for $error_kind_name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // No ':' because the error's Display impl adds it.
                write!(f, "{}", (*self).to_msg())
            }
        }

        impl From<ErrorCode> for $error_kind_name {
            #[inline]
            fn from(code: ErrorCode) -> Self {
                Self::from_code(code)
            }
        }

        impl From<$error_kind_name> for ErrorCode {
            #[inline]
            fn from(val: $error_kind_name) -> ErrorCode {
                val.to_code()
            }
        }

        // We can't just derive Arbitrary since proptest would generate
        // `Unknown(code)` with codes that are actually valid variants.
        #[cfg(any(test, feature = "test-utils"))]
        impl proptest::arbitrary::Arbitrary for $error_kind_name {
            type Parameters = ();
            type Strategy = proptest::strategy::BoxedStrategy<Self>;

            fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
                use proptest::{prop_oneof, sample};
                use proptest::arbitrary::any;
                use proptest::strategy::Strategy;

                // 9/10 sample a valid error code, o/w sample a random error
                // code (likely unknown).
                prop_oneof![
                    9 => sample::select(Self::KINDS),
                    1 => any::<ErrorCode>().prop_map(Self::from_code),
                ].boxed()
            }
        }
    }
}

// --- Error kinds --- //

api_error_kind! {
    /// All variants of errors that the node core can return.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub enum NodeErrorKind {
        /// Unknown error
        Unknown(ErrorCode),

        /// Method is unsupported by the connected node
        Unsupported = 1,
        /// Payment rejected by destination
        RejectedByDestination = 2,
        /// Failed to find a possible route
        PathfindingFailed = 3,
        /// Secret does not match the invoice hash
        InvalidSecret = 4,
        /// Invoice is in a state incompatible with the request
        InvalidState = 5,
        /// Deadline elapsed
        Timeout = 6,
        /// Not found
        NotFound = 7,
        /// Internal error
        Internal = 8,
    }
}

impl ToHttpStatus for NodeErrorKind {
    fn to_http_status(&self) -> StatusCode {
        use NodeErrorKind::*;
        match self {
            Unknown(_) => SERVER_500_INTERNAL_SERVER_ERROR,

            Unsupported => SERVER_501_NOT_IMPLEMENTED,
            RejectedByDestination => SERVER_503_SERVICE_UNAVAILABLE,
            PathfindingFailed => SERVER_503_SERVICE_UNAVAILABLE,
            InvalidSecret => CLIENT_400_BAD_REQUEST,
            InvalidState => CLIENT_409_CONFLICT,
            Timeout => SERVER_504_GATEWAY_TIMEOUT,
            NotFound => CLIENT_404_NOT_FOUND,
            Internal => SERVER_500_INTERNAL_SERVER_ERROR,
        }
    }
}

impl ToReason for NodeErrorKind {
    fn to_reason(&self) -> &'static str {
        use NodeErrorKind::*;
        match self {
            Unknown(_) => "Unknown",

            Unsupported => "MethodUnsupported",
            RejectedByDestination => "PaymentRejectedByDestination",
            PathfindingFailed => "PathfindingFailedToFindPossibleRoute",
            InvalidSecret => "InvalidSecret",
            InvalidState => "InvalidState",
            Timeout => "Timeout",
            NotFound => "NotFound",
            Internal => "Internal",
        }
    }
}

impl NodeErrorKind {
    /// Transient kinds are absorbed and retried by the payment executor.
    /// Everything else is surfaced to the caller as-is.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::PathfindingFailed)
    }
}

// --- NodeApiError --- //

/// The error type returned by every node core operation and by the node
/// client interface.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Error)]
#[error("{kind}: {msg}")]
pub struct NodeApiError {
    pub kind: NodeErrorKind,
    pub msg: String,
}

impl NodeApiError {
    pub fn new(kind: NodeErrorKind, msg: impl fmt::Display) -> Self {
        Self {
            kind,
            msg: msg.to_string(),
        }
    }

    pub fn unsupported(msg: impl fmt::Display) -> Self {
        Self::new(NodeErrorKind::Unsupported, msg)
    }

    pub fn rejected_by_destination(msg: impl fmt::Display) -> Self {
        Self::new(NodeErrorKind::RejectedByDestination, msg)
    }

    pub fn pathfinding_failed(msg: impl fmt::Display) -> Self {
        Self::new(NodeErrorKind::PathfindingFailed, msg)
    }

    pub fn invalid_secret(msg: impl fmt::Display) -> Self {
        Self::new(NodeErrorKind::InvalidSecret, msg)
    }

    pub fn invalid_state(msg: impl fmt::Display) -> Self {
        Self::new(NodeErrorKind::InvalidState, msg)
    }

    pub fn timeout(msg: impl fmt::Display) -> Self {
        Self::new(NodeErrorKind::Timeout, msg)
    }

    pub fn not_found(msg: impl fmt::Display) -> Self {
        Self::new(NodeErrorKind::NotFound, msg)
    }

    pub fn internal(msg: impl fmt::Display) -> Self {
        Self::new(NodeErrorKind::Internal, msg)
    }

    /// The numeric class code, e.g. `503`.
    pub fn code(&self) -> u16 {
        self.kind.to_http_status().as_u16()
    }

    /// The symbolic reason, e.g. `"PaymentRejectedByDestination"`.
    pub fn reason(&self) -> &'static str {
        self.kind.to_reason()
    }

    /// The two-part `(code, reason)` shape.
    pub fn to_tuple(&self) -> (u16, &'static str) {
        (self.code(), self.reason())
    }
}

impl ToHttpStatus for NodeApiError {
    fn to_http_status(&self) -> StatusCode {
        self.kind.to_http_status()
    }
}

impl From<anyhow::Error> for NodeApiError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{error:#}"))
    }
}

impl From<ErrorResponse> for NodeApiError {
    fn from(err_resp: ErrorResponse) -> Self {
        let ErrorResponse { code, msg } = err_resp;
        Self {
            kind: NodeErrorKind::from_code(code),
            msg,
        }
    }
}

impl From<NodeApiError> for ErrorResponse {
    fn from(error: NodeApiError) -> Self {
        let NodeApiError { kind, msg } = error;
        Self {
            code: kind.to_code(),
            msg,
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl proptest::arbitrary::Arbitrary for NodeApiError {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;
    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::{arbitrary::any, strategy::Strategy};

        (any::<NodeErrorKind>(), "[a-zA-Z0-9 ]{0,32}")
            .prop_map(|(kind, msg)| Self { kind, msg })
            .boxed()
    }
}
