//! Retryable-versus-fatal classification of candidate failures.
//!
//! A failure is a *compatibility* failure when the gateway did not recognize
//! the method name or the parameter shape; the next candidate may succeed.
//! Anything else (authorization, domain rejection, timeouts, transport) is
//! fatal and ends the fallback immediately.

use gatelink_core::{GatewayError, RemoteError};

/// How a candidate failure affects the fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Try the next candidate.
    Retryable,
    /// Stop and return this error.
    Fatal,
}

/// Which part of the request the gateway objected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mismatch {
    /// The method name is unknown.
    Method,
    /// The parameters do not match the method's schema.
    Params,
}

struct Pattern {
    check: fn(&str) -> bool,
    mismatch: Mismatch,
}

/// Error codes, compared case-insensitively against the whole code.
static CODE_PATTERNS: &[Pattern] = &[
    Pattern {
        check: |c| c == "method_not_found" || c == "unknown_method" || c == "-32601",
        mismatch: Mismatch::Method,
    },
    Pattern {
        check: |c| {
            c == "invalid_params"
                || c == "invalid_request"
                || c == "schema_validation"
                || c == "validation_error"
                || c == "-32602"
                || c == "-32600"
        },
        mismatch: Mismatch::Params,
    },
];

/// Message fragments, matched against the lowercased message.
static MESSAGE_PATTERNS: &[Pattern] = &[
    Pattern {
        check: |s| s.contains("method not found") || s.contains("unknown method"),
        mismatch: Mismatch::Method,
    },
    Pattern {
        check: |s| s.contains("not a function") || s.contains("no handler for"),
        mismatch: Mismatch::Method,
    },
    Pattern {
        check: |s| s.contains("invalid params") || s.contains("invalid parameters"),
        mismatch: Mismatch::Params,
    },
    Pattern {
        check: |s| s.contains("missing required property") || s.contains("must have required property"),
        mismatch: Mismatch::Params,
    },
    Pattern {
        check: |s| s.contains("unexpected property") || s.contains("additional properties"),
        mismatch: Mismatch::Params,
    },
    Pattern {
        check: |s| s.contains("unknown field") || s.contains("unrecognized key"),
        mismatch: Mismatch::Params,
    },
    Pattern {
        check: |s| s.contains("schema"),
        mismatch: Mismatch::Params,
    },
];

/// What kind of mismatch a remote error signals, if any.
pub fn mismatch(error: &RemoteError) -> Option<Mismatch> {
    if let Some(code) = error.code.as_deref() {
        let code = code.to_ascii_lowercase();
        if let Some(p) = CODE_PATTERNS.iter().find(|p| (p.check)(&code)) {
            return Some(p.mismatch);
        }
    }
    let message = error.message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|p| (p.check)(&message))
        .map(|p| p.mismatch)
}

/// Classify a candidate failure.
pub fn classify(error: &GatewayError) -> FailureClass {
    match error {
        GatewayError::Remote(remote) if mismatch(remote).is_some() => FailureClass::Retryable,
        _ => FailureClass::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(message: &str) -> GatewayError {
        GatewayError::Remote(RemoteError::new(message))
    }

    #[test]
    fn method_not_found_messages() {
        for msg in [
            "Method not found",
            "unknown method: cron.list",
            "gateway: no handler for crons.list",
        ] {
            assert_eq!(classify(&remote(msg)), FailureClass::Retryable, "{msg}");
        }
        assert_eq!(
            mismatch(&RemoteError::new("Unknown method")),
            Some(Mismatch::Method)
        );
    }

    #[test]
    fn param_mismatch_messages() {
        for msg in [
            "invalid params",
            "data must have required property 'sessionKey'",
            "missing required property key",
            "unexpected property \"session\"",
            "must NOT have additional properties",
            "unknown field `key`",
            "params failed schema validation",
        ] {
            assert_eq!(
                mismatch(&RemoteError::new(msg)),
                Some(Mismatch::Params),
                "{msg}"
            );
        }
    }

    #[test]
    fn codes_take_precedence() {
        let err = RemoteError::new("nope").with_code("METHOD_NOT_FOUND");
        assert_eq!(mismatch(&err), Some(Mismatch::Method));
        let err = RemoteError::new("").with_code("-32602");
        assert_eq!(mismatch(&err), Some(Mismatch::Params));
        let err = RemoteError::new("").with_code("INVALID_REQUEST");
        assert_eq!(mismatch(&err), Some(Mismatch::Params));
    }

    #[test]
    fn fatal_errors() {
        for msg in ["forbidden", "session is locked", "unauthorized: missing scope"] {
            assert_eq!(classify(&remote(msg)), FailureClass::Fatal, "{msg}");
        }
        let err = GatewayError::Remote(RemoteError::new("denied").with_code("FORBIDDEN"));
        assert_eq!(classify(&err), FailureClass::Fatal);
        let err = GatewayError::RequestTimeout {
            method: "cron.list".into(),
            timeout_ms: 10,
        };
        assert_eq!(classify(&err), FailureClass::Fatal);
        let err = GatewayError::NotReady {
            method: "cron.list".into(),
        };
        assert_eq!(classify(&err), FailureClass::Fatal);
    }
}
