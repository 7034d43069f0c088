//! Compatibility dispatch across gateway API versions.
//!
//! A logical operation may be spelled with several method names and several
//! parameter-key spellings depending on the gateway version. The dispatcher
//! tries `(shape, method)` candidates with the parameter shape as the outer
//! loop and the method name as the inner loop, returning the first success.
//! Only failures that [`classify`] deems retryable move on to the next
//! candidate; anything else is returned at once.

mod classify;
mod table;

pub use classify::{FailureClass, Mismatch, classify, mismatch};
pub use table::{CompatOp, CompatTable};

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use gatelink_core::GatewayError;
use serde_json::Value;
use tracing::debug;

/// One parameter candidate; `None` omits `params`.
pub type ParamShape = Option<Value>;

/// Anything that can issue a single RPC call.
#[async_trait]
pub trait RpcCaller: Send + Sync {
    /// Call `method`; `timeout` of `None` uses the caller's default.
    async fn call_rpc(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, GatewayError>;
}

/// Try every `(shape, method)` candidate until one succeeds.
///
/// An empty `shapes` list means a single call without params. A method the
/// gateway reported as unknown is not retried with later shapes. When every
/// candidate fails, the result is `CompatibilityExhausted` wrapping the last
/// error.
pub async fn call_with_fallback<C>(
    caller: &C,
    methods: &[&str],
    shapes: &[ParamShape],
    timeout: Option<Duration>,
) -> Result<Value, GatewayError>
where
    C: RpcCaller + ?Sized,
{
    let no_params = [None];
    let shapes = if shapes.is_empty() { &no_params[..] } else { shapes };
    let mut unknown_methods: HashSet<&str> = HashSet::new();
    let mut attempts = Vec::new();
    let mut last = None;

    for shape in shapes {
        for &method in methods {
            if unknown_methods.contains(method) {
                continue;
            }
            attempts.push(method.to_owned());
            match caller.call_rpc(method, shape.clone(), timeout).await {
                Ok(value) => {
                    if attempts.len() > 1 {
                        debug!(method, attempts = attempts.len(), "compatibility fallback succeeded");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if classify(&error) == FailureClass::Fatal {
                        return Err(error);
                    }
                    debug!(method, error = %error, "candidate not supported, trying next");
                    if error.remote().and_then(mismatch) == Some(Mismatch::Method) {
                        let _ = unknown_methods.insert(method);
                    }
                    last = Some(error);
                }
            }
        }
    }

    match last {
        Some(last) => Err(GatewayError::CompatibilityExhausted {
            attempts,
            last: Box::new(last),
        }),
        None => Err(GatewayError::NoCandidates {
            operation: methods.first().map(|m| (*m).to_owned()).unwrap_or_default(),
        }),
    }
}
