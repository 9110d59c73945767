//! Server-side handlers
//!
//! A handler object exposes its operations as an explicit list of
//! [`Operation`]s: an exposed name, the declared parameter types, and a
//! callable. Typed closures are adapted through [`Operation::new`], which
//! decodes the raw positional arguments with [`FromArgs`] only once the
//! handler is known.

use futures::future::{self, BoxFuture, FutureExt};
use mqrpc_core::{ArgumentErrors, FromArgs, ParamType, RawArgs};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Future returned by a [`CommandHandler`]
pub type HandlerFuture = BoxFuture<'static, Result<Option<Value>, HandlerError>>;

/// Failure of a single handler invocation
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Arguments did not decode into the declared parameter types
    #[error(transparent)]
    Arguments(#[from] ArgumentErrors),

    /// The handler reported an error
    #[error("{0}")]
    Failed(String),

    /// The handler's result could not be encoded
    #[error("result could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    /// The handler panicked
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// A callable remote operation
pub trait CommandHandler: Send + Sync {
    /// Invoke with raw positional arguments. `Ok(None)` means the handler
    /// completed without a result.
    fn call(&self, args: &RawArgs) -> HandlerFuture;
}

struct FnHandler<F, A> {
    f: F,
    _args: PhantomData<fn(A)>,
}

impl<F, A, Fut, R, E> CommandHandler for FnHandler<F, A>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    A: FromArgs + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Serialize,
    E: fmt::Display,
{
    fn call(&self, args: &RawArgs) -> HandlerFuture {
        let decoded = match A::from_args(args) {
            Ok(decoded) => decoded,
            Err(errors) => return future::ready(Err(errors.into())).boxed(),
        };
        let pending = (self.f)(decoded);
        async move {
            let output = pending
                .await
                .map_err(|e| HandlerError::Failed(e.to_string()))?;
            let value = serde_json::to_value(output)?;
            Ok(Some(value).filter(|value| !value.is_null()))
        }
        .boxed()
    }
}

/// One exposed operation of a handler object
#[derive(Clone)]
pub struct Operation {
    name: String,
    params: Vec<ParamType>,
    handler: Arc<dyn CommandHandler>,
}

impl Operation {
    /// Expose a typed async closure under `name`.
    ///
    /// The closure takes its parameters as a tuple; a result of `()` (or
    /// anything serializing to `null`) is reported as "no result".
    ///
    /// ```ignore
    /// Operation::new("getTotal", |(id,): (i64,)| async move {
    ///     Ok::<_, String>(id * 2)
    /// });
    /// ```
    pub fn new<F, A, Fut, R, E>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        A: FromArgs + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Serialize + 'static,
        E: fmt::Display + 'static,
    {
        Self {
            name: name.into(),
            params: A::param_types(),
            handler: Arc::new(FnHandler {
                f,
                _args: PhantomData,
            }),
        }
    }

    /// Expose a hand-written handler with explicit parameter descriptors
    pub fn from_handler(
        name: impl Into<String>,
        params: Vec<ParamType>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            handler,
        }
    }

    /// Exposed name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Callable
    pub fn handler(&self) -> &Arc<dyn CommandHandler> {
        &self.handler
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A handler object that enumerates its exposed operations
pub trait ExposeOperations: Send + Sync + 'static {
    /// Operations to register for this object
    fn exposed_operations(self: Arc<Self>) -> Vec<Operation>;
}

/// Invoke a handler, turning a panic in either the synchronous or the
/// asynchronous part into [`HandlerError::Panicked`]
pub(crate) async fn invoke_contained(
    handler: &dyn CommandHandler,
    args: &RawArgs,
) -> Result<Option<Value>, HandlerError> {
    let pending = match std::panic::catch_unwind(AssertUnwindSafe(|| handler.call(args))) {
        Ok(pending) => pending,
        Err(panic) => return Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    };
    match AssertUnwindSafe(pending).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
