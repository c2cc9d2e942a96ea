//! Handler registry and invocation interface

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::context::Context;

/// Registry entry consulted when no named export matches
pub const DEFAULT_EXPORT: &str = "default";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Handler not found: {export}")]
    HandlerNotFound { export: String },
}

/// Explicit failure value returned by a handler invocation
///
/// Carries everything the host's error envelope needs; consumed exactly
/// once by the error-reporting path.
#[derive(Debug, Clone, Error)]
#[error("{error_type}: {message}")]
pub struct HandlerError {
    pub error_type: String,
    pub message: String,
    pub stack_trace: Vec<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error_type: "Error".to_string(),
            message: message.into(),
            stack_trace: Vec::new(),
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: Vec<String>) -> Self {
        self.stack_trace = stack_trace;
        self
    }
}

/// A user-supplied function transforming an event and context into a result
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, event: Value, ctx: Context) -> Result<Value, HandlerError>;
}

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Handler")
    }
}

/// Adapter exposing a plain async function as a [`Handler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn invoke(&self, event: Value, ctx: Context) -> Result<Value, HandlerError> {
        (self.f)(event, ctx).await
    }
}

/// Handlers resolvable by export name
///
/// Populated once before the loop starts; the resolved handler lives for
/// the whole process.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, export: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(export.into(), handler);
    }

    /// Resolve an export by name, falling back to the default export
    ///
    /// Fails closed with [`LoadError::HandlerNotFound`] when neither exists.
    pub fn resolve(&self, export: &str) -> Result<Arc<dyn Handler>, LoadError> {
        self.handlers
            .get(export)
            .or_else(|| self.handlers.get(DEFAULT_EXPORT))
            .cloned()
            .ok_or_else(|| LoadError::HandlerNotFound {
                export: export.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::RuntimeEnv;
    use crate::context::SystemClock;
    use serde_json::json;

    fn echo() -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(|event: Value, _ctx: Context| async move {
            Ok::<_, HandlerError>(event)
        }))
    }

    #[test]
    fn test_resolve_named_export() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", echo());

        assert!(registry.resolve("echo").is_ok());
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let mut registry = HandlerRegistry::new();
        registry.register(DEFAULT_EXPORT, echo());

        assert!(registry.resolve("missing").is_ok());
    }

    #[test]
    fn test_resolve_fails_closed() {
        let registry = HandlerRegistry::new();

        let err = registry.resolve("handler").unwrap_err();
        assert!(matches!(err, LoadError::HandlerNotFound { export } if export == "handler"));
    }

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let handler = echo();
        let ctx = Context::new(
            "req-1",
            0,
            &RuntimeEnv::default(),
            std::sync::Arc::new(SystemClock),
        );

        let result = handler.invoke(json!({"k": "v"}), ctx).await.unwrap();
        assert_eq!(result, json!({"k": "v"}));
    }
}
