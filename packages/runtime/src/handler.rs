//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use queue_core::{JobError, JobId};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Result type for job handlers.
pub type HandlerResult = Result<(), JobError>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Identity of the job instance a handler is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    pub id: JobId,
    pub name: String,
    pub queue: String,
    pub connection: String,
}

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific type are processed.
pub trait JobHandler: Send + Sync + 'static {
    /// The job type this handler processes.
    fn job_type(&self) -> &str;

    /// Process a job payload. The reserved lock field is already stripped.
    fn handle(&self, ctx: JobContext, payload: Value) -> HandlerFuture;
}

/// Registry for job handlers.
///
/// Maps job types to their handlers for dynamic dispatch.
#[derive(Default, Clone)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler. Returns false if the job type was already present.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> bool {
        let job_type = handler.job_type().to_string();
        if self.handlers.contains_key(&job_type) {
            return false;
        }
        self.handlers.insert(job_type, handler);
        true
    }

    /// Remove a handler. Returns false if the job type was not present.
    pub fn unregister(&mut self, job_type: &str) -> bool {
        self.handlers.remove(job_type).is_some()
    }

    /// Get a handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check if a handler exists for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// List all registered job types.
    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

/// A simple function-based job handler over raw JSON payloads.
pub struct FnHandler<F> {
    job_type: String,
    handler: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new function-based handler.
    pub fn new(job_type: impl Into<String>, handler: F) -> Self {
        Self {
            job_type: job_type.into(),
            handler,
        }
    }
}

impl FnHandler<()> {
    /// Create a handler whose payload is deserialized into `P` first.
    pub fn typed<P, F, Fut>(job_type: impl Into<String>, handler: F) -> TypedHandler<P, F>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(JobContext, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        TypedHandler {
            job_type: job_type.into(),
            handler,
            _payload: PhantomData,
        }
    }
}

impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn handle(&self, ctx: JobContext, payload: Value) -> HandlerFuture {
        Box::pin((self.handler)(ctx, payload))
    }
}

/// Function-based handler with a typed payload.
pub struct TypedHandler<P, F> {
    job_type: String,
    handler: F,
    _payload: PhantomData<fn() -> P>,
}

impl<P, F, Fut> JobHandler for TypedHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(JobContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn handle(&self, ctx: JobContext, payload: Value) -> HandlerFuture {
        match serde_json::from_value::<P>(payload) {
            Ok(payload) => Box::pin((self.handler)(ctx, payload)),
            Err(error) => Box::pin(async move { Err(JobError::Payload(error)) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn ctx(name: &str) -> JobContext {
        JobContext {
            id: JobId::new(),
            name: name.to_string(),
            queue: "default".to_string(),
            connection: "main".to_string(),
        }
    }

    #[derive(Deserialize)]
    struct Greeting {
        name: String,
    }

    #[test]
    fn registry_is_idempotent() {
        let mut registry = JobHandlerRegistry::new();
        let handler: Arc<dyn JobHandler> =
            Arc::new(FnHandler::new("echo", |_ctx, _payload| async { Ok(()) }));

        assert!(registry.register(handler.clone()));
        assert!(!registry.register(handler));
        assert!(registry.has_handler("echo"));
        assert_eq!(registry.job_types(), vec!["echo"]);

        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert!(registry.get("echo").is_none());
    }

    #[tokio::test]
    async fn typed_handler_deserializes_payload() {
        let handler = FnHandler::typed("greet", |_ctx, payload: Greeting| async move {
            if payload.name == "world" {
                Ok(())
            } else {
                Err(JobError::from("unexpected name"))
            }
        });

        assert!(handler.handle(ctx("greet"), json!({ "name": "world" })).await.is_ok());
        assert!(matches!(
            handler.handle(ctx("greet"), json!({ "nope": 1 })).await,
            Err(JobError::Payload(_))
        ));
    }
}
