use crate::error::{DispatchError, HandlerError};
use crate::registry::TaskRegistry;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use task_queue_core::TaskSignature;
use tracing::{error, info};

/// Result of running a handler: exactly one of a value or an error
pub type ExecutionOutcome = Result<Value, HandlerError>;

/// Resolves a signature's handler and invokes it
pub struct Dispatcher {
    registry: Arc<dyn TaskRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn TaskRegistry>) -> Self {
        Dispatcher { registry }
    }

    /// Run the handler registered for `signature.name`.
    ///
    /// Fails only when no handler is registered. A panicking handler is
    /// reported as a [`HandlerError`] outcome.
    pub async fn dispatch(
        &self,
        signature: &TaskSignature,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let handler = self
            .registry
            .lookup(&signature.name)
            .ok_or_else(|| DispatchError::TaskNotRegistered(signature.name.clone()))?;

        info!("Started processing {}", signature.name);

        let args = signature.args.clone();
        let kwargs = signature.kwargs.clone();
        let run = tokio::spawn(async move { handler.run(&args, &kwargs).await });

        match run.await {
            Ok(outcome) => Ok(outcome),
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                error!("Task {} panicked: {}", signature.name, message);
                Ok(Err(HandlerError::new(format!("Task panicked: {}", message))))
            }
            Err(_) => Ok(Err(HandlerError::new("Task was cancelled"))),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast::<&'static str>()
            .map(|message| message.to_string())
            .unwrap_or_else(|_| "Unknown panic".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{AddHandler, FnHandler, TaskHandler};
    use crate::registry::HandlerRegistry;
    use crate::test_support::{EventLog, ScriptedHandler};
    use serde_json::json;
    use task_queue_core::Kwargs;

    fn dispatcher(registry: HandlerRegistry) -> Dispatcher {
        Dispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_dispatch_returns_handler_result() {
        let mut registry = HandlerRegistry::new();
        registry.register("add", AddHandler).unwrap();

        let sig = TaskSignature::new("add").with_args(vec![json!(2), json!(3)]);
        let outcome = dispatcher(registry).dispatch(&sig).await.unwrap();
        assert_eq!(outcome, Ok(json!(5)));
    }

    #[tokio::test]
    async fn test_dispatch_returns_handler_error() {
        let log = Arc::new(EventLog::default());
        let mut registry = HandlerRegistry::new();
        registry
            .register("add", ScriptedHandler::err("add", "boom", log.clone()))
            .unwrap();

        let outcome = dispatcher(registry)
            .dispatch(&TaskSignature::new("add"))
            .await
            .unwrap();
        assert_eq!(outcome, Err(HandlerError::new("boom")));
        assert_eq!(log.events(), vec!["run:add"]);
    }

    #[tokio::test]
    async fn test_unregistered_task_invokes_nothing() {
        let log = Arc::new(EventLog::default());
        let mut registry = HandlerRegistry::new();
        registry
            .register("add", ScriptedHandler::ok("add", json!(5), log.clone()))
            .unwrap();
        let dispatcher = dispatcher(registry);

        assert_eq!(
            dispatcher.dispatch(&TaskSignature::new("ghost")).await,
            Err(DispatchError::TaskNotRegistered("ghost".to_string()))
        );
        assert_eq!(
            dispatcher.dispatch(&TaskSignature::default()).await,
            Err(DispatchError::TaskNotRegistered(String::new()))
        );
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn test_handler_receives_args_and_kwargs() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                "greet",
                FnHandler::new(|args: &[Value], kwargs: &Kwargs| {
                    Ok(json!({ "first": args.first(), "who": kwargs.get("who") }))
                }),
            )
            .unwrap();

        let sig = TaskSignature::new("greet")
            .with_args(vec![json!("hi")])
            .with_kwarg("who", json!("there"));
        let outcome = dispatcher(registry).dispatch(&sig).await.unwrap();
        assert_eq!(outcome, Ok(json!({ "first": "hi", "who": "there" })));
    }

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl TaskHandler for PanickingHandler {
        async fn run(&self, _args: &[Value], _kwargs: &Kwargs) -> Result<Value, HandlerError> {
            panic!("handler exploded");
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_error_outcome() {
        let mut registry = HandlerRegistry::new();
        registry.register("explode", PanickingHandler).unwrap();

        let outcome = dispatcher(registry)
            .dispatch(&TaskSignature::new("explode"))
            .await
            .unwrap();
        let error = outcome.unwrap_err();
        assert!(error.message().contains("handler exploded"));
    }
}
