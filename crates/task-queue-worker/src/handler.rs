use crate::error::HandlerError;
use async_trait::async_trait;
use serde_json::Value;
use task_queue_core::Kwargs;
use tracing::info;

/// Capability invoked by the dispatcher for a registered task name
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the task with its positional and named arguments
    async fn run(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value, HandlerError>;
}

/// Adapts a synchronous closure into a [`TaskHandler`]
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&[Value], &Kwargs) -> Result<Value, HandlerError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        FnHandler { func }
    }
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(&[Value], &Kwargs) -> Result<Value, HandlerError> + Send + Sync,
{
    async fn run(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value, HandlerError> {
        (self.func)(args, kwargs)
    }
}

/// Sums numeric positional arguments
pub struct AddHandler;

#[async_trait]
impl TaskHandler for AddHandler {
    async fn run(&self, args: &[Value], _kwargs: &Kwargs) -> Result<Value, HandlerError> {
        if args.iter().all(|arg| arg.is_i64()) {
            let mut total: i64 = 0;
            for arg in args {
                let n = arg.as_i64().unwrap_or_default();
                total = total
                    .checked_add(n)
                    .ok_or_else(|| HandlerError::new("Integer overflow in add"))?;
            }
            return Ok(Value::from(total));
        }

        let mut total = 0.0;
        for arg in args {
            total += arg.as_f64().ok_or_else(|| {
                HandlerError::new(format!("add expects numeric arguments, got {}", arg))
            })?;
        }
        Ok(Value::from(total))
    }
}

/// Returns its arguments unchanged
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn run(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value, HandlerError> {
        Ok(serde_json::json!({
            "args": args,
            "kwargs": kwargs,
        }))
    }
}

/// Logs its arguments
pub struct LogHandler;

#[async_trait]
impl TaskHandler for LogHandler {
    async fn run(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value, HandlerError> {
        info!(?args, ?kwargs, "log task");
        Ok(Value::Null)
    }
}

/// Always fails, with the first argument as the message if it is a string
pub struct FailHandler;

#[async_trait]
impl TaskHandler for FailHandler {
    async fn run(&self, args: &[Value], _kwargs: &Kwargs) -> Result<Value, HandlerError> {
        let message = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or("Task failed on purpose");
        Err(HandlerError::new(message))
    }
}
