use crate::error::RegistryError;
use crate::handler::TaskHandler;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves task names to handlers
pub trait TaskRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Arc<dyn TaskHandler>>;
}

/// Name-to-handler mapping built at startup and shared read-only afterwards
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a task name
    pub fn register<H>(&mut self, name: impl Into<String>, handler: H) -> Result<(), RegistryError>
    where
        H: TaskHandler + 'static,
    {
        self.register_arc(name, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }

        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Registered task names, sorted
    pub fn task_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl TaskRegistry for HandlerRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }
}
