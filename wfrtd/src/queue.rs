//! The scheduler's single-consumer command queue.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A `(name, args, kwargs)` command waiting for the scheduler loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl QueuedCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.to_string(), value.into());
        self
    }

    pub fn as_tuple(&self) -> Value {
        json!([self.name, self.args, self.kwargs])
    }

    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_str)
    }

    pub fn bool_kwarg(&self, key: &str) -> bool {
        self.kwargs.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct CommandQueue {
    sender: mpsc::UnboundedSender<QueuedCommand>,
}

impl CommandQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<QueuedCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// `false` once the scheduler has stopped consuming.
    pub fn put(&self, command: QueuedCommand) -> bool {
        debug!(command = %command.name, "queueing command");
        match self.sender.send(command) {
            Ok(()) => true,
            Err(err) => {
                warn!(command = %err.0.name, "command queue closed; dropping command");
                false
            }
        }
    }
}
