use crate::{Result, TaskError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Positional task arguments
pub type Args = Vec<Value>;

/// Named task arguments
pub type Kwargs = HashMap<String, Value>;

/// Decoded description of a unit of work and its follow-up chains.
///
/// The wire encoding is a JSON object with the field names `Name`, `Args`,
/// `Kwargs`, `OnSuccess` and `OnError`. Every field may be absent or `null`,
/// in which case it decodes to its empty value. Anything other than an
/// object is rejected, at the top level and inside the follow-up lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>")]
pub struct TaskSignature {
    /// Name of the registered handler to invoke
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Args")]
    pub args: Args,

    #[serde(rename = "Kwargs")]
    pub kwargs: Kwargs,

    /// Published in order when the handler succeeds
    #[serde(rename = "OnSuccess")]
    pub on_success: Vec<TaskSignature>,

    /// Published in order when the handler fails
    #[serde(rename = "OnError")]
    pub on_error: Vec<TaskSignature>,
}

/// Field layout accepted on decode
#[derive(Deserialize)]
struct WireSignature {
    #[serde(rename = "Name", alias = "name", default, deserialize_with = "null_as_default")]
    name: String,

    #[serde(rename = "Args", alias = "args", default, deserialize_with = "null_as_default")]
    args: Args,

    #[serde(rename = "Kwargs", alias = "kwargs", default, deserialize_with = "null_as_default")]
    kwargs: Kwargs,

    #[serde(
        rename = "OnSuccess",
        alias = "on_success",
        default,
        deserialize_with = "null_as_default"
    )]
    on_success: Vec<TaskSignature>,

    #[serde(
        rename = "OnError",
        alias = "on_error",
        default,
        deserialize_with = "null_as_default"
    )]
    on_error: Vec<TaskSignature>,
}

impl TryFrom<Map<String, Value>> for TaskSignature {
    type Error = serde_json::Error;

    fn try_from(fields: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        let wire = WireSignature::deserialize(Value::Object(fields))?;
        Ok(TaskSignature {
            name: wire.name,
            args: wire.args,
            kwargs: wire.kwargs,
            on_success: wire.on_success,
            on_error: wire.on_error,
        })
    }
}

impl TaskSignature {
    pub fn new(name: impl Into<String>) -> Self {
        TaskSignature {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn on_success(mut self, next: TaskSignature) -> Self {
        self.on_success.push(next);
        self
    }

    pub fn on_error(mut self, next: TaskSignature) -> Self {
        self.on_error.push(next);
        self
    }

    /// Decode a signature from a delivery body
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(TaskError::Decode)
    }

    /// Encode the signature for publication
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(TaskError::Encode)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
