//! Invocation envelope exchanged with the Functions host.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Header carrying the host invocation ID.
pub const INVOCATION_ID_HEADER: &str = "x-azure-functions-invocationid";

/// Log lines returned with every envelope.
pub const PLACEHOLDER_LOGS: [&str; 2] = ["test log1", "test log2"];

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Payload the host sends for one triggered invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Input binding data, keyed by binding name.
    #[serde(rename = "Data", default, deserialize_with = "null_as_empty")]
    pub data: Map<String, Value>,
    /// Trigger metadata.
    #[serde(rename = "Metadata", default, deserialize_with = "null_as_empty")]
    pub metadata: Map<String, Value>,
    /// Any other top-level keys, kept as received.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InvokeRequest {
    /// Decode a request body.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Query parameter of an HTTP trigger the host did not forward verbatim,
    /// read from `Data.req.Query`.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.data.get("req")?.get("Query")?.get(key)?.as_str()
    }
}

/// Payload returned to the host for output binding routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Output values, keyed by binding name.
    #[serde(rename = "Outputs")]
    pub outputs: Map<String, Value>,
    /// Lines the host appends to the invocation log.
    #[serde(rename = "Logs")]
    pub logs: Vec<String>,
    /// Value for the `$return` binding.
    #[serde(rename = "ReturnValue", default)]
    pub return_value: Value,
}

impl InvokeResponse {
    /// Empty outputs, the placeholder logs and the given return value.
    pub fn new(return_value: impl Into<Value>) -> Self {
        Self {
            outputs: Map::new(),
            logs: PLACEHOLDER_LOGS.iter().map(|line| line.to_string()).collect(),
            return_value: return_value.into(),
        }
    }

    /// Serialize `value` into the output for `binding`.
    pub fn insert_output<T>(&mut self, binding: &str, value: &T) -> Result<(), serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        self.outputs
            .insert(binding.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Serialize the whole envelope.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Value for an HTTP output binding (`res`).
///
/// `status_code` is what the host answers the original caller with, not the
/// status of the host-to-handler call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponseBinding {
    /// Status the host responds with.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Response body.
    pub body: String,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
}

impl HttpResponseBinding {
    /// Plain-text response with the given status.
    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            body: body.into(),
            headers: BTreeMap::from([("Content-Type".to_string(), "text/plain".to_string())]),
        }
    }
}

/// Value for a Cosmos DB output binding (`document`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutput {
    /// Request `Data`, passed through unchanged.
    pub data: Map<String, Value>,
    /// Invocation the document was written by.
    #[serde(rename = "azureFunctionsInvocationId")]
    pub azure_functions_invocation_id: String,
}
