//! Wire codec for the host runtime protocol
//!
//! Messages are JSON-RPC 2.0 envelopes, one compact JSON object per line.
//! Capability calls travel as `tools/call` with `{name, arguments}` params,
//! which is how the host runtime dispatches them; protocol-level methods
//! such as `hello` are sent as-is.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// JSON-RPC version tag sent on every message
pub const JSONRPC_VERSION: &str = "2.0";

/// Envelope method used for capability calls
pub const TOOLS_CALL: &str = "tools/call";

/// Handshake method sent right after the socket opens
pub const HELLO: &str = "hello";

/// Reserved liveness method
pub const PING: &str = "ping";

/// Largest reply frame accepted by default (10 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Methods sent without the `tools/call` wrapper
const DIRECT_METHODS: &[&str] = &[HELLO, "resources/list"];

/// A request to the host runtime
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Unique request identifier
    pub id: String,
    /// Capability (or protocol method) name
    pub method: String,
    /// Named parameters
    pub params: Value,
}

impl Request {
    /// Create a new request with auto-generated ID
    pub fn new(
        method: impl Into<String>,
        params: impl Serialize,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self::with_value(method, serde_json::to_value(params)?))
    }

    /// Create a request from an already-built params value
    pub fn with_value(method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }

    /// Create a request with no parameters
    pub fn empty(method: impl Into<String>) -> Self {
        Self::with_value(method, Value::Null)
    }

    /// Whether this request goes out unwrapped rather than as `tools/call`
    pub fn is_direct(&self) -> bool {
        DIRECT_METHODS.contains(&self.method.as_str())
    }
}

/// Error code reported by the host, numeric (JSON-RPC) or symbolic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Numeric(i64),
    Symbolic(String),
}

impl ErrorCode {
    pub const PARSE_ERROR: ErrorCode = ErrorCode::Numeric(-32700);
    pub const INVALID_REQUEST: ErrorCode = ErrorCode::Numeric(-32600);
    pub const METHOD_NOT_FOUND: ErrorCode = ErrorCode::Numeric(-32601);
    pub const INVALID_PARAMS: ErrorCode = ErrorCode::Numeric(-32602);
    pub const INTERNAL: ErrorCode = ErrorCode::Numeric(-32603);
    /// Used for soft failures reported inside a successful result
    pub const APPLICATION: ErrorCode = ErrorCode::Numeric(-1);
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Numeric(code) => write!(f, "{}", code),
            ErrorCode::Symbolic(code) => f.write_str(code),
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        ErrorCode::Numeric(code)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode::Numeric(code.into())
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::Symbolic(code.to_string())
    }
}

/// Error object carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
    /// Extra context from the host (file, line, hint, backtrace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    pub fn new(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    /// Add optional data to the error
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Terminal outcome carried by a response
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(RemoteError),
}

/// A response from the host runtime
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: String,
    pub outcome: Outcome,
}

impl Response {
    /// Create a success response
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Result(result),
        }
    }

    /// Create an error response
    pub fn error(id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    /// Get the result, returning the remote error if the response was an error
    pub fn into_result(self) -> std::result::Result<Value, RemoteError> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(err) => Err(err),
        }
    }
}

/// Encode a request as one newline-terminated frame
pub fn encode(request: &Request) -> Vec<u8> {
    let (method, params) = if request.is_direct() {
        (request.method.as_str(), request.params.clone())
    } else {
        (
            TOOLS_CALL,
            json!({ "name": request.method, "arguments": request.params }),
        )
    };

    let envelope = json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": request.id,
        "method": method,
        "params": params,
    });
    frame(envelope)
}

/// Decode one reply frame (without its trailing newline)
pub fn decode(bytes: &[u8]) -> Result<Response> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::protocol(format!("malformed response: {}", e)))?;
    let Value::Object(mut envelope) = value else {
        return Err(Error::protocol("response is not a JSON object"));
    };

    let result = envelope.remove("result");
    let error = envelope.remove("error");

    let id = match envelope.remove("id") {
        None => return Err(Error::protocol("response is missing \"id\"")),
        Some(Value::String(id)) => id,
        Some(Value::Number(id)) => id.to_string(),
        Some(Value::Null) => {
            // Hosts reply with a null id when they could not parse the request at all
            let detail = error
                .as_ref()
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no detail");
            return Err(Error::protocol(format!("response has null \"id\" ({})", detail)));
        }
        Some(other) => return Err(Error::protocol(format!("response has invalid \"id\": {}", other))),
    };

    let outcome = match (result, error) {
        (Some(_), Some(_)) => {
            return Err(Error::protocol("response carries both \"result\" and \"error\""))
        }
        (None, None) => {
            return Err(Error::protocol("response carries neither \"result\" nor \"error\""))
        }
        (Some(result), None) => Outcome::Result(result),
        (None, Some(error)) => {
            let error: RemoteError = serde_json::from_value(error)
                .map_err(|e| Error::protocol(format!("malformed error object: {}", e)))?;
            Outcome::Error(error)
        }
    };

    Ok(Response { id, outcome })
}

/// Encode a response frame, the host side of the exchange
pub fn encode_response(response: &Response) -> Vec<u8> {
    let envelope = match &response.outcome {
        Outcome::Result(result) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": response.id,
            "result": result,
        }),
        Outcome::Error(error) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": response.id,
            "error": error,
        }),
    };
    frame(envelope)
}

/// Decode a request frame, unwrapping `tools/call` back into the capability call
pub fn decode_request(bytes: &[u8]) -> Result<Request> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::protocol(format!("malformed request: {}", e)))?;

    let id = match value.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => return Err(Error::protocol("request is missing \"id\"")),
    };
    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::protocol("request is missing \"method\""))?;
    let params = value.get("params").cloned().unwrap_or(Value::Null);

    if method != TOOLS_CALL {
        return Ok(Request {
            id,
            method: method.to_string(),
            params,
        });
    }

    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::protocol("tools/call request is missing \"name\""))?;
    Ok(Request {
        id,
        method: name.to_string(),
        params: params.get("arguments").cloned().unwrap_or(Value::Null),
    })
}

fn frame(envelope: Value) -> Vec<u8> {
    let mut line = envelope.to_string();
    line.push('\n');
    line.into_bytes()
}
