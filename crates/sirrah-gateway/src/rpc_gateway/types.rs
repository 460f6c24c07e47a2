//! JSON-RPC envelope, response and error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sirrah_runtime::ExecutionError;
use thiserror::Error;

use super::transaction::TransactionDecodeError;

pub const JSON_RPC_VERSION: &str = "2.0";
pub const OFFCHAIN_CALL_METHOD: &str = "suave_offchainCall";
/// Every gateway failure is reported under the invalid-request code.
pub const JSON_RPC_INVALID_REQUEST_CODE: i64 = -32600;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcSuccessResponse {
    pub jsonrpc: String,
    pub result: Value,
    pub id: Value,
}

impl JsonRpcSuccessResponse {
    pub fn for_request(request: &JsonRpcRequest, result: Value) -> Self {
        Self {
            jsonrpc: request.jsonrpc.clone(),
            result,
            id: request.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub error: JsonRpcErrorObject,
    pub id: Value,
}

impl JsonRpcErrorResponse {
    pub fn for_request(request: &JsonRpcRequest, error: &RpcGatewayError) -> Self {
        Self::build(request.jsonrpc.clone(), request.id.clone(), error)
    }

    /// Used when the envelope itself could not be read.
    pub fn unparsed(error: &RpcGatewayError) -> Self {
        Self::build(JSON_RPC_VERSION.to_string(), Value::Null, error)
    }

    fn build(jsonrpc: String, id: Value, error: &RpcGatewayError) -> Self {
        Self {
            jsonrpc,
            error: JsonRpcErrorObject {
                code: error.code(),
                message: error.to_string(),
            },
            id,
        }
    }
}

impl IntoResponse for JsonRpcSuccessResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

impl IntoResponse for JsonRpcErrorResponse {
    fn into_response(self) -> Response {
        // JSON-RPC failures are transported as successful HTTP exchanges.
        (StatusCode::OK, Json(self)).into_response()
    }
}

#[derive(Debug, Error)]
pub enum RpcGatewayError {
    #[error("could not parse request: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),
    #[error("invalid method, expected suave_offchainCall")]
    InvalidMethod { method: String },
    #[error("could not unmarshal transaction: {0}")]
    InvalidTransaction(#[from] TransactionDecodeError),
    #[error("could not execute: {0}")]
    Execution(#[from] ExecutionError),
}

impl RpcGatewayError {
    pub fn code(&self) -> i64 {
        JSON_RPC_INVALID_REQUEST_CODE
    }
}
