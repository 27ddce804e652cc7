//! JSON-RPC 2.0 over HTTP, riding the same registry and dispatch path as
//! the binary and XML-RPC servers.
//!
//! Remote errors keep their integer return code as the error object's code;
//! the reserved codes -32601/-32602 cover unknown methods and argument
//! mismatches.

use crate::{xmlrpc::content_type_matches, HttpRpcError};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use courier::{DispatchError, RemoteError, ServiceRegistry};
use serde_json::{json, Value};
use sinfo::SerializationInfo;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

pub const CONTENT_TYPE: &str = "application/json";

pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_INVALID_REQUEST: i64 = -32600;

/// Renders a request object.
pub fn render_request(method: &str, args: &[SerializationInfo], id: u64) -> String {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": args.iter().map(sijson::to_json).collect::<Vec<_>>(),
        "id": id,
    })
    .to_string()
}

fn error_object(id: &Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": code, "message": message },
        "id": id,
    })
}

fn dispatch_error_code(err: &DispatchError) -> i64 {
    match err {
        DispatchError::UnknownMethod(_) => ERR_METHOD_NOT_FOUND,
        DispatchError::ArgumentMismatch { .. } | DispatchError::BadArgument(_) => {
            ERR_INVALID_PARAMS
        }
        DispatchError::Failed(inner) => inner
            .downcast_ref::<RemoteError>()
            .map(|remote| remote.rc as i64)
            .unwrap_or(0),
    }
}

/// A router serving JSON-RPC POSTs at `/` from the shared registry.
pub fn router(registry: Arc<ServiceRegistry>) -> axum::Router {
    axum::Router::new()
        .route("/", post(handle))
        .with_state(registry)
}

#[tracing::instrument(level = "debug", skip_all)]
async fn handle(
    State(registry): State<Arc<ServiceRegistry>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    if !content_type_matches(&headers, CONTENT_TYPE) {
        return StatusCode::UNSUPPORTED_MEDIA_TYPE.into_response();
    }
    let request: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            tracing::debug!(%err, "rejecting unparseable json-rpc request");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let reply = match request.get("method").and_then(Value::as_str) {
        None => error_object(&id, ERR_INVALID_REQUEST, "method expected"),
        Some(method) => {
            let args: Vec<SerializationInfo> = match request.get("params") {
                None => Vec::new(),
                Some(Value::Array(params)) => params.iter().map(sijson::from_json).collect(),
                Some(_) => {
                    let reply =
                        error_object(&id, ERR_INVALID_PARAMS, "params must be an array");
                    return json_response(reply);
                }
            };
            match registry.dispatch("", method, &args) {
                Ok(result) => json!({
                    "jsonrpc": "2.0",
                    "result": sijson::to_json(&result),
                    "id": id,
                }),
                Err(err) => {
                    let (_, message) = err.rc_and_message();
                    error_object(&id, dispatch_error_code(&err), &message)
                }
            }
        }
    };
    json_response(reply)
}

fn json_response(value: Value) -> Response {
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        value.to_string(),
    )
        .into_response()
}

/// A JSON-RPC client over reqwest. Responses must carry status 200 and an
/// application/json content type before they are decoded.
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: Url,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: Url) -> Self {
        JsonRpcClient {
            http: reqwest::Client::new(),
            url,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn call(
        &self,
        method: &str,
        args: &[SerializationInfo],
    ) -> Result<SerializationInfo, HttpRpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(render_request(method, args, id))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(HttpRpcError::Status(status));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        if !content_type.to_ascii_lowercase().starts_with(CONTENT_TYPE) {
            return Err(HttpRpcError::ContentType(content_type));
        }

        let reply: Value = serde_json::from_slice(&response.bytes().await?)?;
        if let Some(error) = reply.get("error") {
            let rc = error.get("code").and_then(Value::as_i64).unwrap_or(0) as i32;
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned();
            return Err(RemoteError::new(rc, message).into());
        }
        match reply.get("result") {
            Some(result) => Ok(sijson::from_json(result)),
            None => Err(HttpRpcError::Json("reply carries no result".to_owned())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_objects_are_versioned() {
        let text = render_request("multiply", &[courier::to_si(&2i32)], 9);
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["method"], "multiply");
        assert_eq!(v["params"], json!([2]));
        assert_eq!(v["id"], 9);
    }

    #[test]
    fn error_codes_map_dispatch_failures() {
        assert_eq!(
            dispatch_error_code(&DispatchError::UnknownMethod("x".into())),
            ERR_METHOD_NOT_FOUND
        );
        assert_eq!(
            dispatch_error_code(&DispatchError::ArgumentMismatch {
                expected: 2,
                got: 1
            }),
            ERR_INVALID_PARAMS
        );
        assert_eq!(
            dispatch_error_code(&DispatchError::Failed(RemoteError::new(7, "f").into())),
            7
        );
    }
}
