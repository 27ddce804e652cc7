use courier::RemoteError;

/// Client- and codec-side failures of the HTTP adapters.
#[derive(Debug, thiserror::Error)]
pub enum HttpRpcError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("unexpected content type {0:?}")]
    ContentType(String),
    #[error("malformed xml-rpc document: {0}")]
    Xml(String),
    #[error("malformed json-rpc document: {0}")]
    Json(String),
    /// A fault or error object raised by the remote procedure.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<xml::reader::Error> for HttpRpcError {
    fn from(err: xml::reader::Error) -> Self {
        HttpRpcError::Xml(err.to_string())
    }
}

impl From<xml::writer::Error> for HttpRpcError {
    fn from(err: xml::writer::Error) -> Self {
        HttpRpcError::Xml(err.to_string())
    }
}

impl From<serde_json::Error> for HttpRpcError {
    fn from(err: serde_json::Error) -> Self {
        HttpRpcError::Json(err.to_string())
    }
}
