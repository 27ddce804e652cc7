use wire::WireError;

/// An error a procedure raises deliberately, carrying an integer return
/// code that travels to the peer inside the error frame.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub rc: i32,
    pub message: String,
}

impl RemoteError {
    pub fn new(rc: i32, message: impl Into<String>) -> Self {
        RemoteError {
            rc,
            message: message.into(),
        }
    }
}

/// Transport- and frame-level failures of the binary RPC path.
///
/// Server shutdown is not a wire-visible condition: workers observe the
/// cancellation token and simply stop starting request cycles, so a peer of
/// a terminating server sees `ConnectionClosed` once its last reply has
/// been flushed.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("read timed out")]
    ReadTimeout,
    #[error("write timed out")]
    WriteTimeout,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
