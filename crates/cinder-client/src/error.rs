use std::io::ErrorKind;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(std::io::Error),

    #[error("timed out waiting for node")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("node timed out: {0}")]
    NodeTimedOut(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("no live nodes")]
    NoLiveNodes,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },
}

impl ClientError {
    /// Failures expected to go away when the same request is sent to
    /// another node or over a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Timeout
                | ClientError::Unavailable(_)
                | ClientError::NodeTimedOut(_)
                | ClientError::PoolExhausted
                | ClientError::NoLiveNodes
        )
    }

    /// Whether the connection that produced this failure can serve another
    /// request. False once the stream may be out of step with the node.
    pub(crate) fn leaves_connection_usable(&self) -> bool {
        matches!(self, ClientError::InvalidRequest(_))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ClientError::Timeout,
            _ => ClientError::Io(e),
        }
    }
}

impl From<rmp_serde::encode::Error> for ClientError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ClientError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}
