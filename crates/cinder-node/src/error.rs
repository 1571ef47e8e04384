#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("unconfigured column family: {0}")]
    UnknownColumnFamily(String),

    #[error("invalid column path: {0}")]
    InvalidPath(String),

    #[error("unavailable: {required} replica(s) required, {live} alive")]
    Unavailable { required: u32, live: u32 },
}
