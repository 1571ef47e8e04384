use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use cinder_node::protocol::{ConsistencyLevel, Request, Response, RowView, frame_len};

use crate::clock::LogicalTimestamp;
use crate::error::ClientError;
use crate::types::{ClusterKey, Target};

/// The calls an operation may make on a leased connection.
pub trait NodeApi: Send {
    /// Address of the node this connection talks to.
    fn node(&self) -> &str;

    /// Bounds every subsequent read and write on this connection.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ClientError>;

    /// Writes a tombstone for `key` at `target`.
    fn remove(
        &mut self,
        key: &ClusterKey,
        target: &Target,
        timestamp: LogicalTimestamp,
        consistency: ConsistencyLevel,
    ) -> Result<(), ClientError>;
}

/// One framed TCP connection to a single node.
#[derive(Debug)]
pub struct Connection {
    node: String,
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, ClientError> {
        let mut last_err = None;
        for sock in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&sock, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    let reader = BufReader::new(stream.try_clone()?);
                    let writer = BufWriter::new(stream);
                    return Ok(Self {
                        node: addr.to_string(),
                        reader,
                        writer,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .map(ClientError::from)
            .unwrap_or_else(|| ClientError::Io(std::io::Error::other(format!(
                "{addr} resolved to no addresses"
            )))))
    }

    fn request(&mut self, request: Request) -> Result<Response, ClientError> {
        let bytes = rmp_serde::to_vec(&request)?;
        let len = (bytes.len() as u32).to_be_bytes();
        self.writer.write_all(&len)?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;

        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf)?;
        let len = frame_len(len_buf)?;

        let mut msg_buf = vec![0u8; len];
        self.reader.read_exact(&mut msg_buf)?;

        let response: Response = rmp_serde::from_slice(&msg_buf)?;
        match response {
            Response::Unavailable(msg) => Err(ClientError::Unavailable(msg)),
            Response::TimedOut(msg) => Err(ClientError::NodeTimedOut(msg)),
            Response::InvalidRequest(msg) => Err(ClientError::InvalidRequest(msg)),
            other => Ok(other),
        }
    }

    fn expect_ok(&mut self, request: Request) -> Result<(), ClientError> {
        match self.request(request)? {
            Response::Ok => Ok(()),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    pub fn insert(
        &mut self,
        key: &ClusterKey,
        target: &Target,
        value: impl Into<Vec<u8>>,
        timestamp: LogicalTimestamp,
        consistency: ConsistencyLevel,
    ) -> Result<(), ClientError> {
        self.expect_ok(Request::Insert {
            key: key.as_bytes().to_vec(),
            path: target.to_column_path(),
            value: value.into(),
            timestamp: timestamp.as_micros(),
            consistency,
        })
    }

    pub fn get_row(
        &mut self,
        column_family: &str,
        key: &ClusterKey,
    ) -> Result<Option<RowView>, ClientError> {
        match self.request(Request::GetRow {
            key: key.as_bytes().to_vec(),
            column_family: column_family.to_string(),
        })? {
            Response::Row(row) => Ok(row),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    pub fn ping(&mut self) -> Result<(), ClientError> {
        match self.request(Request::Ping)? {
            Response::Pong => Ok(()),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }
}

impl NodeApi for Connection {
    fn node(&self) -> &str {
        &self.node
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), ClientError> {
        // A zero timeout is rejected by the socket layer.
        let timeout = timeout.max(Duration::from_millis(1));
        let stream = self.writer.get_ref();
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    fn remove(
        &mut self,
        key: &ClusterKey,
        target: &Target,
        timestamp: LogicalTimestamp,
        consistency: ConsistencyLevel,
    ) -> Result<(), ClientError> {
        self.expect_ok(Request::Remove {
            key: key.as_bytes().to_vec(),
            path: target.to_column_path(),
            timestamp: timestamp.as_micros(),
            consistency,
        })
    }
}
