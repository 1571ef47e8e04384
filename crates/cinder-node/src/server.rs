use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use signal_hook::consts::SIGTERM;
use signal_hook::flag;
use tracing::{error, info, warn};

use crate::error::NodeError;
use crate::protocol::{Request, frame_len};
use crate::session::{Node, NodeConfig, Session};

/// Streams of the connections currently being handled, so shutdown can
/// unblock their readers.
#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl Registry {
    fn insert(&self, stream: TcpStream) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, stream);
        id
    }

    fn remove(&self, id: u64) {
        self.streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    fn len(&self) -> usize {
        self.streams.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn shutdown_reads(&self) {
        for stream in self
            .streams
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
        {
            let _ = stream.shutdown(Shutdown::Read);
        }
    }
}

pub struct Server {
    node: Arc<Node>,
    addr: String,
    shutdown: Arc<AtomicBool>,
    registry: Arc<Registry>,
}

impl Server {
    pub fn new(config: NodeConfig, addr: impl Into<String>) -> Self {
        Self {
            node: Arc::new(Node::new(config)),
            addr: addr.into(),
            shutdown: Arc::new(AtomicBool::new(false)),
            registry: Arc::new(Registry::default()),
        }
    }

    pub fn node(&self) -> Arc<Node> {
        Arc::clone(&self.node)
    }

    /// Setting the returned flag stops the accept loop and drains every
    /// open connection, exactly like SIGTERM.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Connections whose handler has not returned yet.
    pub fn open_connections(&self) -> usize {
        self.registry.len()
    }

    pub fn serve(&self) -> Result<(), NodeError> {
        let listener = TcpListener::bind(&self.addr)?;
        info!(addr = %self.addr, "cinder-node listening");

        flag::register(SIGTERM, Arc::clone(&self.shutdown))?;

        // Non-blocking accept so the shutdown flag is observed.
        listener.set_nonblocking(true)?;

        let mut handles: Vec<thread::JoinHandle<()>> = Vec::new();

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    let id = self.registry.insert(stream.try_clone()?);

                    let node = Arc::clone(&self.node);
                    let registry = Arc::clone(&self.registry);
                    handles.retain(|handle| !handle.is_finished());
                    handles.push(thread::spawn(move || {
                        if let Err(e) = handle_connection(stream, node) {
                            error!(%peer, "connection error: {e}");
                        }
                        registry.remove(id);
                    }));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    warn!("accept error: {e}");
                }
            }
        }

        info!("shutdown requested, draining connections");
        drop(listener);

        // Unblocks handlers parked in read_exact.
        self.registry.shutdown_reads();

        for handle in handles {
            let _ = handle.join();
        }

        info!("shutdown complete");
        Ok(())
    }
}

fn handle_connection(stream: TcpStream, node: Arc<Node>) -> Result<(), NodeError> {
    let session = Session::new(node);
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = BufWriter::new(stream);

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(()); // client disconnected or shutdown
            }
            Err(e) => return Err(e.into()),
        }
        let len = frame_len(len_buf)?;

        let mut msg_buf = vec![0u8; len];
        reader.read_exact(&mut msg_buf)?;

        let request: Request = rmp_serde::from_slice(&msg_buf)?;
        let response = session.handle(request);

        let response_bytes = rmp_serde::to_vec(&response)?;
        let response_len = (response_bytes.len() as u32).to_be_bytes();
        if let Err(e) = writer
            .write_all(&response_len)
            .and_then(|()| writer.write_all(&response_bytes))
            .and_then(|()| writer.flush())
        {
            // The client gave up on this reply, typically after its own timeout.
            if matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
            ) {
                return Ok(());
            }
            return Err(e.into());
        }
    }
}
