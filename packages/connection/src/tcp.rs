//! TCP transport: one JSON envelope per line.

use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, Result};
use crate::protocol::{Envelope, HostRequest, HostResponse};
use crate::roles::HostRoles;
use crate::service::dispatch;
use crate::transport::{next_request_id, Transport};

struct Stream {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    /// Bytes of a reply line read before a timeout cut the read short.
    partial: String,
}

/// Client side of a TCP connection to the host.
pub struct TcpTransport {
    peer: SocketAddr,
    stream: Mutex<Stream>,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let writer = TcpStream::connect(addr)?;
        writer.set_nodelay(true)?;
        let peer = writer.peer_addr()?;
        let reader = BufReader::new(writer.try_clone()?);
        debug!(%peer, "connected to host");
        Ok(Self {
            peer,
            stream: Mutex::new(Stream {
                reader,
                writer,
                partial: String::new(),
            }),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn call(&self, request: HostRequest, timeout: Duration) -> Result<HostResponse> {
        let operation = request.operation();
        let id = next_request_id();
        let mut line = serde_json::to_string(&Envelope::new(id, request))?;
        line.push('\n');

        let mut stream = self.stream.lock();
        stream.writer.write_all(line.as_bytes())?;
        stream.writer.flush()?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectionError::Timeout { operation, timeout });
            }
            stream.reader.get_ref().set_read_timeout(Some(remaining))?;

            let Stream {
                reader, partial, ..
            } = &mut *stream;
            match reader.read_line(partial) {
                Ok(0) => return Err(ConnectionError::Closed),
                Ok(_) if !partial.ends_with('\n') => return Err(ConnectionError::Closed),
                Ok(_) => {
                    let reply: Envelope<HostResponse> = serde_json::from_str(partial.trim_end())?;
                    partial.clear();
                    if reply.id == id {
                        return Ok(reply.body);
                    }
                    debug!(id = reply.id, "discarding stale reply");
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(ConnectionError::Timeout { operation, timeout });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Accepts guest connections and serves each on its own thread.
pub struct TcpServer {
    local_addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TcpServer {
    pub fn bind(addr: impl ToSocketAddrs, roles: Arc<dyn HostRoles>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let stopping = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new()
            .name("appvirt-tcp-accept".to_string())
            .spawn({
                let stopping = stopping.clone();
                move || accept_loop(listener, roles, &stopping)
            })?;
        info!(%local_addr, "host listening");
        Ok(Self {
            local_addr,
            stopping,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until the accept loop ends.
    pub fn wait(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Stop accepting. Connections already open keep being served until
    /// their guest hangs up.
    pub fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.stopping.store(true, Ordering::SeqCst);
            // Wake the blocking accept.
            let _ = TcpStream::connect(self.local_addr);
            let _ = thread.join();
            info!(local_addr = %self.local_addr, "host stopped listening");
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, roles: Arc<dyn HostRoles>, stopping: &AtomicBool) {
    for stream in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let roles = roles.clone();
        let spawned = thread::Builder::new()
            .name("appvirt-tcp-guest".to_string())
            .spawn(move || {
                let peer = stream.peer_addr().ok();
                match serve_stream(stream, roles.as_ref()) {
                    Ok(()) => debug!(?peer, "guest hung up"),
                    Err(e) => warn!(?peer, error = %e, "guest connection failed"),
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not start guest thread");
        }
    }
}

fn serve_stream(stream: TcpStream, roles: &dyn HostRoles) -> io::Result<()> {
    let mut writer = stream.try_clone()?;
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Envelope<HostRequest>>(&line) {
            Ok(request) => Envelope::new(request.id, dispatch(roles, request.body)),
            Err(e) => {
                warn!(error = %e, "malformed request");
                Envelope::new(0, HostResponse::Error(format!("malformed request: {}", e)))
            }
        };
        let mut out = serde_json::to_string(&reply)?;
        out.push('\n');
        writer.write_all(out.as_bytes())?;
    }
    Ok(())
}
