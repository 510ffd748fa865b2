//! Control protocol server
//!
//! One task per accepted connection runs a read, dispatch, write loop until
//! the peer goes away. Handlers are registered before serving and invoked
//! synchronously with the parsed request and a pre-populated response.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::constants::READ_BUFFER_SIZE;
use crate::error::{NetworkError, ProtocolError, Result};
use crate::rtsp::codec::{read_request, write_response};
use crate::rtsp::message::{Method, Request, Response};

/// Addresses of the control connection a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

/// Handler invoked for one method
pub type Handler = Arc<dyn Fn(&Request, &mut Response, &ConnectionInfo) + Send + Sync>;

/// Single-fire stop signal for a running server
#[derive(Clone)]
pub struct StopHandle {
    notify: Arc<Notify>,
}

impl StopHandle {
    /// Ask the accept loop to return; accepted connections drain on their own
    pub fn stop(&self) {
        self.notify.notify_one();
    }
}

/// Control protocol server
pub struct Server {
    bind_address: IpAddr,
    port: u16,
    handlers: HashMap<Method, Handler>,
    verbose: bool,
    stop: Arc<Notify>,
}

impl Server {
    /// Create a server that will listen on `bind_address:port`
    pub fn new(bind_address: IpAddr, port: u16) -> Self {
        Self {
            bind_address,
            port,
            handlers: HashMap::new(),
            verbose: false,
            stop: Arc::new(Notify::new()),
        }
    }

    /// Register the handler for a method, replacing any previous one
    pub fn add_handler<F>(&mut self, method: Method, handler: F)
    where
        F: Fn(&Request, &mut Response, &ConnectionInfo) + Send + Sync + 'static,
    {
        self.handlers.insert(method, Arc::new(handler));
    }

    /// Log every request and response at info level
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            notify: self.stop.clone(),
        }
    }

    /// Bind the configured port and serve until stopped
    pub async fn start(self) -> Result<()> {
        let addr = SocketAddr::new(self.bind_address, self.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until stopped
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        info!("Control server listening on {}", local);

        let handlers = Arc::new(self.handlers);
        loop {
            tokio::select! {
                _ = self.stop.notified() => {
                    info!("Control server on {} stopping", local);
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        debug!("Accepted control connection from {}", remote);
                        let handlers = handlers.clone();
                        let verbose = self.verbose;
                        tokio::spawn(async move {
                            handle_connection(stream, handlers, verbose).await;
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    handlers: Arc<HashMap<Method, Handler>>,
    verbose: bool,
) {
    let info = match (stream.local_addr(), stream.peer_addr()) {
        (Ok(local), Ok(remote)) => ConnectionInfo { local, remote },
        (Err(e), _) | (_, Err(e)) => {
            warn!("Dropping connection without addresses: {}", e);
            return;
        }
    };

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, read_half);

    loop {
        let request = match read_request(&mut reader).await {
            Ok(request) => request,
            Err(ProtocolError::ConnectionClosed) => {
                info!("Client {} closed connection", info.remote);
                break;
            }
            Err(e) => {
                warn!("Error reading request from {}: {}", info.remote, e);
                break;
            }
        };

        if verbose {
            info!("Received request from {}:\n{}", info.remote, request);
        } else {
            debug!("Received {} from {}", request.method, info.remote);
        }

        let Some(handler) = handlers.get(&request.method) else {
            warn!("No handler registered for {}, skipping", request.method);
            continue;
        };

        let mut response = Response::for_request(&request);
        handler(&request, &mut response, &info);

        if verbose {
            info!("Outbound response to {}:\n{}", info.remote, response);
        }

        if let Err(e) = write_response(&mut write_half, &response).await {
            warn!("Error writing response to {}: {}", info.remote, e);
            break;
        }
    }
}
