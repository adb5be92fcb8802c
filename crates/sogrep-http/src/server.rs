//! HTTP lookup server.
//!
//! A dedicated acceptor thread pulls requests off the listener and hands
//! them to the async loop, which answers each one on the blocking pool.

use crate::{parse_soname, HttpError, Response, SonameResponse};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tiny_http::{Header, Request, Server};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Requests queued between the acceptor and the handlers
const REQUEST_QUEUE_CAPACITY: usize = 256;

/// Lookup surface the server answers from
pub trait SonameIndex: Send + Sync {
    /// Packages listing `soname`, or `None` when unknown
    fn lookup(&self, soname: &str) -> Option<Vec<String>>;
}

/// HTTP server answering `GET /{soname}`
pub struct LookupServer {
    server: Arc<Server>,
    index: Arc<dyn SonameIndex>,
    closing: Arc<AtomicBool>,
}

/// Stops a running [`LookupServer`] from another task
#[derive(Clone)]
pub struct ShutdownHandle {
    server: Arc<Server>,
    closing: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Stop accepting new requests. In-flight requests still complete.
    pub fn shutdown(&self) {
        if !self.closing.swap(true, Ordering::SeqCst) {
            self.server.unblock();
        }
    }

    /// Whether shutdown has been requested
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

impl LookupServer {
    /// Bind the server to `addr`
    pub fn bind(addr: &str, index: Arc<dyn SonameIndex>) -> Result<Self, HttpError> {
        let server = Server::http(addr).map_err(|e| HttpError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        let server = Self {
            server: Arc::new(server),
            index,
            closing: Arc::new(AtomicBool::new(false)),
        };

        match server.local_addr() {
            Some(local) => info!(addr = %local, "HTTP server listening"),
            None => info!(addr = %addr, "HTTP server listening"),
        }

        Ok(server)
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Handle for stopping the server
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server: self.server.clone(),
            closing: self.closing.clone(),
        }
    }

    /// Serve requests until shutdown is requested or accepting fails.
    ///
    /// Returns once every accepted request has been answered.
    pub async fn run(self) -> Result<(), HttpError> {
        let (tx, mut rx) = mpsc::channel::<Request>(REQUEST_QUEUE_CAPACITY);

        let server = self.server.clone();
        let closing = self.closing.clone();
        let acceptor = tokio::task::spawn_blocking(move || accept_loop(&server, &closing, tx));

        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(request) => {
                        let index = self.index.clone();
                        in_flight.spawn_blocking(move || respond(request, index.as_ref()));
                    }
                    None => break,
                },
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Request handler failed");
                    }
                }
            }
        }

        debug!(pending = in_flight.len(), "Draining in-flight requests");
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Request handler failed");
            }
        }

        let result = acceptor.await.map_err(|e| HttpError::Task(e.to_string()))?;
        info!("HTTP server stopped");
        result
    }
}

fn accept_loop(
    server: &Server,
    closing: &AtomicBool,
    tx: mpsc::Sender<Request>,
) -> Result<(), HttpError> {
    loop {
        match server.recv() {
            Ok(request) => {
                if tx.blocking_send(request).is_err() {
                    return Ok(());
                }
            }
            Err(_) if closing.load(Ordering::SeqCst) => return Ok(()),
            Err(e) => return Err(HttpError::Accept(e)),
        }
    }
}

/// Resolve a request URL against the index
pub fn handle(url: &str, index: &dyn SonameIndex) -> Response {
    parse_soname(url)
        .and_then(|soname| index.lookup(&soname))
        .map(|packages| Response::Found(SonameResponse { packages }))
        .unwrap_or(Response::NotFound)
}

fn respond(request: Request, index: &dyn SonameIndex) {
    let response = handle(request.url(), index);
    debug!(
        method = %request.method(),
        url = %request.url(),
        status = response.status(),
        "Handled request"
    );

    let mut reply =
        tiny_http::Response::from_data(response.body()).with_status_code(response.status());
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        reply = reply.with_header(header);
    }

    if let Err(e) = request.respond(reply) {
        debug!(error = %e, "Failed to write response");
    }
}
