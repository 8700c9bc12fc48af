//! Listener: binds up to [`crate::options::MAX_PORTS`] sequential ports,
//! accepts connections on a mio poll loop running on its own thread, and
//! dispatches each complete request to a worker pool so a slow script or a
//! large transfer never stalls acceptance. Finished responses come back to
//! the loop over a channel; a waker nudges the poll.

pub mod connection;

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use mio::net::TcpListener;
use mio::{Interest, Poll, Token, Waker};
use threadpool::ThreadPool;

use crate::dispatch::Dispatcher;
use crate::error::ServerError;
use crate::http::request::HttpRequest;
use crate::http::response::Response;
use crate::options::ServerOptions;
use crate::router::PortRouter;
use crate::server::connection::{Connection, ConnectionState};

const SERVER_TOKEN_MAX: usize = 100; // listener tokens live below this
const WAKER_TOKEN: Token = Token(usize::MAX);
const WORKER_THREADS: usize = 8;

/// The server facade owned by the controlling layer. Mappings are managed
/// through the [`PortRouter`] handle while the event loop runs.
pub struct Server {
    options: Arc<ServerOptions>,
    router: PortRouter,
    shutdown: Arc<AtomicBool>,
    waker: Option<Arc<Waker>>,
    handle: Option<JoinHandle<()>>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options: Arc::new(options),
            router: PortRouter::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            waker: None,
            handle: None,
        }
    }

    /// Handle for the control surface: set or clear port mappings at any
    /// time, including while the server is running.
    pub fn router(&self) -> PortRouter {
        self.router.clone()
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Binds the configured ports and spawns the accept loop. Individual
    /// bind failures are logged and skipped; it is an error when no port
    /// binds at all, or when the server is already running.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.handle.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let mut listeners = HashMap::new();
        for idx in 0..self.options.port_count() {
            let port = self.options.start_port + idx as u16;
            let addr = SocketAddr::from(([127, 0, 0, 1], port));

            match TcpListener::bind(addr) {
                Ok(mut listener) => {
                    let token = Token(idx);
                    poll.registry()
                        .register(&mut listener, token, Interest::READABLE)?;
                    listeners.insert(token, ListenerEntry { listener, port });
                    info!("[Setup] Bound to http://{}", addr);
                }
                Err(e) => warn!("[Setup] Failed to bind {}: {}", addr, e),
            }
        }

        if listeners.is_empty() {
            return Err(ServerError::NoPortsBound);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = channel();

        let mut event_loop = EventLoop {
            poll,
            listeners,
            connections: HashMap::new(),
            next_token: SERVER_TOKEN_MAX,
            dispatcher: Dispatcher::new(self.router.clone(), self.options.clone()),
            pool: ThreadPool::new(WORKER_THREADS),
            waker: waker.clone(),
            tx,
            rx,
            shutdown: shutdown.clone(),
            timeout: Duration::from_secs(self.options.timeout_seconds),
        };

        let handle = std::thread::Builder::new()
            .name("gomiweb-accept".to_string())
            .spawn(move || event_loop.run())?;

        self.shutdown = shutdown;
        self.waker = Some(waker);
        self.handle = Some(handle);
        Ok(())
    }

    /// Interrupts the accept loop and joins its thread. Safe to call when
    /// start failed or was never called; in-flight worker jobs complete on
    /// their own.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(waker) = self.waker.take() {
            let _ = waker.wake();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ListenerEntry {
    listener: TcpListener,
    port: u16,
}

struct EventLoop {
    poll: Poll,
    listeners: HashMap<Token, ListenerEntry>,
    connections: HashMap<Token, Connection>,
    next_token: usize,
    dispatcher: Dispatcher,
    pool: ThreadPool,
    waker: Arc<Waker>,
    tx: Sender<(Token, Vec<u8>)>,
    rx: Receiver<(Token, Vec<u8>)>,
    shutdown: Arc<AtomicBool>,
    timeout: Duration,
}

impl EventLoop {
    fn run(&mut self) {
        let mut events = mio::Events::with_capacity(1024);

        debug!("[Reactor] Event loop started");
        while !self.shutdown.load(Ordering::SeqCst) {
            if let Err(e) = self
                .poll
                .poll(&mut events, Some(Duration::from_millis(1000)))
            {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!("[Reactor] Poll error: {}", e);
                continue;
            }

            for event in events.iter() {
                let token = event.token();

                if token == WAKER_TOKEN {
                    // Shutdown or finished worker results; both are handled
                    // outside the event iteration.
                } else if self.listeners.contains_key(&token) {
                    self.accept_connections(token);
                } else {
                    self.handle_client_event(token, event);
                }
            }

            self.drain_worker_results();
            self.check_timeouts();
        }
        debug!("[Reactor] Event loop stopped");
    }

    fn accept_connections(&mut self, server_token: Token) {
        loop {
            let entry = match self.listeners.get_mut(&server_token) {
                Some(e) => e,
                None => return,
            };
            let port = entry.port;

            match entry.listener.accept() {
                Ok((mut stream, _)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!("[Network] Failed to register client: {}", e);
                        continue;
                    }

                    self.connections.insert(token, Connection::new(stream, port));
                    debug!("[Network] New client {:?} on :{}", token, port);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn handle_client_event(&mut self, token: Token, event: &mio::event::Event) {
        if event.is_readable() {
            self.read_from_client(token);
        }

        if event.is_writable() {
            self.write_to_client(token);
        }

        if event.is_read_closed() && event.is_write_closed() {
            self.close_connection(token);
        }
    }

    fn read_from_client(&mut self, token: Token) {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return,
        };
        if conn.state != ConnectionState::ReadRequest {
            return;
        }

        let mut buf = [0u8; 4096];
        let mut complete = false;
        loop {
            match conn.stream.read(&mut buf) {
                Ok(0) => {
                    self.close_connection(token);
                    return;
                }
                Ok(n) => {
                    conn.read_buffer.extend_from_slice(&buf[..n]);
                    conn.last_activity = Instant::now();

                    if HttpRequest::is_complete(&conn.read_buffer) {
                        complete = true;
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => {
                    self.close_connection(token);
                    return;
                }
            }
        }

        if complete {
            self.dispatch_request(token);
        }
    }

    /// Parses the buffered request and hands it to a worker. The response
    /// comes back through the channel and the waker.
    fn dispatch_request(&mut self, token: Token) {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return,
        };

        let request = match HttpRequest::parse(&conn.read_buffer) {
            Some(r) => r,
            None => {
                // Unparseable request line; same degradation as any other
                // per-request failure.
                let bytes = Response::not_found().to_bytes();
                self.finalize_response(token, bytes);
                return;
            }
        };

        conn.state = ConnectionState::AwaitDispatch;
        let port = conn.port;
        let path = request.path().to_string();
        debug!("[Network] {} {} on :{}", request.method, request.uri, port);

        let dispatcher = self.dispatcher.clone();
        let tx = self.tx.clone();
        let waker = self.waker.clone();

        self.pool.execute(move || {
            let response = dispatcher.handle(port, &path);
            if tx.send((token, response.to_bytes())).is_ok() {
                let _ = waker.wake();
            }
        });
    }

    fn drain_worker_results(&mut self) {
        while let Ok((token, bytes)) = self.rx.try_recv() {
            self.finalize_response(token, bytes);
        }
    }

    fn finalize_response(&mut self, token: Token, response_bytes: Vec<u8>) {
        if let Some(conn) = self.connections.get_mut(&token) {
            conn.write_buffer = response_bytes;
            conn.state = ConnectionState::WriteResponse;
            conn.last_activity = Instant::now();

            if let Err(e) =
                self.poll
                    .registry()
                    .reregister(&mut conn.stream, token, Interest::WRITABLE)
            {
                warn!("[Reactor] Failed to reregister {:?}: {}", token, e);
                self.close_connection(token);
            }
        }
    }

    fn write_to_client(&mut self, token: Token) {
        let conn = match self.connections.get_mut(&token) {
            Some(c) => c,
            None => return,
        };
        if conn.state != ConnectionState::WriteResponse {
            return;
        }

        while conn.bytes_written < conn.write_buffer.len() {
            let to_write = &conn.write_buffer[conn.bytes_written..];

            match conn.stream.write(to_write) {
                Ok(n) => {
                    conn.bytes_written += n;
                    conn.last_activity = Instant::now();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(_) => {
                    self.close_connection(token);
                    return;
                }
            }
        }

        debug!("[Network] Response sent to {:?}", token);
        self.close_connection(token);
    }

    fn check_timeouts(&mut self) {
        let now = Instant::now();
        let timeout = self.timeout;
        let to_remove: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.state != ConnectionState::AwaitDispatch)
            .filter(|(_, conn)| now.duration_since(conn.last_activity) > timeout)
            .map(|(&t, _)| t)
            .collect();

        for t in to_remove {
            debug!("[Network] Timing out {:?}", t);
            self.close_connection(t);
        }
    }

    fn close_connection(&mut self, token: Token) {
        if let Some(mut conn) = self.connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
    }
}
