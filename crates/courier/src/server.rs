//! The binary RPC server.
//!
//! One accept-token job per listener circulates on a shared queue. A worker
//! that pulls a token performs the blocking accept, immediately re-enqueues
//! a replacement token, then serves the accepted connection until it goes
//! idle or closes. Idle connections are parked on a supervisor task which
//! multiplexes read-readiness and keep-alive timers and feeds woken
//! connections back into the queue. The pool is elastic between
//! `min_threads` and `max_threads`, driven by two feedback events: the last
//! idle worker dequeuing a job, and a worker deciding to exit because enough
//! peers are already waiting.

use crate::registry::ServiceRegistry;
use crate::responder::Responder;
use bytes::BytesMut;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// The externally observable server state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Runmode {
    Stopped,
    Starting,
    Running,
    Terminating,
    Failed,
}

/// TLS material for a listener. Certificates and key are PEM files.
#[derive(Clone, Debug)]
pub struct TlsSettings {
    pub certificate_file: PathBuf,
    pub key_file: PathBuf,
}

/// Tunables; every duration is independent.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub keep_alive_timeout: Duration,
    /// How long a worker lingers on a quiet connection before handing it
    /// back to the supervisor.
    pub idle_timeout: Duration,
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            min_threads: 5,
            max_threads: 200,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_millis(10),
            backlog: 64,
        }
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl Stream {
    async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read_buf(buf).await,
            Stream::Tls(s) => s.read_buf(buf).await,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.write_all(data).await,
            Stream::Tls(s) => s.write_all(data).await,
        }
    }

    /// A readiness hint; the caller re-checks by actually reading.
    async fn readable(&self) -> io::Result<()> {
        match self {
            Stream::Plain(s) => s.readable().await,
            Stream::Tls(s) => s.get_ref().0.readable().await,
        }
    }
}

struct Connection {
    stream: Stream,
    peer: SocketAddr,
    inbuf: BytesMut,
    outbuf: BytesMut,
    responder: Responder,
}

impl Connection {
    fn new(stream: Stream, peer: SocketAddr, registry: Arc<ServiceRegistry>) -> Box<Self> {
        metrics::gauge!("courier_connections").increment(1);
        Box::new(Connection {
            stream,
            peer,
            inbuf: BytesMut::with_capacity(8 * 1024),
            outbuf: BytesMut::new(),
            responder: Responder::new(registry),
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        metrics::gauge!("courier_connections").decrement(1);
    }
}

struct Listener {
    inner: TcpListener,
    tls: Option<TlsAcceptor>,
    local: SocketAddr,
}

impl Listener {
    async fn finish(&self, stream: TcpStream) -> io::Result<Stream> {
        stream.set_nodelay(true)?;
        match &self.tls {
            Some(acceptor) => Ok(Stream::Tls(Box::new(acceptor.accept(stream).await?))),
            None => Ok(Stream::Plain(stream)),
        }
    }
}

enum Job {
    Accept(Arc<Listener>),
    Serve(Box<Connection>),
    Shutdown,
}

/// The shared job queue. Workers pull accept tokens and woken connections
/// from it; `waiting` counts workers currently parked in [`get`](Self::get).
struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    notify: Notify,
    waiting: AtomicUsize,
}

impl JobQueue {
    fn new() -> Self {
        JobQueue {
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            waiting: AtomicUsize::new(0),
        }
    }

    fn put(&self, job: Job) {
        self.jobs.lock().expect("job queue poisoned").push_back(job);
        self.notify.notify_one();
    }

    async fn get(&self) -> Job {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.jobs.lock().expect("job queue poisoned").pop_front() {
                self.waiting.fetch_sub(1, Ordering::SeqCst);
                return job;
            }
            notified.await;
        }
    }

    fn num_waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn drain(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .expect("job queue poisoned")
            .drain(..)
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.jobs.lock().expect("job queue poisoned").is_empty()
    }
}

/// Feedback posted to the supervisor; processed in FIFO order.
enum Event {
    NoWaitingThreads,
    ThreadTerminated,
    IdleSocket(Box<Connection>),
}

struct Shared {
    registry: Arc<ServiceRegistry>,
    config: ServerConfig,
    queue: JobQueue,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<Event>,
    workers: TaskTracker,
    live_workers: AtomicUsize,
}

impl Shared {
    fn spawn_worker(self: &Arc<Self>) {
        self.live_workers.fetch_add(1, Ordering::SeqCst);
        let shared = self.clone();
        self.workers.spawn(worker_loop(shared));
    }

    fn is_terminating(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct Running {
    shared: Arc<Shared>,
    supervisor: tokio::task::JoinHandle<()>,
}

/// RpcServer binds listeners, owns the registry handle and drives the
/// worker pool through its lifecycle
/// `Stopped → Starting → Running → Terminating → Stopped` (`Failed` when
/// termination itself errors).
pub struct RpcServer {
    registry: Arc<ServiceRegistry>,
    config: ServerConfig,
    listeners: Vec<Arc<Listener>>,
    runmode_tx: watch::Sender<Runmode>,
    running: Option<Running>,
}

impl RpcServer {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        let (runmode_tx, _) = watch::channel(Runmode::Stopped);
        RpcServer {
            registry,
            config: ServerConfig::default(),
            listeners: Vec::new(),
            runmode_tx,
            running: None,
        }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn min_threads(&self) -> usize {
        self.config.min_threads
    }

    pub fn set_min_threads(&mut self, n: usize) {
        self.config.min_threads = n;
    }

    pub fn max_threads(&self) -> usize {
        self.config.max_threads
    }

    pub fn set_max_threads(&mut self, n: usize) {
        self.config.max_threads = n;
    }

    pub fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    pub fn set_read_timeout(&mut self, d: Duration) {
        self.config.read_timeout = d;
    }

    pub fn write_timeout(&self) -> Duration {
        self.config.write_timeout
    }

    pub fn set_write_timeout(&mut self, d: Duration) {
        self.config.write_timeout = d;
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        self.config.keep_alive_timeout
    }

    pub fn set_keep_alive_timeout(&mut self, d: Duration) {
        self.config.keep_alive_timeout = d;
    }

    pub fn idle_timeout(&self) -> Duration {
        self.config.idle_timeout
    }

    pub fn set_idle_timeout(&mut self, d: Duration) {
        self.config.idle_timeout = d;
    }

    /// The current runmode.
    pub fn runmode(&self) -> Runmode {
        *self.runmode_tx.borrow()
    }

    /// A watch over every state transition.
    pub fn runmode_changes(&self) -> watch::Receiver<Runmode> {
        self.runmode_tx.subscribe()
    }

    fn set_runmode(&self, runmode: Runmode) {
        tracing::info!(?runmode, "runmode");
        let _ = self.runmode_tx.send(runmode);
    }

    /// Binds a plaintext listener. Legal in any state; a listener added
    /// while running starts accepting immediately.
    pub fn listen(&mut self, ip: &str, port: u16) -> anyhow::Result<SocketAddr> {
        self.listen_with(ip, port, None)
    }

    /// Binds a listener, optionally with TLS material.
    pub fn listen_with(
        &mut self,
        ip: &str,
        port: u16,
        tls: Option<TlsSettings>,
    ) -> anyhow::Result<SocketAddr> {
        use socket2::{Domain, Protocol, Socket, Type};

        let addr: SocketAddr = format!("{ip}:{port}").parse()?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(self.config.backlog as i32)?;
        let inner = TcpListener::from_std(socket.into())?;
        let local = inner.local_addr()?;

        let tls = match &tls {
            Some(settings) => Some(load_tls_acceptor(settings)?),
            None => None,
        };
        tracing::info!(%local, tls = tls.is_some(), "listen");

        let listener = Arc::new(Listener { inner, tls, local });
        if let Some(running) = &self.running {
            running.shared.queue.put(Job::Accept(listener.clone()));
        }
        self.listeners.push(listener);
        Ok(local)
    }

    /// The bound addresses, in listen order.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.local).collect()
    }

    /// Spawns the supervisor and the initial worker pool and begins
    /// accepting. Must be called within a tokio runtime.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.running.is_some() {
            anyhow::bail!("server already running");
        }
        self.set_runmode(Runmode::Starting);

        let mut config = self.config.clone();
        config.min_threads = config.min_threads.max(1);
        config.max_threads = config.max_threads.max(config.min_threads);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            registry: self.registry.clone(),
            config: config.clone(),
            queue: JobQueue::new(),
            cancel: CancellationToken::new(),
            events: events_tx,
            workers: TaskTracker::new(),
            live_workers: AtomicUsize::new(0),
        });

        for listener in &self.listeners {
            shared.queue.put(Job::Accept(listener.clone()));
        }
        for _ in 0..config.min_threads {
            shared.spawn_worker();
        }
        let supervisor = tokio::spawn(supervisor(shared.clone(), events_rx));

        self.running = Some(Running { shared, supervisor });
        self.set_runmode(Runmode::Running);
        Ok(())
    }

    /// Synchronous shutdown: interrupts accepts, unblocks the queue with a
    /// sentinel, waits for every worker, then drains pending jobs and idle
    /// sockets. After return the worker set and the queue are empty.
    pub async fn terminate(&mut self) -> anyhow::Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        self.set_runmode(Runmode::Terminating);

        let shared = running.shared.clone();
        let result = async move {
            shared.cancel.cancel();
            shared.queue.put(Job::Shutdown);
            shared.workers.close();
            shared.workers.wait().await;
            running.supervisor.await?;
            drop(shared.queue.drain());
            debug_assert!(shared.queue.is_empty());
            debug_assert_eq!(shared.live_workers.load(Ordering::SeqCst), 0);
            anyhow::Ok(())
        }
        .await;

        self.listeners.clear();
        match result {
            Ok(()) => {
                self.set_runmode(Runmode::Stopped);
                Ok(())
            }
            Err(err) => {
                tracing::error!(%err, "failed to terminate rpc server");
                self.set_runmode(Runmode::Failed);
                Err(err)
            }
        }
    }

    /// Live workers right now; zero when stopped.
    pub fn live_workers(&self) -> usize {
        self.running
            .as_ref()
            .map(|r| r.shared.live_workers.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            // Best effort: workers observe the token and wind down.
            running.shared.cancel.cancel();
            running.shared.queue.put(Job::Shutdown);
        }
    }
}

fn load_tls_acceptor(settings: &TlsSettings) -> anyhow::Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut io::BufReader::new(File::open(
        &settings.certificate_file,
    )?))
    .collect::<Result<Vec<_>, _>>()?;
    let key = rustls_pemfile::private_key(&mut io::BufReader::new(File::open(&settings.key_file)?))?
        .ok_or_else(|| anyhow::anyhow!("no private key found"))?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn worker_loop(shared: Arc<Shared>) {
    tracing::debug!("new worker running");
    loop {
        // Exit when shutting down, or when enough peers already wait on the
        // queue to cover the configured minimum.
        if shared.is_terminating() || shared.queue.num_waiting() >= shared.config.min_threads {
            break;
        }
        let job = shared.queue.get().await;
        if shared.is_terminating() {
            shared.queue.put(job);
            break;
        }
        if shared.queue.num_waiting() == 0 {
            let _ = shared.events.send(Event::NoWaitingThreads);
        }
        match job {
            Job::Shutdown => {
                // Pass the sentinel on so every parked worker wakes.
                shared.queue.put(Job::Shutdown);
                break;
            }
            Job::Accept(listener) => {
                let accepted = tokio::select! {
                    r = listener.inner.accept() => r,
                    _ = shared.cancel.cancelled() => {
                        shared.queue.put(Job::Accept(listener));
                        break;
                    }
                };
                match accepted {
                    Ok((stream, peer)) => {
                        // A replacement token first, so the next connection
                        // is accepted while this one is served.
                        shared.queue.put(Job::Accept(listener.clone()));
                        match listener.finish(stream).await {
                            Ok(stream) => {
                                tracing::debug!(%peer, "connection accepted");
                                let conn =
                                    Connection::new(stream, peer, shared.registry.clone());
                                serve(&shared, conn).await;
                            }
                            Err(err) => {
                                tracing::warn!(%peer, %err, "handshake failed");
                            }
                        }
                    }
                    Err(err) => {
                        shared.queue.put(Job::Accept(listener));
                        tracing::warn!(%err, "accept failed");
                    }
                }
            }
            Job::Serve(conn) => serve(&shared, conn).await,
        }
    }
    tracing::debug!("worker terminated");
    shared.live_workers.fetch_sub(1, Ordering::SeqCst);
    let _ = shared.events.send(Event::ThreadTerminated);
}

enum ConnState {
    Idle(Box<Connection>),
    Closed,
}

async fn serve(shared: &Arc<Shared>, conn: Box<Connection>) {
    match serve_connection(shared, conn).await {
        ConnState::Idle(conn) => {
            if shared.is_terminating() {
                return;
            }
            let _ = shared.events.send(Event::IdleSocket(conn));
        }
        ConnState::Closed => {}
    }
}

/// Drives one connection until it goes quiet or closes. The worker owns the
/// connection exclusively for the duration.
async fn serve_connection(shared: &Arc<Shared>, mut conn: Box<Connection>) -> ConnState {
    loop {
        if !conn.inbuf.is_empty() {
            // Buffered pipelined input is served before reading more.
            if !drive(shared, &mut conn).await {
                return ConnState::Closed;
            }
            continue;
        }

        let mid_request = !conn.responder.is_idle();
        if shared.is_terminating() && !mid_request {
            // No new request cycle once termination has begun.
            return ConnState::Closed;
        }
        let wait = if mid_request {
            shared.config.read_timeout
        } else {
            shared.config.idle_timeout
        };

        // Termination only interrupts accepts and idle waits. A request
        // partway through arriving keeps reading until it completes, fails,
        // or hits its own read timeout, so every in-flight call ends with a
        // reply or an error frame.
        let read = if mid_request {
            timeout(wait, conn.stream.read_buf(&mut conn.inbuf)).await
        } else {
            tokio::select! {
                r = timeout(wait, conn.stream.read_buf(&mut conn.inbuf)) => r,
                _ = shared.cancel.cancelled() => return ConnState::Closed,
            }
        };
        match read {
            Err(_elapsed) if !mid_request => return ConnState::Idle(conn),
            Err(_elapsed) => {
                tracing::warn!(peer = %conn.peer, "read timed out mid-request");
                return ConnState::Closed;
            }
            Ok(Ok(0)) => {
                tracing::debug!(peer = %conn.peer, "client closed connection");
                return ConnState::Closed;
            }
            Ok(Ok(_)) => {
                if !drive(shared, &mut conn).await {
                    return ConnState::Closed;
                }
            }
            Ok(Err(err)) => {
                tracing::warn!(peer = %conn.peer, %err, "read failed");
                return ConnState::Closed;
            }
        }
    }
}

/// Feeds buffered input through the responder, flushing each reply as it is
/// produced. Returns false when the connection must close.
async fn drive(shared: &Arc<Shared>, conn: &mut Connection) -> bool {
    loop {
        match conn.responder.on_input(&mut conn.inbuf, &mut conn.outbuf) {
            Ok(true) => {
                metrics::counter!("courier_requests").increment(1);
                if !flush(shared, conn).await {
                    return false;
                }
            }
            Ok(false) => return true,
            Err(err) => {
                tracing::warn!(peer = %conn.peer, %err, "closing connection");
                return false;
            }
        }
    }
}

async fn flush(shared: &Arc<Shared>, conn: &mut Connection) -> bool {
    let data = conn.outbuf.split();
    match timeout(shared.config.write_timeout, conn.stream.write_all(&data)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::warn!(peer = %conn.peer, %err, "write failed");
            false
        }
        Err(_elapsed) => {
            tracing::warn!(peer = %conn.peer, "write timed out");
            false
        }
    }
}

/// What an idle connection woke up for.
enum Wake {
    Readable,
    Gone,
}

async fn idle_watch(keep_alive: Duration, conn: Box<Connection>) -> Option<Box<Connection>> {
    let wake = tokio::select! {
        r = conn.stream.readable() => match r {
            Ok(()) => Wake::Readable,
            Err(_) => Wake::Gone,
        },
        _ = tokio::time::sleep(keep_alive) => Wake::Gone,
    };
    match wake {
        Wake::Readable => Some(conn),
        Wake::Gone => {
            tracing::debug!(peer = %conn.peer, "closing idle connection");
            None
        }
    }
}

/// The reactor: processes pool feedback in FIFO order and multiplexes the
/// idle connection set. It never blocks on application work.
async fn supervisor(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<Event>) {
    let mut idle = FuturesUnordered::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(Event::NoWaitingThreads) => {
                    let live = shared.live_workers.load(Ordering::SeqCst);
                    if live >= shared.config.max_threads {
                        tracing::warn!(limit = shared.config.max_threads, "thread limit reached");
                    } else if !shared.is_terminating() {
                        tracing::debug!(live, "spawning worker");
                        shared.spawn_worker();
                    }
                }
                Some(Event::ThreadTerminated) => {
                    tracing::debug!(
                        live = shared.live_workers.load(Ordering::SeqCst),
                        "worker exited"
                    );
                }
                Some(Event::IdleSocket(conn)) => {
                    idle.push(idle_watch(shared.config.keep_alive_timeout, conn));
                }
                None => break,
            },
            Some(woken) = idle.next(), if !idle.is_empty() => {
                if let Some(conn) = woken {
                    shared.queue.put(Job::Serve(conn));
                }
            }
            _ = shared.cancel.cancelled() => break,
        }
    }
    // Dropping the idle set closes every parked connection.
}
