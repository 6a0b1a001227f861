//! The reactor.
//!
//! One thread waits on the [`Poller`], accepts clients, and hands readiness
//! to the [`WorkerPool`] as [`Task`]s. Client sockets are registered
//! one-shot: after an event fires the socket stays disarmed until the worker
//! that handled it re-arms read or write interest, so at most one task
//! touches a connection at a time. Idle deadlines live in a [`HeapTimer`]
//! whose earliest expiry bounds each wait.

use crate::acceptor::Acceptor;
use crate::auth::AuthStore;
use crate::config::ServerConfig;
use crate::connection::{HttpConnection, RequestContext};
use crate::error::{ServerError, ServerResult};
use crate::http::Status;
use crate::poller::{Event, Events, Interest, Poller};
use crate::pool::WorkerPool;
use crate::timer::HeapTimer;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::ops::{Deref, DerefMut};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Token of the listening socket
pub const LISTENER_TOKEN: u64 = u64::MAX;
/// Token of the shutdown wake-up socket
pub const WAKEUP_TOKEN: u64 = u64::MAX - 1;

// Generations stay below the top bit so slot tokens never collide with the
// reserved ones.
const GENERATION_MASK: u32 = 0x7FFF_FFFF;

/// Stable handle of a connection slot.
///
/// The generation changes every time the slot is released, so a handle to a
/// previous occupant never resolves to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation: generation & GENERATION_MASK,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Encode as an epoll token
    pub fn to_token(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_token(token: u64) -> Self {
        Self {
            index: token as u32,
            generation: (token >> 32) as u32,
        }
    }
}

struct Slot {
    generation: u32,
    conn: HttpConnection,
}

/// Exclusive access to an occupied slot
pub struct SlotGuard<'a> {
    id: SlotId,
    guard: MutexGuard<'a, Slot>,
}

impl SlotGuard<'_> {
    pub fn id(&self) -> SlotId {
        self.id
    }
}

impl Deref for SlotGuard<'_> {
    type Target = HttpConnection;

    fn deref(&self) -> &HttpConnection {
        &self.guard.conn
    }
}

impl DerefMut for SlotGuard<'_> {
    fn deref_mut(&mut self) -> &mut HttpConnection {
        &mut self.guard.conn
    }
}

/// Pre-allocated arena of connection slots
pub struct ConnectionTable {
    slots: Vec<Mutex<Slot>>,
    free: Mutex<Vec<u32>>,
    active: AtomicUsize,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(Slot {
                    generation: 0,
                    conn: HttpConnection::new(),
                })
            })
            .collect();
        // Popped from the back, so low indices go first.
        let free = (0..capacity as u32).rev().collect();

        Self {
            slots,
            free: Mutex::new(free),
            active: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Take a free slot; `None` when the table is full
    pub fn acquire(&self) -> Option<SlotGuard<'_>> {
        let index = self.free.lock().pop()?;
        let guard = self.slots[index as usize].lock();
        self.active.fetch_add(1, Ordering::AcqRel);
        Some(SlotGuard {
            id: SlotId::new(index, guard.generation),
            guard,
        })
    }

    /// Lock the slot `id` refers to, if it still holds that live connection
    pub fn lock(&self, id: SlotId) -> Option<SlotGuard<'_>> {
        self.lock_index(id.index())
            .filter(|slot| slot.id.generation == id.generation)
    }

    fn lock_index(&self, index: usize) -> Option<SlotGuard<'_>> {
        let guard = self.slots.get(index)?.lock();
        if guard.conn.is_closed() {
            return None;
        }
        Some(SlotGuard {
            id: SlotId::new(index as u32, guard.generation),
            guard,
        })
    }

    /// Return a slot to the free list; returns the remaining active count
    pub fn release(&self, mut slot: SlotGuard<'_>) -> usize {
        slot.guard.generation = slot.guard.generation.wrapping_add(1) & GENERATION_MASK;
        self.free.lock().push(slot.id.index);
        self.active.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

/// Work handed to the pool for one readiness event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Read(SlotId),
    Write(SlotId),
}

impl Task {
    pub fn slot(&self) -> SlotId {
        match *self {
            Task::Read(id) | Task::Write(id) => id,
        }
    }

    fn run(self, shared: &Shared) {
        match self {
            Task::Read(id) => shared.on_read(id),
            Task::Write(id) => shared.on_write(id),
        }
    }
}

/// State reachable from both the reactor and the workers
struct Shared {
    poller: Poller,
    connections: ConnectionTable,
    timer: Mutex<HeapTimer<SlotId>>,
    auth: Arc<dyn AuthStore>,
    doc_root: PathBuf,
    conn_edge: bool,
    timeout: Duration,
    max_request_size: usize,
}

impl Shared {
    fn context(&self) -> RequestContext<'_> {
        RequestContext {
            doc_root: &self.doc_root,
            auth: self.auth.as_ref(),
            max_request_size: self.max_request_size,
        }
    }

    fn conn_interest(&self, interest: Interest) -> Interest {
        (interest | Interest::RDHUP | Interest::ONESHOT).edge_if(self.conn_edge)
    }

    /// Push the idle deadline of `id` out by one timeout
    fn extend_time(&self, id: SlotId) {
        if self.timeout.is_zero() {
            return;
        }
        self.timer.lock().add(id, Instant::now() + self.timeout);
    }

    fn on_read(&self, id: SlotId) {
        let Some(mut conn) = self.connections.lock(id) else {
            debug!("read task for released slot {:?}", id);
            return;
        };
        self.extend_time(id);

        match conn.read(self.max_request_size) {
            Ok(n) => debug!("read {} bytes from slot {}", n, id.index()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.close_locked(conn);
                return;
            }
            Err(e) => {
                debug!("read error on slot {}: {}", id.index(), e);
                self.close_locked(conn);
                return;
            }
        }

        self.on_process(conn);
    }

    fn on_process(&self, mut conn: SlotGuard<'_>) {
        let interest = if conn.process(&self.context()) {
            Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.rearm(conn, interest);
    }

    fn on_write(&self, id: SlotId) {
        let Some(mut conn) = self.connections.lock(id) else {
            debug!("write task for released slot {:?}", id);
            return;
        };
        self.extend_time(id);

        match conn.write() {
            Ok(_) if conn.to_write_bytes() == 0 => {
                if conn.is_keep_alive() {
                    self.on_process(conn);
                } else {
                    self.close_locked(conn);
                }
            }
            Ok(_) => self.rearm(conn, Interest::WRITABLE),
            Err(e) if e.kind() == ErrorKind::WouldBlock => self.rearm(conn, Interest::WRITABLE),
            Err(e) => {
                debug!("write error on slot {}: {}", id.index(), e);
                self.close_locked(conn);
            }
        }
    }

    fn rearm(&self, conn: SlotGuard<'_>, interest: Interest) {
        let Some(fd) = conn.fd() else {
            return;
        };
        if !self
            .poller
            .modify(fd, conn.id().to_token(), self.conn_interest(interest))
        {
            warn!("failed to re-arm slot {}", conn.id().index());
            self.close_locked(conn);
        }
    }

    /// Deregister, cancel the deadline, close the socket and free the slot
    fn close_locked(&self, mut conn: SlotGuard<'_>) {
        let id = conn.id();
        if let Some(fd) = conn.fd() {
            let _ = self.poller.remove(fd);
        }
        if !self.timeout.is_zero() {
            self.timer.lock().cancel(&id);
        }
        conn.close();

        let peer = conn.peer_addr();
        let active = self.connections.release(conn);
        if let Some(peer) = peer {
            info!("client {} quit, active connections: {}", peer, active);
        }
    }

    fn close_all(&self) {
        for index in 0..self.connections.capacity() {
            if let Some(conn) = self.connections.lock_index(index) {
                self.close_locked(conn);
            }
        }
    }
}

/// Stops a running [`Server`] from any thread
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<UnixStream>,
}

impl ShutdownHandle {
    /// Ask the reactor to stop and wake it if it is waiting
    pub fn shutdown(&self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = (&*self.waker).write(&[1]) {
            if e.kind() != ErrorKind::WouldBlock {
                warn!("failed to wake the reactor: {}", e);
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// The HTTP server
pub struct Server {
    shared: Arc<Shared>,
    acceptor: Acceptor,
    pool: WorkerPool,
    wakeup: UnixStream,
    shutdown: ShutdownHandle,
    max_events: usize,
}

impl Server {
    /// Bind the listener, spawn the workers, and register everything with
    /// the poller
    pub fn new(config: ServerConfig, auth: Arc<dyn AuthStore>) -> ServerResult<Self> {
        config.validate()?;

        let poller = Poller::new()?;
        let acceptor = Acceptor::bind(&config)?;
        let listen_interest =
            (Interest::READABLE | Interest::RDHUP).edge_if(config.trigger_mode.listen_edge_triggered());
        if !poller.add(acceptor.as_raw_fd(), LISTENER_TOKEN, listen_interest) {
            return Err(ServerError::Reactor(
                "failed to register the listening socket".to_string(),
            ));
        }

        let (wakeup, waker) = UnixStream::pair()?;
        wakeup.set_nonblocking(true)?;
        waker.set_nonblocking(true)?;
        if !poller.add(wakeup.as_raw_fd(), WAKEUP_TOKEN, Interest::READABLE) {
            return Err(ServerError::Reactor(
                "failed to register the wake-up socket".to_string(),
            ));
        }

        let pool = match config.task_queue_capacity {
            Some(capacity) => WorkerPool::bounded(config.worker_threads, capacity)?,
            None => WorkerPool::new(config.worker_threads)?,
        };

        info!(
            "server init: {} trigger mode {:?}, linger {}, timeout {:?}, {} workers, {} max connections, root {}",
            acceptor.local_addr()?,
            config.trigger_mode,
            config.opt_linger,
            config.connection_timeout,
            pool.size(),
            config.max_connections,
            config.doc_root.display()
        );

        let shared = Shared {
            poller,
            connections: ConnectionTable::new(config.max_connections),
            timer: Mutex::new(HeapTimer::new()),
            auth,
            doc_root: config.doc_root,
            conn_edge: config.trigger_mode.conn_edge_triggered(),
            timeout: config.connection_timeout,
            max_request_size: config.max_request_size,
        };

        Ok(Self {
            shared: Arc::new(shared),
            acceptor,
            pool,
            wakeup,
            shutdown: ShutdownHandle {
                stop: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
            max_events: config.max_events,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.acceptor.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Number of live client connections
    pub fn active_connections(&self) -> usize {
        self.shared.connections.active()
    }

    /// Run the event loop until shut down
    pub fn run(&self) -> ServerResult<()> {
        let mut events = Events::with_capacity(self.max_events);
        info!("server start on {}", self.acceptor.local_addr()?);

        while !self.shutdown.is_shutdown() {
            let timeout = self.wait_timeout();
            if let Err(e) = self.shared.poller.wait(&mut events, timeout) {
                error!("poll failed: {}", e);
                return Err(e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.deal_listen(),
                    WAKEUP_TOKEN => self.drain_wakeup(),
                    token => self.dispatch(SlotId::from_token(token), event),
                }
            }

            self.sweep_expired();
        }

        self.shared.close_all();
        info!("server stopped");
        log::logger().flush();
        Ok(())
    }

    /// Milliseconds until the earliest deadline, rounded up; -1 when none
    fn wait_timeout(&self) -> i32 {
        if self.shared.timeout.is_zero() {
            return -1;
        }
        match self.shared.timer.lock().next_expiry(Instant::now()) {
            Some(left) => ((left.as_nanos() + 999_999) / 1_000_000).min(i32::MAX as u128) as i32,
            None => -1,
        }
    }

    fn deal_listen(&self) {
        loop {
            match self.acceptor.accept() {
                Ok((stream, addr)) => self.add_client(stream, addr),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn add_client(&self, stream: TcpStream, addr: SocketAddr) {
        let Some(mut conn) = self.shared.connections.acquire() else {
            warn!("connection limit reached, rejecting {}", addr);
            send_busy(stream);
            return;
        };

        conn.init(stream, addr, self.shared.conn_edge);
        let id = conn.id();
        self.shared.extend_time(id);

        let registered = conn.fd().is_some_and(|fd| {
            self.shared
                .poller
                .add(fd, id.to_token(), self.shared.conn_interest(Interest::READABLE))
        });
        if !registered {
            warn!("failed to register client {}", addr);
            self.shared.close_locked(conn);
            return;
        }

        info!(
            "client {} in, active connections: {}",
            addr,
            self.shared.connections.active()
        );
    }

    fn dispatch(&self, id: SlotId, event: Event) {
        if event.is_hangup() {
            if let Some(conn) = self.shared.connections.lock(id) {
                self.shared.close_locked(conn);
            }
        } else if event.is_readable() {
            self.submit(Task::Read(id));
        } else if event.is_writable() {
            self.submit(Task::Write(id));
        } else {
            warn!("unexpected event {:#x} on slot {}", event.bits(), id.index());
        }
    }

    fn submit(&self, task: Task) {
        let shared = Arc::clone(&self.shared);
        if let Err(e) = self.pool.execute(move || task.run(&shared)) {
            warn!("dropping {:?}: {}", task, e);
            if let Some(conn) = self.shared.connections.lock(task.slot()) {
                self.shared.close_locked(conn);
            }
        }
    }

    fn drain_wakeup(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.wakeup).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    fn sweep_expired(&self) {
        if self.shared.timeout.is_zero() {
            return;
        }

        let expired = self.shared.timer.lock().expire(Instant::now());
        for id in expired {
            let Some(conn) = self.shared.connections.lock(id) else {
                continue;
            };
            // A worker may have refreshed it after the sweep popped it.
            if self.shared.timer.lock().contains(&id) {
                continue;
            }
            if let Some(peer) = conn.peer_addr() {
                info!("client {} timed out", peer);
            }
            self.shared.close_locked(conn);
        }
    }
}

fn send_busy(mut stream: TcpStream) {
    let status = Status::ServiceUnavailable;
    let body = "Server busy!";
    let response = format!(
        "HTTP/1.1 {} {}\r\nConnection: close\r\nContent-type: text/plain\r\nContent-length: {}\r\n\r\n{}",
        status.code(),
        status.as_str(),
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()) {
        debug!("busy response not delivered: {}", e);
    }
}
