//! Bidirectional RPC over one framed byte stream.
//!
//! A [`Connection`] owns the writing half of a stream and, once started, a
//! reader thread draining the other half. The reader routes responses to the
//! callers blocked on them and hands every incoming request to a fresh worker
//! thread, so a service may call back across the same connection while the
//! peer is still waiting on it. This is what lets a plugin read host state in
//! the middle of executing a host-initiated command.

use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry;
use std::fmt;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, mpsc};
use std::thread::{self, JoinHandle};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::broker::{Broker, ChannelId, DIAL_METHOD};
use crate::error::{RpcError, TransportError};
use crate::message::{Frame, Message, RpcFault, codes};
use crate::service::{Service, decode_params};
use crate::transport::{FrameReader, FrameWriter};

/// Log target for connection operations.
const CONNECTION_TARGET: &str = "quill_rpc::connection";

/// Pseudo-method used to annotate failures while writing responses.
const RESPONSE_OPERATION: &str = "$/response";

type BoxedWriter = FrameWriter<Box<dyn Write + Send>>;
type Waiter = mpsc::Sender<Result<Value, RpcFault>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Recover from poisoning: the guarded maps stay structurally valid even
    // if a holder panicked.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, Waiter>,
}

/// State shared by the connection, its broker, and every client.
pub(crate) struct Shared {
    label: String,
    writer: Mutex<Option<BoxedWriter>>,
    pending: Mutex<Pending>,
    services: RwLock<HashMap<ChannelId, Arc<dyn Service>>>,
    retired: Mutex<HashSet<ChannelId>>,
    next_request_id: AtomicU64,
    next_channel_id: AtomicU32,
}

impl Shared {
    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn allocate_channel(&self) -> ChannelId {
        ChannelId::new(self.next_channel_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn insert_service(
        &self,
        id: ChannelId,
        service: Arc<dyn Service>,
    ) -> Result<(), RpcError> {
        if lock(&self.retired).contains(&id) {
            return Err(RpcError::ChannelRetired { id });
        }
        let mut services = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match services.entry(id) {
            Entry::Occupied(_) => Err(RpcError::ChannelInUse { id }),
            Entry::Vacant(slot) => {
                slot.insert(service);
                Ok(())
            }
        }
    }

    pub(crate) fn remove_service(&self, id: ChannelId) -> bool {
        let removed = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            lock(&self.retired).insert(id);
        }
        removed
    }

    fn service(&self, id: ChannelId) -> Option<Arc<dyn Service>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub(crate) fn request(
        &self,
        channel: ChannelId,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(RpcError::ConnectionClosed {
                    method: method.to_owned(),
                });
            }
            pending.waiters.insert(id, sender);
        }

        trace!(
            target: CONNECTION_TARGET,
            connection = %self.label,
            %channel,
            id,
            method,
            "sending request"
        );

        if let Err(error) = self.write(&Frame::request(channel, id, method, params), method) {
            lock(&self.pending).waiters.remove(&id);
            return Err(error);
        }

        match receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(RpcError::Remote {
                method: method.to_owned(),
                fault,
            }),
            Err(_) => Err(RpcError::ConnectionClosed {
                method: method.to_owned(),
            }),
        }
    }

    pub(crate) fn notify(
        &self,
        channel: ChannelId,
        method: &str,
        params: Value,
    ) -> Result<(), RpcError> {
        trace!(
            target: CONNECTION_TARGET,
            connection = %self.label,
            %channel,
            method,
            "sending notification"
        );
        self.write(&Frame::notification(channel, method, params), method)
    }

    fn write(&self, frame: &Frame, method: &str) -> Result<(), RpcError> {
        let payload = frame
            .to_bytes()
            .map_err(|error| RpcError::codec(method, error))?;
        let mut writer = lock(&self.writer);
        let Some(writer) = writer.as_mut() else {
            return Err(RpcError::ConnectionClosed {
                method: method.to_owned(),
            });
        };
        writer.send(&payload).map_err(|source| RpcError::Send {
            method: method.to_owned(),
            source: Arc::new(source),
        })
    }

    fn respond(&self, channel: ChannelId, id: u64, outcome: Result<Value, RpcFault>) {
        if let Err(error) = self.write(&Frame::response(channel, id, outcome), RESPONSE_OPERATION) {
            warn!(
                target: CONNECTION_TARGET,
                connection = %self.label,
                %channel,
                id,
                %error,
                "failed to write response"
            );
        }
    }

    fn complete(&self, id: u64, outcome: Result<Value, RpcFault>) {
        let waiter = lock(&self.pending).waiters.remove(&id);
        match waiter {
            Some(waiter) => {
                if waiter.send(outcome).is_err() {
                    debug!(
                        target: CONNECTION_TARGET,
                        connection = %self.label,
                        id,
                        "caller stopped waiting before the response arrived"
                    );
                }
            }
            None => warn!(
                target: CONNECTION_TARGET,
                connection = %self.label,
                id,
                "dropping response for unknown request"
            ),
        }
    }

    fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }

    /// Fails every outstanding call and drops registered services.
    ///
    /// Services often hold clients of this same connection; clearing the map
    /// breaks those reference cycles once the peer has gone.
    fn mark_closed(&self) {
        let waiters = {
            let mut pending = lock(&self.pending);
            pending.closed = true;
            std::mem::take(&mut pending.waiters)
        };
        drop(waiters);
        let services = std::mem::take(
            &mut *self
                .services
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        drop(services);
    }

    fn close_writer(&self) -> bool {
        lock(&self.writer).take().is_some()
    }
}

/// One end of a bidirectional RPC link.
///
/// Build the connection, register local services through [`Connection::broker`],
/// then call [`Connection::start`] with the reading half of the stream.
/// Registering before starting guarantees no request can arrive for a channel
/// that is about to be served.
///
/// # Example
///
/// ```no_run
/// use std::io::BufReader;
/// use quill_rpc::Connection;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let (reader, _peer_writer) = std::io::pipe()?;
/// let (_peer_reader, writer) = std::io::pipe()?;
/// let connection = Connection::new("host", writer);
/// connection.start(BufReader::new(reader))?;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    shared: Arc<Shared>,
    started: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Creates a connection writing frames to `writer`.
    ///
    /// `label` names the connection in logs and thread names.
    #[must_use]
    pub fn new<W>(label: impl Into<String>, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let boxed: Box<dyn Write + Send> = Box::new(writer);
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                writer: Mutex::new(Some(FrameWriter::new(boxed))),
                pending: Mutex::new(Pending::default()),
                services: RwLock::new(HashMap::new()),
                retired: Mutex::new(HashSet::new()),
                next_request_id: AtomicU64::new(1),
                next_channel_id: AtomicU32::new(ChannelId::FIRST_DYNAMIC.get()),
            }),
            started: AtomicBool::new(false),
            reader: Mutex::new(None),
        }
    }

    /// Label used in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        self.shared.label()
    }

    /// Returns the broker for this connection.
    #[must_use]
    pub fn broker(&self) -> Broker {
        Broker::new(Arc::clone(&self.shared))
    }

    /// Starts the reader thread on the incoming half of the stream.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Start`] if the reader was already started or the
    /// thread could not be spawned.
    pub fn start<R>(&self, reader: R) -> Result<(), RpcError>
    where
        R: BufRead + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RpcError::Start {
                message: String::from("reader already started"),
            });
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("quill-rpc-reader-{}", self.shared.label()))
            .spawn(move || read_loop(&shared, FrameReader::new(reader)))
            .map_err(|error| RpcError::Start {
                message: error.to_string(),
            })?;
        *lock(&self.reader) = Some(handle);
        Ok(())
    }

    /// Blocks until the peer closes its side of the stream.
    pub fn wait(&self) {
        let handle = lock(&self.reader).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(
                target: CONNECTION_TARGET,
                connection = %self.shared.label(),
                "reader thread panicked"
            );
        }
    }

    /// Closes the outgoing half of the stream.
    ///
    /// The peer observes end-of-stream; calls made afterwards fail with
    /// [`RpcError::ConnectionClosed`].
    pub fn close(&self) {
        if self.shared.close_writer() {
            debug!(
                target: CONNECTION_TARGET,
                connection = %self.shared.label(),
                "closed outgoing stream"
            );
        }
    }

    /// Returns `true` once the incoming half has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.shared.label())
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

/// Marks the connection closed when the reader exits, unwinding included.
struct CloseOnExit<'a>(&'a Shared);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.mark_closed();
    }
}

fn read_loop<R: BufRead>(shared: &Arc<Shared>, mut reader: FrameReader<R>) {
    let _closed = CloseOnExit(shared);
    loop {
        let bytes = match reader.receive() {
            Ok(bytes) => bytes,
            Err(TransportError::Closed) => {
                debug!(
                    target: CONNECTION_TARGET,
                    connection = %shared.label(),
                    "peer closed the stream"
                );
                break;
            }
            Err(error) => {
                warn!(
                    target: CONNECTION_TARGET,
                    connection = %shared.label(),
                    %error,
                    "stopping reader after transport failure"
                );
                break;
            }
        };

        match Frame::from_bytes(&bytes) {
            Ok(frame) => dispatch(shared, frame),
            Err(error) => warn!(
                target: CONNECTION_TARGET,
                connection = %shared.label(),
                %error,
                "skipping malformed frame"
            ),
        }
    }
}

fn dispatch(shared: &Arc<Shared>, frame: Frame) {
    let channel = frame.channel;
    match frame.message {
        Message::Response { id, outcome } => shared.complete(id, outcome),
        Message::Request { id, method, params } if channel == ChannelId::CONTROL => {
            let outcome = handle_control(shared, &method, params);
            shared.respond(channel, id, outcome);
        }
        Message::Request { id, method, params } => {
            let Some(service) = shared.service(channel) else {
                shared.respond(channel, id, Err(unknown_channel(channel)));
                return;
            };
            let label = method.clone();
            spawn_worker(shared, channel, &label, move |worker| {
                let outcome = service.call(&method, params);
                worker.respond(channel, id, outcome);
            })
            .unwrap_or_else(|fault| shared.respond(channel, id, Err(fault)));
        }
        Message::Notification { method, params } => {
            let Some(service) = shared.service(channel) else {
                warn!(
                    target: CONNECTION_TARGET,
                    connection = %shared.label(),
                    %channel,
                    method = %method,
                    "dropping notification for unknown channel"
                );
                return;
            };
            let label = method.clone();
            if let Err(fault) = spawn_worker(shared, channel, &label, move |_| {
                service.notify(&method, params);
            }) {
                warn!(
                    target: CONNECTION_TARGET,
                    connection = %shared.label(),
                    %channel,
                    method = %label,
                    error = %fault,
                    "dropping notification"
                );
            }
        }
    }
}

fn spawn_worker<F>(
    shared: &Arc<Shared>,
    channel: ChannelId,
    method: &str,
    work: F,
) -> Result<(), RpcFault>
where
    F: FnOnce(&Shared) + Send + 'static,
{
    let worker = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("quill-rpc-{}-{channel}", shared.label()))
        .spawn(move || work(&worker))
        .map(drop)
        .map_err(|error| {
            RpcFault::internal(format!("failed to schedule '{method}': {error}"))
        })
}

#[derive(Deserialize)]
struct DialParams {
    id: ChannelId,
}

fn handle_control(shared: &Shared, method: &str, params: Value) -> Result<Value, RpcFault> {
    match method {
        DIAL_METHOD => {
            let request: DialParams = decode_params(method, params)?;
            if request.id != ChannelId::CONTROL && shared.service(request.id).is_some() {
                Ok(Value::Bool(true))
            } else {
                Err(unknown_channel(request.id))
            }
        }
        other => Err(RpcFault::method_not_found(other)),
    }
}

fn unknown_channel(channel: ChannelId) -> RpcFault {
    RpcFault::new(
        codes::UNKNOWN_CHANNEL,
        format!("no service registered on channel {channel}"),
    )
}
