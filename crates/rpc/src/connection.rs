//! Connection state machine and RPC client.

use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use bytes::{Bytes, BytesMut};
use futures::{
    channel::{mpsc, oneshot},
    future::Fuse,
    stream::BoxStream,
    FutureExt, Sink, SinkExt, Stream, StreamExt,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info_span, instrument, warn, Span};

use crate::{
    codec::framed,
    msg::{decode, encode, Payload, Request, Response, Rpc, RpcMessage, RpcType, TlsMessage},
    ConnectionConfig, RpcError,
};

type BoxSink = Pin<Box<dyn Sink<Bytes, Error = io::Error> + Send>>;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The peer has not yet initialized the connection.
    Uninitialized,
    /// The connection is initialized.
    Initialized,
    /// The connection is terminated. This state is final.
    Terminated,
}

/// An event emitted by a connection.
#[derive(Debug)]
pub enum Event {
    /// The peer initialized the connection.
    InitResponse,
    /// The peer sent a request.
    Request(IncomingRequest),
    /// The peer sent raw TLS data.
    TlsMessage(TlsMessage),
    /// The connection was terminated. This is the last event.
    Terminated(RpcError),
}

/// Stream of [`Event`]s emitted by a connection.
pub type Events = mpsc::UnboundedReceiver<Event>;

/// A request received from the peer.
#[derive(Debug)]
pub struct IncomingRequest {
    /// Correlation ID of the request.
    pub id: u64,
    /// The request.
    pub request: Request,
    /// Sends the response.
    pub responder: Responder,
}

/// Sends the response to an [`IncomingRequest`].
#[derive(Debug)]
pub struct Responder {
    conn: Connection,
    id: u64,
    rpc_type: RpcType,
}

impl Responder {
    /// Returns the type of the request.
    pub fn rpc_type(&self) -> RpcType {
        self.rpc_type
    }

    /// Sends a response, or an error, with the ID of the request.
    ///
    /// Fails without sending if the response does not match the request type.
    pub async fn respond(self, response: Result<Response, RpcError>) -> Result<(), RpcError> {
        let payload = match response {
            Ok(response) if response.rpc_type() != self.rpc_type => {
                return Err(RpcError::internal(format!(
                    "response type {} does not match request type {}",
                    response.rpc_type(),
                    self.rpc_type
                )));
            }
            Ok(response) => Payload::Response(response),
            Err(err) => Payload::RequestError(err),
        };

        self.conn
            .send_message(RpcMessage {
                id: Some(self.id),
                payload,
            })
            .await
            .map(|_| ())
    }
}

/// A frame waiting to be written by the connection task.
struct Outbound {
    frame: Bytes,
    /// Notified once the frame is written.
    sent: Option<oneshot::Sender<Result<(), RpcError>>>,
}

enum Status {
    Open { initialized: bool },
    Terminated(RpcError),
}

struct State {
    status: Status,
    /// Calls waiting for a response, keyed by correlation ID.
    pending: HashMap<u64, oneshot::Sender<Result<Response, RpcError>>>,
    init_waiters: Vec<oneshot::Sender<Result<(), RpcError>>>,
    events: Option<mpsc::UnboundedSender<Event>>,
    shutdown: Option<oneshot::Sender<()>>,
    /// Whether the peer can still receive frames.
    transport_open: bool,
}

impl State {
    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            // Ignore if the receiver was dropped.
            _ = events.unbounded_send(event);
        }
    }

    fn initialize(&mut self) -> bool {
        let Status::Open { initialized } = &mut self.status else {
            return false;
        };

        *initialized = true;
        for waiter in self.init_waiters.drain(..) {
            _ = waiter.send(Ok(()));
        }

        true
    }

    fn terminate(&mut self, err: RpcError) {
        self.status = Status::Terminated(err.clone());
        for (_, call) in self.pending.drain() {
            _ = call.send(Err(err.clone()));
        }
        for waiter in self.init_waiters.drain(..) {
            _ = waiter.send(Err(err.clone()));
        }
        if let Some(events) = self.events.take() {
            _ = events.unbounded_send(Event::Terminated(err));
        }
        if let Some(shutdown) = self.shutdown.take() {
            _ = shutdown.send(());
        }
    }
}

struct Inner {
    state: Mutex<State>,
    outbound: mpsc::UnboundedSender<Outbound>,
    next_id: AtomicU64,
    span: Span,
}

/// Handle to a connection.
///
/// Cloning the handle is cheap, all clones refer to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Attaches the RPC protocol to a length-delimited socket.
///
/// Returns a handle to the connection, the task processing inbound and
/// outbound frames which must be polled for the connection to make progress,
/// and the stream of connection events.
pub fn connect<T>(io: T, config: &ConnectionConfig) -> (Connection, ConnectionTask, Events)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    attach(framed(io, config))
}

/// Attaches the RPC protocol to a message transport.
///
/// See [`connect`].
pub fn attach<T>(transport: T) -> (Connection, ConnectionTask, Events)
where
    T: Stream<Item = Result<BytesMut, io::Error>> + Sink<Bytes, Error = io::Error> + Send + 'static,
{
    let (sink, stream) = transport.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded();
    let (events_tx, events_rx) = mpsc::unbounded();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let conn = Connection {
        inner: Arc::new(Inner {
            state: Mutex::new(State {
                status: Status::Open { initialized: false },
                pending: HashMap::new(),
                init_waiters: Vec::new(),
                events: Some(events_tx),
                shutdown: Some(shutdown_tx),
                transport_open: true,
            }),
            outbound: outbound_tx,
            next_id: AtomicU64::new(1),
            span: info_span!("rpc"),
        }),
    };

    let task = ConnectionTask {
        conn: conn.clone(),
        stream: stream.boxed(),
        sink: Box::pin(sink),
        outbound: outbound_rx,
        shutdown: shutdown_rx.fuse(),
    };

    (conn, task, events_rx)
}

impl Connection {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the state of the connection.
    pub fn state(&self) -> ConnectionState {
        match self.lock().status {
            Status::Open { initialized: false } => ConnectionState::Uninitialized,
            Status::Open { initialized: true } => ConnectionState::Initialized,
            Status::Terminated(_) => ConnectionState::Terminated,
        }
    }

    /// Returns `true` if the connection is initialized.
    pub fn is_initialized(&self) -> bool {
        self.state() == ConnectionState::Initialized
    }

    /// Returns `true` if the connection is terminated.
    pub fn is_terminated(&self) -> bool {
        self.state() == ConnectionState::Terminated
    }

    /// Sends a message, assigning it an ID if it has none.
    ///
    /// Returns the ID of the message once it is written to the transport.
    pub async fn send_message(&self, mut msg: RpcMessage) -> Result<u64, RpcError> {
        let (sent_tx, sent_rx) = oneshot::channel();
        let id = {
            let state = self.lock();
            if let Status::Terminated(_) = state.status {
                return Err(RpcError::closed("socket is not open"));
            }

            let id = *msg.id.get_or_insert_with(|| self.next_id());
            self.inner
                .outbound
                .unbounded_send(Outbound {
                    frame: encode(&msg)?,
                    sent: Some(sent_tx),
                })
                .map_err(|_| RpcError::closed("socket is not open"))?;

            id
        };

        sent_rx
            .await
            .map_err(|_| RpcError::closed("connection closed before the message was sent"))??;

        debug!(id, "sent message");

        Ok(id)
    }

    /// Notifies the peer that the connection is initialized.
    pub async fn send_init_response(&self) -> Result<(), RpcError> {
        self.send_message(RpcMessage::new(Payload::InitResponse))
            .await?;
        self.lock().initialize();

        Ok(())
    }

    /// Sends raw TLS data of a tunnel.
    pub async fn send_tls_message(&self, tunnel_id: u32, message: Vec<u8>) -> Result<(), RpcError> {
        self.send_message(RpcMessage::new(TlsMessage { tunnel_id, message }))
            .await
            .map(|_| ())
    }

    /// Terminates the connection.
    ///
    /// All pending calls are rejected with the error and the peer is notified
    /// if it is still reachable. The connection task closes the transport
    /// without waiting for a peer which stopped reading. Does nothing if the
    /// connection is already terminated.
    ///
    /// # Arguments
    ///
    /// * `err` - The reason, or `None` for a normal close.
    #[instrument(parent = &self.inner.span, level = "debug", skip_all)]
    pub fn terminate(&self, err: Option<RpcError>) {
        let err = err.unwrap_or_else(|| RpcError::no_error(""));

        let mut state = self.lock();
        if let Status::Terminated(_) = state.status {
            return;
        }

        if state.transport_open {
            let alert = RpcMessage {
                id: Some(self.next_id()),
                payload: Payload::TerminationAlert(err.clone()),
            };
            match encode(&alert) {
                Ok(frame) => {
                    // Ignore if the connection task is gone.
                    _ = self
                        .inner
                        .outbound
                        .unbounded_send(Outbound { frame, sent: None });
                }
                Err(e) => error!("error terminating connection: {e}"),
            }
        }
        self.inner.outbound.close_channel();

        state.terminate(err);
    }

    /// Waits until the peer initializes the connection.
    ///
    /// Fails with the termination error if the connection is terminated
    /// before, or while, waiting.
    pub async fn wait_for_init(&self) -> Result<(), RpcError> {
        let waiter = {
            let mut state = self.lock();
            match &state.status {
                Status::Open { initialized: true } => return Ok(()),
                Status::Terminated(err) => return Err(err.clone()),
                Status::Open { initialized: false } => {}
            }

            let (tx, rx) = oneshot::channel();
            state.init_waiters.push(tx);
            rx
        };

        waiter
            .await
            .map_err(|_| RpcError::closed("connection dropped"))?
    }

    /// Calls an RPC and waits for its response.
    ///
    /// # Arguments
    ///
    /// * `request` - The request.
    #[instrument(parent = &self.inner.span, level = "debug", skip_all, err)]
    pub async fn rpc<R: Rpc>(&self, request: R::Request) -> Result<R::Response, RpcError> {
        let response = self.rpc_raw(request.into()).await?;

        R::Response::try_from(response).map_err(|response| {
            RpcError::protocol_desync(format!(
                "unexpected response type: {}",
                response.rpc_type()
            ))
        })
    }

    /// Calls an RPC and waits for its response.
    ///
    /// Responses are matched to requests by ID, so any number of calls may be
    /// in flight at once.
    pub async fn rpc_raw(&self, request: Request) -> Result<Response, RpcError> {
        let rpc_type = request.rpc_type();
        let id = self.next_id();

        let response = {
            let mut state = self.lock();
            if let Status::Terminated(err) = &state.status {
                return Err(err.clone());
            }

            let (tx, rx) = oneshot::channel();
            state.pending.insert(id, tx);
            rx
        };

        if let Err(err) = self
            .send_message(RpcMessage {
                id: Some(id),
                payload: Payload::Request(request),
            })
            .await
        {
            self.lock().pending.remove(&id);
            return Err(err);
        }

        debug!(id, %rpc_type, "waiting for response");

        let response = response
            .await
            .map_err(|_| RpcError::closed("connection dropped"))??;

        if response.rpc_type() != rpc_type {
            return Err(RpcError::protocol_desync(format!(
                "unexpected response type: {}",
                response.rpc_type()
            )));
        }

        Ok(response)
    }

    fn resolve(&self, id: Option<u64>, result: Result<Response, RpcError>) {
        let Some(id) = id else {
            warn!("received response without id");
            return;
        };

        let call = self.lock().pending.remove(&id);
        match call {
            // Ignore if the caller stopped waiting.
            Some(call) => _ = call.send(result),
            None => warn!(id, "received response for unknown call"),
        }
    }

    fn transport_closed(&self) {
        self.lock().transport_open = false;
    }

    /// Dispatches an inbound frame.
    fn handle(&self, bytes: &[u8]) -> Result<(), RpcError> {
        let msg = decode(bytes)?;
        let id = msg.id;

        match msg.payload {
            Payload::TerminationAlert(err) => {
                warn!("received connection termination alert: {err}");
                // The peer is going away, do not answer with an alert.
                self.transport_closed();
                self.terminate(Some(err));
            }
            Payload::InitResponse => {
                let mut state = self.lock();
                if state.initialize() {
                    state.emit(Event::InitResponse);
                }
            }
            Payload::Response(response) => {
                self.resolve(id, Ok(response));
            }
            Payload::RequestError(err) => {
                self.resolve(id, Err(err));
            }
            Payload::Request(request) => {
                let rpc_type = request.rpc_type();
                let Some(id) = id else {
                    warn!(%rpc_type, "dropping request without id");
                    return Ok(());
                };

                debug!(id, %rpc_type, "received request");

                let responder = Responder {
                    conn: self.clone(),
                    id,
                    rpc_type,
                };
                self.lock().emit(Event::Request(IncomingRequest {
                    id,
                    request,
                    responder,
                }));
            }
            Payload::TlsMessage(message) => {
                self.lock().emit(Event::TlsMessage(message));
            }
        }

        Ok(())
    }
}

/// Drives a connection.
///
/// Inbound frames are handled one at a time, in arrival order. Outbound frames
/// are written in the order they were sent.
#[must_use = "the connection task must be polled for the connection to make progress"]
pub struct ConnectionTask {
    conn: Connection,
    stream: BoxStream<'static, Result<BytesMut, io::Error>>,
    sink: BoxSink,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    shutdown: Fuse<oneshot::Receiver<()>>,
}

impl std::fmt::Debug for ConnectionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTask")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

impl ConnectionTask {
    /// Runs until the connection is terminated, then drops the transport.
    ///
    /// Returns an error if the connection was terminated because of a
    /// transport failure or a malformed frame.
    #[instrument(parent = &self.conn.inner.span, level = "debug", skip_all, err)]
    pub async fn run(self) -> Result<(), RpcError> {
        let ConnectionTask {
            conn,
            stream,
            sink,
            outbound,
            shutdown,
        } = self;

        let writer = write_frames(sink, outbound, shutdown).fuse();
        let reader = read_frames(&conn, stream).fuse();
        futures::pin_mut!(writer, reader);

        futures::select! {
            res = writer => {
                if let Err(err) = &res {
                    conn.transport_closed();
                    conn.terminate(Some(err.clone()));
                }
                res
            }
            res = reader => {
                // The connection is terminated, let the writer flush the alert.
                _ = writer.await;
                res
            }
        }
    }
}

async fn read_frames(
    conn: &Connection,
    mut stream: BoxStream<'static, Result<BytesMut, io::Error>>,
) -> Result<(), RpcError> {
    while let Some(frame) = stream.next().await {
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = RpcError::from(e);
                conn.transport_closed();
                conn.terminate(Some(err.clone()));
                return Err(err);
            }
        };

        if let Err(err) = conn.handle(&bytes) {
            error!("error processing message: {err}");
            conn.terminate(Some(err.clone()));
            return Err(err);
        }

        if conn.is_terminated() {
            return Ok(());
        }
    }

    debug!("transport closed");
    conn.transport_closed();
    conn.terminate(Some(RpcError::no_error("connection closed")));

    Ok(())
}

/// Writes outbound frames until the connection is terminated.
///
/// Once terminated, frames still queued (the termination alert) are written
/// only if the transport accepts them without waiting.
async fn write_frames(
    mut sink: BoxSink,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    mut shutdown: Fuse<oneshot::Receiver<()>>,
) -> Result<(), RpcError> {
    loop {
        let next = futures::select_biased! {
            next = outbound.next() => next,
            _ = &mut shutdown => break,
        };
        let Some(Outbound { frame, sent }) = next else {
            break;
        };

        let result = futures::select_biased! {
            result = sink.send(frame).fuse() => Some(result.map_err(RpcError::from)),
            _ = &mut shutdown => None,
        };

        match result {
            Some(Ok(())) => {
                if let Some(sent) = sent {
                    _ = sent.send(Ok(()));
                }
            }
            Some(Err(err)) => {
                if let Some(sent) = sent {
                    _ = sent.send(Err(err.clone()));
                }
                return Err(err);
            }
            // Dropping `sent` fails the caller.
            None => break,
        }
    }

    outbound.close();
    while let Ok(Some(Outbound { frame, .. })) = outbound.try_next() {
        if sink.send(frame).now_or_never().is_none() {
            debug!("peer is not reading, dropping queued frames");
            break;
        }
    }

    if let Some(Err(e)) = sink.close().now_or_never() {
        debug!("error closing transport: {e}");
    }

    Ok(())
}
