//! RPC client facade over the connection to the runtime process.
//!
//! The client owns everything that lives for the length of one connection:
//! the outbound frame channel, the booted process handle and the table of
//! calls waiting for a reply. Handlers and lifecycle observers outlive
//! connections and are invoked with every internal lock released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use julia_console_core::{Error, Result, Subscription};
use julia_console_terminal::PtyStream;

/// One unit on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Fire-and-forget notification
    Message {
        /// Handler name
        name: String,
        /// Positional arguments
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Request expecting a `Response` or `Error` with the same id
    Call {
        /// Correlation id
        id: u64,
        /// Procedure name
        name: String,
        /// Positional arguments
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Successful reply
    Response {
        /// Correlation id
        id: u64,
        /// Returned value
        #[serde(default)]
        result: Value,
    },
    /// Failed reply
    Error {
        /// Correlation id
        id: u64,
        /// Failure description
        message: String,
    },
}

/// Writers handed to a flush function, one per output channel.
pub struct OutputSink<'a> {
    /// Standard output
    pub stdout: &'a dyn Fn(&str),
    /// Standard error
    pub stderr: &'a dyn Fn(&str),
}

/// Replays output the process produced before a terminal was attached.
pub type FlushFn = Box<dyn FnOnce(OutputSink<'_>) + Send>;

/// What a boot hands to observers: the process's terminal stream and an
/// optional replay of its early output.
pub struct ProcessHandle {
    stream: Arc<dyn PtyStream>,
    flush: Mutex<Option<FlushFn>>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle").finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Wrap a stream without buffered output.
    pub fn new(stream: Arc<dyn PtyStream>) -> Self {
        Self {
            stream,
            flush: Mutex::new(None),
        }
    }

    /// Attach a flush function.
    pub fn with_flush(self, flush: FlushFn) -> Self {
        *lock(&self.flush) = Some(flush);
        self
    }

    /// The process's terminal stream.
    pub fn stream(&self) -> Arc<dyn PtyStream> {
        Arc::clone(&self.stream)
    }

    /// Take the flush function. Returns `None` after the first call.
    pub fn take_flush(&self) -> Option<FlushFn> {
        lock(&self.flush).take()
    }
}

/// Starts the runtime process. Expected to call [`RpcClient::connect`]
/// once the process is reachable.
pub trait Booter: Send + Sync {
    /// Begin booting.
    fn boot(&self, client: Arc<RpcClient>) -> Result<()>;
}

/// Handler for remote-initiated messages and calls.
pub type Handler = Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>;

type BootObserver = Arc<dyn Fn(&Arc<ProcessHandle>) + Send + Sync>;
type DetachObserver = Arc<dyn Fn() + Send + Sync>;
type Reply = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct ClientState {
    connection: Option<Connection>,
    pending: HashMap<u64, (String, Reply)>,
    handlers: HashMap<String, (u64, Handler)>,
    boot_observers: Vec<(u64, BootObserver)>,
    detach_observers: Vec<(u64, DetachObserver)>,
}

struct Connection {
    id: u64,
    outbound: mpsc::UnboundedSender<Frame>,
    process: Arc<ProcessHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Typed proxy to the runtime process.
pub struct RpcClient {
    state: Arc<Mutex<ClientState>>,
    booter: Mutex<Option<Arc<dyn Booter>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Create a disconnected client.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(ClientState::default())),
            booter: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        lock(&self.state)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Install the process booter.
    pub fn set_booter(&self, booter: Arc<dyn Booter>) {
        *lock(&self.booter) = Some(booter);
    }

    /// Ask the booter to start the runtime process.
    pub fn boot(self: &Arc<Self>) -> Result<()> {
        let booter = lock(&self.booter).clone();
        match booter {
            Some(booter) => {
                info!("Booting runtime process");
                booter.boot(Arc::clone(self))
            }
            None => Err(Error::InvalidInput("no booter installed".to_string())),
        }
    }

    /// Whether a process is connected.
    pub fn is_connected(&self) -> bool {
        self.state().connection.is_some()
    }

    /// The connected process, if any.
    pub fn process(&self) -> Option<Arc<ProcessHandle>> {
        self.state()
            .connection
            .as_ref()
            .map(|c| Arc::clone(&c.process))
    }

    /// Connect a booted process. Frames the client sends go to `outbound`.
    ///
    /// An existing connection is ended first. Boot observers run in
    /// registration order. Returns the connection id for
    /// [`RpcClient::end_connection`].
    pub fn connect(&self, process: ProcessHandle, outbound: mpsc::UnboundedSender<Frame>) -> u64 {
        if self.is_connected() {
            info!("Replacing live connection");
            self.disconnect();
        }

        let id = self.next_id();
        let process = Arc::new(process);
        let observers: Vec<BootObserver> = {
            let mut state = self.state();
            state.connection = Some(Connection {
                id,
                outbound,
                process: Arc::clone(&process),
            });
            state.boot_observers.iter().map(|(_, o)| Arc::clone(o)).collect()
        };

        info!("Runtime process connected (connection {})", id);
        for observer in observers {
            observer(&process);
        }
        id
    }

    /// Drop the connection, fail in-flight calls and notify detach observers.
    ///
    /// Does nothing when already disconnected.
    pub fn disconnect(&self) {
        let (observers, pending) = {
            let mut state = self.state();
            if state.connection.take().is_none() {
                debug!("disconnect() while not connected");
                return;
            }
            let pending = std::mem::take(&mut state.pending);
            let observers: Vec<DetachObserver> = state
                .detach_observers
                .iter()
                .map(|(_, o)| Arc::clone(o))
                .collect();
            (observers, pending)
        };

        info!(
            "Runtime process detached, failing {} pending call(s)",
            pending.len()
        );
        drop(pending);
        for observer in observers {
            observer();
        }
    }

    /// Disconnect only if connection `id` is still the live one.
    pub fn end_connection(&self, id: u64) {
        let live = self.state().connection.as_ref().map(|c| c.id);
        if live == Some(id) {
            self.disconnect();
        } else {
            debug!("Connection {} already superseded", id);
        }
    }

    /// Fail every call still waiting for a reply.
    pub fn reset_pending(&self) {
        let pending = std::mem::take(&mut self.state().pending);
        if !pending.is_empty() {
            debug!("Dropped {} pending call(s)", pending.len());
        }
    }

    /// Calls waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    /// Send a fire-and-forget message. Dropped when disconnected.
    pub fn send_message(&self, name: &str, args: Vec<Value>) {
        let state = self.state();
        let Some(connection) = state.connection.as_ref() else {
            debug!("Dropping message `{}`: not connected", name);
            return;
        };
        debug!("-> message {}", name);
        let frame = Frame::Message {
            name: name.to_string(),
            args,
        };
        if connection.outbound.send(frame).is_err() {
            debug!("Dropping message `{}`: transport closed", name);
        }
    }

    /// Call a remote procedure and wait for its reply.
    ///
    /// Fails with [`Error::RemoteDisconnected`] if the connection ends first.
    pub async fn call_remote(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let rx = {
            let mut state = self.state();
            let Some(outbound) = state.connection.as_ref().map(|c| c.outbound.clone()) else {
                return Err(Error::RemoteDisconnected(name.to_string()));
            };
            let id = self.next_id();
            let (tx, rx) = oneshot::channel();
            state.pending.insert(id, (name.to_string(), tx));
            debug!("-> call {} #{}", name, id);
            let frame = Frame::Call {
                id,
                name: name.to_string(),
                args,
            };
            if outbound.send(frame).is_err() {
                state.pending.remove(&id);
                return Err(Error::RemoteDisconnected(name.to_string()));
            }
            rx
        };

        rx.await
            .unwrap_or_else(|_| Err(Error::RemoteDisconnected(name.to_string())))
    }

    /// [`RpcClient::call_remote`] with the reply deserialized.
    pub async fn call<T: DeserializeOwned>(&self, name: &str, args: Vec<Value>) -> Result<T> {
        let value = self.call_remote(name, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Handle remote pushes named `name`. A later registration for the same
    /// name replaces this one.
    pub fn on_message<F>(&self, name: &str, handler: F) -> Subscription
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        let key = self.next_id();
        let handler: Handler = Arc::new(handler);
        let previous = self
            .state()
            .handlers
            .insert(name.to_string(), (key, handler));
        if previous.is_some() {
            debug!("Handler for `{}` replaced", name);
        }

        let state = Arc::downgrade(&self.state);
        let name = name.to_string();
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                let mut state = lock(&state);
                if state.handlers.get(&name).is_some_and(|(k, _)| *k == key) {
                    state.handlers.remove(&name);
                }
            }
        })
    }

    /// Whether a handler is registered for `name`.
    pub fn has_handler(&self, name: &str) -> bool {
        self.state().handlers.contains_key(name)
    }

    /// Observe every boot.
    pub fn on_boot<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&Arc<ProcessHandle>) + Send + Sync + 'static,
    {
        let key = self.next_id();
        let observer: BootObserver = Arc::new(observer);
        self.state().boot_observers.push((key, observer));
        self.release(key)
    }

    /// Observe every detach.
    pub fn on_detached<F>(&self, observer: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = self.next_id();
        let observer: DetachObserver = Arc::new(observer);
        self.state().detach_observers.push((key, observer));
        self.release(key)
    }

    fn release(&self, key: u64) -> Subscription {
        let state: Weak<Mutex<ClientState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                let mut state = lock(&state);
                state.boot_observers.retain(|(k, _)| *k != key);
                state.detach_observers.retain(|(k, _)| *k != key);
            }
        })
    }

    /// Registered boot and detach observers.
    pub fn observer_count(&self) -> (usize, usize) {
        let state = self.state();
        (state.boot_observers.len(), state.detach_observers.len())
    }

    /// Dispatch one inbound frame.
    pub fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Message { name, args } => {
                debug!("<- message {}", name);
                if let Err(e) = self.dispatch(&name, args) {
                    warn!("Message `{}` failed: {}", name, e);
                }
            }
            Frame::Call { id, name, args } => {
                debug!("<- call {} #{}", name, id);
                let reply = match self.dispatch(&name, args) {
                    Ok(result) => Frame::Response { id, result },
                    Err(e) => Frame::Error {
                        id,
                        message: e.to_string(),
                    },
                };
                self.send_frame(reply);
            }
            Frame::Response { id, result } => self.complete(id, Ok(result)),
            Frame::Error { id, message } => self.complete_with_error(id, message),
        }
    }

    fn dispatch(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let handler = self.state().handlers.get(name).map(|(_, h)| Arc::clone(h));
        match handler {
            Some(handler) => handler(args),
            None => Err(Error::UnknownHandler(name.to_string())),
        }
    }

    fn send_frame(&self, frame: Frame) {
        let state = self.state();
        match state.connection.as_ref() {
            Some(connection) => {
                let _ = connection.outbound.send(frame);
            }
            None => debug!("Dropping reply: not connected"),
        }
    }

    fn complete(&self, id: u64, result: Result<Value>) {
        let entry = self.state().pending.remove(&id);
        match entry {
            Some((name, reply)) => {
                debug!("<- reply {} #{}", name, id);
                let _ = reply.send(result);
            }
            None => debug!("Reply #{} has no pending call", id),
        }
    }

    fn complete_with_error(&self, id: u64, message: String) {
        let entry = self.state().pending.remove(&id);
        if let Some((name, reply)) = entry {
            warn!("Remote call `{}` failed: {}", name, message);
            let _ = reply.send(Err(Error::RemoteError { name, message }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use julia_console_terminal::MemoryPty;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn connect(client: &RpcClient) -> (u64, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = client.connect(ProcessHandle::new(MemoryPty::new()), tx);
        (id, rx)
    }

    #[test]
    fn test_frame_wire_format() {
        let frame = Frame::Call {
            id: 3,
            name: "validatepath".to_string(),
            args: vec![json!("/a/b.jl")],
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert_eq!(
            text,
            r#"{"type":"call","id":3,"name":"validatepath","args":["/a/b.jl"]}"#
        );

        let parsed: Frame = serde_json::from_str(r#"{"type":"message","name":"clearconsole"}"#).unwrap();
        assert_eq!(
            parsed,
            Frame::Message {
                name: "clearconsole".to_string(),
                args: vec![]
            }
        );
    }

    #[tokio::test]
    async fn test_call_remote_round_trip() {
        let client = RpcClient::new();
        let (_, mut rx) = connect(&client);

        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call::<bool>("validatepath", vec![json!("/x")]).await })
        };

        let Some(Frame::Call { id, name, .. }) = rx.recv().await else {
            panic!("expected a call frame");
        };
        assert_eq!(name, "validatepath");
        assert_eq!(client.pending_count(), 1);
        client.handle_frame(Frame::Response {
            id,
            result: json!(true),
        });

        assert!(call.await.unwrap().unwrap());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_call_remote_error_reply() {
        let client = RpcClient::new();
        let (_, mut rx) = connect(&client);
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call_remote("fullpath", vec![]).await })
        };
        let Some(Frame::Call { id, .. }) = rx.recv().await else {
            panic!("expected a call frame");
        };
        client.handle_frame(Frame::Error {
            id,
            message: "boom".to_string(),
        });
        assert!(matches!(
            call.await.unwrap(),
            Err(Error::RemoteError { .. })
        ));
    }

    #[tokio::test]
    async fn test_disconnect_fails_in_flight_calls() {
        let client = RpcClient::new();
        let (_, mut rx) = connect(&client);
        let call = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call_remote("fullpath", vec![]).await })
        };
        rx.recv().await.unwrap();

        client.disconnect();
        let result = call.await.unwrap();
        assert!(matches!(result, Err(Error::RemoteDisconnected(ref n)) if n == "fullpath"));
    }

    #[tokio::test]
    async fn test_call_while_disconnected_fails_immediately() {
        let client = RpcClient::new();
        let result = client.call_remote("validatepath", vec![]).await;
        assert!(matches!(result, Err(Error::RemoteDisconnected(_))));
    }

    #[test]
    fn test_send_message_while_disconnected_is_dropped() {
        let client = RpcClient::new();
        client.send_message("resetprompt", vec![]);
        let (_, mut rx) = connect(&client);
        client.send_message("changeprompt", vec![json!("julia> ")]);
        assert_eq!(
            rx.try_recv().unwrap(),
            Frame::Message {
                name: "changeprompt".to_string(),
                args: vec![json!("julia> ")]
            }
        );
    }

    #[test]
    fn test_lifecycle_observers_in_order() {
        let client = RpcClient::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            subs.push(client.on_boot(move |_| order.lock().unwrap().push(format!("boot{i}"))));
        }
        let o = Arc::clone(&order);
        subs.push(client.on_detached(move || o.lock().unwrap().push("detach".to_string())));
        assert_eq!(client.observer_count(), (3, 1));

        let (_, _rx) = connect(&client);
        client.disconnect();
        client.disconnect();
        assert_eq!(
            *order.lock().unwrap(),
            vec!["boot0", "boot1", "boot2", "detach"]
        );

        subs.clear();
        assert_eq!(client.observer_count(), (0, 0));
    }

    #[test]
    fn test_last_handler_registration_wins() {
        let client = RpcClient::new();
        let first = client.on_message("cursorpos", |_| Ok(json!(1)));
        let _second = client.on_message("cursorpos", |_| Ok(json!(2)));
        // Releasing the replaced registration leaves the new one alone
        first.unsubscribe();
        assert!(client.has_handler("cursorpos"));

        let (_, mut rx) = connect(&client);
        client.handle_frame(Frame::Call {
            id: 9,
            name: "cursorpos".to_string(),
            args: vec![],
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            Frame::Response {
                id: 9,
                result: json!(2)
            }
        );
    }

    #[test]
    fn test_unknown_handler_replies_with_error() {
        let client = RpcClient::new();
        let (_, mut rx) = connect(&client);
        client.handle_frame(Frame::Call {
            id: 1,
            name: "nope".to_string(),
            args: vec![],
        });
        assert!(matches!(rx.try_recv().unwrap(), Frame::Error { id: 1, .. }));
    }

    #[test]
    fn test_message_handler_invoked() {
        let client = RpcClient::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = client.on_message("clearconsole", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
        client.handle_frame(Frame::Message {
            name: "clearconsole".to_string(),
            args: vec![],
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_end_connection_ignores_superseded() {
        let client = RpcClient::new();
        let detaches = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&detaches);
        let _sub = client.on_detached(move || {
            d.fetch_add(1, Ordering::SeqCst);
        });

        let (first, _rx1) = connect(&client);
        let (second, _rx2) = connect(&client);
        assert_eq!(detaches.load(Ordering::SeqCst), 1);

        client.end_connection(first);
        assert!(client.is_connected());
        client.end_connection(second);
        assert!(!client.is_connected());
        assert_eq!(detaches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flush_taken_once() {
        let handle = ProcessHandle::new(MemoryPty::new()).with_flush(Box::new(|sink| {
            (sink.stdout)("out");
            (sink.stderr)("err");
        }));
        let seen = Mutex::new(String::new());
        let write = |s: &str| seen.lock().unwrap().push_str(s);
        let flush = handle.take_flush().unwrap();
        flush(OutputSink {
            stdout: &write,
            stderr: &write,
        });
        assert_eq!(*seen.lock().unwrap(), "outerr");
        assert!(handle.take_flush().is_none());
    }

    #[test]
    fn test_boot_without_booter() {
        let client = RpcClient::new();
        assert!(client.boot().is_err());
    }
}
