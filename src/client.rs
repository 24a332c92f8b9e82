//! Per-client callback channel state.
//!
//! Every client owns a single-threaded executor: one spawned task draining
//! an unbounded queue of submitted callbacks. Backchannel construction and
//! teardown, the RPC client handle, and the `CB_UPDATE` flag are touched
//! only from that task, so none of them need locking against each other.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::callback::{Callback, CallbackArgs};
use crate::engine::{self, CallbackEnv};
use crate::session::Session;
use crate::transport::{CbConn, Credential, ForwardCred, RpcChannel};

/// The backchannel needs (re)construction before the next send.
pub const CB_UPDATE: u32 = 1 << 0;
/// The client is being torn down; pending callbacks must not send.
pub const CB_KILL: u32 = 1 << 1;

/// Health of a client's callback channel, the engine's single outward
/// signal toward delegation and layout policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum ChannelState {
    /// No probe has completed since the channel parameters last changed.
    Unknown = 0,
    /// The last probe or callback round trip succeeded.
    Up = 1,
    /// The transport is unreachable; retriable once parameters change.
    Down = 2,
    /// Client and server disagree about session state; the client must
    /// destroy and recreate its session.
    Fault = 3,
}

/// Identity and credentials a client brings to the callback engine.
#[derive(Debug, Clone)]
pub struct ClientParams {
    pub id: u64,
    /// NFSv4 minor version: 0, or 1 and above (session-based).
    pub minorversion: u32,
    /// Forward-direction credential, used to construct v4.0 backchannels.
    pub cred: ForwardCred,
}

#[derive(Clone)]
pub(crate) struct RpcHandle {
    pub(crate) chan: Arc<dyn RpcChannel>,
    pub(crate) cred: Credential,
}

/// One NFSv4 client as the callback engine sees it.
pub struct Client {
    id: u64,
    minorversion: u32,
    cred: ForwardCred,
    env: Arc<CallbackEnv>,
    flags: AtomicU32,
    state: AtomicU32,
    courtesy: AtomicBool,
    inflight: AtomicU32,
    quiesced: Notify,
    /// Wait queue for callbacks parked on slot acquisition.
    slot_waitq: Notify,
    /// v4.0 callback ident, copied into every compound header.
    ident: AtomicU32,
    /// Sessions and pending connection parameters, under the client lock.
    inner: Mutex<Inner>,
    /// Active backchannel session (minorversion >= 1).
    cb_session: Mutex<Option<Arc<Session>>>,
    /// RPC client handle and credential. Written only by the executor.
    rpc: Mutex<Option<RpcHandle>>,
    work_tx: mpsc::UnboundedSender<Arc<Callback>>,
}

struct Inner {
    sessions: Vec<Arc<Session>>,
    conn: CbConn,
}

impl Client {
    /// Registers a client and spawns its callback executor. The executor
    /// task ends when the last reference to the client is dropped.
    pub fn new(params: ClientParams, env: Arc<CallbackEnv>) -> Arc<Self> {
        let (work_tx, mut work_rx) = mpsc::unbounded_channel::<Arc<Callback>>();
        let client = Arc::new(Self {
            id: params.id,
            minorversion: params.minorversion,
            cred: params.cred,
            env,
            flags: AtomicU32::new(0),
            state: AtomicU32::new(ChannelState::Unknown as u32),
            courtesy: AtomicBool::new(false),
            inflight: AtomicU32::new(0),
            quiesced: Notify::new(),
            slot_waitq: Notify::new(),
            ident: AtomicU32::new(0),
            inner: Mutex::new(Inner { sessions: Vec::new(), conn: CbConn::default() }),
            cb_session: Mutex::new(None),
            rpc: Mutex::new(None),
            work_tx,
        });
        tokio::spawn(async move {
            while let Some(cb) = work_rx.recv().await {
                engine::run_cb_work(cb).await;
            }
        });
        client
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn minorversion(&self) -> u32 {
        self.minorversion
    }

    pub fn cred(&self) -> &ForwardCred {
        &self.cred
    }

    pub(crate) fn env(&self) -> &Arc<CallbackEnv> {
        &self.env
    }

    /// Current channel health.
    pub fn channel_state(&self) -> ChannelState {
        ChannelState::from_u32(self.state.load(Ordering::SeqCst)).unwrap_or(ChannelState::Unknown)
    }

    pub(crate) fn mark_state(&self, new: ChannelState) {
        let new_raw = new.to_u32().unwrap_or_default();
        if self.state.swap(new_raw, Ordering::SeqCst) != new_raw {
            debug!(client = self.id, state = ?new, "callback channel state change");
        }
    }

    /// Marks the channel unreachable, unless a reconstruction is already
    /// pending and will decide the state itself.
    pub(crate) fn mark_down(&self) {
        if self.test_flags(CB_UPDATE) {
            return;
        }
        self.mark_state(ChannelState::Down);
    }

    /// Marks the channel faulted: the client holds session state the server
    /// no longer agrees with.
    pub(crate) fn mark_fault(&self) {
        if self.test_flags(CB_UPDATE) {
            return;
        }
        self.mark_state(ChannelState::Fault);
    }

    pub(crate) fn flags(&self) -> u32 {
        self.flags.load(Ordering::SeqCst)
    }

    pub(crate) fn test_flags(&self, bits: u32) -> bool {
        self.flags() & bits != 0
    }

    pub(crate) fn set_flag(&self, bit: u32) {
        self.flags.fetch_or(bit, Ordering::SeqCst);
    }

    /// Only the executor clears `CB_UPDATE`; forward-path code may only set
    /// flag bits.
    pub(crate) fn clear_flag(&self, bit: u32) {
        self.flags.fetch_and(!bit, Ordering::SeqCst);
    }

    /// Requests backchannel reconstruction before the next callback send.
    /// Forward-path entry point; the executor clears the flag.
    pub fn mark_channel_update(&self) {
        self.set_flag(CB_UPDATE);
    }

    /// Places the client in (or lifts it out of) courtesy hold. Held clients
    /// destroy submitted callbacks without I/O.
    pub fn set_courtesy(&self, courtesy: bool) {
        self.courtesy.store(courtesy, Ordering::SeqCst);
    }

    pub(crate) fn courtesy(&self) -> bool {
        self.courtesy.load(Ordering::SeqCst)
    }

    /// Number of callbacks submitted and not yet released.
    pub fn inflight(&self) -> u32 {
        self.inflight.load(Ordering::SeqCst)
    }

    pub(crate) fn inflight_begin(&self) {
        self.inflight.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn inflight_end(&self) {
        if self.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.quiesced.notify_waiters();
        }
    }

    pub(crate) async fn wait_inflight_complete(&self) {
        loop {
            if self.inflight() == 0 {
                return;
            }
            let notified = self.quiesced.notified();
            tokio::pin!(notified);
            // Register before the recheck so a wakeup can't fall between
            // the two.
            notified.as_mut().enable();
            if self.inflight() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn slot_waitq(&self) -> &Notify {
        &self.slot_waitq
    }

    pub(crate) fn ident(&self) -> u32 {
        self.ident.load(Ordering::SeqCst)
    }

    pub(crate) fn set_ident(&self, ident: u32) {
        self.ident.store(ident, Ordering::SeqCst);
    }

    /// Attaches a session created on the forward path.
    pub fn add_session(&self, session: Arc<Session>) {
        self.inner.lock().unwrap().sessions.push(session);
    }

    /// Removes a destroyed session from the client's list.
    pub fn remove_session(&self, id: &crate::nfs4::SessionId) {
        self.inner.lock().unwrap().sessions.retain(|s| s.id() != id);
    }

    /// Locates a session holding a client-bound backchannel connection.
    pub(crate) fn find_backchannel(&self) -> Option<(Arc<dyn RpcChannel>, Arc<Session>)> {
        let inner = self.inner.lock().unwrap();
        for session in &inner.sessions {
            if let Some(xprt) = session.backchannel() {
                return Some((xprt, session.clone()));
            }
        }
        None
    }

    /// Active backchannel session, if one has been selected.
    pub fn cb_session(&self) -> Option<Arc<Session>> {
        self.cb_session.lock().unwrap().clone()
    }

    pub(crate) fn set_cb_session(&self, session: Arc<Session>) {
        *self.cb_session.lock().unwrap() = Some(session);
    }

    pub(crate) fn conn_snapshot(&self) -> CbConn {
        self.inner.lock().unwrap().conn.clone()
    }

    pub(crate) fn clear_conn_xprt(&self) {
        self.inner.lock().unwrap().conn.xprt = None;
    }

    pub(crate) fn set_conn_xprt(&self, xprt: Arc<dyn RpcChannel>) {
        self.inner.lock().unwrap().conn.xprt = Some(xprt);
    }

    pub(crate) fn rpc_handle(&self) -> Option<RpcHandle> {
        self.rpc.lock().unwrap().clone()
    }

    pub(crate) fn store_rpc(&self, handle: RpcHandle) {
        *self.rpc.lock().unwrap() = Some(handle);
    }

    pub(crate) fn take_rpc(&self) -> Option<RpcHandle> {
        self.rpc.lock().unwrap().take()
    }

    pub(crate) fn enqueue(&self, cb: Arc<Callback>) {
        // The executor outlives every possible caller: it exits only once
        // the client (and with it all callbacks) is gone.
        let _ = self.work_tx.send(cb);
    }

    /// Installs new connection parameters for the backchannel and resets the
    /// channel state pending the next probe.
    pub fn change_callback(&self, conn: CbConn) {
        self.mark_state(ChannelState::Unknown);
        self.inner.lock().unwrap().conn = conn;
    }

    /// Pokes the executor to process any updates to the callback parameters
    /// and send a null probe.
    pub fn probe_callback(self: &Arc<Self>) {
        trace!(client = self.id, "probe callback channel");
        self.mark_state(ChannelState::Unknown);
        self.set_flag(CB_UPDATE);
        let probe = Callback::new(self.clone(), None, CallbackArgs::Null);
        engine::run_cb(&probe);
    }

    /// Like [`Client::probe_callback`], but waits for the probe to finish.
    pub async fn probe_callback_sync(self: &Arc<Self>) {
        trace!(client = self.id, "probe callback channel (sync)");
        self.mark_state(ChannelState::Unknown);
        self.set_flag(CB_UPDATE);
        let probe = Callback::new(self.clone(), None, CallbackArgs::Null);
        engine::run_cb(&probe);
        probe.wait_completed().await;
    }

    /// Tears the callback channel down: pending and future callbacks are
    /// destroyed without sending, and this returns once every submitted
    /// callback has been released.
    pub async fn shutdown_callback(self: &Arc<Self>) {
        if self.channel_state() != ChannelState::Unknown {
            debug!(client = self.id, "shutting down callback channel");
        }
        self.set_flag(CB_KILL);
        // Not an actual probe: the executor sees the killed client, destroys
        // the RPC client, and stops. Queued behind every pending callback,
        // it also flushes the queue.
        let probe = Callback::new(self.clone(), None, CallbackArgs::Null);
        engine::run_cb(&probe);
        self.wait_inflight_complete().await;
    }
}
