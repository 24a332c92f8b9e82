//! The callback work unit and its per-operation hooks.
//!
//! A [`Callback`] is created by the forward-path operation that needs the
//! client notified (a delegation recall, a layout recall, a completed
//! offload, ...), submitted to the owning client's executor with
//! [`crate::engine::run_cb`], and destroyed exactly once when the release
//! phase finds no requeue pending.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::client::Client;
use crate::nfs4::{CbOpcode, ClientId, FileHandle, SessionId, StableHow, Stateid, Verifier};
use crate::parser::get_attr::DelegAttrs;
use crate::status::{OpStatus, SeqStatus};

/// Callback flag bits.
pub mod flags {
    /// Set while the callback sits in the executor queue; submission dedup.
    pub const QUEUED: u32 = 1 << 0;
    /// Set from submission until final destruction, across requeues.
    pub const RUNNING: u32 = 1 << 1;
    /// The next release phase must re-enqueue instead of destroying.
    pub const REQUEUE: u32 = 1 << 2;
    /// Someone waits for RUNNING to clear; destruction must wake them.
    pub const WAKE: u32 = 1 << 3;
}

/// Instruction a callback's `done` hook returns to the RPC task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Restart the RPC; the operation wants another attempt.
    Restart,
    /// Accept this result.
    Accept,
}

/// Hooks an operation supplies around its callback's lifecycle.
///
/// All three run serialized with respect to the owning client's executor or
/// the callback's single RPC task; implementations need no further locking
/// against the engine.
pub trait CallbackOps: Send + Sync {
    /// Runs once before the first transmission. Requeued callbacks skip it.
    fn prepare(&self, _cb: &Callback) {}

    /// Consumes one completed attempt and decides whether to retry.
    fn done(&self, cb: &Callback, status: OpStatus) -> Disposition;

    /// Final release of the outer state, once per callback lifetime.
    fn release(&self, _cb: &Callback) {}
}

/// Op-specific payload carried by a callback.
pub enum CallbackArgs {
    /// NULL-procedure probe; carries no operation.
    Null,
    Recall(RecallArgs),
    RecallAny(RecallAnyArgs),
    GetAttr(GetAttrArgs),
    LayoutRecall(LayoutRecallArgs),
    NotifyLock(NotifyLockArgs),
    Offload(OffloadArgs),
}

pub struct RecallArgs {
    pub stateid: Stateid,
    pub fh: FileHandle,
}

pub struct RecallAnyArgs {
    pub objects_to_keep: u32,
    pub type_mask: Vec<u32>,
}

pub struct GetAttrArgs {
    pub fh: FileHandle,
    /// True once the delegation already knows of a modification; CHANGE is
    /// then not worth asking for.
    pub file_modified: bool,
    /// The delegation carries delegated timestamps.
    pub deleg_timestamps: bool,
}

pub struct LayoutRecallArgs {
    pub layout_type: u32,
    pub fh: FileHandle,
    pub stateid: Stateid,
}

pub struct NotifyLockArgs {
    pub fh: FileHandle,
    pub clientid: ClientId,
    pub owner: Vec<u8>,
}

pub struct OffloadArgs {
    pub fh: FileHandle,
    pub stateid: Stateid,
    pub info: OffloadInfo,
}

/// Completion report carried by CB_OFFLOAD.
pub enum OffloadInfo {
    Complete(WriteResponse),
    /// The copy failed with this NFS status before writing anything.
    Failed(u32),
}

pub struct WriteResponse {
    pub bytes_written: u64,
    pub committed: StableHow,
    pub verifier: Verifier,
}

impl CallbackArgs {
    /// Operation number encoded for this payload; `None` for the NULL probe.
    pub fn opcode(&self) -> Option<CbOpcode> {
        match self {
            CallbackArgs::Null => None,
            CallbackArgs::Recall(_) => Some(CbOpcode::Recall),
            CallbackArgs::RecallAny(_) => Some(CbOpcode::RecallAny),
            CallbackArgs::GetAttr(_) => Some(CbOpcode::GetAttr),
            CallbackArgs::LayoutRecall(_) => Some(CbOpcode::LayoutRecall),
            CallbackArgs::NotifyLock(_) => Some(CbOpcode::NotifyLock),
            CallbackArgs::Offload(_) => Some(CbOpcode::Offload),
        }
    }
}

/// One referring call: a forward-direction compound the client has seen
/// complete on `(slotid, sequenceid)` of the list's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferringCall {
    pub sequenceid: u32,
    pub slotid: u32,
}

/// Referring calls grouped by the session they were observed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferringCallList {
    pub sessionid: SessionId,
    pub calls: Vec<ReferringCall>,
}

pub(crate) struct CbState {
    pub(crate) seq_status: SeqStatus,
    pub(crate) status: OpStatus,
    /// Slot reserved for the current attempt; `None` outside an attempt or
    /// after a deliberate leak.
    pub(crate) held_slot: Option<u32>,
    pub(crate) referring: Vec<ReferringCallList>,
    /// CB_GETATTR reply attributes, once decoded.
    pub(crate) attrs: Option<DelegAttrs>,
}

/// A unit of callback work bound to one client.
pub struct Callback {
    client: Arc<Client>,
    ops: Option<Arc<dyn CallbackOps>>,
    args: CallbackArgs,
    flags: AtomicU32,
    state: Mutex<CbState>,
    completion: Notify,
}

impl Callback {
    /// Initializes a callback against `client`. Probe callbacks pass no ops
    /// and [`CallbackArgs::Null`].
    pub fn new(
        client: Arc<Client>,
        ops: Option<Arc<dyn CallbackOps>>,
        args: CallbackArgs,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            ops,
            args,
            flags: AtomicU32::new(0),
            state: Mutex::new(CbState {
                seq_status: SeqStatus::NoReply,
                status: Ok(()),
                held_slot: None,
                referring: Vec::new(),
                attrs: None,
            }),
            completion: Notify::new(),
        })
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn args(&self) -> &CallbackArgs {
        &self.args
    }

    pub fn opcode(&self) -> Option<CbOpcode> {
        self.args.opcode()
    }

    pub(crate) fn ops(&self) -> Option<&Arc<dyn CallbackOps>> {
        self.ops.as_ref()
    }

    /// Records that the forward-path compound which motivated this callback
    /// was observed at `(slotid, seqno)` of session `sessionid`. Duplicate
    /// entries are folded.
    ///
    /// Callers serialize access: referring calls are added before submission.
    pub fn add_referring_call(&self, sessionid: &SessionId, slotid: u32, seqno: u32) {
        let mut state = self.state.lock().unwrap();
        let idx = match state.referring.iter().position(|l| l.sessionid == *sessionid) {
            Some(idx) => idx,
            None => {
                state.referring.push(ReferringCallList { sessionid: *sessionid, calls: Vec::new() });
                state.referring.len() - 1
            }
        };
        let list = &mut state.referring[idx];
        let call = ReferringCall { sequenceid: seqno, slotid };
        if !list.calls.contains(&call) {
            list.calls.push(call);
        }
    }

    /// Releases the referring-call bookkeeping after completion.
    pub fn destroy_referring_call_list(&self) {
        self.state.lock().unwrap().referring.clear();
    }

    /// Attributes the client reported to the last CB_GETATTR, if any.
    pub fn delegation_attrs(&self) -> Option<DelegAttrs> {
        self.state.lock().unwrap().attrs
    }

    /// Operation-level status of the current attempt.
    pub fn op_status(&self) -> OpStatus {
        self.state.lock().unwrap().status
    }

    /// True from submission until final destruction.
    pub fn is_running(&self) -> bool {
        self.test_flag(flags::RUNNING)
    }

    /// Waits until the callback has been destroyed (released for the last
    /// time). Returns immediately if it never ran or already finished.
    pub async fn wait_completed(&self) {
        self.set_flag(flags::WAKE);
        loop {
            if !self.is_running() {
                return;
            }
            let notified = self.completion.notified();
            tokio::pin!(notified);
            // Register before the recheck so a wakeup can't fall between
            // the two.
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn state(&self) -> std::sync::MutexGuard<'_, CbState> {
        self.state.lock().unwrap()
    }

    /// Resets the per-attempt status fields before (re)transmission.
    ///
    /// `seq_status` starts as [`SeqStatus::NoReply`] and only the reply
    /// decoder moves it, so it still reads "no reply" after an RPC-level
    /// failure.
    pub(crate) fn reset_attempt(&self) {
        let mut state = self.state.lock().unwrap();
        state.seq_status = SeqStatus::NoReply;
        state.status = Ok(());
    }

    pub(crate) fn set_flag(&self, bit: u32) {
        self.flags.fetch_or(bit, Ordering::SeqCst);
    }

    pub(crate) fn test_flag(&self, bit: u32) -> bool {
        self.flags.load(Ordering::SeqCst) & bit != 0
    }

    pub(crate) fn test_and_set_flag(&self, bit: u32) -> bool {
        self.flags.fetch_or(bit, Ordering::SeqCst) & bit != 0
    }

    pub(crate) fn test_and_clear_flag(&self, bit: u32) -> bool {
        self.flags.fetch_and(!bit, Ordering::SeqCst) & bit != 0
    }

    /// Clears RUNNING and wakes completion waiters if any asked to be woken.
    pub(crate) fn clear_running(&self) {
        let wake = self.test_flag(flags::WAKE);
        self.flags.fetch_and(!flags::RUNNING, Ordering::SeqCst);
        if wake {
            self.completion.notify_waiters();
        }
    }
}
