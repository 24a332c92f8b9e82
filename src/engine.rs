//! The callback executor: submission, backchannel (re)construction, the RPC
//! task lifecycle, and the CB_SEQUENCE retry/fault state machine.
//!
//! There isn't a lot of locking in this code; instead it depends on each
//! client's executor running one work item at a time. All access to the
//! client's RPC handle and every channel construction or teardown happens
//! from [`run_cb_work`]. The RPC task spawned per transmission only touches
//! its own callback's state and the slot table.

use std::io::{self, Cursor, ErrorKind};
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::callback::{flags, Callback, CallbackArgs, Disposition};
use crate::client::{ChannelState, Client, RpcHandle, CB_KILL, CB_UPDATE};
use crate::config::CallbackConfig;
use crate::nfs4::{nfsstat, CbOpcode, NFS4_CALLBACK_VERSION, PROC_CB_COMPOUND, PROC_CB_NULL};
use crate::parser;
use crate::serializer::cb::{
    compound, get_attr, layout_recall, notify_lock, offload, recall, recall_any, sequence,
};
use crate::session::Session;
use crate::status::{Error, OpStatus, SeqStatus};
use crate::transport::{
    AuthFlavor, CbConn, ChannelFactory, CredentialFactory, DialParams, TransportError,
};

/// Shared environment the engine works in: the transport and credential
/// seams of the enclosing server, plus tuning knobs.
pub struct CallbackEnv {
    pub factory: Arc<dyn ChannelFactory>,
    pub credentials: Arc<dyn CredentialFactory>,
    pub config: CallbackConfig,
}

/// Queues a callback to run. Returns false if it was already on the queue,
/// true otherwise.
///
/// Non-blocking; forward-path callers may hold their own locks.
pub fn run_cb(cb: &Arc<Callback>) -> bool {
    let clp = cb.client();
    clp.inflight_begin();
    cb.set_flag(flags::RUNNING);
    let queued = queue_cb(cb);
    if !queued {
        clp.inflight_end();
    }
    queued
}

fn queue_cb(cb: &Arc<Callback>) -> bool {
    if cb.test_and_set_flag(flags::QUEUED) {
        return false;
    }
    trace!(client = cb.client().id(), "queueing callback");
    cb.client().enqueue(cb.clone());
    true
}

/// Arranges for the callback to be resubmitted once the current attempt
/// releases, unless the client is being torn down.
fn requeue_cb(cb: &Arc<Callback>) {
    let clp = cb.client();
    if !clp.test_flags(CB_KILL) {
        trace!(client = clp.id(), "callback will be requeued");
        cb.set_flag(flags::REQUEUE);
    }
}

/// Executor entry point: one queued callback's turn on its client's
/// single-threaded work queue.
pub(crate) async fn run_cb_work(cb: Arc<Callback>) {
    cb.test_and_clear_flag(flags::QUEUED);
    let clp = cb.client().clone();
    trace!(client = clp.id(), "callback work start");

    if clp.test_flags(CB_UPDATE | CB_KILL) {
        process_cb_update(&cb).await;
    }

    let Some(rpc) = clp.rpc_handle() else {
        // Callback channel broken or client killed; give up.
        destroy_cb(&cb);
        return;
    };
    if clp.courtesy() {
        destroy_cb(&cb);
        return;
    }

    // Don't send probe messages for 4.1 or later: a working bound
    // backchannel was just constructed.
    if cb.ops().is_none() && clp.minorversion() > 0 {
        clp.mark_state(ChannelState::Up);
        destroy_cb(&cb);
        return;
    }

    if !cb.test_and_clear_flag(flags::REQUEUE) {
        if let Some(ops) = cb.ops() {
            ops.prepare(&cb);
        }
    }

    tokio::spawn(cb_rpc_task(cb, rpc));
}

/// Tears down the client's RPC client and rebuilds it from the pending
/// connection parameters. Runs only on the executor.
async fn process_cb_update(cb: &Arc<Callback>) {
    let clp = cb.client();
    trace!(client = clp.id(), "processing backchannel update");

    // This is either an update or the client dying; in either case, kill
    // the old RPC client.
    if let Some(old) = clp.take_rpc() {
        old.chan.shutdown();
    }
    clp.clear_conn_xprt();
    if clp.test_flags(CB_KILL) {
        return;
    }

    // Only serialized callback code clears this flag; forward-path code can
    // only set it.
    clp.clear_flag(CB_UPDATE);

    let mut conn = clp.conn_snapshot();
    let mut session = None;
    if let Some((xprt, ses)) = clp.find_backchannel() {
        conn.xprt = Some(xprt);
        session = Some(ses);
    }

    if let Err(err) = setup_callback_client(clp, conn, session).await {
        warn!(client = clp.id(), ?err, "backchannel construction failed");
        clp.mark_down();
    }
}

#[derive(Debug)]
enum SetupError {
    /// Required parameters are missing, or GSS was requested without a
    /// principal.
    InvalidParameters,
    /// No credential could be minted for the channel.
    Credential,
    Transport(TransportError),
}

/// Builds the RPC client toward the client's callback service. The shape of
/// the channel depends entirely on the minor version.
async fn setup_callback_client(
    clp: &Arc<Client>,
    conn: CbConn,
    session: Option<Arc<Session>>,
) -> Result<(), SetupError> {
    let env = clp.env().clone();
    let timeout = env.config.rpc_timeout();

    if clp.minorversion() == 0 {
        let fwd = clp.cred();
        if fwd.principal.is_none() && fwd.flavor == AuthFlavor::RpcSecGss {
            return Err(SetupError::InvalidParameters);
        }
        let addr = conn.addr.ok_or(SetupError::InvalidParameters)?;
        let chan = env
            .factory
            .dial(DialParams {
                addr,
                saddr: conn.saddr,
                program: conn.program,
                version: NFS4_CALLBACK_VERSION,
                timeout,
                authflavor: fwd.flavor,
                principal: fwd.principal.clone(),
            })
            .await
            .map_err(SetupError::Transport)?;
        clp.set_ident(conn.ident);
        let principal = fwd.target_principal.as_deref().unwrap_or("nfs");
        let Some(cred) = env.credentials.machine(principal) else {
            chan.shutdown();
            return Err(SetupError::Credential);
        };
        clp.store_rpc(RpcHandle { chan, cred });
    } else {
        let xprt = conn.xprt.ok_or(SetupError::InvalidParameters)?;
        let session = session.ok_or(SetupError::InvalidParameters)?;
        clp.set_cb_session(session.clone());
        let chan = env
            .factory
            .bind(xprt.clone(), session.cb_program(), session.security().flavor, timeout)
            .await
            .map_err(SetupError::Transport)?;
        let Some(cred) = env.credentials.for_session(session.security()) else {
            chan.shutdown();
            return Err(SetupError::Credential);
        };
        clp.set_conn_xprt(xprt);
        clp.store_rpc(RpcHandle { chan, cred });
    }

    debug!(client = clp.id(), "backchannel client established");
    Ok(())
}

/// One transmission lifecycle: prepare (slot), send, done (state machine and
/// op hook), release (requeue or destroy). Restarts loop back to prepare.
async fn cb_rpc_task(cb: Arc<Callback>, rpc: RpcHandle) {
    let clp = cb.client().clone();

    if cb.ops().is_none() {
        // NULL probe toward a v4.0 client.
        match rpc.chan.call(&rpc.cred, PROC_CB_NULL, Vec::new()).await {
            Ok(_) => clp.mark_state(ChannelState::Up),
            Err(_) => clp.mark_down(),
        }
        destroy_cb(&cb);
        return;
    }

    let delay = clp.env().config.delay_retry();
    loop {
        // Prepare: reset per-attempt status and reserve a slot. seq_status
        // is only moved by the reply decoder, and so still reads "no reply"
        // after an RPC-level failure.
        cb.reset_attempt();
        let session = if clp.minorversion() > 0 {
            let Some(ses) = clp.cb_session() else {
                requeue_cb(&cb);
                break;
            };
            cb_get_slot(&cb, &ses).await;
            Some(ses)
        } else {
            None
        };

        // Transmit and decode.
        let transport_status = match encode_compound(&cb, session.as_deref()) {
            Ok(args) => match rpc.chan.call(&rpc.cred, PROC_CB_COMPOUND, args).await {
                Ok(reply) => match decode_reply(&cb, session.as_deref(), &reply) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        debug!(client = clp.id(), ?err, "malformed callback reply");
                        Err(Error::Io)
                    }
                },
                Err(err) => Err(err.to_status()),
            },
            Err(err) => {
                debug!(client = clp.id(), ?err, "callback arguments failed to encode");
                Err(Error::Io)
            }
        };

        match cb_done(&cb, session.as_deref(), transport_status, &rpc) {
            Verdict::RestartNow => continue,
            Verdict::RestartDelayed => {
                sleep(delay).await;
                continue;
            }
            Verdict::Finished => break,
        }
    }

    // Release: a requeue raised along the way wins over destruction.
    if cb.test_flag(flags::REQUEUE) {
        queue_cb(&cb);
    } else {
        destroy_cb(&cb);
    }
}

/// Reserves a slot for the callback, sleeping on the client's callback wait
/// queue while the table is exhausted.
async fn cb_get_slot(cb: &Callback, ses: &Session) {
    if cb.state().held_slot.is_some() {
        return;
    }
    loop {
        if let Some(idx) = ses.grab_slot() {
            cb.state().held_slot = Some(idx);
            return;
        }
        let notified = cb.client().slot_waitq().notified();
        // Race breaker: the slot may have been released between the failed
        // grab and subscribing to the queue.
        if let Some(idx) = ses.grab_slot() {
            cb.state().held_slot = Some(idx);
            return;
        }
        notified.await;
    }
}

/// Returns the held slot, if any, and wakes the next waiter.
fn release_cb_slot(cb: &Callback, ses: &Session) {
    let slot = cb.state().held_slot.take();
    if let Some(idx) = slot {
        ses.release_slot(idx);
        cb.client().slot_waitq().notify_one();
    }
}

/// Encodes the CB_COMPOUND request for the current attempt.
fn encode_compound(cb: &Callback, session: Option<&Session>) -> io::Result<Vec<u8>> {
    let clp = cb.client();
    let mut buf = Vec::with_capacity(256);
    let hdr = compound::CompoundHeader { minorversion: clp.minorversion(), ident: clp.ident() };
    let nops_at = compound::header(&mut buf, &hdr)?;
    let mut nops: u32 = 0;

    if let Some(ses) = session {
        let state = cb.state();
        let slot = state
            .held_slot
            .ok_or(io::Error::new(ErrorKind::InvalidInput, "no slot held for CB_SEQUENCE"))?;
        sequence::args(
            &mut buf,
            &sequence::SequenceArgs {
                sessionid: ses.id(),
                sequenceid: ses.seq_nr(slot),
                slotid: slot,
                highest_slotid: ses.highest_slotid(),
                referring: &state.referring,
            },
        )?;
        nops += 1;
    }

    match cb.args() {
        CallbackArgs::Null => {}
        CallbackArgs::Recall(arg) => {
            recall::args(&mut buf, arg)?;
            nops += 1;
        }
        CallbackArgs::RecallAny(arg) => {
            recall_any::args(&mut buf, arg)?;
            nops += 1;
        }
        CallbackArgs::GetAttr(arg) => {
            get_attr::args(&mut buf, arg)?;
            nops += 1;
        }
        CallbackArgs::LayoutRecall(arg) => {
            layout_recall::args(&mut buf, arg)?;
            nops += 1;
        }
        CallbackArgs::NotifyLock(arg) => {
            notify_lock::args(&mut buf, arg)?;
            nops += 1;
        }
        CallbackArgs::Offload(arg) => {
            offload::args(&mut buf, arg)?;
            nops += 1;
        }
    }

    compound::patch_nops(&mut buf, nops_at, nops)?;
    Ok(buf)
}

/// Decodes the CB_COMPOUND reply into the callback's status fields.
///
/// The CB_SEQUENCE result lands in `seq_status`, the operation's own status
/// in `status`, and CB_GETATTR attributes in the callback's attribute slot.
fn decode_reply(cb: &Callback, session: Option<&Session>, reply: &[u8]) -> parser::Result<()> {
    let mut src = Cursor::new(reply);
    parser::compound::header(&mut src)?;

    if let Some(ses) = session {
        match parser::compound::op_status(&mut src, CbOpcode::Sequence)? {
            Ok(()) => {
                let res = parser::sequence::res_ok(&mut src)?;
                let mut state = cb.state();
                // If the client returns different values for session id,
                // slot id or sequence number, its slot state is untrustworthy.
                let valid = match state.held_slot {
                    Some(slot) => {
                        res.sessionid == *ses.id()
                            && res.slotid == slot
                            && res.sequenceid == ses.seq_nr(slot)
                    }
                    None => false,
                };
                if !valid {
                    debug!(client = cb.client().id(), "CB_SEQUENCE reply contradicts request");
                    state.seq_status = SeqStatus::Error(Error::ServerFault);
                    return Ok(());
                }
                // The echoed current highest slot is ignored; only the
                // client's target drives renegotiation.
                ses.update_target(res.target_highest_slotid);
                state.seq_status = SeqStatus::Ok;
            }
            Err(err) => {
                cb.state().seq_status = SeqStatus::Error(err);
                return Ok(());
            }
        }
    }

    if let Some(op) = cb.opcode() {
        let status = parser::compound::op_status(&mut src, op)?;
        cb.state().status = status;
        if status.is_ok() {
            if let CallbackArgs::GetAttr(_) = cb.args() {
                let attrs = parser::get_attr::res_ok(&mut src)?;
                cb.state().attrs = Some(attrs);
            }
        }
    }
    Ok(())
}

enum Verdict {
    RestartNow,
    RestartDelayed,
    Finished,
}

/// Post-transmission bookkeeping: the CB_SEQUENCE state machine first, then
/// the operation's `done` hook.
fn cb_done(
    cb: &Arc<Callback>,
    session: Option<&Session>,
    transport_status: OpStatus,
    rpc: &RpcHandle,
) -> Verdict {
    let clp = cb.client();
    trace!(client = clp.id(), "callback rpc done");

    if clp.minorversion() == 0 {
        // If the backchannel connection was shut down while this task was
        // in flight, resubmit after a new connection is set up. A channel
        // lost for good errors out at submission instead.
        if transport_status == Err(Error::Shutdown) {
            requeue_cb(cb);
        }
    } else {
        match sequence_done(cb, session, rpc) {
            SeqVerdict::Proceed => {}
            SeqVerdict::RestartNow => return Verdict::RestartNow,
            SeqVerdict::RestartDelayed => return Verdict::RestartDelayed,
            SeqVerdict::Finished => return Verdict::Finished,
        }
    }

    let status = completion_status(cb, transport_status);
    let Some(ops) = cb.ops() else {
        return Verdict::Finished;
    };
    match ops.done(cb, status) {
        Disposition::Restart => Verdict::RestartNow,
        Disposition::Accept => {
            if matches!(status, Err(Error::Io) | Err(Error::TimedOut) | Err(Error::Access)) {
                clp.mark_down();
            }
            Verdict::Finished
        }
    }
}

/// Resolves the status handed to the operation's `done` hook: the
/// operation's own status when it failed, then any CB_SEQUENCE error, then
/// whatever the transport reported.
fn completion_status(cb: &Callback, transport_status: OpStatus) -> OpStatus {
    let state = cb.state();
    if state.status.is_err() {
        return state.status;
    }
    if cb.client().minorversion() > 0 {
        if let SeqStatus::Error(err) = state.seq_status {
            return Err(err);
        }
    }
    transport_status
}

enum SeqVerdict {
    /// CB_COMPOUND processing continues into the op's `done` hook.
    Proceed,
    RestartNow,
    RestartDelayed,
    Finished,
}

/// Interprets the CB_SEQUENCE outcome for minorversion >= 1.
fn sequence_done(cb: &Arc<Callback>, session: Option<&Session>, rpc: &RpcHandle) -> SeqVerdict {
    let clp = cb.client();
    let Some(ses) = session else {
        requeue_cb(cb);
        return SeqVerdict::Finished;
    };
    let Some(slot) = cb.state().held_slot else {
        requeue_cb(cb);
        return SeqVerdict::Finished;
    };
    let seq_status = cb.state().seq_status;
    trace!(client = clp.id(), slot, ?seq_status, "CB_SEQUENCE outcome");

    match seq_status {
        SeqStatus::Ok => {
            // Slot ownership serializes access to the sequence counter.
            //
            // RFC 5661 20.9.3: if CB_SEQUENCE returns an error, the state of
            // the slot (sequence id, cached reply) MUST NOT change.
            ses.advance_seq(slot);
            release_cb_slot(cb, ses);
            SeqVerdict::Proceed
        }
        SeqStatus::Error(Error::ServerFault) => {
            // The call succeeded, but the session, slot index, or sequence
            // number in the response contradicts the call. The sequence
            // information is untrustworthy.
            clp.mark_fault();
            release_cb_slot(cb, ses);
            SeqVerdict::Proceed
        }
        SeqStatus::NoReply | SeqStatus::Error(Error::Nfs(nfsstat::NFS4ERR_BADSESSION)) => {
            // Either no reply was ever received, in which case the server
            // can't know whether the client processed the CB_SEQUENCE, or
            // the client no longer recognizes the session. Ask the client
            // to send a DESTROY_SESSION to recover.
            clp.mark_fault();
            release_cb_slot(cb, ses);
            requeue_cb(cb);
            SeqVerdict::Finished
        }
        SeqStatus::Error(Error::Nfs(nfsstat::NFS4ERR_DELAY)) => {
            cb.state().seq_status = SeqStatus::NoReply;
            if rpc.chan.is_shutdown() {
                release_cb_slot(cb, ses);
                requeue_cb(cb);
                return SeqVerdict::Finished;
            }
            // Slot retained, sequence number unchanged: the retry repeats
            // the call verbatim.
            SeqVerdict::RestartDelayed
        }
        SeqStatus::Error(Error::Nfs(nfsstat::NFS4ERR_BADSLOT))
        | SeqStatus::Error(Error::Nfs(nfsstat::NFS4ERR_SEQ_MISORDERED)) => {
            // Client and server are out of sync as to the backchannel
            // parameters. Mark the backchannel faulty and restart the RPC,
            // but leak the slot so that it's no longer used.
            clp.mark_fault();
            cb.state().held_slot = None;
            if rpc.chan.is_shutdown() {
                requeue_cb(cb);
                return SeqVerdict::Finished;
            }
            SeqVerdict::RestartNow
        }
        SeqStatus::Error(_) => {
            clp.mark_fault();
            release_cb_slot(cb, ses);
            SeqVerdict::Proceed
        }
    }
}

/// Final destruction: releases the slot, wakes completion waiters, runs the
/// op's release hook, and closes the inflight bracket.
fn destroy_cb(cb: &Arc<Callback>) {
    let clp = cb.client();
    trace!(client = clp.id(), "destroying callback");
    if let Some(ses) = clp.cb_session() {
        release_cb_slot(cb, &ses);
    }
    cb.clear_running();
    if let Some(ops) = cb.ops() {
        ops.release(cb);
    }
    cb.destroy_referring_call_list();
    clp.inflight_end();
}
