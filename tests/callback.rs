//! End-to-end callback engine scenarios over mock transports.

mod mock;

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use mock::{MockChannel, MockCreds, MockFactory, Script};
use nfs_backchannel::callback::{GetAttrArgs, RecallArgs};
use nfs_backchannel::nfs4::{
    nfsstat, FileHandle, SessionId, Stateid, PROC_CB_COMPOUND, PROC_CB_NULL,
};
use nfs_backchannel::parser::get_attr::DelegAttrs;
use nfs_backchannel::status::OpStatus;
use nfs_backchannel::transport::{
    AuthFlavor, CallbackSecurity, CbConn, ForwardCred, RpcChannel, TransportError,
};
use nfs_backchannel::{
    run_cb, Callback, CallbackArgs, CallbackConfig, CallbackEnv, CallbackOps, ChannelState,
    Client, ClientParams, Disposition, Session,
};

const SID: [u8; 16] = [7; 16];

/// Callback ops recording every hook invocation.
#[derive(Default)]
struct RecordingOps {
    prepared: AtomicU32,
    released: AtomicU32,
    statuses: Mutex<Vec<OpStatus>>,
    /// Number of times `done` should answer Restart before accepting.
    restarts: AtomicU32,
}

impl RecordingOps {
    fn with_restarts(n: u32) -> Arc<Self> {
        let ops = Self::default();
        ops.restarts.store(n, Ordering::SeqCst);
        Arc::new(ops)
    }

    fn statuses(&self) -> Vec<OpStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

impl CallbackOps for RecordingOps {
    fn prepare(&self, _cb: &Callback) {
        self.prepared.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self, _cb: &Callback, status: OpStatus) -> Disposition {
        self.statuses.lock().unwrap().push(status);
        if self.restarts.load(Ordering::SeqCst) > 0 {
            self.restarts.fetch_sub(1, Ordering::SeqCst);
            Disposition::Restart
        } else {
            Disposition::Accept
        }
    }

    fn release(&self, _cb: &Callback) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    client: Arc<Client>,
    session: Arc<Session>,
    factory: Arc<MockFactory>,
    chan: Arc<MockChannel>,
}

fn test_env(factory: &Arc<MockFactory>) -> Arc<CallbackEnv> {
    Arc::new(CallbackEnv {
        factory: factory.clone(),
        credentials: Arc::new(MockCreds),
        config: CallbackConfig::default(),
    })
}

fn auth_sys_cred() -> ForwardCred {
    ForwardCred { flavor: AuthFlavor::AuthSys, principal: None, target_principal: None }
}

fn v41_fixture() -> Fixture {
    let chan = MockChannel::new();
    let factory = MockFactory::new();
    factory.push_channel(chan.clone());
    let client = Client::new(
        ClientParams { id: 1, minorversion: 1, cred: auth_sys_cred() },
        test_env(&factory),
    );
    let session = Arc::new(Session::new(
        SessionId(SID),
        0x4000_0001,
        CallbackSecurity { flavor: AuthFlavor::AuthSys, uid: 0, gid: 0 },
    ));
    session.bind_backchannel(chan.clone() as Arc<dyn RpcChannel>);
    client.add_session(session.clone());
    Fixture { client, session, factory, chan }
}

/// A v4.1 fixture with the backchannel already constructed and probed up.
async fn ready_v41() -> Fixture {
    let fixture = v41_fixture();
    fixture.client.probe_callback_sync().await;
    assert_eq!(fixture.client.channel_state(), ChannelState::Up);
    fixture
}

async fn quiesce(client: &Arc<Client>) {
    while client.inflight() != 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

fn recall_args() -> CallbackArgs {
    CallbackArgs::Recall(RecallArgs {
        stateid: Stateid { seqid: 1, other: [0xAB; 12] },
        fh: FileHandle(vec![1, 2, 3, 4]),
    })
}

fn words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// CB_COMPOUND reply: CB_SEQUENCE resok echoing `(seq, slot)` plus one
/// successful operation result.
fn reply_ok(opnum: u32, seq: u32, slot: u32) -> Vec<u8> {
    let mut reply = words(&[0, 0, 2, 11, 0]);
    reply.extend(SID);
    reply.extend(words(&[seq, slot, 0, 0, opnum, 0]));
    reply
}

/// CB_COMPOUND reply whose CB_SEQUENCE failed with `code`.
fn reply_seq_error(code: u32) -> Vec<u8> {
    words(&[code, 0, 1, 11, code])
}

struct SeqRequest {
    minorversion: u32,
    ident: u32,
    nops: u32,
    sessionid: [u8; 16],
    sequenceid: u32,
    slotid: u32,
    highest: u32,
    cachethis: u32,
    referring: Vec<([u8; 16], Vec<(u32, u32)>)>,
}

/// Picks apart a request up to and including its CB_SEQUENCE arguments.
fn parse_seq_request(bytes: &[u8]) -> SeqRequest {
    let mut src = Cursor::new(bytes);
    assert_eq!(src.read_u32::<BigEndian>().unwrap(), 0, "tag must be empty");
    let minorversion = src.read_u32::<BigEndian>().unwrap();
    let ident = src.read_u32::<BigEndian>().unwrap();
    let nops = src.read_u32::<BigEndian>().unwrap();
    assert_eq!(src.read_u32::<BigEndian>().unwrap(), 11, "CB_SEQUENCE must come first");
    let mut sessionid = [0u8; 16];
    std::io::Read::read_exact(&mut src, &mut sessionid).unwrap();
    let sequenceid = src.read_u32::<BigEndian>().unwrap();
    let slotid = src.read_u32::<BigEndian>().unwrap();
    let highest = src.read_u32::<BigEndian>().unwrap();
    let cachethis = src.read_u32::<BigEndian>().unwrap();
    let nlists = src.read_u32::<BigEndian>().unwrap();
    let mut referring = Vec::new();
    for _ in 0..nlists {
        let mut sid = [0u8; 16];
        std::io::Read::read_exact(&mut src, &mut sid).unwrap();
        let ncalls = src.read_u32::<BigEndian>().unwrap();
        let mut calls = Vec::new();
        for _ in 0..ncalls {
            let seq = src.read_u32::<BigEndian>().unwrap();
            let slot = src.read_u32::<BigEndian>().unwrap();
            calls.push((seq, slot));
        }
        referring.push((sid, calls));
    }
    SeqRequest {
        minorversion,
        ident,
        nops,
        sessionid,
        sequenceid,
        slotid,
        highest,
        cachethis,
        referring,
    }
}

#[tokio::test]
async fn simple_recall_v41() {
    let fixture = ready_v41().await;
    assert_eq!(fixture.factory.bind_count(), 1);

    fixture.chan.push(Script::Reply(reply_ok(4, 1, 0)));
    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    assert!(run_cb(&cb));
    cb.wait_completed().await;

    let sent = fixture.chan.sent();
    assert_eq!(sent.len(), 1);
    let (procedure, request) = &sent[0];
    assert_eq!(*procedure, PROC_CB_COMPOUND);

    let mut expected = words(&[0, 1, 0, 2, 11]);
    expected.extend(SID);
    expected.extend(words(&[1, 0, 0, 0, 0, 4, 1]));
    expected.extend([0xAB; 12]);
    expected.extend(words(&[0, 4]));
    expected.extend([1, 2, 3, 4]);
    assert_eq!(*request, expected);

    assert_eq!(fixture.session.seq_nr(0), 2);
    assert!(fixture.session.slot_is_free(0));
    assert_eq!(fixture.client.channel_state(), ChannelState::Up);
    assert_eq!(ops.statuses(), vec![Ok(())]);
    assert_eq!(ops.prepared.load(Ordering::SeqCst), 1);
    quiesce(&fixture.client).await;
    assert_eq!(ops.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slot_contention_serializes_on_single_slot() {
    let fixture = ready_v41().await;
    fixture.chan.push(Script::DelayedReply(Duration::from_millis(50), reply_ok(4, 1, 0)));
    fixture.chan.push(Script::Reply(reply_ok(4, 2, 0)));

    let first = Callback::new(
        fixture.client.clone(),
        Some(Arc::new(RecordingOps::default())),
        recall_args(),
    );
    let second = Callback::new(
        fixture.client.clone(),
        Some(Arc::new(RecordingOps::default())),
        recall_args(),
    );
    assert!(run_cb(&first));
    assert!(run_cb(&second));
    first.wait_completed().await;
    second.wait_completed().await;

    let sent = fixture.chan.sent();
    assert_eq!(sent.len(), 2);
    let req0 = parse_seq_request(&sent[0].1);
    let req1 = parse_seq_request(&sent[1].1);
    assert_eq!((req0.minorversion, req0.ident, req0.nops), (1, 0, 2));
    assert_eq!(req0.sessionid, SID);
    assert_eq!((req0.highest, req0.cachethis), (0, 0));
    assert_eq!((req0.sequenceid, req0.slotid), (1, 0));
    assert_eq!((req1.sequenceid, req1.slotid), (2, 0));
    assert_eq!(fixture.session.seq_nr(0), 3);
    assert!(fixture.session.slot_is_free(0));
}

#[tokio::test(start_paused = true)]
async fn delay_retries_same_slot_and_sequence() {
    let fixture = ready_v41().await;
    fixture.chan.push(Script::Reply(reply_seq_error(nfsstat::NFS4ERR_DELAY)));
    fixture.chan.push(Script::Reply(reply_ok(4, 1, 0)));

    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    let started = tokio::time::Instant::now();
    run_cb(&cb);
    cb.wait_completed().await;

    assert!(started.elapsed() >= Duration::from_secs(2), "retry must wait out the delay");
    let sent = fixture.chan.sent();
    assert_eq!(sent.len(), 2);
    // The retry repeats the call verbatim: same slot, same sequence number.
    assert_eq!(sent[0].1, sent[1].1);
    assert_eq!(fixture.session.seq_nr(0), 2);
    assert!(fixture.session.slot_is_free(0));
    assert_eq!(ops.statuses(), vec![Ok(())]);
}

#[tokio::test]
async fn badslot_leaks_slot_and_restarts() {
    let fixture = ready_v41().await;
    // The client advertised room for a second slot earlier.
    fixture.session.update_target(1);
    fixture.chan.push(Script::Reply(reply_seq_error(nfsstat::NFS4ERR_BADSLOT)));
    fixture.chan.push(Script::Reply(reply_ok(4, 1, 1)));

    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    run_cb(&cb);
    cb.wait_completed().await;

    let sent = fixture.chan.sent();
    assert_eq!(sent.len(), 2);
    let req0 = parse_seq_request(&sent[0].1);
    let req1 = parse_seq_request(&sent[1].1);
    assert_eq!((req0.sequenceid, req0.slotid), (1, 0));
    assert_eq!((req1.sequenceid, req1.slotid), (1, 1));

    // Slot 0 stays reserved: the client and server disagree about its
    // state, so it must never be used again.
    assert!(!fixture.session.slot_is_free(0));
    assert!(fixture.session.slot_is_free(1));
    assert_eq!(fixture.session.seq_nr(0), 1);
    assert_eq!(fixture.session.seq_nr(1), 2);
    assert_eq!(fixture.client.channel_state(), ChannelState::Fault);
    assert_eq!(ops.statuses(), vec![Ok(())]);
}

#[tokio::test]
async fn transport_failure_faults_channel_and_requeues() {
    let fixture = ready_v41().await;
    fixture.chan.push(Script::Fail(TransportError::Io));
    fixture.chan.push(Script::Reply(reply_ok(4, 1, 0)));

    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    run_cb(&cb);
    cb.wait_completed().await;

    assert_eq!(fixture.chan.sent().len(), 2);
    assert_eq!(fixture.client.channel_state(), ChannelState::Fault);
    // The requeue went back through the executor without re-running prepare.
    assert_eq!(ops.prepared.load(Ordering::SeqCst), 1);
    assert_eq!(ops.statuses(), vec![Ok(())]);
    assert_eq!(fixture.session.seq_nr(0), 2);
}

#[tokio::test]
async fn done_restart_resends_with_fresh_sequence() {
    let fixture = ready_v41().await;
    fixture.chan.push(Script::Reply(reply_ok(4, 1, 0)));
    fixture.chan.push(Script::Reply(reply_ok(4, 2, 0)));

    let ops = RecordingOps::with_restarts(1);
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    run_cb(&cb);
    cb.wait_completed().await;

    assert_eq!(fixture.chan.sent().len(), 2);
    assert_eq!(ops.statuses(), vec![Ok(()), Ok(())]);
    assert_eq!(ops.prepared.load(Ordering::SeqCst), 1);
    assert_eq!(fixture.session.seq_nr(0), 3);
}

#[tokio::test]
async fn backchannel_reconstruction_rebuilds_before_sending() {
    let fixture = ready_v41().await;
    assert_eq!(fixture.factory.bind_count(), 1);

    let chan2 = MockChannel::new();
    fixture.factory.push_channel(chan2.clone());
    fixture.client.mark_channel_update();
    chan2.push(Script::Reply(reply_ok(4, 1, 0)));

    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    run_cb(&cb);
    cb.wait_completed().await;

    assert_eq!(fixture.factory.bind_count(), 2);
    assert!(fixture.chan.is_shutdown(), "old RPC client must be torn down");
    assert!(fixture.chan.sent().is_empty());
    assert_eq!(chan2.sent().len(), 1);
    assert_eq!(ops.statuses(), vec![Ok(())]);
}

#[tokio::test]
async fn failed_reconstruction_marks_down_and_destroys_callback() {
    let fixture = v41_fixture();
    fixture.client.probe_callback_sync().await;
    // No replacement channel queued: the next construction attempt fails.
    fixture.client.mark_channel_update();

    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    run_cb(&cb);
    cb.wait_completed().await;
    quiesce(&fixture.client).await;

    assert_eq!(fixture.client.channel_state(), ChannelState::Down);
    assert!(fixture.chan.sent().is_empty());
    assert!(ops.statuses().is_empty(), "done must not run for an unsent callback");
    assert_eq!(ops.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn referring_calls_are_grouped_and_deduplicated() {
    let fixture = ready_v41().await;
    fixture.chan.push(Script::Reply(reply_ok(4, 1, 0)));

    let other = SessionId([9; 16]);
    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    cb.add_referring_call(&SessionId(SID), 0, 5);
    cb.add_referring_call(&SessionId(SID), 0, 5);
    cb.add_referring_call(&SessionId(SID), 0, 5);
    cb.add_referring_call(&SessionId(SID), 1, 5);
    cb.add_referring_call(&other, 0, 5);
    run_cb(&cb);
    cb.wait_completed().await;

    let sent = fixture.chan.sent();
    let req = parse_seq_request(&sent[0].1);
    assert_eq!(req.referring.len(), 2);
    assert_eq!(req.referring[0], (SID, vec![(5, 0), (5, 1)]));
    assert_eq!(req.referring[1], ([9; 16], vec![(5, 0)]));
}

#[tokio::test]
async fn getattr_reply_attributes_land_on_the_callback() {
    let fixture = ready_v41().await;

    let mut reply = words(&[0, 0, 2, 11, 0]);
    reply.extend(SID);
    reply.extend(words(&[1, 0, 0, 0, 3, 0]));
    // bitmap4 { CHANGE | SIZE }, attrlen 16, change, size
    reply.extend(words(&[1, 0x18, 16]));
    reply.extend(77u64.to_be_bytes());
    reply.extend(8192u64.to_be_bytes());
    fixture.chan.push(Script::Reply(reply));

    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(
        fixture.client.clone(),
        Some(ops.clone()),
        CallbackArgs::GetAttr(GetAttrArgs {
            fh: FileHandle(vec![1, 2, 3, 4]),
            file_modified: false,
            deleg_timestamps: false,
        }),
    );
    run_cb(&cb);
    cb.wait_completed().await;

    assert_eq!(ops.statuses(), vec![Ok(())]);
    assert_eq!(
        cb.delegation_attrs(),
        Some(DelegAttrs { change: 77, size: 8192, ..Default::default() })
    );
}

#[tokio::test]
async fn courtesy_client_drops_callbacks_without_io() {
    let fixture = ready_v41().await;
    fixture.client.set_courtesy(true);

    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    run_cb(&cb);
    cb.wait_completed().await;
    quiesce(&fixture.client).await;

    assert!(fixture.chan.sent().is_empty());
    assert!(ops.statuses().is_empty());
    assert_eq!(ops.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_quiesces_and_kills_the_channel() {
    let fixture = ready_v41().await;
    fixture.client.shutdown_callback().await;

    assert_eq!(fixture.client.inflight(), 0);
    assert!(fixture.chan.is_shutdown());

    // Work submitted after shutdown is destroyed without I/O.
    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    run_cb(&cb);
    cb.wait_completed().await;
    quiesce(&fixture.client).await;
    assert!(fixture.chan.sent().is_empty());
    assert_eq!(ops.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn resubmitting_a_queued_callback_is_refused() {
    let fixture = ready_v41().await;
    fixture.chan.push(Script::Reply(reply_ok(4, 1, 0)));

    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(fixture.client.clone(), Some(ops.clone()), recall_args());
    assert!(run_cb(&cb));
    let resubmitted = run_cb(&cb);
    cb.wait_completed().await;
    quiesce(&fixture.client).await;

    assert!(!resubmitted);
    assert_eq!(fixture.client.inflight(), 0);
    assert_eq!(ops.released.load(Ordering::SeqCst), 1);
}

fn v40_fixture() -> (Arc<Client>, Arc<MockFactory>, Arc<MockChannel>) {
    let chan = MockChannel::new();
    let factory = MockFactory::new();
    factory.push_channel(chan.clone());
    let client = Client::new(
        ClientParams { id: 2, minorversion: 0, cred: auth_sys_cred() },
        test_env(&factory),
    );
    client.change_callback(CbConn {
        addr: Some("192.0.2.10:1055".parse().unwrap()),
        saddr: None,
        program: 0x4000_0000,
        ident: 9,
        xprt: None,
    });
    (client, factory, chan)
}

#[tokio::test]
async fn v40_probe_sends_null_ping() {
    let (client, factory, chan) = v40_fixture();
    chan.push(Script::Reply(Vec::new()));
    client.probe_callback_sync().await;

    assert_eq!(client.channel_state(), ChannelState::Up);
    assert_eq!(factory.dial_count(), 1);
    let sent = chan.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], (PROC_CB_NULL, Vec::new()));
}

#[tokio::test]
async fn v40_recall_has_no_sequence_and_carries_ident() {
    let (client, _factory, chan) = v40_fixture();
    chan.push(Script::Reply(Vec::new()));
    client.probe_callback_sync().await;

    // CB_COMPOUND reply without CB_SEQUENCE: header plus the recall result.
    chan.push(Script::Reply(words(&[0, 0, 1, 4, 0])));
    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(client.clone(), Some(ops.clone()), recall_args());
    run_cb(&cb);
    cb.wait_completed().await;

    let sent = chan.sent();
    assert_eq!(sent.len(), 2);
    let (procedure, request) = &sent[1];
    assert_eq!(*procedure, PROC_CB_COMPOUND);
    let mut expected = words(&[0, 0, 9, 1, 4, 1]);
    expected.extend([0xAB; 12]);
    expected.extend(words(&[0, 4]));
    expected.extend([1, 2, 3, 4]);
    assert_eq!(*request, expected);
    assert_eq!(ops.statuses(), vec![Ok(())]);
}

#[tokio::test]
async fn v40_timeout_marks_channel_down() {
    let (client, _factory, chan) = v40_fixture();
    chan.push(Script::Reply(Vec::new()));
    client.probe_callback_sync().await;

    chan.push(Script::Fail(TransportError::TimedOut));
    let ops = Arc::new(RecordingOps::default());
    let cb = Callback::new(client.clone(), Some(ops.clone()), recall_args());
    run_cb(&cb);
    cb.wait_completed().await;

    assert_eq!(client.channel_state(), ChannelState::Down);
    assert_eq!(ops.statuses(), vec![Err(nfs_backchannel::status::Error::TimedOut)]);
}

#[tokio::test]
async fn v40_gss_without_principal_fails_construction() {
    let chan = MockChannel::new();
    let factory = MockFactory::new();
    factory.push_channel(chan.clone());
    let client = Client::new(
        ClientParams {
            id: 3,
            minorversion: 0,
            cred: ForwardCred {
                flavor: AuthFlavor::RpcSecGss,
                principal: None,
                target_principal: None,
            },
        },
        test_env(&factory),
    );
    client.change_callback(CbConn {
        addr: Some("192.0.2.10:1055".parse().unwrap()),
        saddr: None,
        program: 0x4000_0000,
        ident: 0,
        xprt: None,
    });
    client.probe_callback_sync().await;

    assert_eq!(client.channel_state(), ChannelState::Down);
    assert_eq!(factory.dial_count(), 0);
    assert!(chan.sent().is_empty());
}
