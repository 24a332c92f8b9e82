//! Mock transport and credential factories for engine tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nfs_backchannel::transport::{
    AuthFlavor, CallbackSecurity, ChannelFactory, Credential, CredentialFactory, DialParams,
    RpcChannel, TransportError,
};

/// Scripted behavior for one incoming call.
pub enum Script {
    Reply(Vec<u8>),
    /// Hold the call open for the duration before replying.
    DelayedReply(Duration, Vec<u8>),
    Fail(TransportError),
}

/// An [`RpcChannel`] that records requests and answers from a script.
/// Unscripted calls time out.
pub struct MockChannel {
    sent: Mutex<Vec<(u32, Vec<u8>)>>,
    script: Mutex<VecDeque<Script>>,
    down: AtomicBool,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            down: AtomicBool::new(false),
        })
    }

    pub fn push(&self, script: Script) {
        self.script.lock().unwrap().push_back(script);
    }

    /// Requests observed so far, as `(procedure, request bytes)`.
    pub fn sent(&self) -> Vec<(u32, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl RpcChannel for MockChannel {
    async fn call(
        &self,
        _cred: &Credential,
        procedure: u32,
        args: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        if self.is_shutdown() {
            return Err(TransportError::Shutdown);
        }
        self.sent.lock().unwrap().push((procedure, args));
        let entry = self.script.lock().unwrap().pop_front();
        match entry {
            Some(Script::Reply(bytes)) => Ok(bytes),
            Some(Script::DelayedReply(pause, bytes)) => {
                tokio::time::sleep(pause).await;
                if self.is_shutdown() {
                    return Err(TransportError::Shutdown);
                }
                Ok(bytes)
            }
            Some(Script::Fail(err)) => Err(err),
            None => Err(TransportError::TimedOut),
        }
    }

    fn is_shutdown(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    fn shutdown(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

/// A [`ChannelFactory`] handing out pre-queued channels. An empty queue
/// makes construction fail.
pub struct MockFactory {
    channels: Mutex<VecDeque<Arc<MockChannel>>>,
    dials: Mutex<Vec<DialParams>>,
    binds: Mutex<Vec<(u32, AuthFlavor)>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            channels: Mutex::new(VecDeque::new()),
            dials: Mutex::new(Vec::new()),
            binds: Mutex::new(Vec::new()),
        })
    }

    pub fn push_channel(&self, chan: Arc<MockChannel>) {
        self.channels.lock().unwrap().push_back(chan);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    pub fn bind_count(&self) -> usize {
        self.binds.lock().unwrap().len()
    }

    fn next_channel(&self) -> Result<Arc<dyn RpcChannel>, TransportError> {
        match self.channels.lock().unwrap().pop_front() {
            Some(chan) => Ok(chan),
            None => Err(TransportError::Io),
        }
    }
}

#[async_trait]
impl ChannelFactory for MockFactory {
    async fn dial(&self, params: DialParams) -> Result<Arc<dyn RpcChannel>, TransportError> {
        self.dials.lock().unwrap().push(params);
        self.next_channel()
    }

    async fn bind(
        &self,
        _xprt: Arc<dyn RpcChannel>,
        program: u32,
        flavor: AuthFlavor,
        _timeout: Duration,
    ) -> Result<Arc<dyn RpcChannel>, TransportError> {
        self.binds.lock().unwrap().push((program, flavor));
        self.next_channel()
    }
}

/// A [`CredentialFactory`] that always succeeds.
pub struct MockCreds;

impl CredentialFactory for MockCreds {
    fn machine(&self, principal: &str) -> Option<Credential> {
        Some(Credential {
            flavor: AuthFlavor::AuthSys,
            uid: 0,
            gid: 0,
            principal: Some(principal.to_owned()),
        })
    }

    fn for_session(&self, security: &CallbackSecurity) -> Option<Credential> {
        Some(Credential {
            flavor: security.flavor,
            uid: security.uid,
            gid: security.gid,
            principal: None,
        })
    }
}
