//! Seams toward the enclosing server's RPC transport and credential
//! machinery.
//!
//! The engine never owns sockets. It asks a [`ChannelFactory`] for an
//! [`RpcChannel`], either a fresh connection to the address a v4.0 client
//! advertised or a wrapper over the bidirectional transport a v4.1 client
//! bound to one of its sessions, and issues calls through it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use num_derive::FromPrimitive;

use crate::status;

/// RPC authentication flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum AuthFlavor {
    /// No authentication.
    AuthNone = 0,
    /// Standard UNIX authentication.
    AuthSys = 1,
    /// Des authentication.
    AuthShort = 2,
    /// Diffie-Hellman authentication.
    AuthDh = 3,
    /// RPCSEC_GSS authentication.
    RpcSecGss = 6,
}

/// Errors reported by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The connection failed or the peer misbehaved at the RPC level.
    Io,
    /// No reply arrived within the configured timeout.
    TimedOut,
    /// The peer rejected the call's credentials.
    AccessDenied,
    /// The channel was shut down while the call was in flight.
    Shutdown,
}

impl TransportError {
    /// Maps a transport failure into the callback completion taxonomy.
    pub fn to_status(self) -> status::Error {
        match self {
            TransportError::Io => status::Error::Io,
            TransportError::TimedOut => status::Error::TimedOut,
            TransportError::AccessDenied => status::Error::Access,
            TransportError::Shutdown => status::Error::Shutdown,
        }
    }
}

/// Credential attached to outgoing callback RPCs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub flavor: AuthFlavor,
    pub uid: u32,
    pub gid: u32,
    pub principal: Option<String>,
}

/// Callback security parameters a v4.1 client supplied at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackSecurity {
    pub flavor: AuthFlavor,
    pub uid: u32,
    pub gid: u32,
}

/// The client's forward-direction credential, as the callback engine needs
/// it: flavor plus principals for v4.0 channel construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardCred {
    pub flavor: AuthFlavor,
    /// Authenticated principal of the client, if any.
    pub principal: Option<String>,
    /// Principal the client asked the server to authenticate as when calling
    /// back; defaults to the machine's NFS service principal.
    pub target_principal: Option<String>,
}

/// An RPC client handle capable of calling the peer's callback service.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Issues one procedure call and returns the raw XDR reply body.
    async fn call(
        &self,
        cred: &Credential,
        procedure: u32,
        args: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError>;

    /// True once [`RpcChannel::shutdown`] has been requested. In-flight and
    /// later calls fail with [`TransportError::Shutdown`].
    fn is_shutdown(&self) -> bool;

    /// Begins teardown of the channel.
    fn shutdown(&self);
}

/// Parameters for dialing a v4.0 client's advertised callback service.
#[derive(Debug, Clone)]
pub struct DialParams {
    pub addr: SocketAddr,
    /// Local address to bind, when the client must see a specific source.
    pub saddr: Option<SocketAddr>,
    /// Program number the client registered (`cb_program` from SETCLIENTID).
    pub program: u32,
    pub version: u32,
    /// Per-call timeout; the engine never retries at the transport level.
    pub timeout: Duration,
    pub authflavor: AuthFlavor,
    /// Client name presented during authentication (GSS).
    pub principal: Option<String>,
}

/// Builds [`RpcChannel`]s for the two backchannel shapes.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    /// v4.0: opens a new TCP connection to the client's callback address.
    async fn dial(&self, params: DialParams) -> Result<Arc<dyn RpcChannel>, TransportError>;

    /// v4.1+: wraps the client-bound bidirectional transport for
    /// server-initiated calls under the session's callback program and
    /// security flavor.
    async fn bind(
        &self,
        xprt: Arc<dyn RpcChannel>,
        program: u32,
        flavor: AuthFlavor,
        timeout: Duration,
    ) -> Result<Arc<dyn RpcChannel>, TransportError>;
}

/// Mints credentials for outgoing callbacks.
pub trait CredentialFactory: Send + Sync {
    /// Machine credential used on v4.0 backchannels, authenticating as
    /// `principal` toward the client.
    fn machine(&self, principal: &str) -> Option<Credential>;

    /// Credential derived from a session's callback security parameters,
    /// used on v4.1+ backchannels.
    fn for_session(&self, security: &CallbackSecurity) -> Option<Credential>;
}

/// Connection parameters the forward path installed for the backchannel.
/// Read-only to the engine except inside the per-client executor.
#[derive(Clone, Default)]
pub struct CbConn {
    pub addr: Option<SocketAddr>,
    pub saddr: Option<SocketAddr>,
    /// v4.0 callback program number.
    pub program: u32,
    /// v4.0 callback ident, echoed in every CB_COMPOUND header.
    pub ident: u32,
    /// v4.1+: the client-bound bidirectional transport, discovered on one of
    /// the client's sessions.
    pub xprt: Option<Arc<dyn RpcChannel>>,
}
