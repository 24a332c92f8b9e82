//! Server-side NFSv4 callback channel.
//!
//! NFS is client-initiated in the forward direction, but an NFSv4 server
//! must run a parallel RPC stream *toward* each client whose protocol state
//! demands asynchronous notification: delegations to recall, layouts to
//! return, blocked locks that became available, copy offloads that
//! completed. This crate implements that engine: the per-client callback
//! executor, the CB_SEQUENCE slot layer for minor version 1 and above, the
//! XDR codec for the supported callback operations, and the retry and fault
//! state machine that keeps the channel-health signal honest.
//!
//! The enclosing server supplies the transport and credential machinery
//! through the seams in [`transport`] and drives the engine through
//! [`Client`] and [`engine::run_cb`].

pub mod callback;
pub mod client;
pub mod config;
pub mod engine;
pub mod nfs4;
pub mod parser;
pub mod serializer;
pub mod session;
pub mod status;
pub mod transport;

pub use callback::{Callback, CallbackArgs, CallbackOps, Disposition};
pub use client::{ChannelState, Client, ClientParams};
pub use config::CallbackConfig;
pub use engine::{run_cb, CallbackEnv};
pub use session::Session;
