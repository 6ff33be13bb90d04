//! KAS/MQ message queueing server.
//!
//! The `kasmq` binary wires these modules together; the message model and the
//! wire codec are also usable on their own by clients speaking the protocol.

pub mod config;
pub mod janitor;
pub mod logging;
pub mod message;
pub mod pools;
pub mod processors;
pub mod queues;
pub mod security;
pub mod server;
pub mod shutdown;
pub mod storage;
pub mod utils;
pub mod wire;
