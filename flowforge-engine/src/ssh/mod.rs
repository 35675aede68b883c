//! SSH remoting
//!
//! Keypair generation, connectivity tests, remote command execution, and
//! SCP file push against target hosts. Host-key verification is pluggable;
//! the default policy accepts any key and is only suitable for controlled
//! environments.

pub mod client;
pub mod keys;

pub use client::{AcceptAll, HostKeyPolicy, SshClient, SshError};
pub use keys::generate_key_pair;
