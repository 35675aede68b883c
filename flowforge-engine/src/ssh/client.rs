//! SSH client
//!
//! Session establishment, remote command execution, and sink-mode SCP file
//! push on top of libssh2. The client is synchronous; the engine drives it
//! through `spawn_blocking` when a run needs remote work.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ssh2::Session;
use thiserror::Error;

use flowforge_core::domain::credential::SshKey;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("ssh failure: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("could not resolve address {0}")]
    Resolve(String),

    #[error("host key for {0} rejected by policy")]
    HostKeyRejected(String),

    #[error("authentication failed for {user}@{host}")]
    Auth { user: String, host: String },

    #[error("remote command exited with status {exit_code}: {stderr}")]
    RemoteCommand { exit_code: i32, stderr: String },

    #[error("key error: {0}")]
    Key(String),
}

/// Decides whether a presented host key is acceptable.
///
/// The default [`AcceptAll`] policy accepts anything; substitute a
/// known-hosts verifier for production deployments.
pub trait HostKeyPolicy: Send + Sync {
    fn verify(&self, host: &str, key: &[u8]) -> bool;
}

/// Permissive host-key policy: accepts any key.
pub struct AcceptAll;

impl HostKeyPolicy for AcceptAll {
    fn verify(&self, _host: &str, _key: &[u8]) -> bool {
        true
    }
}

/// SSH remoting client.
pub struct SshClient {
    timeout: Duration,
    policy: Arc<dyn HostKeyPolicy>,
}

impl SshClient {
    pub fn new(config: &Config) -> Self {
        Self { timeout: config.ssh_timeout, policy: Arc::new(AcceptAll) }
    }

    pub fn with_host_key_policy(mut self, policy: Arc<dyn HostKeyPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Dials the host, completes the handshake with public-key auth, and
    /// runs a sentinel command. Success means the target is usable.
    pub fn test_connection(
        &self,
        host: &str,
        port: u16,
        user: &str,
        private_key: &str,
    ) -> Result<(), SshError> {
        let session = self.session(host, port, user, private_key)?;

        let mut channel = session.channel_session()?;
        channel.exec("echo Connection successful")?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;
        channel.wait_close()?;

        let exit_code = channel.exit_status()?;
        if exit_code != 0 {
            return Err(SshError::RemoteCommand { exit_code, stderr: String::new() });
        }

        Ok(())
    }

    /// Runs `command` on the target and returns `(stdout, stderr)`.
    ///
    /// A non-zero remote exit is an error carrying stderr as the diagnostic
    /// payload.
    pub fn execute_command(
        &self,
        credential: &SshKey,
        host: &str,
        port: u16,
        user: &str,
        command: &str,
    ) -> Result<(String, String), SshError> {
        let session = self.session(host, port, user, &credential.private_key)?;

        let mut channel = session.channel_session()?;
        channel.exec(command)?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout)?;

        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr)?;

        channel.wait_close()?;

        let exit_code = channel.exit_status()?;
        if exit_code != 0 {
            return Err(SshError::RemoteCommand { exit_code, stderr });
        }

        Ok((stdout, stderr))
    }

    /// Streams a local file to the target using the classic sink-mode SCP
    /// protocol: `C<mode> <size> <basename>`, the body, then a NUL
    /// terminator, against `scp -t <remote dir>` on the far side.
    pub fn copy_file(
        &self,
        credential: &SshKey,
        host: &str,
        port: u16,
        user: &str,
        local_path: &Path,
        remote_path: &Path,
    ) -> Result<(), SshError> {
        let mut local_file = std::fs::File::open(local_path)?;
        let metadata = local_file.metadata()?;

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = 0o644;

        let basename = remote_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SshError::Key(format!("invalid remote path: {:?}", remote_path)))?;
        let remote_dir = remote_path.parent().unwrap_or_else(|| Path::new("."));

        let session = self.session(host, port, user, &credential.private_key)?;

        let mut channel = session.channel_session()?;
        channel.exec(&format!("scp -t {}", remote_dir.display()))?;

        channel.write_all(scp_sink_header(mode, metadata.len(), basename).as_bytes())?;
        std::io::copy(&mut local_file, &mut channel)?;
        channel.write_all(b"\x00")?;

        channel.send_eof()?;
        channel.wait_eof()?;
        channel.wait_close()?;

        let exit_code = channel.exit_status()?;
        if exit_code != 0 {
            return Err(SshError::RemoteCommand { exit_code, stderr: String::new() });
        }

        Ok(())
    }

    fn session(
        &self,
        host: &str,
        port: u16,
        user: &str,
        private_key: &str,
    ) -> Result<Session, SshError> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SshError::Resolve(format!("{}:{}", host, port)))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)?;

        let mut session = Session::new()?;
        session.set_timeout(self.timeout.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session.handshake()?;

        if let Some((key, _kind)) = session.host_key() {
            if !self.policy.verify(host, key) {
                return Err(SshError::HostKeyRejected(host.to_string()));
            }
        }

        session.userauth_pubkey_memory(user, None, private_key, None)?;
        if !session.authenticated() {
            return Err(SshError::Auth { user: user.to_string(), host: host.to_string() });
        }

        Ok(session)
    }
}

/// Sink-mode SCP file header: `C%04o %d %s\n` with the mode masked to its
/// permission bits.
pub fn scp_sink_header(mode: u32, size: u64, basename: &str) -> String {
    format!("C{:04o} {} {}\n", mode & 0o777, size, basename)
}
