//! SSH tunnel to a remote rsync daemon.
//!
//! `ssh -N -L <local>:localhost:873 …` runs as a child process for as long as
//! the [`Tunnel`] lives; dropping it kills ssh.

use std::{
    io::{self, BufRead, BufReader, Read},
    net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream},
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info};

use crate::{destination::TunnelSpec, errors::BackupError, runner::tunnel_args};

/// How long ssh gets to open the forwarded port.
const READY_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct Tunnel {
    alias: String,
    child: Child,
    local_port: u16,
}

impl Tunnel {
    /// Spawns ssh and waits until the forwarded port accepts connections.
    pub fn open(spec: &TunnelSpec) -> Result<Self, BackupError> {
        let error = |reason: String| BackupError::Tunnel {
            alias: spec.ssh_alias.clone(),
            reason,
        };

        let local_port = match spec.local_port {
            Some(port) => port,
            None => free_port().map_err(|e| error(format!("no free local port: {e}")))?,
        };

        let argv = tunnel_args(spec, local_port);
        debug!("Tunnel: {}", argv.join(" "));

        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| error(format!("failed to spawn ssh: {e}")))?;

        let mut tunnel = Self {
            alias: spec.ssh_alias.clone(),
            child,
            local_port,
        };
        tunnel.wait_until_ready().map_err(error)?;
        if let Some(pipe) = tunnel.child.stderr.take() {
            let _ = forward_stderr(pipe);
        }

        info!(
            "SSH tunnel to {} is listening on port {local_port}.",
            spec.ssh_alias
        );
        Ok(tunnel)
    }

    pub const fn local_port(&self) -> u16 {
        self.local_port
    }

    fn wait_until_ready(&mut self) -> Result<(), String> {
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_port));
        let start_time = Instant::now();

        loop {
            if let Some(status) = self.child.try_wait().map_err(|e| e.to_string())? {
                let mut stderr = String::new();
                if let Some(mut pipe) = self.child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Err(format!("ssh exited prematurely ({status}): {}", stderr.trim()));
            }

            if TcpStream::connect_timeout(&address, POLL_INTERVAL).is_ok() {
                return Ok(());
            }

            if start_time.elapsed() >= READY_TIMEOUT {
                return Err(format!(
                    "port {} wasn't opened within {} seconds",
                    self.local_port,
                    READY_TIMEOUT.as_secs()
                ));
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        debug!("Closing SSH tunnel to {}...", self.alias);
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Keeps reading ssh's stderr into the debug log so that a chatty ssh never
/// blocks on a full pipe.  Returns the number of lines read.
fn forward_stderr<R>(pipe: R) -> JoinHandle<usize>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        BufReader::new(pipe)
            .lines()
            .map_while(Result::ok)
            .inspect(|line| debug!("ssh: {line}"))
            .count()
    })
}

/// A loopback port nobody is listening on right now.
fn free_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
