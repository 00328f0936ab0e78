//! Session lifecycle: endpoint bring-up, instance wiring, teardown.
//!
//! A session instance is one Pusher/Popper pair bound to the same journal
//! path and started/stopped together. Duplex sessions run both directions
//! over one connection (the socket is cloned for independent read and
//! write handles); simplex sessions bring up each endpoint separately and
//! wire the two sockets into one instance.

use crate::schedule::SessionSchedule;
use chrono::Utc;
use cinnabar_config::{ConfigError, Endpoint, EndpointKind, SessionConfig};
use cinnabar_core::{Popper, Pusher, StartError};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Back-off between connect attempts.
const CONNECT_RETRY: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Poll period for non-blocking accept and instance supervision.
const POLL: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Start(#[from] StartError),
    #[error("no usable address for endpoint {endpoint}")]
    Unresolvable { endpoint: String },
    #[error("session window closed before the endpoint came up")]
    WindowClosed,
}

pub struct SessionController {
    config: SessionConfig,
    schedule: SessionSchedule,
}

impl SessionController {
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let schedule = SessionSchedule::from_config(&config)?;
        Ok(Self { config, schedule })
    }

    /// Runs one scheduled session window: sleep until warm-up, bring the
    /// endpoints up, run instances until the window closes, tear down.
    pub fn run(&self) -> Result<(), SessionError> {
        let wait = self.schedule.until_open(Utc::now());
        if wait > 0 {
            info!("sleeping {wait}s until session warm-up");
            std::thread::sleep(Duration::from_secs(wait));
        }

        let in_going = self.config.ingoing_endpoint()?;
        if self.config.is_duplex {
            match in_going.kind {
                EndpointKind::Listen => self.accept_duplex_connections(&in_going)?,
                EndpointKind::Connect => {
                    let socket = self.connect_with_retry(&in_going)?;
                    let source = socket.try_clone()?;
                    if let Err(e) = self.run_instance(source, socket) {
                        error!("session instance failed: {e}");
                    }
                }
            }
        } else {
            let out_going = self
                .config
                .outgoing_endpoint()?
                .ok_or(ConfigError::MissingOutgoing)?;
            let source = self.bring_up(&in_going)?;
            info!("ingoing simplex socket up");
            let sink = self.bring_up(&out_going)?;
            info!("outgoing simplex socket up");
            if let Err(e) = self.run_instance(source, sink) {
                error!("session instance failed: {e}");
            }
        }

        let remaining = self.schedule.remaining(Utc::now());
        if remaining > 0 {
            info!("sleeping {remaining}s until session end");
            std::thread::sleep(Duration::from_secs(remaining));
        }
        info!("session window closed");
        Ok(())
    }

    /// Duplex listener: accept connections one after another for the rest
    /// of the window, each running a full instance.
    fn accept_duplex_connections(&self, endpoint: &Endpoint) -> Result<(), SessionError> {
        let listener = TcpListener::bind(resolve(endpoint)?)?;
        listener.set_nonblocking(true)?;
        info!(
            "listening for FIX peers on {addr}:{port}",
            addr = &endpoint.address,
            port = endpoint.port
        );
        loop {
            if self.schedule.remaining(Utc::now()) == 0 {
                return Ok(());
            }
            match listener.accept() {
                Ok((socket, peer)) => {
                    info!("accepted FIX peer {peer}");
                    socket.set_nonblocking(false)?;
                    let source = socket.try_clone()?;
                    if let Err(e) = self.run_instance(source, socket) {
                        error!("session instance failed: {e}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(POLL);
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    std::thread::sleep(POLL);
                }
            }
        }
    }

    /// Brings up one simplex endpoint: a single accept, or a connect.
    fn bring_up(&self, endpoint: &Endpoint) -> Result<TcpStream, SessionError> {
        match endpoint.kind {
            EndpointKind::Connect => self.connect_with_retry(endpoint),
            EndpointKind::Listen => {
                let listener = TcpListener::bind(resolve(endpoint)?)?;
                listener.set_nonblocking(true)?;
                loop {
                    if self.schedule.remaining(Utc::now()) == 0 {
                        return Err(SessionError::WindowClosed);
                    }
                    match listener.accept() {
                        Ok((socket, peer)) => {
                            info!("accepted simplex peer {peer}");
                            socket.set_nonblocking(false)?;
                            return Ok(socket);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            std::thread::sleep(POLL);
                        }
                        Err(e) => {
                            warn!("accept failed: {e}");
                            std::thread::sleep(POLL);
                        }
                    }
                }
            }
        }
    }

    /// Connects with the fixed back-off, giving up only when the session
    /// window closes.
    fn connect_with_retry(&self, endpoint: &Endpoint) -> Result<TcpStream, SessionError> {
        let addr = resolve(endpoint)?;
        loop {
            if self.schedule.remaining(Utc::now()) == 0 {
                return Err(SessionError::WindowClosed);
            }
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(socket) => return Ok(socket),
                Err(e) => {
                    error!(
                        "could not connect to {addr}: {e}. Retrying in {secs}s.",
                        secs = CONNECT_RETRY.as_secs()
                    );
                    std::thread::sleep(CONNECT_RETRY);
                }
            }
        }
    }

    /// One Pusher/Popper pair over the given sockets, supervised until the
    /// peer disconnects, an I/O error is recorded, or the window closes.
    fn run_instance(&self, source: TcpStream, sink: TcpStream) -> Result<(), SessionError> {
        let version = self.config.session_version()?;
        let separator = self.config.field_separator;

        let mut pusher = Pusher::new(separator);
        let session_pusher = pusher
            .session_handle()
            .expect("fresh pusher always has its session handle");
        pusher.start(&self.config.journal_path, version, sink)?;

        let mut popper = Popper::new(separator);
        popper.start(&self.config.journal_path, version, session_pusher, source)?;

        info!(
            "session instance up, journal {path}",
            path = &self.config.journal_path
        );
        loop {
            if popper.peer_closed() {
                info!("peer disconnected, tearing session instance down");
                break;
            }
            let (perr, serr) = (popper.last_error(), pusher.last_error());
            if perr != 0 || serr != 0 {
                warn!("instance stopping on socket error (source {perr}, sink {serr})");
                break;
            }
            if self.schedule.remaining(Utc::now()) == 0 {
                info!("session window over, tearing session instance down");
                break;
            }
            debug!(
                "instance alive, incoming seq {seq}, stats {stats:?}",
                seq = popper.expected_incoming(),
                stats = pusher.stats()
            );
            std::thread::sleep(POLL);
        }

        popper.stop();
        pusher.stop();
        Ok(())
    }
}

/// Picks the first resolved address matching the endpoint's family.
fn resolve(endpoint: &Endpoint) -> Result<SocketAddr, SessionError> {
    use cinnabar_config::AddressFamily;
    let addrs = (endpoint.address.as_str(), endpoint.port).to_socket_addrs()?;
    for addr in addrs {
        let ok = match endpoint.family {
            AddressFamily::Any => true,
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        };
        if ok {
            return Ok(addr);
        }
    }
    Err(SessionError::Unresolvable {
        endpoint: format!("{}|{}", endpoint.address, endpoint.port),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinnabar_config::AddressFamily;

    #[test]
    fn resolve_honours_the_family() {
        let v4 = Endpoint {
            family: AddressFamily::V4,
            kind: EndpointKind::Listen,
            address: "127.0.0.1".into(),
            port: 0,
        };
        assert!(resolve(&v4).unwrap().is_ipv4());

        let mismatched = Endpoint {
            family: AddressFamily::V6,
            kind: EndpointKind::Listen,
            address: "127.0.0.1".into(),
            port: 0,
        };
        assert!(matches!(
            resolve(&mismatched),
            Err(SessionError::Unresolvable { .. })
        ));
    }
}
