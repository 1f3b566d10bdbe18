use crate::config::{Backend, ConfigError, RendezvousConfig};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::{self, ErrorKind};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

// --- Constants ---
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
// `set_read_timeout` rejects a zero duration.
const MIN_IO_TIMEOUT: Duration = Duration::from_millis(10);
// A connection that does not introduce itself within this window is dropped.
const HELLO_TIMEOUT: Duration = Duration::from_millis(500);

// --- Errors ---

/// Errors produced while forming a process group.
#[derive(Debug, Error)]
pub enum DistError {
    /// `world_size` was 0.
    #[error("world size must be at least 1")]
    EmptyWorld,
    /// `rank` is not below `world_size`.
    #[error("rank {rank} is out of range for world size {world_size}")]
    RankOutOfRange {
        /// Requested rank.
        rank: usize,
        /// Requested world size.
        world_size: usize,
    },
    /// The rendezvous configuration could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Peers disagree on the size of the group.
    #[error("group at {endpoint} expects world size {expected}, got {got}")]
    WorldSizeMismatch {
        /// Rendezvous endpoint.
        endpoint: String,
        /// World size the group was formed with.
        expected: usize,
        /// World size of the joining rank.
        got: usize,
    },
    /// A rank tried to join a group it is already a member of.
    #[error("rank {rank} already joined group at {endpoint}")]
    DuplicateRank {
        /// Rendezvous endpoint.
        endpoint: String,
        /// The duplicated rank.
        rank: usize,
    },
    /// Rank 0 could not listen on the rendezvous endpoint.
    #[error("cannot bind rendezvous endpoint {endpoint}: {source}")]
    Bind {
        /// Rendezvous endpoint.
        endpoint: String,
        /// Underlying socket error.
        source: io::Error,
    },
    /// The group did not form before rank 0's deadline.
    #[error("rendezvous at {endpoint} timed out with {joined} of {expected} ranks")]
    Timeout {
        /// Rendezvous endpoint.
        endpoint: String,
        /// Ranks present when the deadline passed, rank 0 included.
        joined: usize,
        /// Ranks the group needs.
        expected: usize,
    },
    /// A non-zero rank could not reach rank 0 before the deadline.
    #[error("rendezvous endpoint {endpoint} unreachable")]
    Unreachable {
        /// Rendezvous endpoint.
        endpoint: String,
    },
    /// Rank 0 closed the connection, or stayed silent past this rank's
    /// deadline, before confirming the group.
    #[error("rendezvous at {endpoint} ended before the group formed")]
    Aborted {
        /// Rendezvous endpoint.
        endpoint: String,
    },
    /// Rank 0 refused this rank, or abandoned the group.
    #[error("rank {rank} rejected by rendezvous: {reason}")]
    Rejected {
        /// This rank.
        rank: usize,
        /// Reason reported by rank 0.
        reason: String,
    },
    /// Socket error during the handshake.
    #[error("I/O error during rendezvous: {0}")]
    Io(#[from] io::Error),
    /// A handshake message could not be encoded or decoded.
    #[error("malformed rendezvous message: {0}")]
    Codec(#[from] bincode::Error),
}

// --- Handshake ---

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    rank: usize,
    world_size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
enum Ack {
    Accepted,
    Rejected(String),
    TimedOut { joined: usize, expected: usize },
}

// --- In-process registry ---

#[derive(Debug)]
struct LocalGroup {
    world_size: usize,
    members: HashSet<usize>,
}

static LOCAL_GROUPS: Lazy<Mutex<HashMap<String, LocalGroup>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn local_groups() -> MutexGuard<'static, HashMap<String, LocalGroup>> {
    LOCAL_GROUPS.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct LocalMembership {
    endpoint: String,
    rank: usize,
}

impl Drop for LocalMembership {
    fn drop(&mut self) {
        let mut groups = local_groups();
        let empty = groups.get_mut(&self.endpoint).is_some_and(|group| {
            group.members.remove(&self.rank);
            group.members.is_empty()
        });
        if empty {
            groups.remove(&self.endpoint);
        }
    }
}

fn join_local(endpoint: &str, rank: usize, world_size: usize) -> Result<LocalMembership, DistError> {
    let mut groups = local_groups();
    let group = groups
        .entry(endpoint.to_string())
        .or_insert_with(|| LocalGroup {
            world_size,
            members: HashSet::new(),
        });
    if group.world_size != world_size {
        return Err(DistError::WorldSizeMismatch {
            endpoint: endpoint.to_string(),
            expected: group.world_size,
            got: world_size,
        });
    }
    if !group.members.insert(rank) {
        return Err(DistError::DuplicateRank {
            endpoint: endpoint.to_string(),
            rank,
        });
    }
    Ok(LocalMembership {
        endpoint: endpoint.to_string(),
        rank,
    })
}

// --- TCP rendezvous ---

#[derive(Debug)]
struct TcpMembership {
    // Rank 0 keeps the endpoint bound for the lifetime of the group.
    _listener: Option<TcpListener>,
    peers: Vec<TcpStream>,
}

impl Drop for TcpMembership {
    fn drop(&mut self) {
        for peer in &self.peers {
            let _ = peer.shutdown(Shutdown::Both);
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline
        .saturating_duration_since(Instant::now())
        .max(MIN_IO_TIMEOUT)
}

// Best effort: a peer that already left does not change the outcome.
fn notify_all(joined: HashMap<usize, TcpStream>, ack: &Ack) {
    for mut stream in joined.into_values() {
        let _ = bincode::serialize_into(&mut stream, ack);
    }
}

fn read_hello(stream: &mut TcpStream, deadline: Instant) -> Result<Hello, DistError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(remaining(deadline).min(HELLO_TIMEOUT)))?;
    Ok(bincode::deserialize_from(stream)?)
}

fn check_hello(
    hello: &Hello,
    endpoint: &str,
    world_size: usize,
    joined: &HashMap<usize, TcpStream>,
) -> Result<(), DistError> {
    if hello.world_size != world_size {
        return Err(DistError::WorldSizeMismatch {
            endpoint: endpoint.to_string(),
            expected: world_size,
            got: hello.world_size,
        });
    }
    if hello.rank >= world_size {
        return Err(DistError::RankOutOfRange {
            rank: hello.rank,
            world_size,
        });
    }
    if hello.rank == 0 || joined.contains_key(&hello.rank) {
        return Err(DistError::DuplicateRank {
            endpoint: endpoint.to_string(),
            rank: hello.rank,
        });
    }
    Ok(())
}

/// Rank 0: bind the endpoint, collect every other rank, then release them all at once.
fn host_rendezvous(
    endpoint: &str,
    world_size: usize,
    timeout: Duration,
) -> Result<TcpMembership, DistError> {
    let listener = TcpListener::bind(endpoint).map_err(|source| DistError::Bind {
        endpoint: endpoint.to_string(),
        source,
    })?;
    listener.set_nonblocking(true)?;

    let deadline = Instant::now() + timeout;
    let mut joined: HashMap<usize, TcpStream> = HashMap::new();

    while joined.len() + 1 < world_size {
        if Instant::now() >= deadline {
            let (present, expected) = (joined.len() + 1, world_size);
            notify_all(joined, &Ack::TimedOut { joined: present, expected });
            return Err(DistError::Timeout {
                endpoint: endpoint.to_string(),
                joined: present,
                expected,
            });
        }

        match listener.accept() {
            Ok((mut stream, addr)) => {
                let hello = match read_hello(&mut stream, deadline) {
                    Ok(hello) => hello,
                    Err(err) => {
                        warn!(%addr, error = %err, "dropping connection without a valid hello");
                        continue;
                    }
                };

                if let Err(err) = check_hello(&hello, endpoint, world_size, &joined) {
                    warn!(%addr, rank = hello.rank, error = %err, "rejecting rank");
                    let reason = err.to_string();
                    let _ = bincode::serialize_into(&mut stream, &Ack::Rejected(reason.clone()));
                    notify_all(joined, &Ack::Rejected(format!("group aborted: {reason}")));
                    return Err(err);
                }
                debug!(%addr, rank = hello.rank, "rank joined rendezvous");
                joined.insert(hello.rank, stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                notify_all(joined, &Ack::Rejected(format!("group aborted: {e}")));
                return Err(e.into());
            }
        }
    }

    // Everyone is here: release the waiting ranks.
    let mut peers = Vec::with_capacity(joined.len());
    for mut stream in joined.into_values() {
        bincode::serialize_into(&mut stream, &Ack::Accepted)?;
        peers.push(stream);
    }

    Ok(TcpMembership {
        _listener: Some(listener),
        peers,
    })
}

fn is_closed_or_silent(err: &bincode::Error) -> bool {
    matches!(
        &**err,
        bincode::ErrorKind::Io(e) if matches!(
            e.kind(),
            ErrorKind::WouldBlock
                | ErrorKind::TimedOut
                | ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
        )
    )
}

/// Non-zero rank: reach rank 0, introduce ourselves, wait for the group to form.
fn join_rendezvous(
    endpoint: &str,
    rank: usize,
    world_size: usize,
    timeout: Duration,
) -> Result<TcpMembership, DistError> {
    let deadline = Instant::now() + timeout;

    // Rank 0 may not be listening yet.
    let mut stream = loop {
        match TcpStream::connect(endpoint) {
            Ok(stream) => break stream,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::TimedOut
                ) =>
            {
                if Instant::now() >= deadline {
                    return Err(DistError::Unreachable {
                        endpoint: endpoint.to_string(),
                    });
                }
                thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    };

    stream.set_read_timeout(Some(remaining(deadline)))?;
    bincode::serialize_into(&mut stream, &Hello { rank, world_size })?;

    let ack = bincode::deserialize_from(&mut stream).map_err(|err| {
        if is_closed_or_silent(&err) {
            DistError::Aborted {
                endpoint: endpoint.to_string(),
            }
        } else {
            DistError::Codec(err)
        }
    })?;

    match ack {
        Ack::Accepted => Ok(TcpMembership {
            _listener: None,
            peers: vec![stream],
        }),
        Ack::Rejected(reason) => Err(DistError::Rejected { rank, reason }),
        Ack::TimedOut { joined, expected } => Err(DistError::Timeout {
            endpoint: endpoint.to_string(),
            joined,
            expected,
        }),
    }
}

// --- Process group ---

#[derive(Debug)]
enum Membership {
    Local(LocalMembership),
    Tcp(TcpMembership),
}

/// Membership of this process in a distributed group.
///
/// Created by [`setup`]. Dropping the handle, or passing it to [`cleanup`],
/// leaves the group and releases its sockets.
#[derive(Debug)]
pub struct ProcessGroup {
    rank: usize,
    world_size: usize,
    backend: Backend,
    endpoint: String,
    membership: Membership,
}

impl ProcessGroup {
    /// This process's rank.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of processes in the group.
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Backend the group was formed with.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Rendezvous endpoint, `host:port`.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether this is rank 0.
    pub fn is_master(&self) -> bool {
        self.rank == 0
    }

    /// Number of open connections to other ranks (TCP backend only).
    pub fn num_connections(&self) -> usize {
        match &self.membership {
            Membership::Local(_) => 0,
            Membership::Tcp(tcp) => tcp.peers.len(),
        }
    }

    /// Leaves the group.
    pub fn cleanup(self) {
        drop(self);
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        info!(
            rank = self.rank,
            world_size = self.world_size,
            endpoint = %self.endpoint,
            "process group released"
        );
    }
}

/// Joins the process group described by `config` as `rank` of `world_size`.
///
/// With the TCP backend this blocks until every rank has joined or
/// `config.timeout` elapses. Failures are returned, never retried.
///
/// # Errors
/// * `DistError::EmptyWorld` / `DistError::RankOutOfRange` for an invalid rank or size.
/// * `DistError::Bind` if rank 0 cannot listen on the endpoint.
/// * `DistError::WorldSizeMismatch` / `DistError::DuplicateRank` / `DistError::Rejected`
///   when peers disagree.
/// * `DistError::Timeout` / `DistError::Unreachable` when the group does not form in time.
/// * `DistError::Aborted` if rank 0 goes away before confirming the group.
pub fn setup(
    rank: usize,
    world_size: usize,
    config: &RendezvousConfig,
) -> Result<ProcessGroup, DistError> {
    if world_size == 0 {
        return Err(DistError::EmptyWorld);
    }
    if rank >= world_size {
        return Err(DistError::RankOutOfRange { rank, world_size });
    }

    let endpoint = config.endpoint();
    debug!(rank, world_size, backend = %config.backend, %endpoint, "joining process group");

    let membership = match config.backend {
        Backend::Local => Membership::Local(join_local(&endpoint, rank, world_size)?),
        Backend::Tcp if rank == 0 => {
            Membership::Tcp(host_rendezvous(&endpoint, world_size, config.timeout)?)
        }
        Backend::Tcp => {
            Membership::Tcp(join_rendezvous(&endpoint, rank, world_size, config.timeout)?)
        }
    };

    info!(rank, world_size, backend = %config.backend, %endpoint, "process group initialized");
    Ok(ProcessGroup {
        rank,
        world_size,
        backend: config.backend,
        endpoint,
        membership,
    })
}

/// [`setup`] with the configuration read from the environment
/// (`MASTER_ADDR`, `MASTER_PORT`, `DIST_BACKEND`, `DIST_TIMEOUT_SECS`).
///
/// # Errors
/// `DistError::Config` for an invalid environment, otherwise as [`setup`].
pub fn setup_from_env(rank: usize, world_size: usize) -> Result<ProcessGroup, DistError> {
    let config = RendezvousConfig::from_env()?;
    setup(rank, world_size, &config)
}

/// Leaves the process group. Equivalent to dropping the handle.
pub fn cleanup(group: ProcessGroup) {
    group.cleanup();
}
