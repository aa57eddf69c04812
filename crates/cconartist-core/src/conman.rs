//! Book-keeping for TCP connections and UDP peers.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tracing::debug;

/// Transport of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Stream socket
    Tcp,
    /// Datagram peer
    Udp,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        })
    }
}

/// Identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionInfo {
    /// Transport
    pub kind: ConnectionKind,
    /// Peer address
    pub remote: SocketAddr,
    /// Port of the server that accepted it
    pub local_port: u16,
}

/// Index of a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Live state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Active
    Connected,
    /// Closed by either side
    Disconnected,
}

/// A tracked connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Slot
    pub id: ConnectionId,
    /// Identity
    pub info: ConnectionInfo,
    /// State
    pub state: ConnectionState,
    /// Time the connection was opened (seconds since the epoch)
    pub opened_at: u64,
    /// Time of the last packet
    pub last_active: u64,
    /// Packets received
    pub packets: u64,
    /// Bytes received
    pub bytes: u64,
}

/// Errors tracking connections.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// No free slot.
    #[error("connection limit of {0} reached")]
    Full(usize),
}

/// Fixed number of connection slots.
#[derive(Debug)]
pub struct ConnectionManager {
    slots: Vec<Option<Connection>>,
    live: HashMap<ConnectionInfo, ConnectionId>,
    capacity: usize,
}

impl ConnectionManager {
    /// Tracker with room for `capacity` simultaneous connections.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            live: HashMap::new(),
            capacity,
        }
    }

    /// Track `info`, reusing the live entry for the same peer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Full`] when every slot is taken.
    pub fn open(&mut self, info: ConnectionInfo, now: u64) -> Result<ConnectionId, ConnectionError> {
        if let Some(id) = self.live.get(&info) {
            return Ok(*id);
        }

        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(ConnectionError::Full(self.capacity)),
        };

        let id = ConnectionId(index);
        self.slots[index] = Some(Connection {
            id,
            info,
            state: ConnectionState::Connected,
            opened_at: now,
            last_active: now,
            packets: 0,
            bytes: 0,
        });
        self.live.insert(info, id);
        debug!(%id, kind = %info.kind, remote = %info.remote, port = info.local_port, "connection opened");
        Ok(id)
    }

    /// Record a received packet.
    pub fn touch(&mut self, id: ConnectionId, bytes: usize, now: u64) {
        if let Some(Some(conn)) = self.slots.get_mut(id.0) {
            conn.last_active = now;
            conn.packets += 1;
            conn.bytes += bytes as u64;
        }
    }

    /// Forget a connection and free its slot.
    pub fn mark_disconnected(&mut self, id: ConnectionId) -> Option<Connection> {
        let mut conn = self.slots.get_mut(id.0)?.take()?;
        self.live.remove(&conn.info);
        conn.state = ConnectionState::Disconnected;
        debug!(%id, remote = %conn.info.remote, packets = conn.packets, "connection closed");
        Some(conn)
    }

    /// Connection in slot `id`.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.slots.get(id.0)?.as_ref()
    }

    /// Copies of all live connections.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.slots.iter().flatten().cloned().collect()
    }

    /// Live connections.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True when nothing is connected.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Maximum simultaneous connections.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(kind: ConnectionKind, port: u16) -> ConnectionInfo {
        ConnectionInfo {
            kind,
            remote: SocketAddr::from(([192, 168, 1, 20], port)),
            local_port: 31372,
        }
    }

    #[test]
    fn test_open_reuses_live_entry() {
        let mut conman = ConnectionManager::new(4);
        let a = conman.open(info(ConnectionKind::Udp, 5000), 10).unwrap();
        let b = conman.open(info(ConnectionKind::Udp, 5000), 11).unwrap();
        assert_eq!(a, b);
        let c = conman.open(info(ConnectionKind::Tcp, 5000), 12).unwrap();
        assert_ne!(a, c);
        assert_eq!(conman.len(), 2);
    }

    #[test]
    fn test_touch_and_snapshot() {
        let mut conman = ConnectionManager::new(4);
        let id = conman.open(info(ConnectionKind::Tcp, 6000), 100).unwrap();
        conman.touch(id, 40, 105);
        conman.touch(id, 2, 107);
        let conn = conman.get(id).unwrap();
        assert_eq!((conn.packets, conn.bytes, conn.last_active), (2, 42, 107));
        assert_eq!(conman.snapshot(), vec![conn.clone()]);
    }

    #[test]
    fn test_capacity_and_slot_reuse() {
        let mut conman = ConnectionManager::new(2);
        let a = conman.open(info(ConnectionKind::Tcp, 1), 0).unwrap();
        conman.open(info(ConnectionKind::Tcp, 2), 0).unwrap();
        assert_eq!(
            conman.open(info(ConnectionKind::Tcp, 3), 0),
            Err(ConnectionError::Full(2))
        );

        let closed = conman.mark_disconnected(a).unwrap();
        assert_eq!(closed.state, ConnectionState::Disconnected);
        assert!(conman.get(a).is_none());
        assert!(conman.mark_disconnected(a).is_none());

        let c = conman.open(info(ConnectionKind::Tcp, 3), 0).unwrap();
        assert_eq!(c, a);
        assert_eq!(conman.len(), 2);
    }
}
