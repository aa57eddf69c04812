//! The collection server: one tokio task per configured endpoint feeding
//! decoded packets into stream storage.

pub mod discovery;
pub mod storage;

pub use storage::Storage;

use anyhow::{bail, Context, Result};
use cconartist_core::{
    now_secs, ConnectionId, ConnectionInfo, ConnectionKind, ConnectionManager, Decoder,
    DecoderRegistry, JobManager, Packet, PacketPool,
};
use cconartist_schema::config::DISCOVERY_DECODER;
use cconartist_schema::{Config, ServerConfig, ServerKind};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Simultaneous TCP connections and UDP peers.
pub const MAX_CONNECTIONS: usize = 128;

/// Buffers shared by all endpoints.
pub const PACKET_POOL_SIZE: usize = 1024;

/// Largest packet read at once.
pub const PACKET_SIZE: usize = 4096;

/// UDP peers silent for this long lose their decoder state.
pub const PEER_IDLE_TIMEOUT: u64 = 300;

const PEER_SWEEP_INTERVAL: u64 = 60;
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);
const BACKOFF: Duration = Duration::from_millis(10);

/// Fail if a server names a decoder that does not exist.
pub fn check_decoders(config: &Config, registry: &DecoderRegistry) -> Result<()> {
    for server in &config.servers {
        for name in &server.decoders {
            if name == DISCOVERY_DECODER {
                if server.kind != ServerKind::Udp {
                    bail!("Server '{}' answers discovery, which needs UDP", server.name);
                }
                continue;
            }
            if !registry.contains(name) {
                let known: Vec<&str> = registry.names().collect();
                bail!(
                    "Server '{}' uses unknown decoder '{name}' (available: {})",
                    server.name,
                    known.join(", ")
                );
            }
        }
    }
    Ok(())
}

#[derive(Debug)]
struct Shared {
    storage: Mutex<Storage>,
    connections: Mutex<ConnectionManager>,
    pool: PacketPool,
    registry: DecoderRegistry,
}

impl Shared {
    fn storage(&self) -> MutexGuard<'_, Storage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connections(&self) -> MutexGuard<'_, ConnectionManager> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decoders_for(&self, server: &ServerConfig) -> Vec<Box<dyn Decoder>> {
        server
            .decoders
            .iter()
            .filter(|name| *name != DISCOVERY_DECODER)
            .filter_map(|name| self.registry.create(name))
            .collect()
    }

    async fn acquire_packet(&self) -> Packet {
        loop {
            if let Some(packet) = self.pool.acquire() {
                return packet;
            }
            debug!("packet pool exhausted, waiting");
            tokio::time::sleep(BACKOFF).await;
        }
    }

    fn decode(&self, decoders: &mut [Box<dyn Decoder>], packet: &[u8], now: u64, remote: SocketAddr) {
        let mut storage = self.storage();
        for decoder in decoders {
            if let Err(e) = decoder.write_to_stream(packet, now, &mut *storage) {
                debug!(%remote, decoder = decoder.name(), "packet rejected: {e}");
            }
        }
    }
}

#[derive(Debug)]
enum Socket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

#[derive(Debug)]
struct Endpoint {
    config: ServerConfig,
    socket: Socket,
    addr: SocketAddr,
}

/// Bound endpoints and the storage they write to.
#[derive(Debug)]
pub struct Server {
    shared: Arc<Shared>,
    endpoints: Vec<Endpoint>,
}

impl Server {
    /// Bind every configured server on all interfaces.
    pub async fn bind(config: &Config) -> Result<Self> {
        Self::bind_on(config, IpAddr::V4(Ipv4Addr::UNSPECIFIED), false).await
    }

    /// Bind every configured server on `host` with ports picked by the OS.
    pub async fn bind_ephemeral(config: &Config, host: IpAddr) -> Result<Self> {
        Self::bind_on(config, host, true).await
    }

    async fn bind_on(config: &Config, host: IpAddr, ephemeral: bool) -> Result<Self> {
        let registry = DecoderRegistry::with_builtin();
        check_decoders(config, &registry)?;

        let jobs = Arc::new(JobManager::with_default_threads());
        let storage = Storage::open(config, jobs, now_secs()).with_context(|| {
            format!("Failed to open streams in {}", config.storage.streams_dir.display())
        })?;
        info!(
            dir = %config.storage.streams_dir.display(),
            streams = storage.manager().rw_count(),
            historical = storage.manager().ro_count(),
            "storage ready"
        );

        let mut endpoints = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let requested = SocketAddr::new(host, if ephemeral { 0 } else { server.port });
            let bind_err = || format!("Failed to bind server '{}' on {} {requested}", server.name, server.kind);
            let (socket, addr) = match server.kind {
                ServerKind::Tcp => {
                    let listener = TcpListener::bind(requested).await.with_context(bind_err)?;
                    let addr = listener.local_addr()?;
                    (Socket::Tcp(listener), addr)
                }
                ServerKind::Udp => {
                    let socket = UdpSocket::bind(requested).await.with_context(bind_err)?;
                    let addr = socket.local_addr()?;
                    (Socket::Udp(socket), addr)
                }
            };
            info!(server = %server.name, kind = %server.kind, %addr, decoders = ?server.decoders, "listening");
            endpoints.push(Endpoint {
                config: server.clone(),
                socket,
                addr,
            });
        }

        Ok(Self {
            shared: Arc::new(Shared {
                storage: Mutex::new(storage),
                connections: Mutex::new(ConnectionManager::new(MAX_CONNECTIONS)),
                pool: PacketPool::new(PACKET_POOL_SIZE, PACKET_SIZE),
                registry,
            }),
            endpoints,
        })
    }

    /// Address the server named `name` is bound to.
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.endpoints
            .iter()
            .find(|e| e.config.name == name)
            .map(|e| e.addr)
    }

    /// Serve until `shutdown` completes, then flush all streams.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let announced: Vec<(ServerKind, u16)> = self
            .endpoints
            .iter()
            .map(|e| (e.config.kind, e.addr.port()))
            .collect();
        let reply: Arc<[u8]> = discovery::encode_reply(&announced).into();

        let mut tasks = JoinSet::new();
        for endpoint in self.endpoints {
            let shared = Arc::clone(&self.shared);
            match endpoint.socket {
                Socket::Tcp(listener) => {
                    tasks.spawn(accept_loop(shared, endpoint.config, listener));
                }
                Socket::Udp(socket) => {
                    tasks.spawn(datagram_loop(shared, endpoint.config, socket, Arc::clone(&reply)));
                }
            }
        }
        tasks.spawn(maintenance_loop(Arc::clone(&self.shared)));

        shutdown.await;
        info!("shutting down");
        tasks.shutdown().await;

        let storage = self.shared.storage();
        storage.flush();
        info!(streams = storage.manager().rw_count(), "streams flushed");
        Ok(())
    }
}

async fn maintenance_loop(shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(MAINTENANCE_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        shared.storage().maintain(now_secs());
    }
}

// Connection tasks live in a set owned by the listener task, so aborting
// the listener closes its connections too.
async fn accept_loop(shared: Arc<Shared>, server: ServerConfig, listener: TcpListener) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    connections.spawn(serve_connection(Arc::clone(&shared), server.clone(), stream, remote));
                }
                Err(e) => {
                    warn!(server = %server.name, "accept failed: {e}");
                    tokio::time::sleep(BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(shared: Arc<Shared>, server: ServerConfig, mut stream: TcpStream, remote: SocketAddr) {
    let local_port = stream.local_addr().map_or(server.port, |a| a.port());
    let info = ConnectionInfo {
        kind: ConnectionKind::Tcp,
        remote,
        local_port,
    };
    let opened = shared.connections().open(info, now_secs());
    let id = match opened {
        Ok(id) => id,
        Err(e) => {
            warn!(%remote, server = %server.name, "rejecting connection: {e}");
            return;
        }
    };

    let mut decoders = shared.decoders_for(&server);
    if let Err(e) = read_packets(&shared, &mut stream, id, &mut decoders, remote).await {
        debug!(%remote, "connection error: {e}");
    }
    shared.connections().mark_disconnected(id);
}

async fn read_packets(
    shared: &Shared,
    stream: &mut TcpStream,
    id: ConnectionId,
    decoders: &mut [Box<dyn Decoder>],
    remote: SocketAddr,
) -> std::io::Result<()> {
    loop {
        let mut packet = shared.acquire_packet().await;
        let n = stream.read(packet.buffer_mut()).await?;
        if n == 0 {
            return Ok(());
        }
        packet.set_len(n);
        let now = now_secs();
        shared.connections().touch(id, n, now);
        shared.decode(decoders, &packet, now, remote);
    }
}

struct Peer {
    id: ConnectionId,
    decoders: Vec<Box<dyn Decoder>>,
}

async fn datagram_loop(shared: Arc<Shared>, server: ServerConfig, socket: UdpSocket, reply: Arc<[u8]>) {
    let discovery = server.is_discovery();
    let decodes = server.decoders.iter().any(|d| d != DISCOVERY_DECODER);
    let local_port = socket.local_addr().map_or(server.port, |a| a.port());
    let mut peers: HashMap<SocketAddr, Peer> = HashMap::new();
    let mut last_sweep = now_secs();

    loop {
        let mut packet = shared.acquire_packet().await;
        let (n, remote) = match socket.recv_from(packet.buffer_mut()).await {
            Ok(received) => received,
            Err(e) => {
                debug!(server = %server.name, "receive failed: {e}");
                continue;
            }
        };
        packet.set_len(n);
        let now = now_secs();

        if discovery && discovery::is_request(&packet) {
            match socket.send_to(&reply[..], remote).await {
                Ok(_) => debug!(%remote, "answered discovery"),
                Err(e) => debug!(%remote, "discovery reply failed: {e}"),
            }
            continue;
        }
        if !decodes {
            continue;
        }

        if now.saturating_sub(last_sweep) >= PEER_SWEEP_INTERVAL {
            forget_idle_peers(&shared, &mut peers, now);
            last_sweep = now;
        }

        let peer = match peers.entry(remote) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let info = ConnectionInfo {
                    kind: ConnectionKind::Udp,
                    remote,
                    local_port,
                };
                let opened = shared.connections().open(info, now);
                match opened {
                    Ok(id) => entry.insert(Peer {
                        id,
                        decoders: shared.decoders_for(&server),
                    }),
                    Err(e) => {
                        debug!(%remote, server = %server.name, "datagram dropped: {e}");
                        continue;
                    }
                }
            }
        };
        shared.connections().touch(peer.id, n, now);
        shared.decode(&mut peer.decoders, &packet, now, remote);
    }
}

fn forget_idle_peers(shared: &Shared, peers: &mut HashMap<SocketAddr, Peer>, now: u64) {
    let mut connections = shared.connections();
    peers.retain(|_, peer| {
        let active = connections
            .get(peer.id)
            .is_some_and(|c| now.saturating_sub(c.last_active) < PEER_IDLE_TIMEOUT);
        if !active {
            connections.mark_disconnected(peer.id);
        }
        active
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cconartist_core::StreamFile;
    use std::path::{Path, PathBuf};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn config(dir: &Path) -> Config {
        let mut config = Config::from_json_str(
            r#"{
                "servers": [
                    { "name": "discovery", "type": "udp", "port": 31370, "decoders": ["discovery"] },
                    { "name": "sensors", "type": "udp", "port": 31371, "decoders": ["sensor"] },
                    { "name": "plugs", "type": "tcp", "port": 31373, "decoders": ["geekopen"] }
                ],
                "streams": [
                    { "name": "office_temperature", "user_id": "00:11:22:33:44:55", "user_type": "temperature" },
                    { "name": "plug_power", "user_id": "8CCE4E50AF57", "user_type": "power" }
                ],
                "storage": { "stream_file_size": 65536 }
            }"#,
        )
        .unwrap();
        config.storage.streams_dir = dir.join("streams");
        config.storage.mappings = dir.join("mappings.txt");
        config
    }

    async fn start(dir: &Path) -> (HashMap<&'static str, SocketAddr>, oneshot::Sender<()>, JoinHandle<Result<()>>) {
        let server = Server::bind_ephemeral(&config(dir), LOCALHOST).await.unwrap();
        let addrs = ["discovery", "sensors", "plugs"]
            .into_iter()
            .map(|name| (name, server.local_addr(name).unwrap()))
            .collect();
        let (stop, stopped) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(async move {
            let _ = stopped.await;
        }));
        (addrs, stop, handle)
    }

    async fn wait_for_items(path: PathBuf, count: u64) -> StreamFile {
        for _ in 0..250 {
            if let Ok(file) = StreamFile::open_ro(&path) {
                if file.header().item_count >= count {
                    return file;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never received {count} items", path.display());
    }

    #[test]
    fn test_check_decoders() {
        let registry = DecoderRegistry::with_builtin();
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        check_decoders(&config, &registry).unwrap();

        config.servers[2].decoders.push("plugin".into());
        let err = check_decoders(&config, &registry).unwrap_err();
        assert!(err.to_string().contains("unknown decoder 'plugin'"));

        config.servers[2].decoders = vec!["discovery".into()];
        assert!(check_decoders(&config, &registry).is_err());
    }

    #[tokio::test]
    async fn test_discovery_lists_bound_ports() {
        let dir = tempfile::tempdir().unwrap();
        let (addrs, stop, handle) = start(dir.path()).await;

        let client = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
        client.send_to(b"CCDISCOVER", addrs["discovery"]).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let servers = discovery::decode_reply(&buf[..n]).unwrap();
        assert_eq!(
            servers,
            vec![
                (ServerKind::Udp, addrs["discovery"].port()),
                (ServerKind::Udp, addrs["sensors"].port()),
                (ServerKind::Tcp, addrs["plugs"].port()),
            ]
        );

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sensor_datagram_reaches_configured_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (addrs, stop, handle) = start(dir.path()).await;

        // 8-byte header and one temperature value of 21
        let packet = [5u8, 1, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 1, 0x00, 21];
        let client = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
        client.send_to(&packet, addrs["sensors"]).await.unwrap();

        let file = wait_for_items(dir.path().join("streams/office_temperature.rwstream"), 1).await;
        let item = file.item(0).unwrap();
        assert_eq!(item.data, &21i16.to_le_bytes());

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tcp_json_split_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (addrs, stop, handle) = start(dir.path()).await;

        let mut client = TcpStream::connect(addrs["plugs"]).await.unwrap();
        client.write_all(br#"{"mac":"8CCE4E50AF57","pow"#).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(br#"er":12.5}{"power":13.0}"#).await.unwrap();
        client.flush().await.unwrap();

        let file = wait_for_items(dir.path().join("streams/plug_power.rwstream"), 2).await;
        let values: Vec<f32> = file
            .items()
            .map(|item| f32::from_le_bytes(item.data.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![12.5, 13.0]);

        drop(client);
        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
