//! LAN server discovery.
//!
//! A host counts as a server if it accepts a TCP connection on the game port
//! and opens with an id message. Probing costs the server one player id but
//! never creates a player, since the probe hangs up before the handshake ends.

use log::debug;
use shared::{local_ip, MessageReader, PlayerId, ProtocolError, Welcome};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

async fn read_welcome(addr: SocketAddr) -> Result<PlayerId, ProtocolError> {
    let stream = TcpStream::connect(addr).await?;
    let mut reader = MessageReader::new(stream);
    let welcome: Welcome = reader.read_message().await?;
    Ok(welcome.id)
}

/// True if `addr` answers like a game server within `wait`.
pub async fn probe(addr: SocketAddr, wait: Duration) -> bool {
    match timeout(wait, read_welcome(addr)).await {
        Ok(Ok(id)) => {
            debug!("Found server at {} (offered id {})", addr, id);
            true
        }
        Ok(Err(e)) => {
            debug!("{} is not a server: {}", addr, e);
            false
        }
        Err(_) => false,
    }
}

/// Probes `.1` to `.254` of the /24 that `local` belongs to, all at once.
/// Returns the responders sorted by address.
pub async fn scan_subnet(local: IpAddr, port: u16, wait: Duration) -> Vec<SocketAddr> {
    let IpAddr::V4(local) = local else {
        debug!("Subnet scan needs an IPv4 address, got {}", local);
        return Vec::new();
    };
    let [a, b, c, _] = local.octets();

    let mut probes = JoinSet::new();
    for host in 1..=254u8 {
        let addr = SocketAddr::from((Ipv4Addr::new(a, b, c, host), port));
        probes.spawn(async move { probe(addr, wait).await.then_some(addr) });
    }

    let mut found = Vec::new();
    while let Some(result) = probes.join_next().await {
        if let Ok(Some(addr)) = result {
            found.push(addr);
        }
    }
    found.sort();
    found
}

/// Scans the subnet of this host's LAN address and returns the first server.
pub async fn find_server(port: u16, wait: Duration) -> Option<SocketAddr> {
    let local = local_ip();
    debug!("Scanning {}/24 for servers on port {}", local, port);
    scan_subnet(local, port, wait).await.into_iter().next()
}
