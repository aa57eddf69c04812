//! Discovery datagrams.
//!
//! A client broadcasts a datagram starting with `CCDISCOVER`. The reply is
//! `CCA1`, the number of servers, and per server its type byte (`T` or
//! `U`) followed by its port in network byte order.

use cconartist_schema::ServerKind;

/// Prefix of a discovery request.
pub const REQUEST: &[u8] = b"CCDISCOVER";

/// Prefix of a discovery reply.
pub const REPLY: &[u8; 4] = b"CCA1";

pub fn is_request(datagram: &[u8]) -> bool {
    datagram.starts_with(REQUEST)
}

/// Reply announcing `servers`. At most 255 are listed.
pub fn encode_reply(servers: &[(ServerKind, u16)]) -> Vec<u8> {
    let servers = &servers[..servers.len().min(usize::from(u8::MAX))];
    let mut reply = Vec::with_capacity(REPLY.len() + 1 + servers.len() * 3);
    reply.extend_from_slice(REPLY);
    reply.push(servers.len() as u8);
    for (kind, port) in servers {
        reply.push(kind.code());
        reply.extend_from_slice(&port.to_be_bytes());
    }
    reply
}

/// Servers listed in a reply, `None` if it is malformed.
pub fn decode_reply(reply: &[u8]) -> Option<Vec<(ServerKind, u16)>> {
    let rest = reply.strip_prefix(REPLY.as_slice())?;
    let (&count, entries) = rest.split_first()?;
    if entries.len() != usize::from(count) * 3 {
        return None;
    }
    entries
        .chunks_exact(3)
        .map(|e| {
            let kind = match e[0] {
                b'T' => ServerKind::Tcp,
                b'U' => ServerKind::Udp,
                _ => return None,
            };
            Some((kind, u16::from_be_bytes([e[1], e[2]])))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_layout() {
        let reply = encode_reply(&[(ServerKind::Udp, 31370), (ServerKind::Tcp, 31372)]);
        assert_eq!(&reply[..5], b"CCA1\x02");
        assert_eq!(&reply[5..8], &[b'U', 0x7A, 0x8A]);
        assert_eq!(
            decode_reply(&reply),
            Some(vec![(ServerKind::Udp, 31370), (ServerKind::Tcp, 31372)])
        );
        assert_eq!(decode_reply(&reply[..7]), None);
    }

    #[test]
    fn test_request_prefix() {
        assert!(is_request(b"CCDISCOVER"));
        assert!(is_request(b"CCDISCOVER v2"));
        assert!(!is_request(b"CCDISC"));
    }
}
