//! Private address discovery and port checks for the bind address.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, TcpListener};

/// Interface name prefixes tried first.
const ETHERNET_PREFIXES: &[&str] = &["eth", "enp", "ens", "eno", "ethernet"];
/// Interface name fragments tried second.
const WIFI_MARKERS: &[&str] = &["wlan", "wl", "wi-fi", "wifi", "wireless"];

/// IANA special-purpose blocks that are not globally reachable, as `(network, prefix)`.
const NON_GLOBAL_BLOCKS: &[([u8; 4], u32)] = &[
    ([0, 0, 0, 0], 8),
    ([10, 0, 0, 0], 8),
    ([169, 254, 0, 0], 16),
    ([172, 16, 0, 0], 12),
    ([192, 0, 0, 0], 29),
    ([192, 0, 0, 170], 31),
    ([192, 0, 2, 0], 24),
    ([192, 168, 0, 0], 16),
    ([198, 18, 0, 0], 15),
    ([198, 51, 100, 0], 24),
    ([203, 0, 113, 0], 24),
    ([240, 0, 0, 0], 4),
    ([255, 255, 255, 255], 32),
];

/// An address inside a non-globally-reachable block (RFC 1918, link-local,
/// documentation, benchmarking, reserved), never loopback.
pub fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    if addr.is_loopback() {
        return false;
    }
    let bits = addr.to_bits();
    NON_GLOBAL_BLOCKS.iter().any(|&(network, prefix)| {
        let mask = u32::MAX << (32 - prefix);
        bits & mask == u32::from_be_bytes(network)
    })
}

/// Finds the LAN address players on the same network can reach.
///
/// Wired interfaces win over wireless ones, which win over anything else.
/// Returns `None` when no interface carries a private IPv4 address.
pub fn discover_private_ipv4() -> Option<Ipv4Addr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::warn!("Failed to enumerate network interfaces: {}", e);
            return None;
        }
    };

    let candidates: Vec<(String, Ipv4Addr)> = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(ip) => Some((iface.name, ip)),
            IpAddr::V6(_) => None,
        })
        .collect();

    select_private_ipv4(&candidates)
}

/// Picks an address from `(interface name, address)` pairs by interface preference.
pub fn select_private_ipv4(candidates: &[(String, Ipv4Addr)]) -> Option<Ipv4Addr> {
    first_private(candidates, |name| {
        ETHERNET_PREFIXES.iter().any(|p| name.starts_with(p))
    })
    .or_else(|| first_private(candidates, |name| WIFI_MARKERS.iter().any(|m| name.contains(m))))
    .or_else(|| first_private(candidates, |_| true))
}

fn first_private(
    candidates: &[(String, Ipv4Addr)],
    accept: impl Fn(&str) -> bool,
) -> Option<Ipv4Addr> {
    candidates
        .iter()
        .find(|(name, ip)| accept(&name.to_lowercase()) && is_private_ipv4(*ip))
        .map(|(_, ip)| *ip)
}

/// Checks whether `port` can currently be bound on `addr`.
pub fn is_port_free(addr: Ipv4Addr, port: u16) -> bool {
    TcpListener::bind(SocketAddrV4::new(addr, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, ip: [u8; 4]) -> (String, Ipv4Addr) {
        (name.to_string(), Ipv4Addr::from(ip))
    }

    #[test]
    fn test_private_ranges() {
        assert!(is_private_ipv4(Ipv4Addr::new(192, 168, 1, 20)));
        assert!(is_private_ipv4(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(is_private_ipv4(Ipv4Addr::new(172, 16, 4, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(169, 254, 10, 10)));
        assert!(!is_private_ipv4(Ipv4Addr::LOCALHOST));
        assert!(!is_private_ipv4(Ipv4Addr::new(127, 1, 2, 3)));
        assert!(!is_private_ipv4(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(!is_private_ipv4(Ipv4Addr::new(172, 32, 0, 1)));
        assert!(!is_private_ipv4(Ipv4Addr::new(100, 64, 0, 1)));
    }

    #[test]
    fn test_reserved_blocks_count_as_private() {
        assert!(is_private_ipv4(Ipv4Addr::new(203, 0, 113, 9)));
        assert!(is_private_ipv4(Ipv4Addr::new(198, 19, 255, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(198, 51, 100, 4)));
        assert!(is_private_ipv4(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(240, 0, 0, 1)));
        assert!(!is_private_ipv4(Ipv4Addr::new(198, 20, 0, 1)));
        assert!(!is_private_ipv4(Ipv4Addr::new(192, 0, 0, 9)));
    }

    #[test]
    fn test_ethernet_preferred_over_wifi() {
        let candidates = [
            candidate("wlan0", [192, 168, 1, 50]),
            candidate("docker0", [172, 17, 0, 1]),
            candidate("enp3s0", [192, 168, 1, 10]),
        ];
        assert_eq!(
            select_private_ipv4(&candidates),
            Some(Ipv4Addr::new(192, 168, 1, 10))
        );
    }

    #[test]
    fn test_wifi_preferred_over_others() {
        let candidates = [
            candidate("docker0", [172, 17, 0, 1]),
            candidate("Wi-Fi", [192, 168, 0, 7]),
        ];
        assert_eq!(
            select_private_ipv4(&candidates),
            Some(Ipv4Addr::new(192, 168, 0, 7))
        );
    }

    #[test]
    fn test_public_only_interfaces_yield_none() {
        let candidates = [candidate("eth0", [8, 8, 4, 4])];
        assert_eq!(select_private_ipv4(&candidates), None);

        let fallback = [
            candidate("eth0", [8, 8, 4, 4]),
            candidate("tun0", [10, 8, 0, 2]),
        ];
        assert_eq!(
            select_private_ipv4(&fallback),
            Some(Ipv4Addr::new(10, 8, 0, 2))
        );
    }

    #[test]
    fn test_port_in_use_is_not_free() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_free(Ipv4Addr::LOCALHOST, port));

        drop(listener);
        assert!(is_port_free(Ipv4Addr::LOCALHOST, port));
    }
}
