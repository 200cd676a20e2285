//! IPv4/prefix and MAC literal validation.
//!
//! Everything that reaches the kernel as an address goes through here first,
//! so a malformed literal is rejected before any command is issued.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{NetError, Result};

/// An IPv4 address paired with its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(NetError::invalid_address(
                &prefix.to_string(),
                "prefix length must be in 0..=32",
            ));
        }
        Ok(Self { addr, prefix })
    }

    /// `0.0.0.0` means "no address" to the interface layer.
    pub fn is_unspecified(&self) -> bool {
        self.addr.is_unspecified()
    }

    pub fn netmask(&self) -> u32 {
        if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - self.prefix as u32)
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & self.netmask())
    }

    pub fn contains(&self, other: Ipv4Addr) -> bool {
        u32::from(other) & self.netmask() == u32::from(self.addr) & self.netmask()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        parse_cidr(s)
    }
}

/// Validate an address and prefix supplied as separate literals.
pub fn validate_ip_with_prefix(ip: &str, prefix: &str) -> Result<Ipv4Cidr> {
    let addr = validate_ipv4(ip)?;
    let prefix = validate_prefix(prefix)?;
    Ok(Ipv4Cidr { addr, prefix })
}

/// Validate the combined `a.b.c.d/n` form. Both halves are required.
pub fn parse_cidr(s: &str) -> Result<Ipv4Cidr> {
    match s.split_once('/') {
        Some((ip, prefix)) => validate_ip_with_prefix(ip, prefix),
        None => Err(NetError::invalid_address(s, "missing /prefix")),
    }
}

/// Four dot-separated decimal octets, each in `0..=255`.
pub fn validate_ipv4(ip: &str) -> Result<Ipv4Addr> {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 {
        return Err(NetError::invalid_address(
            ip,
            format!("expected 4 octets, found {}", parts.len()),
        ));
    }

    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        if part.is_empty() {
            return Err(NetError::invalid_address(ip, "empty octet"));
        }
        if part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NetError::invalid_address(
                ip,
                format!("octet {part:?} is not a decimal number"),
            ));
        }
        let value: u16 = part
            .parse()
            .map_err(|_| NetError::invalid_address(ip, format!("bad octet {part:?}")))?;
        *slot = u8::try_from(value)
            .map_err(|_| NetError::invalid_address(ip, format!("octet {value} out of range")))?;
    }

    Ok(Ipv4Addr::from(octets))
}

pub fn validate_prefix(prefix: &str) -> Result<u8> {
    if prefix.is_empty() {
        return Err(NetError::invalid_address(prefix, "empty prefix length"));
    }
    if prefix.len() > 2 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NetError::invalid_address(
            prefix,
            "prefix length is not a decimal number",
        ));
    }
    let value: u8 = prefix
        .parse()
        .map_err(|_| NetError::invalid_address(prefix, "bad prefix length"))?;
    if value > 32 {
        return Err(NetError::invalid_address(
            prefix,
            "prefix length must be in 0..=32",
        ));
    }
    Ok(value)
}

/// A unicast, non-multicast Ethernet address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// Wrap raw octets without policy checks; used for addresses reported by
    /// the kernel.
    pub fn from_octets(bytes: [u8; 6]) -> MacAddr {
        MacAddr(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// A random address that `validate_mac` always accepts: multicast bit
    /// cleared, locally-administered bit set.
    pub fn random_unicast() -> MacAddr {
        let mut bytes: [u8; 6] = rand::random();
        bytes[0] = (bytes[0] & 0xfe) | 0x02;
        MacAddr(bytes)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        validate_mac(s)
    }
}

/// Six colon-separated two-hex-digit groups, not all-zero, not broadcast,
/// and with the multicast bit (low bit of the first octet) clear.
pub fn validate_mac(mac: &str) -> Result<MacAddr> {
    let groups: Vec<&str> = mac.split(':').collect();
    if groups.len() != 6 {
        return Err(NetError::invalid_mac(
            mac,
            format!("expected 6 groups, found {}", groups.len()),
        ));
    }

    let mut bytes = [0u8; 6];
    for (slot, group) in bytes.iter_mut().zip(&groups) {
        if group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(NetError::invalid_mac(
                mac,
                format!("group {group:?} is not two hex digits"),
            ));
        }
        *slot = u8::from_str_radix(group, 16)
            .map_err(|_| NetError::invalid_mac(mac, format!("bad hex group {group:?}")))?;
    }

    let parsed = MacAddr(bytes);
    if parsed == MacAddr::ZERO {
        return Err(NetError::invalid_mac(mac, "all-zero address"));
    }
    if parsed == MacAddr::BROADCAST {
        return Err(NetError::invalid_mac(mac, "broadcast address"));
    }
    if parsed.is_multicast() {
        return Err(NetError::invalid_mac(mac, "multicast bit set"));
    }
    Ok(parsed)
}

/// Sequential host address allocator over a base network.
#[derive(Debug, Clone)]
pub struct AddressPool {
    base: Ipv4Cidr,
    next: u32,
}

impl AddressPool {
    pub fn new(base: Ipv4Cidr) -> Self {
        Self { base, next: 1 }
    }

    pub fn base(&self) -> Ipv4Cidr {
        self.base
    }

    /// Next host address, or `None` once the host part is exhausted.
    pub fn allocate(&mut self) -> Option<Ipv4Cidr> {
        let host_bits = 32 - self.base.prefix as u32;
        let capacity = if host_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << host_bits).saturating_sub(1)
        };
        if self.next >= capacity {
            return None;
        }
        let addr = u32::from(self.base.network()) + self.next;
        self.next += 1;
        Some(Ipv4Cidr {
            addr: Ipv4Addr::from(addr),
            prefix: self.base.prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_normalizes_valid_pairs() {
        let cidr = validate_ip_with_prefix("192.168.0.2", "24").unwrap();
        assert_eq!(cidr.to_string(), "192.168.0.2/24");
        let cidr = parse_cidr("10.0.0.2/8").unwrap();
        assert_eq!(cidr.addr, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(cidr.prefix, 8);
        assert!(parse_cidr("0.0.0.0/8").unwrap().is_unspecified());
    }

    #[test]
    fn rejects_malformed_addresses() {
        let bad_pairs = [
            ("", ""),
            ("10.1.0.108", ""),
            ("", "16"),
            ("256.5.200.34", "8"),
            ("175.256.200.34", "16"),
            ("175.55.256.34", "24"),
            ("175.55.60.256", "24"),
            ("128.99.60", "24"),
            ("175.55.60.56.15", "24"),
            ("ijtiht+g9edcxr", "26"),
            ("192.168.10.1", "33"),
            ("192.168.10.1", "k1"),
            ("192.168.10.1", "-1"),
            ("1..2.3", "8"),
        ];
        for (ip, prefix) in bad_pairs {
            let err = validate_ip_with_prefix(ip, prefix).unwrap_err();
            assert!(
                matches!(err, NetError::InvalidAddress { .. }),
                "{ip}/{prefix} gave {err:?}"
            );
        }

        for combined in [
            "192.168.10.1",
            "256.5.200.34/8",
            "128.99.60/24",
            "175.55.60.56.15/24",
            "abc.def.ghi.jkl/26",
            "192.168.10.1/33",
            "192.168.10.1/k1",
            "10.0.0.1/8/8",
        ] {
            assert!(parse_cidr(combined).is_err(), "{combined} accepted");
        }
    }

    #[test]
    fn mac_rules() {
        let mac = validate_mac("02:AB:1b:cf:b9:03").unwrap();
        assert_eq!(mac.to_string(), "02:ab:1b:cf:b9:03");

        for bad in [
            "00:00:00:00:00:00",
            "ff:ff:ff:ff:ff:ff",
            "02:050:1b:cf:b9:03",
            "d6:05:1b:cf:z9:94",
            "26:65:5d:cf:f9:",
            "c8:2b:1b:cf:f9:94:01",
            "01:00:5e:00:00:01",
            "",
        ] {
            let err = validate_mac(bad).unwrap_err();
            assert!(matches!(err, NetError::InvalidMac { .. }), "{bad}");
        }
    }

    #[test]
    fn second_hex_digit_decides_multicast() {
        for ch in "02468ace".chars() {
            let mac = format!("1{ch}:22:33:44:55:66");
            assert!(validate_mac(&mac).is_ok(), "{mac}");
        }
        for ch in "13579bdf".chars() {
            let mac = format!("1{ch}:22:33:44:55:66");
            assert!(validate_mac(&mac).is_err(), "{mac}");
        }
    }

    #[test]
    fn random_unicast_always_validates() {
        for _ in 0..64 {
            let mac = MacAddr::random_unicast();
            assert_eq!(validate_mac(&mac.to_string()).unwrap(), mac);
        }
    }

    #[test]
    fn pool_allocates_sequential_hosts() {
        let mut pool = AddressPool::new(parse_cidr("10.0.0.0/8").unwrap());
        assert_eq!(pool.allocate().unwrap().to_string(), "10.0.0.1/8");
        assert_eq!(pool.allocate().unwrap().to_string(), "10.0.0.2/8");

        let mut tiny = AddressPool::new(parse_cidr("192.168.1.0/30").unwrap());
        assert!(tiny.allocate().is_some());
        assert!(tiny.allocate().is_some());
        assert!(tiny.allocate().is_none());
    }

    #[test]
    fn cidr_contains() {
        let net = parse_cidr("10.0.0.1/8").unwrap();
        assert!(net.contains(Ipv4Addr::new(10, 200, 3, 4)));
        assert!(!net.contains(Ipv4Addr::new(11, 0, 0, 1)));
        assert!(parse_cidr("1.2.3.4/0").unwrap().contains(Ipv4Addr::new(9, 9, 9, 9)));
    }
}
