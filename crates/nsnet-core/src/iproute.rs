//! Parsers for iproute2 output: JSON for `ip -j`, text for `bridge link`.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::addr::{validate_ipv4, validate_mac, Ipv4Cidr, MacAddr};
use crate::error::{NetError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct LinkRecord {
    pub ifname: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub operstate: Option<String>,
}

impl LinkRecord {
    pub fn is_up(&self) -> bool {
        self.flags.iter().any(|f| f == "UP")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AddrRecord {
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct AddrInfo {
    #[serde(default)]
    family: String,
    #[serde(default)]
    local: Option<String>,
    #[serde(default)]
    prefixlen: Option<u8>,
}

/// One static or learned neighbor-table entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Neighbor {
    pub dst: String,
    #[serde(default)]
    pub lladdr: Option<String>,
    #[serde(default)]
    pub dev: Option<String>,
}

/// Errors leave `node` empty; callers fill it in with `NetError::on_node`.
fn parse_json<'a, T: Deserialize<'a>>(what: &str, raw: &'a str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| NetError::Command {
        node: String::new(),
        intf: None,
        command: what.to_string(),
        detail: format!("unparseable output: {e}"),
    })
}

/// Parse `ip -j link show dev X` (brief or full form) into its single record.
pub fn parse_link(raw: &str) -> Result<LinkRecord> {
    let mut records: Vec<LinkRecord> = parse_json("ip -j link show", raw)?;
    if records.is_empty() {
        return Err(NetError::Command {
            node: String::new(),
            intf: None,
            command: "ip -j link show".into(),
            detail: "no link record".into(),
        });
    }
    Ok(records.swap_remove(0))
}

pub fn parse_link_mac(record: &LinkRecord) -> Result<MacAddr> {
    let raw = record.address.as_deref().unwrap_or_default();
    validate_mac(raw).or_else(|_| {
        // Kernel truth wins even when it would fail our own policy.
        parse_any_mac(raw).ok_or_else(|| NetError::invalid_mac(raw, "kernel reported no MAC"))
    })
}

fn parse_any_mac(raw: &str) -> Option<MacAddr> {
    let groups: Vec<u8> = raw
        .split(':')
        .map(|g| u8::from_str_radix(g, 16).ok())
        .collect::<Option<_>>()?;
    let bytes: [u8; 6] = groups.try_into().ok()?;
    Some(MacAddr::from_octets(bytes))
}

/// All IPv4 addresses in `ip -j address show` output, in kernel order.
pub fn parse_inet_addresses(raw: &str) -> Result<Vec<Ipv4Cidr>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let records: Vec<AddrRecord> = parse_json("ip -j address show", raw)?;
    let mut out = Vec::new();
    for info in records.iter().flat_map(|r| &r.addr_info) {
        if info.family != "inet" {
            continue;
        }
        if let (Some(local), Some(prefix)) = (&info.local, info.prefixlen) {
            out.push(Ipv4Cidr::new(validate_ipv4(local)?, prefix)?);
        }
    }
    Ok(out)
}

pub fn parse_neighbors(raw: &str) -> Result<Vec<Neighbor>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    parse_json("ip -j neigh", raw)
}

/// Spanning-tree port state as printed by `bridge link show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgePortState {
    Disabled,
    Listening,
    Learning,
    Forwarding,
    Blocking,
}

impl BridgePortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgePortState::Disabled => "disabled",
            BridgePortState::Listening => "listening",
            BridgePortState::Learning => "learning",
            BridgePortState::Forwarding => "forwarding",
            BridgePortState::Blocking => "blocking",
        }
    }
}

impl fmt::Display for BridgePortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgePortState {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "disabled" => Ok(BridgePortState::Disabled),
            "listening" => Ok(BridgePortState::Listening),
            "learning" => Ok(BridgePortState::Learning),
            "forwarding" => Ok(BridgePortState::Forwarding),
            "blocking" => Ok(BridgePortState::Blocking),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgePort {
    pub port: String,
    pub master: String,
    pub state: BridgePortState,
}

/// Parse `bridge link show` text, keeping only ports enslaved to `master`.
///
/// Line shape:
/// `2: s1-eth1@if3: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 master s1 state forwarding priority 32 cost 2`
pub fn parse_bridge_ports(raw: &str, master: &str) -> Vec<BridgePort> {
    let mut ports = Vec::new();
    for line in raw.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(name) = tokens.get(1) else {
            continue;
        };
        let port = name
            .trim_end_matches(':')
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string();
        let value_after = |key: &str| {
            tokens
                .windows(2)
                .find(|w| w[0] == key)
                .map(|w| w[1].to_string())
        };
        let (Some(line_master), Some(state)) = (value_after("master"), value_after("state"))
        else {
            continue;
        };
        if line_master != master {
            continue;
        }
        if let Ok(state) = state.parse() {
            ports.push(BridgePort {
                port,
                master: line_master,
                state,
            });
        }
    }
    ports
}
