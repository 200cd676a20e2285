//! Engine settings and TOML topology files.
//!
//! Files are parsed into `*Input` structs where every field is optional,
//! then resolved into validated runtime types.

use std::time::Duration;

use serde::Deserialize;

use crate::addr::{parse_cidr, Ipv4Cidr};
use crate::error::{NetError, Result};
use crate::node::SwitchOptions;
use crate::topology::TopoSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetSettings {
    /// Prefix of every namespace name, so parallel networks don't collide.
    pub netns_prefix: String,
    pub use_sudo: bool,
    /// Pool for automatically assigned host addresses.
    pub ip_base: Ipv4Cidr,
    /// Echo requests per connectivity probe.
    pub probe_count: u32,
    /// Per-reply wait passed to `ping -W`.
    pub probe_timeout: Duration,
    pub converge_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for NetSettings {
    fn default() -> Self {
        Self {
            netns_prefix: "nsnet-".into(),
            use_sudo: false,
            ip_base: Ipv4Cidr {
                addr: std::net::Ipv4Addr::new(10, 0, 0, 0),
                prefix: 8,
            },
            probe_count: 1,
            probe_timeout: Duration::from_secs(1),
            converge_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsInput {
    pub netns_prefix: Option<String>,
    pub use_sudo: Option<bool>,
    pub ip_base: Option<String>,
    pub probe_count: Option<u32>,
    pub probe_timeout_secs: Option<u64>,
    pub converge_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopologyInput {
    /// `ring`, `single` or `linear`; explicit lists when absent.
    pub kind: Option<String>,
    pub switches: Option<usize>,
    pub hosts_per_switch: Option<usize>,
    pub hosts: Vec<HostInput>,
    pub switch: Vec<SwitchInput>,
    pub links: Vec<LinkInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostInput {
    pub name: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SwitchInput {
    pub name: String,
    pub stp: bool,
    pub forward_delay_cs: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkInput {
    pub a: String,
    pub b: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetConfigInput {
    pub settings: SettingsInput,
    pub topology: TopologyInput,
}

/// A resolved topology file.
#[derive(Debug, Clone, Default)]
pub struct NetConfig {
    pub settings: NetSettings,
    pub topology: TopoSpec,
}

impl SettingsInput {
    pub fn resolve(self) -> Result<NetSettings> {
        let defaults = NetSettings::default();
        let ip_base = match self.ip_base {
            Some(raw) => parse_cidr(raw.trim())?,
            None => defaults.ip_base,
        };
        let netns_prefix = self
            .netns_prefix
            .map(|p| p.trim().to_string())
            .unwrap_or(defaults.netns_prefix);
        if netns_prefix.contains('/') || netns_prefix.contains(char::is_whitespace) {
            return Err(NetError::Config(format!(
                "netns_prefix {netns_prefix:?} contains '/' or whitespace"
            )));
        }

        Ok(NetSettings {
            netns_prefix,
            use_sudo: self.use_sudo.unwrap_or(defaults.use_sudo),
            ip_base,
            probe_count: self.probe_count.unwrap_or(defaults.probe_count).max(1),
            probe_timeout: self
                .probe_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_timeout),
            converge_timeout: self
                .converge_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.converge_timeout),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval)
                .max(Duration::from_millis(10)),
        })
    }
}

impl TopologyInput {
    pub fn resolve(self) -> Result<TopoSpec> {
        let switches = self.switches.unwrap_or(1);
        let hosts_per_switch = self.hosts_per_switch.unwrap_or(1);
        match self.kind.as_deref().map(str::trim) {
            Some("ring") => TopoSpec::ring(switches, hosts_per_switch),
            Some("single") => TopoSpec::single(hosts_per_switch),
            Some("linear") => TopoSpec::linear(switches, hosts_per_switch),
            Some(other) => Err(NetError::Config(format!("unknown topology kind {other:?}"))),
            None => {
                let mut topo = TopoSpec::new();
                for sw in self.switch {
                    let options = SwitchOptions {
                        stp: sw.stp,
                        forward_delay_cs: sw.forward_delay_cs,
                    };
                    topo.add_switch(sw.name.trim(), options)?;
                }
                for host in self.hosts {
                    match host.ip {
                        Some(ip) => topo.add_host_with_ip(host.name.trim(), ip.trim())?,
                        None => topo.add_host(host.name.trim())?,
                    };
                }
                for link in self.links {
                    topo.add_link(link.a.trim(), link.b.trim())?;
                }
                Ok(topo)
            }
        }
    }
}

impl NetConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(NetConfig::default());
        }
        let parsed: NetConfigInput = toml::from_str(input)
            .map_err(|e| NetError::Config(format!("invalid topology TOML: {e}")))?;
        Ok(NetConfig {
            settings: parsed.settings.resolve()?,
            topology: parsed.topology.resolve()?,
        })
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NetError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }
}
