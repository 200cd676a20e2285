//! Declarative topology descriptions.
//!
//! A [`TopoSpec`] only names nodes and the links between them; nothing
//! touches the kernel until a [`Network`](crate::network::Network) is built
//! from it. Declaration order is creation order, which fixes port numbers.

use std::collections::HashSet;

use crate::addr::validate_ip_with_prefix;
use crate::error::{NetError, Result};
use crate::node::{NodeKind, SwitchOptions, DEFAULT_PREFIX};

/// Smallest switch count that closes a ring.
pub const MIN_RING_SWITCHES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSpec {
    Host {
        name: String,
        /// `None`: next address from the pool. `Some("0.0.0.0/0")`: no address.
        ip: Option<String>,
    },
    Switch {
        name: String,
        options: SwitchOptions,
    },
}

impl NodeSpec {
    pub fn name(&self) -> &str {
        match self {
            NodeSpec::Host { name, .. } | NodeSpec::Switch { name, .. } => name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeSpec::Host { .. } => NodeKind::Host,
            NodeSpec::Switch { .. } => NodeKind::Switch,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopoSpec {
    nodes: Vec<NodeSpec>,
    links: Vec<(String, String)>,
}

impl TopoSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&mut self, name: &str) -> Result<&mut Self> {
        self.push(NodeSpec::Host {
            name: name.to_string(),
            ip: None,
        })
    }

    /// Host with a fixed address (`a.b.c.d/n` or bare, which gets the
    /// default prefix). `0.0.0.0/0` declares a host without an address.
    pub fn add_host_with_ip(&mut self, name: &str, ip: &str) -> Result<&mut Self> {
        let (addr, prefix) = ip.split_once('/').unwrap_or((ip, DEFAULT_PREFIX));
        validate_ip_with_prefix(addr, prefix)?;
        self.push(NodeSpec::Host {
            name: name.to_string(),
            ip: Some(ip.to_string()),
        })
    }

    pub fn add_switch(&mut self, name: &str, options: SwitchOptions) -> Result<&mut Self> {
        self.push(NodeSpec::Switch {
            name: name.to_string(),
            options,
        })
    }

    fn push(&mut self, node: NodeSpec) -> Result<&mut Self> {
        let name = node.name();
        if name.is_empty() {
            return Err(NetError::InvalidTopology("empty node name".into()));
        }
        if self.node(name).is_some() {
            return Err(NetError::InvalidTopology(format!("duplicate node {name}")));
        }
        self.nodes.push(node);
        Ok(self)
    }

    pub fn add_link(&mut self, a: &str, b: &str) -> Result<&mut Self> {
        if a == b {
            return Err(NetError::InvalidTopology(format!("link from {a} to itself")));
        }
        for end in [a, b] {
            if self.node(end).is_none() {
                return Err(NetError::InvalidTopology(format!(
                    "link {a}-{b} names undeclared node {end}"
                )));
            }
        }
        self.links.push((a.to_string(), b.to_string()));
        Ok(self)
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn links(&self) -> &[(String, String)] {
        &self.links
    }

    pub fn hosts(&self) -> Vec<&str> {
        self.names_of(NodeKind::Host)
    }

    pub fn switches(&self) -> Vec<&str> {
        self.names_of(NodeKind::Switch)
    }

    fn names_of(&self, kind: NodeKind) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.kind() == kind)
            .map(NodeSpec::name)
            .collect()
    }

    /// Hosts directly linked to `switch`, in link order.
    pub fn hosts_of(&self, switch: &str) -> Vec<&str> {
        let hosts: HashSet<&str> = self.hosts().into_iter().collect();
        self.links
            .iter()
            .filter_map(|(a, b)| {
                if a == switch {
                    Some(b.as_str())
                } else if b == switch {
                    Some(a.as_str())
                } else {
                    None
                }
            })
            .filter(|n| hosts.contains(n))
            .collect()
    }

    /// `switch_count` STP switches in a ring, each with `hosts_per_switch`
    /// hosts numbered globally: switch k owns h((k-1)·m+1) ..= h(k·m).
    pub fn ring(switch_count: usize, hosts_per_switch: usize) -> Result<TopoSpec> {
        if switch_count < MIN_RING_SWITCHES {
            return Err(NetError::InvalidTopology(format!(
                "a ring needs at least {MIN_RING_SWITCHES} switches, got {switch_count}"
            )));
        }
        let stp = SwitchOptions {
            stp: true,
            forward_delay_cs: None,
        };

        let mut topo = TopoSpec::new();
        let mut previous: Option<String> = None;
        for k in 1..=switch_count {
            let switch = format!("s{k}");
            topo.add_switch(&switch, stp.clone())?;
            for n in (k - 1) * hosts_per_switch + 1..=k * hosts_per_switch {
                let host = format!("h{n}");
                topo.add_host(&host)?;
                topo.add_link(&switch, &host)?;
            }
            if let Some(prev) = &previous {
                topo.add_link(prev, &switch)?;
            }
            previous = Some(switch);
        }
        if let Some(last) = previous {
            topo.add_link(&last, "s1")?;
        }
        Ok(topo)
    }

    /// One switch `s1` with hosts `h1..=hN`.
    pub fn single(hosts: usize) -> Result<TopoSpec> {
        let mut topo = TopoSpec::new();
        topo.add_switch("s1", SwitchOptions::default())?;
        for n in 1..=hosts {
            let host = format!("h{n}");
            topo.add_host(&host)?;
            topo.add_link(&host, "s1")?;
        }
        Ok(topo)
    }

    /// A chain of switches, each with its own hosts. Hosts are `h<i>` with
    /// one host per switch, `h<j>s<i>` otherwise.
    pub fn linear(switch_count: usize, hosts_per_switch: usize) -> Result<TopoSpec> {
        if switch_count == 0 {
            return Err(NetError::InvalidTopology(
                "a linear topology needs at least one switch".into(),
            ));
        }
        let mut topo = TopoSpec::new();
        let mut previous: Option<String> = None;
        for i in 1..=switch_count {
            let switch = format!("s{i}");
            topo.add_switch(&switch, SwitchOptions::default())?;
            for j in 1..=hosts_per_switch {
                let host = if hosts_per_switch == 1 {
                    format!("h{i}")
                } else {
                    format!("h{j}s{i}")
                };
                topo.add_host(&host)?;
                topo.add_link(&host, &switch)?;
            }
            if let Some(prev) = &previous {
                topo.add_link(&switch, prev)?;
            }
            previous = Some(switch);
        }
        Ok(topo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_needs_three_switches() {
        for n in 0..MIN_RING_SWITCHES {
            assert!(matches!(
                TopoSpec::ring(n, 1),
                Err(NetError::InvalidTopology(_))
            ));
        }
        assert!(TopoSpec::ring(3, 0).is_ok());
    }

    #[test]
    fn ring_numbers_hosts_globally_and_closes() {
        let topo = TopoSpec::ring(3, 2).unwrap();
        assert_eq!(topo.switches(), ["s1", "s2", "s3"]);
        assert_eq!(topo.hosts(), ["h1", "h2", "h3", "h4", "h5", "h6"]);
        for k in 1..=3usize {
            let expected = vec![format!("h{}", 2 * k - 1), format!("h{}", 2 * k)];
            assert_eq!(topo.hosts_of(&format!("s{k}")), expected);
        }
        let links = topo.links();
        assert!(links.contains(&("s1".to_string(), "s2".to_string())));
        assert!(links.contains(&("s2".to_string(), "s3".to_string())));
        assert_eq!(links.last().unwrap(), &("s3".to_string(), "s1".to_string()));
        assert_eq!(links.len(), 6 + 3);
        assert!(matches!(
            topo.node("s1"),
            Some(NodeSpec::Switch { options, .. }) if options.stp
        ));
    }

    #[test]
    fn builder_rejects_bad_declarations() {
        let mut topo = TopoSpec::new();
        topo.add_host("h1").unwrap().add_host("h2").unwrap();
        assert!(topo.add_host("h1").is_err());
        assert!(topo.add_link("h1", "h1").is_err());
        assert!(topo.add_link("h1", "s9").is_err());
        assert!(topo.add_host_with_ip("h3", "256.0.0.1/8").unwrap_err().is_validation());
        topo.add_host_with_ip("h3", "0.0.0.0/0").unwrap();
        topo.add_link("h1", "h2").unwrap();
        assert_eq!(topo.links().len(), 1);
        assert!(topo.hosts_of("h1").contains(&"h2"));
    }

    #[test]
    fn single_and_linear_shapes() {
        let single = TopoSpec::single(3).unwrap();
        assert_eq!(single.hosts_of("s1"), ["h1", "h2", "h3"]);

        let linear = TopoSpec::linear(3, 2).unwrap();
        assert_eq!(linear.hosts_of("s2"), ["h1s2", "h2s2"]);
        assert!(linear.links().contains(&("s3".to_string(), "s2".to_string())));
        assert_eq!(TopoSpec::linear(2, 1).unwrap().hosts(), ["h1", "h2"]);
        assert!(TopoSpec::linear(0, 1).is_err());
    }
}
