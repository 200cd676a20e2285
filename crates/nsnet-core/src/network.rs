//! The running emulated network.
//!
//! A [`Network`] owns every node and link it creates and releases them in
//! reverse creation order on [`Network::stop`] (or on drop). Each node runs
//! in its own namespace named `<netns_prefix><node>`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::addr::{validate_ip_with_prefix, AddressPool, Ipv4Cidr};
use crate::context::NodeContext;
use crate::error::{NetError, Result};
use crate::exec::CommandExecutor;
use crate::interface::Interface;
use crate::link::Link;
use crate::netns;
use crate::node::{Node, NodeKind, SwitchOptions, DEFAULT_PREFIX};
use crate::settings::NetSettings;
use crate::topology::{NodeSpec, TopoSpec};

/// Target state for [`Network::config_link_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    Down,
}

impl LinkStatus {
    fn is_up(self) -> bool {
        self == LinkStatus::Up
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkStatus::Up => "up",
            LinkStatus::Down => "down",
        })
    }
}

impl FromStr for LinkStatus {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(LinkStatus::Up),
            "down" => Ok(LinkStatus::Down),
            other => Err(NetError::Config(format!(
                "link status must be \"up\" or \"down\", got {other:?}"
            ))),
        }
    }
}

pub struct Network {
    settings: NetSettings,
    root: Arc<NodeContext>,
    nodes: Vec<Arc<Node>>,
    links: Vec<Arc<Link>>,
    pool: AddressPool,
    /// Address each host receives on start; `None` leaves it unaddressed.
    planned: HashMap<String, Option<Ipv4Cidr>>,
    started: bool,
    torn_down: bool,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(|n| n.name()).collect();
        f.debug_struct("Network")
            .field("nodes", &names)
            .field("links", &self.links.len())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Network {
    pub fn new(settings: NetSettings, executor: Arc<dyn CommandExecutor>) -> Self {
        let pool = AddressPool::new(settings.ip_base);
        Self {
            root: NodeContext::root(executor),
            settings,
            nodes: Vec::new(),
            links: Vec::new(),
            pool,
            planned: HashMap::new(),
            started: false,
            torn_down: false,
        }
    }

    /// Create every node and link of `topo` in declaration order. Anything
    /// already created is torn down again if a later step fails.
    pub fn from_topo(
        settings: NetSettings,
        executor: Arc<dyn CommandExecutor>,
        topo: &TopoSpec,
    ) -> Result<Self> {
        let mut net = Network::new(settings, executor);
        tracing::info!(
            hosts = topo.hosts().len(),
            switches = topo.switches().len(),
            links = topo.links().len(),
            "building network"
        );
        for node in topo.nodes() {
            match node {
                NodeSpec::Host { name, ip: None } => net.add_host(name)?,
                NodeSpec::Host { name, ip: Some(ip) } => net.add_host_with_ip(name, ip)?,
                NodeSpec::Switch { name, options } => net.add_switch(name, options.clone())?,
            };
        }
        for (a, b) in topo.links() {
            net.add_link(a, b)?;
        }
        Ok(net)
    }

    pub fn settings(&self) -> &NetSettings {
        &self.settings
    }

    // ── Building ────────────────────────────────────────────────────

    /// Add a host that takes the next address from the pool on start.
    pub fn add_host(&mut self, name: &str) -> Result<Arc<Node>> {
        let ip = self.pool.allocate().ok_or_else(|| {
            NetError::InvalidTopology(format!(
                "address pool {} exhausted at host {name}",
                self.pool.base()
            ))
        })?;
        self.create_host(name, Some(ip))
    }

    /// Add a host with a fixed address. `0.0.0.0/0` leaves it unaddressed.
    pub fn add_host_with_ip(&mut self, name: &str, ip: &str) -> Result<Arc<Node>> {
        let (addr, prefix) = ip.split_once('/').unwrap_or((ip, DEFAULT_PREFIX));
        let cidr = validate_ip_with_prefix(addr, prefix)?;
        let planned = (!cidr.is_unspecified()).then_some(cidr);
        self.create_host(name, planned)
    }

    fn create_host(&mut self, name: &str, ip: Option<Ipv4Cidr>) -> Result<Arc<Node>> {
        let ctx = self.create_context(name)?;
        let node = Arc::new(Node::host(ctx));
        self.planned.insert(name.to_string(), ip);
        self.nodes.push(node.clone());
        tracing::debug!(host = %name, ip = ?ip.map(|c| c.to_string()), "host added");
        Ok(node)
    }

    pub fn add_switch(&mut self, name: &str, options: SwitchOptions) -> Result<Arc<Node>> {
        let ctx = self.create_context(name)?;
        let node = Arc::new(Node::switch(ctx, options));
        self.nodes.push(node.clone());
        tracing::debug!(switch = %name, "switch added");
        Ok(node)
    }

    fn create_context(&self, name: &str) -> Result<Arc<NodeContext>> {
        self.ensure_live()?;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(NetError::InvalidTopology(format!("bad node name {name:?}")));
        }
        if self.find(name).is_some() {
            return Err(NetError::InvalidTopology(format!("duplicate node {name}")));
        }
        let ns = format!("{}{}", self.settings.netns_prefix, name);
        netns::create_namespace(&self.root, &ns)?;
        Ok(NodeContext::new(
            name,
            Some(ns),
            self.root.executor().clone(),
        ))
    }

    /// Connect two nodes with a new veth pair, one port on each.
    pub fn add_link(&mut self, a: &str, b: &str) -> Result<Arc<Link>> {
        self.ensure_live()?;
        let node_a = self.node(a)?;
        let node_b = self.node(b)?;
        if a == b {
            return Err(NetError::InvalidTopology(format!("link from {a} to itself")));
        }

        let (port_a, name_a) = node_a.allocate_port();
        let (port_b, name_b) = node_b.allocate_port();
        netns::create_veth_pair(&self.root, &name_a, &name_b)?;
        for (dev, node) in [(&name_a, &node_a), (&name_b, &node_b)] {
            if let Some(ns) = node.netns() {
                netns::move_to_namespace(&self.root, dev, ns)?;
            }
        }

        let intf_a = Interface::attach(node_a.context().clone(), &name_a, port_a)?;
        let intf_b = Interface::attach(node_b.context().clone(), &name_b, port_b)?;
        node_a.add_interface(intf_a.clone());
        node_b.add_interface(intf_b.clone());
        let link = Link::connect(intf_a.clone(), intf_b.clone())?;
        self.links.push(link.clone());

        if self.started {
            for (node, intf) in [(&node_a, &intf_a), (&node_b, &intf_b)] {
                match node.kind() {
                    NodeKind::Switch => node.join_bridge(intf)?,
                    NodeKind::Host => {
                        intf.set_up(true)?;
                        let first = node.interfaces().len() == 1;
                        if let (true, Some(Some(ip))) = (first, self.planned.get(node.name())) {
                            intf.set_cidr(*ip)?;
                        }
                    }
                }
            }
        }
        tracing::debug!(%link, "link added");
        Ok(link)
    }

    // ── Lookup ──────────────────────────────────────────────────────

    fn find(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn node(&self, name: &str) -> Result<Arc<Node>> {
        self.find(name)
            .cloned()
            .ok_or_else(|| NetError::NoSuchNode(name.to_string()))
    }

    /// Every node in creation order.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn hosts(&self) -> Vec<Arc<Node>> {
        self.of_kind(NodeKind::Host)
    }

    pub fn switches(&self) -> Vec<Arc<Node>> {
        self.of_kind(NodeKind::Switch)
    }

    fn of_kind(&self, kind: NodeKind) -> Vec<Arc<Node>> {
        self.nodes
            .iter()
            .filter(|n| n.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn links(&self) -> &[Arc<Link>] {
        &self.links
    }

    pub fn links_between(&self, a: &str, b: &str) -> Vec<Arc<Link>> {
        self.links
            .iter()
            .filter(|l| l.connects(a, b))
            .cloned()
            .collect()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    fn ensure_live(&self) -> Result<()> {
        if self.torn_down {
            return Err(NetError::NotRunning {
                node: "network".into(),
                reason: "already torn down".into(),
            });
        }
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Address and raise every host interface, then start all switches.
    /// Hosts are configured in parallel; they share no kernel objects.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_live()?;
        if self.started {
            return Ok(());
        }
        let hosts = self.hosts();
        tracing::info!(hosts = hosts.len(), "configuring hosts");

        let outcomes: Vec<Result<()>> = std::thread::scope(|s| {
            let handles: Vec<_> = hosts
                .iter()
                .map(|host| {
                    let ip = self.planned.get(host.name()).copied().flatten();
                    s.spawn(move || configure_host(host, ip))
                })
                .collect();
            handles
                .into_iter()
                .zip(&hosts)
                .map(|(handle, host)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(NetError::Command {
                            node: host.name().to_string(),
                            intf: None,
                            command: "configure host".into(),
                            detail: "configuration thread panicked".into(),
                        })
                    })
                })
                .collect()
        });
        for outcome in outcomes {
            outcome?;
        }

        let switches = self.switches();
        tracing::info!(switches = switches.len(), "starting switches");
        for switch in &switches {
            switch.start()?;
        }
        self.started = true;
        Ok(())
    }

    /// Poll every running switch until its ports leave the listening and
    /// learning states. Returns `false` when the configured timeout expires
    /// first.
    pub fn wait_connected(&self) -> Result<bool> {
        let deadline = Instant::now() + self.settings.converge_timeout;
        let switches: Vec<_> = self
            .switches()
            .into_iter()
            .filter(|s| s.is_running() && !s.interfaces().is_empty())
            .collect();
        tracing::info!(switches = switches.len(), "waiting for switches to converge");

        let mut pending = switches;
        loop {
            let mut still = Vec::new();
            for switch in pending {
                if !switch.is_converged()? {
                    still.push(switch);
                }
            }
            if still.is_empty() {
                tracing::info!("all switches forwarding");
                return Ok(true);
            }
            if Instant::now() >= deadline {
                let names: Vec<&str> = still.iter().map(|s| s.name()).collect();
                tracing::warn!(pending = ?names, "switches did not converge in time");
                return Ok(false);
            }
            pending = still;
            std::thread::sleep(self.settings.poll_interval);
        }
    }

    /// Set both ends of the link between `a` and `b` to `status`.
    ///
    /// When the first end changes but the second does not, the error is a
    /// [`NetError::PartialApplication`] naming the end that did change.
    pub fn config_link_status(&self, a: &str, b: &str, status: LinkStatus) -> Result<()> {
        self.node(a)?;
        self.node(b)?;
        let link = self
            .links_between(a, b)
            .into_iter()
            .next()
            .ok_or_else(|| NetError::NoSuchLink {
                a: a.to_string(),
                b: b.to_string(),
            })?;

        let mut completed = Vec::new();
        for intf in link.endpoints() {
            let name = intf.name();
            let outcome = intf.set_up(status.is_up()).and_then(|observed| {
                if observed == status.is_up() {
                    Ok(())
                } else {
                    Err(NetError::Command {
                        node: intf.node_name().to_string(),
                        intf: Some(name.clone()),
                        command: format!("ip link set dev {name} {status}"),
                        detail: format!("interface still reports {}", if observed { "up" } else { "down" }),
                    })
                }
            });
            match outcome {
                Ok(()) => completed.push(name),
                Err(err) if completed.is_empty() => return Err(err),
                Err(err) => {
                    return Err(NetError::PartialApplication {
                        operation: format!("set link {a}-{b} {status}"),
                        completed,
                        failed: name,
                        source: Box::new(err),
                    })
                }
            }
        }
        tracing::info!(%link, %status, "link status changed");
        Ok(())
    }

    /// Stop one switch. Links whose ports were deleted are dropped from the
    /// network together with the peer interface on the other node.
    pub fn stop_switch(&mut self, name: &str, delete_interfaces: bool) -> Result<()> {
        let switch = self.switch_named(name)?;
        let deleted = switch.stop(delete_interfaces)?;
        if deleted.is_empty() {
            return Ok(());
        }

        let mut kept = Vec::with_capacity(self.links.len());
        for link in std::mem::take(&mut self.links) {
            let gone = link
                .endpoint_on(name)
                .is_some_and(|end| deleted.contains(&end.name()));
            if !gone {
                kept.push(link);
                continue;
            }
            for end in link.endpoints() {
                if end.node_name() != name {
                    if let Some(peer) = self.find(end.node_name()) {
                        peer.remove_interface(&end.name());
                    }
                }
            }
            tracing::debug!(%link, "link removed with switch ports");
        }
        self.links = kept;
        Ok(())
    }

    pub fn start_switch(&self, name: &str) -> Result<()> {
        self.switch_named(name)?.start()
    }

    fn switch_named(&self, name: &str) -> Result<Arc<Node>> {
        let node = self.node(name)?;
        if !node.is_switch() {
            return Err(NetError::NotRunning {
                node: name.to_string(),
                reason: "not a switch".into(),
            });
        }
        Ok(node)
    }

    /// Tear the network down. Every step is attempted; failures are
    /// collected into one [`NetError::Teardown`].
    pub fn stop(&mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        let mut failures = Vec::new();

        for switch in self.nodes.iter().rev().filter(|n| n.is_switch()) {
            if switch.is_running() {
                if let Err(e) = switch.stop(false) {
                    failures.push(format!("stop switch {}: {e}", switch.name()));
                }
            }
        }

        for link in std::mem::take(&mut self.links).iter().rev() {
            let end = link.intf1();
            match netns::device_exists(end.context(), &end.name()) {
                Ok(true) => {
                    if let Err(e) = link.delete() {
                        failures.push(format!("delete link {link}: {e}"));
                    }
                }
                Ok(false) => {}
                Err(e) => failures.push(format!("inspect link {link}: {e}")),
            }
        }

        for node in self.nodes.iter().rev() {
            // Waits for commands other threads still run on this node.
            node.context().retire();
            if let Some(ns) = node.netns() {
                if let Err(e) = netns::delete_namespace(&self.root, ns) {
                    failures.push(format!("delete namespace {ns}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            tracing::info!(nodes = self.nodes.len(), "network torn down");
            Ok(())
        } else {
            tracing::warn!(failures = failures.len(), "network teardown incomplete");
            Err(NetError::Teardown(failures))
        }
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!(error = %e, "teardown on drop failed");
        }
    }
}

fn configure_host(host: &Node, ip: Option<Ipv4Cidr>) -> Result<()> {
    let intfs = host.interfaces();
    for intf in &intfs {
        intf.set_up(true)?;
    }
    match (ip, intfs.first()) {
        (Some(cidr), Some(intf)) => intf.set_cidr(cidr),
        (Some(_), None) => {
            tracing::warn!(host = %host.name(), "host has no interface to address");
            Ok(())
        }
        (None, _) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::Refresh;
    use crate::iproute::BridgePortState;
    use crate::exec::{ExecOutput, ExecRequest};
    use crate::test_util::FakeKernel;
    use std::io;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    fn settings() -> NetSettings {
        NetSettings {
            netns_prefix: "t-".into(),
            poll_interval: Duration::from_millis(1),
            converge_timeout: Duration::from_secs(5),
            ..NetSettings::default()
        }
    }

    fn single(kernel: &FakeKernel, hosts: usize) -> Network {
        let topo = TopoSpec::single(hosts).unwrap();
        Network::from_topo(settings(), kernel.executor(), &topo).unwrap()
    }

    #[test]
    fn hosts_get_sequential_addresses_on_start() {
        let kernel = FakeKernel::new();
        let mut net = single(&kernel, 3);
        net.start().unwrap();
        for (i, host) in net.hosts().iter().enumerate() {
            let ip = host.ip(None, Refresh::Sync).unwrap();
            assert_eq!(ip, Some(Ipv4Addr::new(10, 0, 0, i as u8 + 1)));
            assert!(host.default_interface().unwrap().is_up(Refresh::Sync).unwrap());
        }
        assert!(net.node("s1").unwrap().is_running());
        assert!(matches!(net.node("s9"), Err(NetError::NoSuchNode(_))));
    }

    #[test]
    fn duplicate_and_dangling_declarations_fail() {
        let kernel = FakeKernel::new();
        let mut net = Network::new(settings(), kernel.executor());
        net.add_host("h1").unwrap();
        assert!(matches!(net.add_host("h1"), Err(NetError::InvalidTopology(_))));
        assert!(matches!(net.add_link("h1", "h2"), Err(NetError::NoSuchNode(_))));
        assert!(net.add_link("h1", "h1").is_err());
        assert!(net.add_host_with_ip("h2", "10.0.0.300/8").unwrap_err().is_validation());
    }

    #[test]
    fn link_status_toggles_both_ends() {
        let kernel = FakeKernel::new();
        let mut net = single(&kernel, 2);
        net.start().unwrap();

        net.config_link_status("h1", "s1", LinkStatus::Down).unwrap();
        let link = net.links_between("s1", "h1").pop().unwrap();
        for end in link.endpoints() {
            assert!(!end.is_up(Refresh::Sync).unwrap());
        }
        net.config_link_status("h1", "s1", "up".parse().unwrap()).unwrap();
        for end in link.endpoints() {
            assert!(end.is_up(Refresh::Sync).unwrap());
        }
        assert!(matches!(
            net.config_link_status("h1", "h2", LinkStatus::Up),
            Err(NetError::NoSuchLink { .. })
        ));
        assert!("sideways".parse::<LinkStatus>().is_err());
    }

    #[test]
    fn link_status_reports_half_applied_change() {
        let kernel = FakeKernel::new();
        let mut net = single(&kernel, 2);
        net.start().unwrap();
        kernel.fail_matching("set dev s1-eth1 down");

        let err = net
            .config_link_status("h1", "s1", LinkStatus::Down)
            .unwrap_err();
        match err {
            NetError::PartialApplication { completed, failed, .. } => {
                assert_eq!(completed, ["h1-eth0"]);
                assert_eq!(failed, "s1-eth1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ring_converges_and_survives_switch_restart() {
        let kernel = FakeKernel::new();
        let topo = TopoSpec::ring(3, 1).unwrap();
        let mut net = Network::from_topo(settings(), kernel.executor(), &topo).unwrap();
        net.start().unwrap();
        assert!(net.wait_connected().unwrap());

        let s2 = net.node("s2").unwrap();
        assert_eq!(s2.interfaces().len(), 3);
        net.stop_switch("s2", false).unwrap();
        assert_eq!(s2.forwarding_state().unwrap(), None);
        assert_eq!(net.links().len(), 6);

        net.start_switch("s2").unwrap();
        assert_eq!(s2.forwarding_state().unwrap(), Some(BridgePortState::Listening));
        assert!(net.wait_connected().unwrap());
    }

    #[test]
    fn deleting_switch_ports_prunes_links() {
        let kernel = FakeKernel::new();
        let mut net = single(&kernel, 2);
        net.start().unwrap();
        net.stop_switch("s1", true).unwrap();
        assert!(net.links().is_empty());
        assert!(net.node("h1").unwrap().interfaces().is_empty());
        assert!(net.stop_switch("h1", false).is_err());
    }

    #[test]
    fn links_added_after_start_join_the_bridge() {
        let kernel = FakeKernel::new();
        let mut net = single(&kernel, 1);
        net.start().unwrap();
        let h9 = net.add_host_with_ip("h9", "10.0.0.9/8").unwrap();
        net.add_link("h9", "s1").unwrap();
        let s1 = net.node("s1").unwrap();
        assert_eq!(s1.bridge_ports().unwrap().len(), 2);
        assert!(h9.default_interface().unwrap().is_up(Refresh::Sync).unwrap());
        assert_eq!(h9.ip(None, Refresh::Sync).unwrap(), Some(Ipv4Addr::new(10, 0, 0, 9)));
    }

    #[test]
    fn stop_releases_everything_and_gates_nodes() {
        let kernel = FakeKernel::new();
        let mut net = single(&kernel, 2);
        net.start().unwrap();
        let h1 = net.node("h1").unwrap();
        let started_at = kernel.history().len();
        net.stop().unwrap();

        assert!(!h1.is_running());
        assert!(matches!(
            h1.cmd(&["ip", "link"]),
            Err(NetError::NotRunning { .. })
        ));
        assert!(kernel.namespaces().is_empty());
        assert!(net.add_host("h3").is_err());
        net.stop().unwrap();

        let history = kernel.history().split_off(started_at);
        let bridge = history.iter().position(|c| c.ends_with("ip link del s1")).unwrap();
        let first_ns = history.iter().position(|c| c.starts_with("ip netns del t-")).unwrap();
        assert!(bridge < first_ns);
        let namespaces: Vec<_> = history.iter().filter(|c| c.starts_with("ip netns del")).collect();
        assert_eq!(namespaces.last().unwrap().as_str(), "ip netns del t-s1");
    }

    /// Holds `ping` runs until released; everything else goes straight to
    /// the in-memory kernel.
    struct HeldPing {
        kernel: FakeKernel,
        entered: Barrier,
        release: Barrier,
        finished: AtomicBool,
    }

    impl CommandExecutor for HeldPing {
        fn execute(&self, request: &ExecRequest) -> io::Result<ExecOutput> {
            if request.program != "ping" {
                return self.kernel.execute(request);
            }
            self.entered.wait();
            self.release.wait();
            let out = self.kernel.execute(request);
            self.finished.store(true, Ordering::SeqCst);
            out
        }
    }

    #[test]
    fn stop_waits_for_commands_running_on_other_threads() {
        let kernel = FakeKernel::new();
        let exec = Arc::new(HeldPing {
            kernel: kernel.clone(),
            entered: Barrier::new(2),
            release: Barrier::new(2),
            finished: AtomicBool::new(false),
        });
        let topo = TopoSpec::single(2).unwrap();
        let mut net = Network::from_topo(settings(), exec.clone(), &topo).unwrap();
        net.start().unwrap();
        let h1 = net.node("h1").unwrap();

        std::thread::scope(|s| {
            let pinger = s.spawn(|| h1.cmd(&["ping", "-c", "1", "10.0.0.2"]));
            exec.entered.wait();

            let stopper = s.spawn(|| {
                let stopped = net.stop();
                (stopped, exec.finished.load(Ordering::SeqCst))
            });
            std::thread::sleep(Duration::from_millis(50));
            assert!(!stopper.is_finished());

            exec.release.wait();
            let (stopped, finished_first) = stopper.join().unwrap();
            stopped.unwrap();
            assert!(finished_first, "stop returned while a command was still running");
            assert!(pinger.join().unwrap().is_ok());
        });

        assert!(kernel.namespaces().is_empty());
        assert!(matches!(
            h1.cmd(&["ip", "link"]),
            Err(NetError::NotRunning { .. })
        ));
    }

    #[test]
    fn teardown_collects_failures() {
        let kernel = FakeKernel::new();
        let mut net = single(&kernel, 2);
        net.start().unwrap();
        kernel.fail_matching("netns del t-h1");
        let err = net.stop().unwrap_err();
        match err {
            NetError::Teardown(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("t-h1"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(kernel.namespaces(), ["t-h1"]);
    }

    #[test]
    fn drop_tears_down() {
        let kernel = FakeKernel::new();
        {
            let mut net = single(&kernel, 2);
            net.start().unwrap();
            assert_eq!(kernel.namespaces().len(), 3);
        }
        assert!(kernel.namespaces().is_empty());
    }
}
