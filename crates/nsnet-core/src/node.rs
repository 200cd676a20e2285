//! Emulated hosts and switches.
//!
//! Every node lives in its own network namespace. Hosts configure their
//! default interface; switches additionally run a Linux bridge named after
//! the node with all member interfaces enslaved to it.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::addr::{validate_ip_with_prefix, validate_ipv4, validate_mac, MacAddr};
use crate::context::NodeContext;
use crate::error::{NetError, Result};
use crate::interface::{Interface, Refresh};
use crate::iproute::{self, BridgePort, BridgePortState, Neighbor};

/// Prefix used by [`Node::set_ip`] when the address has none.
pub const DEFAULT_PREFIX: &str = "8";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Host,
    Switch,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Host => "host",
            NodeKind::Switch => "switch",
        }
    }

    /// Host ports count from `eth0`, switch ports from `eth1`.
    fn first_port(&self) -> u32 {
        match self {
            NodeKind::Host => 0,
            NodeKind::Switch => 1,
        }
    }
}

/// Bridge options for switch nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchOptions {
    /// Run the spanning-tree protocol on the bridge.
    pub stp: bool,
    /// STP forward delay in centiseconds; kernel default when `None`.
    pub forward_delay_cs: Option<u32>,
}

#[derive(Debug)]
struct SwitchState {
    options: SwitchOptions,
    running: bool,
}

#[derive(Debug)]
pub struct Node {
    ctx: Arc<NodeContext>,
    kind: NodeKind,
    intfs: RwLock<Vec<Arc<Interface>>>,
    next_port: AtomicU32,
    switch: Option<Mutex<SwitchState>>,
}

impl Node {
    pub fn host(ctx: Arc<NodeContext>) -> Node {
        Node::with_kind(ctx, NodeKind::Host, None)
    }

    pub fn switch(ctx: Arc<NodeContext>, options: SwitchOptions) -> Node {
        let state = SwitchState {
            options,
            running: false,
        };
        Node::with_kind(ctx, NodeKind::Switch, Some(Mutex::new(state)))
    }

    fn with_kind(ctx: Arc<NodeContext>, kind: NodeKind, switch: Option<Mutex<SwitchState>>) -> Node {
        Node {
            ctx,
            kind,
            intfs: RwLock::new(Vec::new()),
            next_port: AtomicU32::new(kind.first_port()),
            switch,
        }
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_switch(&self) -> bool {
        self.kind == NodeKind::Switch
    }

    pub fn netns(&self) -> Option<&str> {
        self.ctx.netns()
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    // ── Interfaces ──────────────────────────────────────────────────

    pub fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.intfs.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn interface(&self, name: &str) -> Result<Arc<Interface>> {
        self.interfaces()
            .into_iter()
            .find(|i| i.name() == name)
            .ok_or_else(|| NetError::NoSuchInterface {
                node: self.name().to_string(),
                intf: name.to_string(),
            })
    }

    /// The first interface, the target of every delegating accessor.
    pub fn default_interface(&self) -> Result<Arc<Interface>> {
        self.interfaces()
            .into_iter()
            .next()
            .ok_or_else(|| NetError::NoSuchInterface {
                node: self.name().to_string(),
                intf: "(default)".into(),
            })
    }

    fn intf_or_default(&self, intf: Option<&str>) -> Result<Arc<Interface>> {
        match intf {
            Some(name) => self.interface(name),
            None => self.default_interface(),
        }
    }

    /// Reserve the next port number and its interface name.
    pub(crate) fn allocate_port(&self) -> (u32, String) {
        let port = self.next_port.fetch_add(1, Ordering::SeqCst);
        (port, format!("{}-eth{}", self.name(), port))
    }

    pub(crate) fn add_interface(&self, intf: Arc<Interface>) {
        self.intfs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(intf);
    }

    pub(crate) fn remove_interface(&self, name: &str) -> Option<Arc<Interface>> {
        let mut intfs = self.intfs.write().unwrap_or_else(|e| e.into_inner());
        let idx = intfs.iter().position(|i| i.name() == name)?;
        Some(intfs.remove(idx))
    }

    // ── Raw commands ────────────────────────────────────────────────

    /// Run `argv` inside the node and return stdout followed by stderr.
    ///
    /// A non-zero exit is not an error here: this is the escape hatch for
    /// driving the kernel behind the cached model.
    pub fn cmd(&self, argv: &[&str]) -> Result<String> {
        let Some((program, rest)) = argv.split_first() else {
            return Ok(String::new());
        };
        let args: Vec<String> = rest.iter().map(|a| a.to_string()).collect();
        Ok(self.ctx.run_raw(program, &args)?.combined())
    }

    // ── Delegating accessors ────────────────────────────────────────

    /// Set the address of `intf` (default interface when `None`). Accepts
    /// `a.b.c.d/n`, or a bare address that gets [`DEFAULT_PREFIX`].
    pub fn set_ip(&self, addr: &str, intf: Option<&str>) -> Result<()> {
        let (ip, prefix) = addr.split_once('/').unwrap_or((addr, DEFAULT_PREFIX));
        let cidr = validate_ip_with_prefix(ip, prefix)?;
        self.intf_or_default(intf)?.set_cidr(cidr)
    }

    pub fn ip(&self, intf: Option<&str>, refresh: Refresh) -> Result<Option<Ipv4Addr>> {
        self.intf_or_default(intf)?.ip_address(refresh)
    }

    pub fn mac(&self, intf: Option<&str>, refresh: Refresh) -> Result<MacAddr> {
        self.intf_or_default(intf)?.mac_address(refresh)
    }

    pub fn set_mac(&self, mac: &str, intf: Option<&str>) -> Result<()> {
        self.intf_or_default(intf)?.set_mac(mac)
    }

    /// Install a host route to `dest` out of `intf`, making a directly
    /// linked peer reachable without a shared subnet.
    pub fn set_host_route(&self, dest: &str, intf: &str) -> Result<()> {
        let dest = validate_ipv4(dest)?;
        let intf = self.interface(intf)?;
        let name = intf.name();
        self.ctx.run_args(
            Some(&name),
            "ip",
            &["route", "replace", &format!("{dest}/32"), "dev", &name],
        )?;
        tracing::debug!(node = %self.name(), %dest, intf = %name, "host route set");
        Ok(())
    }

    /// Install a permanent neighbor entry for `ip` on `intf`.
    pub fn set_arp(&self, ip: &str, mac: &str, intf: Option<&str>) -> Result<()> {
        let ip = validate_ipv4(ip)?;
        let mac = validate_mac(mac)?;
        let intf = self.intf_or_default(intf)?;
        let name = intf.name();
        self.ctx.run_args(
            Some(&name),
            "ip",
            &[
                "neigh",
                "replace",
                &ip.to_string(),
                "lladdr",
                &mac.to_string(),
                "dev",
                &name,
                "nud",
                "permanent",
            ],
        )?;
        Ok(())
    }

    pub fn neighbors(&self) -> Result<Vec<Neighbor>> {
        let raw = self.ctx.run_args(None, "ip", &["-j", "neigh"])?;
        iproute::parse_neighbors(&raw).map_err(|e| e.on_node(self.ctx.name(), None))
    }

    // ── Switch lifecycle ────────────────────────────────────────────

    fn switch_state(&self) -> Result<&Mutex<SwitchState>> {
        self.switch.as_ref().ok_or_else(|| NetError::NotRunning {
            node: self.name().to_string(),
            reason: format!("{} has no bridge", self.kind.as_str()),
        })
    }

    pub fn is_running(&self) -> bool {
        match &self.switch {
            Some(state) => state.lock().unwrap_or_else(|e| e.into_inner()).running,
            None => self.ctx.is_alive(),
        }
    }

    pub fn switch_options(&self) -> Option<SwitchOptions> {
        self.switch
            .as_ref()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).options.clone())
    }

    /// Create the bridge, enslave every current interface and bring it all
    /// up. Starting a running switch is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut state = self.switch_state()?.lock().unwrap_or_else(|e| e.into_inner());
        if state.running {
            return Ok(());
        }
        let bridge = self.name().to_string();

        let _ = self.ctx.run_raw("ip", &strings(&["link", "del", &bridge]));
        self.ctx
            .run_args(None, "ip", &["link", "add", "name", &bridge, "type", "bridge"])?;
        if state.options.stp {
            let mut args = strings(&["link", "set", "dev", &bridge, "type", "bridge", "stp_state", "1"]);
            if let Some(delay) = state.options.forward_delay_cs {
                args.push("forward_delay".into());
                args.push(delay.to_string());
            }
            self.ctx.run(None, "ip", &args)?;
        }
        for intf in self.interfaces() {
            let name = intf.name();
            self.ctx
                .run_args(Some(&name), "ip", &["link", "set", "dev", &name, "master", &bridge])?;
            intf.set_up(true)?;
        }
        self.ctx
            .run_args(None, "ip", &["link", "set", "dev", &bridge, "up"])?;

        state.running = true;
        tracing::info!(switch = %bridge, stp = state.options.stp, "switch started");
        Ok(())
    }

    /// Enslave a port added after the bridge came up. No-op while stopped;
    /// the next [`start`](Self::start) picks it up.
    pub(crate) fn join_bridge(&self, intf: &Interface) -> Result<()> {
        let state = self.switch_state()?.lock().unwrap_or_else(|e| e.into_inner());
        if !state.running {
            return Ok(());
        }
        let name = intf.name();
        self.ctx
            .run_args(Some(&name), "ip", &["link", "set", "dev", &name, "master", self.name()])?;
        intf.set_up(true)?;
        Ok(())
    }

    /// Remove the bridge. With `delete_interfaces == false` the member
    /// interfaces stay so a later [`start`](Self::start) reattaches them.
    /// Returns the names of deleted interfaces.
    pub fn stop(&self, delete_interfaces: bool) -> Result<Vec<String>> {
        let mut state = self.switch_state()?.lock().unwrap_or_else(|e| e.into_inner());
        let bridge = self.name().to_string();
        if state.running {
            self.ctx
                .run_args(None, "ip", &["link", "set", "dev", &bridge, "down"])?;
            self.ctx.run_args(None, "ip", &["link", "del", &bridge])?;
            state.running = false;
        }

        let mut deleted = Vec::new();
        if delete_interfaces {
            for intf in self.interfaces() {
                let name = intf.name();
                // The peer end may already be gone with its namespace.
                if crate::netns::device_exists(&self.ctx, &name)? {
                    crate::netns::delete_link(&self.ctx, &name)?;
                }
                self.remove_interface(&name);
                deleted.push(name);
            }
        }
        tracing::info!(switch = %bridge, delete_interfaces, "switch stopped");
        Ok(deleted)
    }

    pub fn bridge_ports(&self) -> Result<Vec<BridgePort>> {
        self.switch_state()?;
        let raw = self.ctx.run_args(None, "bridge", &["link", "show"])?;
        Ok(iproute::parse_bridge_ports(&raw, self.name()))
    }

    /// Summary of the bridge's port states: `None` when the bridge has no
    /// ports (stopped or absent), a transitional state while any port is
    /// still listening or learning, otherwise `Forwarding` if any port
    /// forwards.
    pub fn forwarding_state(&self) -> Result<Option<BridgePortState>> {
        let ports = self.bridge_ports()?;
        Ok(summarize(&ports))
    }

    /// Converged: every port has left listening/learning and one forwards.
    pub fn is_converged(&self) -> Result<bool> {
        Ok(self.forwarding_state()? == Some(BridgePortState::Forwarding))
    }
}

fn summarize(ports: &[BridgePort]) -> Option<BridgePortState> {
    let has = |state| ports.iter().any(|p| p.state == state);
    if ports.is_empty() {
        None
    } else if has(BridgePortState::Listening) {
        Some(BridgePortState::Listening)
    } else if has(BridgePortState::Learning) {
        Some(BridgePortState::Learning)
    } else if has(BridgePortState::Forwarding) {
        Some(BridgePortState::Forwarding)
    } else {
        ports.first().map(|p| p.state)
    }
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
