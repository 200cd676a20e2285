//! Test support: privilege probing, unique names and an in-memory kernel.
//!
//! [`FakeKernel`] models the slice of iproute2, `bridge` and `ping` the
//! engine drives (namespaces, veth pairs, dummies, bridges with a stepping
//! STP state machine, IPv4 addresses, routes and neighbors) so the whole
//! topology engine can be exercised without root.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::io;
use std::net::Ipv4Addr;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};

use crate::addr::{parse_cidr, validate_ipv4, validate_mac, Ipv4Cidr, MacAddr};
use crate::exec::{CommandExecutor, ExecOutput, ExecRequest};
use crate::iproute::BridgePortState;

/// Monotonically increasing counter for generating unique test resource names.
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Check whether we have sufficient privileges (root/sudo) and tools (`ip`)
/// available to create network namespaces. Returns `false` if the test
/// environment cannot support namespace-based tests.
pub fn check_privileges() -> bool {
    let ns = privilege_check_name();
    match Command::new("ip").args(["netns", "add", &ns]).output() {
        Ok(o) if o.status.success() => {
            let _ = Command::new("ip").args(["netns", "del", &ns]).output();
            true
        }
        _ => false,
    }
}

/// Scratch namespace for [`check_privileges`]; parallel tests each get
/// their own.
fn privilege_check_name() -> String {
    unique_name("nsnet-chk", 15)
}

/// A name unique to this process, at most `max_len` characters.
///
/// Combines the prefix, process ID, and an atomic counter to avoid
/// collisions when tests run in parallel. The prefix is kept whole when it
/// fits; the pid/counter part loses its leading characters first.
pub fn unique_name(prefix: &str, max_len: usize) -> String {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let suffix = format!("{:x}{}", pid % 0xFFF, seq);
    if prefix.len() >= max_len {
        return prefix.chars().take(max_len).collect();
    }
    let room = max_len - prefix.len();
    let tail = &suffix[suffix.len().saturating_sub(room)..];
    format!("{prefix}{tail}")
}

// ── Fake kernel ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum DeviceKind {
    Loopback,
    Veth { peer: u32 },
    Dummy,
    Bridge { stp: bool },
}

#[derive(Debug, Clone)]
struct Device {
    ifindex: u32,
    name: String,
    netns: Option<String>,
    kind: DeviceKind,
    up: bool,
    mac: MacAddr,
    addrs: Vec<Ipv4Cidr>,
    master: Option<u32>,
    port_state: BridgePortState,
}

#[derive(Debug, Clone)]
struct Route {
    netns: Option<String>,
    dest: Ipv4Cidr,
    dev: String,
}

#[derive(Debug, Clone)]
struct NeighEntry {
    netns: Option<String>,
    dst: Ipv4Addr,
    lladdr: MacAddr,
    dev: String,
}

#[derive(Debug, Default)]
struct KernelState {
    namespaces: BTreeSet<String>,
    devices: Vec<Device>,
    routes: Vec<Route>,
    neighbors: Vec<NeighEntry>,
    next_ifindex: u32,
    failures: Vec<String>,
    history: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Format {
    json: bool,
    pretty: bool,
    brief: bool,
}

/// Shared handle to one in-memory kernel; clones see the same state.
#[derive(Debug, Clone)]
pub struct FakeKernel {
    state: Arc<Mutex<KernelState>>,
}

impl Default for FakeKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKernel {
    pub fn new() -> Self {
        let mut state = KernelState {
            next_ifindex: 1,
            ..KernelState::default()
        };
        state.add_loopback(None);
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn executor(&self) -> Arc<dyn CommandExecutor> {
        Arc::new(self.clone())
    }

    /// Make every later command whose `[netns] command line` contains
    /// `pattern` fail with a permission error.
    pub fn fail_matching(&self, pattern: &str) {
        self.lock().failures.push(pattern.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every command seen so far, rendered like [`ExecRequest`]'s `Display`.
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Named namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.lock().namespaces.iter().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CommandExecutor for FakeKernel {
    fn execute(&self, request: &ExecRequest) -> io::Result<ExecOutput> {
        let mut kernel = self.lock();
        let line = request.to_string();
        kernel.history.push(line.clone());
        if kernel.failures.iter().any(|p| line.contains(p.as_str())) {
            return Ok(ExecOutput::failed(
                2,
                "RTNETLINK answers: Operation not permitted\n",
            ));
        }
        if let Some(ns) = &request.netns {
            if !kernel.namespaces.contains(ns) {
                return Ok(no_namespace(ns));
            }
        }
        let args: Vec<&str> = request.args.iter().map(String::as_str).collect();
        kernel.dispatch(request.netns.as_deref(), &request.program, &args)
    }
}

fn failed(code: i32, msg: impl Into<String>) -> ExecOutput {
    let mut msg = msg.into();
    if !msg.ends_with('\n') {
        msg.push('\n');
    }
    ExecOutput::failed(code, msg)
}

fn no_device(name: &str) -> ExecOutput {
    failed(1, format!("Device \"{name}\" does not exist."))
}

fn no_namespace(name: &str) -> ExecOutput {
    failed(
        1,
        format!("Cannot open network namespace \"{name}\": No such file or directory"),
    )
}

fn exists() -> ExecOutput {
    failed(2, "RTNETLINK answers: File exists")
}

fn value_after<'a>(tokens: &[&'a str], key: &str) -> Option<&'a str> {
    tokens.windows(2).find(|w| w[0] == key).map(|w| w[1])
}

/// `show [dev] NAME`, `del [dev] NAME`: the device word after the verb.
fn target_device<'a>(rest: &[&'a str]) -> Option<&'a str> {
    match rest {
        ["dev", name, ..] => Some(*name),
        [name, ..] => Some(*name),
        [] => None,
    }
}

fn parse_prefix_or_host(token: &str) -> Option<Ipv4Cidr> {
    if token.contains('/') {
        parse_cidr(token).ok()
    } else {
        validate_ipv4(token).ok().map(|addr| Ipv4Cidr { addr, prefix: 32 })
    }
}

fn render(value: Value, fmt: Format) -> String {
    let mut out = if fmt.pretty {
        serde_json::to_string_pretty(&value).unwrap_or_default()
    } else {
        value.to_string()
    };
    out.push('\n');
    out
}

impl KernelState {
    fn alloc_ifindex(&mut self) -> u32 {
        let idx = self.next_ifindex;
        self.next_ifindex += 1;
        idx
    }

    fn add_loopback(&mut self, netns: Option<String>) {
        let ifindex = self.alloc_ifindex();
        self.devices.push(Device {
            ifindex,
            name: "lo".into(),
            netns,
            kind: DeviceKind::Loopback,
            up: false,
            mac: MacAddr::ZERO,
            addrs: vec![Ipv4Cidr {
                addr: Ipv4Addr::LOCALHOST,
                prefix: 8,
            }],
            master: None,
            port_state: BridgePortState::Disabled,
        });
    }

    fn new_device(&mut self, name: &str, netns: Option<&str>, kind: DeviceKind) -> u32 {
        let ifindex = self.alloc_ifindex();
        self.devices.push(Device {
            ifindex,
            name: name.to_string(),
            netns: netns.map(str::to_string),
            kind,
            up: false,
            mac: MacAddr::random_unicast(),
            addrs: Vec::new(),
            master: None,
            port_state: BridgePortState::Disabled,
        });
        ifindex
    }

    fn find(&self, netns: Option<&str>, name: &str) -> Option<usize> {
        self.devices
            .iter()
            .position(|d| d.netns.as_deref() == netns && d.name == name)
    }

    fn by_index(&self, ifindex: u32) -> Option<&Device> {
        self.devices.iter().find(|d| d.ifindex == ifindex)
    }

    fn in_ns<'a>(&'a self, netns: Option<&'a str>) -> impl Iterator<Item = &'a Device> + 'a {
        self.devices.iter().filter(move |d| d.netns.as_deref() == netns)
    }

    fn carrier(&self, dev: &Device) -> bool {
        match dev.kind {
            DeviceKind::Veth { peer } => {
                dev.up && self.by_index(peer).is_some_and(|p| p.up)
            }
            _ => dev.up,
        }
    }

    fn flags(&self, dev: &Device) -> Vec<&'static str> {
        let carrier = self.carrier(dev);
        let mut flags = Vec::new();
        if dev.up && !carrier {
            flags.push("NO-CARRIER");
        }
        if dev.kind == DeviceKind::Loopback {
            flags.push("LOOPBACK");
        } else {
            flags.extend(["BROADCAST", "MULTICAST"]);
        }
        if dev.up {
            flags.push("UP");
        }
        if carrier {
            flags.push("LOWER_UP");
        }
        flags
    }

    fn operstate(&self, dev: &Device) -> &'static str {
        if !dev.up {
            "DOWN"
        } else if dev.kind == DeviceKind::Loopback {
            "UNKNOWN"
        } else if self.carrier(dev) {
            "UP"
        } else {
            "LOWERLAYERDOWN"
        }
    }

    fn display_name(&self, dev: &Device) -> String {
        match dev.kind {
            DeviceKind::Veth { peer } => format!("{}@if{}", dev.name, peer),
            _ => dev.name.clone(),
        }
    }

    fn master_name(&self, dev: &Device) -> Option<String> {
        dev.master
            .and_then(|m| self.by_index(m))
            .map(|b| b.name.clone())
    }

    /// Remove a device with everything that goes with it: the other end of
    /// a veth pair, bridge memberships, routes and neighbor entries.
    fn remove_device(&mut self, idx: usize) {
        let dev = &self.devices[idx];
        let mut doomed = vec![dev.ifindex];
        if let DeviceKind::Veth { peer } = dev.kind {
            doomed.push(peer);
        }
        let gone: Vec<(Option<String>, String)> = self
            .devices
            .iter()
            .filter(|d| doomed.contains(&d.ifindex))
            .map(|d| (d.netns.clone(), d.name.clone()))
            .collect();
        self.devices.retain(|d| !doomed.contains(&d.ifindex));
        for d in &mut self.devices {
            if d.master.is_some_and(|m| doomed.contains(&m)) {
                d.master = None;
            }
        }
        for (netns, name) in gone {
            self.forget_dev(netns.as_deref(), &name);
        }
    }

    fn forget_dev(&mut self, netns: Option<&str>, name: &str) {
        self.routes
            .retain(|r| !(r.netns.as_deref() == netns && r.dev == name));
        self.neighbors
            .retain(|n| !(n.netns.as_deref() == netns && n.dev == name));
    }

    fn dispatch(&mut self, ns: Option<&str>, program: &str, args: &[&str]) -> io::Result<ExecOutput> {
        match program {
            "ip" => Ok(self.ip(ns, args)),
            "bridge" => Ok(self.bridge(ns, args)),
            "ping" => Ok(self.ping(ns, args)),
            other => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{other}: command not found"),
            )),
        }
    }

    // ── ip ──────────────────────────────────────────────────────────

    fn ip(&mut self, ns: Option<&str>, args: &[&str]) -> ExecOutput {
        let mut fmt = Format::default();
        let mut i = 0;
        while let Some(opt) = args.get(i).filter(|a| a.starts_with('-')) {
            match *opt {
                "-j" | "-json" => fmt.json = true,
                "-p" | "-pretty" => fmt.pretty = true,
                "-br" | "-brief" => fmt.brief = true,
                "-f" | "-family" => i += 1,
                _ => {}
            }
            i += 1;
        }
        let Some(object) = args.get(i) else {
            return failed(255, "Usage: ip [ OPTIONS ] OBJECT { COMMAND | help }");
        };
        let rest = &args[i + 1..];
        match *object {
            "netns" => self.ip_netns(rest),
            "link" | "l" => self.ip_link(ns, rest, fmt),
            "address" | "addr" | "a" => self.ip_address(ns, rest, fmt),
            "route" | "ro" | "r" => self.ip_route(ns, rest),
            "neigh" | "neighbor" | "neighbour" | "n" => self.ip_neigh(ns, rest, fmt),
            other => failed(255, format!("Object \"{other}\" is unknown, try \"ip help\".")),
        }
    }

    fn ip_netns(&mut self, rest: &[&str]) -> ExecOutput {
        match rest {
            ["add", name] => {
                if !self.namespaces.insert(name.to_string()) {
                    return failed(
                        1,
                        format!("Cannot create namespace file \"/var/run/netns/{name}\": File exists"),
                    );
                }
                self.add_loopback(Some(name.to_string()));
                ExecOutput::ok("")
            }
            ["del" | "delete", name] => {
                if !self.namespaces.remove(*name) {
                    return failed(
                        1,
                        format!("Cannot remove namespace file \"/var/run/netns/{name}\": No such file or directory"),
                    );
                }
                while let Some(idx) = self.devices.iter().position(|d| d.netns.as_deref() == Some(*name)) {
                    self.remove_device(idx);
                }
                ExecOutput::ok("")
            }
            ["exec", name, program, args @ ..] => {
                if !self.namespaces.contains(*name) {
                    return no_namespace(name);
                }
                let name = name.to_string();
                self.dispatch(Some(&name), program, args)
                    .unwrap_or_else(|e| failed(1, format!("exec of \"{program}\" failed: {e}")))
            }
            [] | ["list"] => {
                let names: Vec<&str> = self.namespaces.iter().map(String::as_str).collect();
                ExecOutput::ok(names.join("\n") + "\n")
            }
            _ => failed(255, "Usage: ip netns { add | del | exec | list } ..."),
        }
    }

    fn ip_link(&mut self, ns: Option<&str>, rest: &[&str], fmt: Format) -> ExecOutput {
        match rest.first().copied() {
            None | Some("show") | Some("list") | Some("ls") => {
                let filter = rest.get(1..).and_then(target_device);
                self.link_show(ns, filter, fmt)
            }
            Some("add") => self.link_add(ns, &rest[1..]),
            Some("del") | Some("delete") => {
                let Some(name) = target_device(&rest[1..]) else {
                    return failed(255, "Not enough information: \"dev\" argument is required.");
                };
                match self.find(ns, name) {
                    Some(idx) => {
                        self.remove_device(idx);
                        ExecOutput::ok("")
                    }
                    None => no_device(name),
                }
            }
            Some("set") => self.link_set(ns, &rest[1..]),
            Some(other) => failed(
                255,
                format!("Command \"{other}\" is unknown, try \"ip link help\"."),
            ),
        }
    }

    fn link_show(&self, ns: Option<&str>, filter: Option<&str>, fmt: Format) -> ExecOutput {
        if let Some(name) = filter {
            if self.find(ns, name).is_none() {
                return no_device(name);
            }
        }
        let devices: Vec<&Device> = self
            .in_ns(ns)
            .filter(|d| filter.is_none_or(|f| d.name == f))
            .collect();

        if fmt.json {
            let records: Vec<Value> = devices.iter().map(|d| self.link_json(d, fmt.brief)).collect();
            return ExecOutput::ok(render(Value::Array(records), fmt));
        }
        let mut out = String::new();
        for d in devices {
            let flags = self.flags(d).join(",");
            if fmt.brief {
                out.push_str(&format!(
                    "{:<16} {:<14} {} <{}>\n",
                    self.display_name(d),
                    self.operstate(d),
                    d.mac,
                    flags
                ));
            } else {
                let master = self
                    .master_name(d)
                    .map(|m| format!("master {m} "))
                    .unwrap_or_default();
                out.push_str(&format!(
                    "{}: {}: <{}> mtu 1500 qdisc noqueue {}state {} mode DEFAULT group default\n    link/ether {} brd ff:ff:ff:ff:ff:ff\n",
                    d.ifindex,
                    self.display_name(d),
                    flags,
                    master,
                    self.operstate(d),
                    d.mac
                ));
            }
        }
        ExecOutput::ok(out)
    }

    fn link_json(&self, d: &Device, brief: bool) -> Value {
        if brief {
            return json!({
                "ifname": d.name,
                "operstate": self.operstate(d),
                "address": d.mac.to_string(),
                "flags": self.flags(d),
            });
        }
        let link_type = if d.kind == DeviceKind::Loopback {
            "loopback"
        } else {
            "ether"
        };
        let mut record = json!({
            "ifindex": d.ifindex,
            "ifname": d.name,
            "flags": self.flags(d),
            "mtu": 1500,
            "qdisc": "noqueue",
            "operstate": self.operstate(d),
            "linkmode": "DEFAULT",
            "group": "default",
            "link_type": link_type,
            "address": d.mac.to_string(),
            "broadcast": "ff:ff:ff:ff:ff:ff",
        });
        if let (Some(master), Some(obj)) = (self.master_name(d), record.as_object_mut()) {
            obj.insert("master".into(), Value::String(master));
        }
        record
    }

    fn link_add(&mut self, ns: Option<&str>, rest: &[&str]) -> ExecOutput {
        let rest = match rest {
            ["name", tail @ ..] => tail,
            other => other,
        };
        let Some(name) = rest.first().copied() else {
            return failed(255, "Not enough information: \"dev\" argument is required.");
        };
        let Some(kind) = value_after(rest, "type") else {
            return failed(2, "Not enough information: \"type\" argument is required.");
        };
        if self.find(ns, name).is_some() {
            return exists();
        }
        match kind {
            "veth" => {
                let peer = match rest.iter().position(|t| *t == "peer") {
                    Some(p) => match &rest[p + 1..] {
                        ["name", peer, ..] | [peer, ..] => *peer,
                        [] => return failed(2, "Error: peer name is required."),
                    },
                    None => return failed(2, "Error: peer name is required."),
                };
                if peer == name || self.find(ns, peer).is_some() {
                    return exists();
                }
                let a = self.new_device(name, ns, DeviceKind::Dummy);
                let b = self.new_device(peer, ns, DeviceKind::Veth { peer: a });
                if let Some(dev) = self.devices.iter_mut().find(|d| d.ifindex == a) {
                    dev.kind = DeviceKind::Veth { peer: b };
                }
            }
            "dummy" => {
                self.new_device(name, ns, DeviceKind::Dummy);
            }
            "bridge" => {
                self.new_device(name, ns, DeviceKind::Bridge { stp: false });
            }
            _ => return failed(2, "Error: Unknown device type."),
        }
        ExecOutput::ok("")
    }

    fn link_set(&mut self, ns: Option<&str>, rest: &[&str]) -> ExecOutput {
        let (name, mut ops) = match rest {
            ["dev", name, ops @ ..] | [name, ops @ ..] => (*name, ops),
            [] => return failed(255, "Not enough information: \"dev\" argument is required."),
        };
        let Some(mut idx) = self.find(ns, name) else {
            return no_device(name);
        };

        while let Some((op, tail)) = ops.split_first() {
            ops = tail;
            match *op {
                "up" | "down" => {
                    let up = *op == "up";
                    let was_up = self.devices[idx].up;
                    self.devices[idx].up = up;
                    if up && !was_up {
                        self.restart_stp(idx);
                    }
                }
                "address" => {
                    let Some((value, tail)) = ops.split_first() else {
                        return failed(255, "Error: argument is required.");
                    };
                    ops = tail;
                    match validate_mac(value) {
                        Ok(mac) => self.devices[idx].mac = mac,
                        Err(_) => return failed(2, "RTNETLINK answers: Cannot assign requested address"),
                    }
                }
                "name" => {
                    let Some((value, tail)) = ops.split_first() else {
                        return failed(255, "Error: argument is required.");
                    };
                    ops = tail;
                    if self.devices[idx].up {
                        return failed(2, "RTNETLINK answers: Device or resource busy");
                    }
                    if self.find(ns, value).is_some() {
                        return exists();
                    }
                    let old = std::mem::replace(&mut self.devices[idx].name, value.to_string());
                    for r in self.routes.iter_mut().filter(|r| r.netns.as_deref() == ns && r.dev == old) {
                        r.dev = value.to_string();
                    }
                    for n in self.neighbors.iter_mut().filter(|n| n.netns.as_deref() == ns && n.dev == old) {
                        n.dev = value.to_string();
                    }
                }
                "master" => {
                    let Some((value, tail)) = ops.split_first() else {
                        return failed(255, "Error: argument is required.");
                    };
                    ops = tail;
                    let bridge = self
                        .find(ns, value)
                        .map(|b| &self.devices[b])
                        .filter(|b| matches!(b.kind, DeviceKind::Bridge { .. }));
                    let Some(bridge) = bridge else {
                        return failed(1, format!("Error: argument \"{value}\" is wrong: Device does not exist"));
                    };
                    let (master, stp) = (bridge.ifindex, bridge.kind == DeviceKind::Bridge { stp: true });
                    let dev = &mut self.devices[idx];
                    dev.master = Some(master);
                    dev.port_state = if stp {
                        BridgePortState::Listening
                    } else {
                        BridgePortState::Forwarding
                    };
                }
                "nomaster" => self.devices[idx].master = None,
                "netns" => {
                    let Some((value, tail)) = ops.split_first() else {
                        return failed(255, "Error: argument is required.");
                    };
                    ops = tail;
                    if !self.namespaces.contains(*value) {
                        return failed(1, format!("Error: argument \"{value}\" is wrong: Invalid \"netns\" value"));
                    }
                    let dev_name = self.devices[idx].name.clone();
                    if self.find(Some(*value), &dev_name).is_some() {
                        return exists();
                    }
                    self.forget_dev(ns, &dev_name);
                    let dev = &mut self.devices[idx];
                    dev.netns = Some(value.to_string());
                    dev.up = false;
                    dev.addrs.clear();
                    dev.master = None;
                    // Later options apply to the moved device.
                    match self.find(Some(*value), &dev_name) {
                        Some(moved) => idx = moved,
                        None => return no_device(&dev_name),
                    }
                }
                "type" => {
                    if ops.first() == Some(&"bridge") {
                        ops = &ops[1..];
                    }
                    while let [key, value, tail @ ..] = ops {
                        match *key {
                            "stp_state" => {
                                if let DeviceKind::Bridge { stp } = &mut self.devices[idx].kind {
                                    *stp = *value != "0";
                                }
                            }
                            "forward_delay" | "hello_time" | "max_age" | "priority" => {}
                            _ => break,
                        }
                        ops = tail;
                    }
                }
                "mtu" | "txqueuelen" => {
                    ops = ops.get(1..).unwrap_or_default();
                }
                other => {
                    return failed(
                        255,
                        format!("Error: either \"dev\" is duplicate, or \"{other}\" is a garbage."),
                    )
                }
            }
        }
        ExecOutput::ok("")
    }

    /// Ports of an STP bridge start over in the listening state whenever
    /// the port or the bridge comes up.
    fn restart_stp(&mut self, idx: usize) {
        let stp_bridge = DeviceKind::Bridge { stp: true };
        let dev = &self.devices[idx];
        let (ifindex, master, is_stp_bridge) = (dev.ifindex, dev.master, dev.kind == stp_bridge);
        let master_runs_stp = master
            .and_then(|m| self.by_index(m))
            .is_some_and(|b| b.kind == stp_bridge);
        if master_runs_stp {
            self.devices[idx].port_state = BridgePortState::Listening;
        }
        if is_stp_bridge {
            for port in self.devices.iter_mut().filter(|d| d.master == Some(ifindex)) {
                port.port_state = BridgePortState::Listening;
            }
        }
    }

    fn ip_address(&mut self, ns: Option<&str>, rest: &[&str], fmt: Format) -> ExecOutput {
        match rest.first().copied() {
            None | Some("show") | Some("list") | Some("ls") => {
                let filter = rest.get(1..).and_then(target_device);
                self.address_show(ns, filter, fmt)
            }
            Some(verb @ ("add" | "del" | "delete")) => {
                let Some(token) = rest.get(1).copied() else {
                    return failed(255, "Error: any valid prefix is expected.");
                };
                let Some(cidr) = parse_prefix_or_host(token) else {
                    return failed(1, format!("Error: any valid prefix is expected rather than \"{token}\"."));
                };
                let Some(dev) = value_after(rest, "dev") else {
                    return failed(255, "Not enough information: \"dev\" argument is required.");
                };
                let Some(idx) = self.find(ns, dev) else {
                    return no_device(dev);
                };
                let explicit_prefix = token.contains('/');
                let addrs = &mut self.devices[idx].addrs;
                if verb == "add" {
                    if addrs.iter().any(|a| a.addr == cidr.addr) {
                        return exists();
                    }
                    addrs.push(cidr);
                } else {
                    let Some(pos) = addrs
                        .iter()
                        .position(|a| a.addr == cidr.addr && (!explicit_prefix || a.prefix == cidr.prefix))
                    else {
                        return failed(2, "RTNETLINK answers: Cannot assign requested address");
                    };
                    addrs.remove(pos);
                }
                ExecOutput::ok("")
            }
            Some("flush") => {
                let Some(dev) = target_device(&rest[1..]) else {
                    return failed(255, "Flush requires arguments.");
                };
                match self.find(ns, dev) {
                    Some(idx) => {
                        self.devices[idx].addrs.clear();
                        ExecOutput::ok("")
                    }
                    None => no_device(dev),
                }
            }
            Some(other) => failed(
                255,
                format!("Command \"{other}\" is unknown, try \"ip address help\"."),
            ),
        }
    }

    fn address_show(&self, ns: Option<&str>, filter: Option<&str>, fmt: Format) -> ExecOutput {
        if let Some(name) = filter {
            if self.find(ns, name).is_none() {
                return no_device(name);
            }
        }
        let devices: Vec<&Device> = self
            .in_ns(ns)
            .filter(|d| filter.is_none_or(|f| d.name == f))
            .collect();

        if fmt.json {
            let records: Vec<Value> = devices
                .iter()
                .map(|d| {
                    let scope = if d.kind == DeviceKind::Loopback { "host" } else { "global" };
                    let info: Vec<Value> = d
                        .addrs
                        .iter()
                        .map(|a| {
                            json!({
                                "family": "inet",
                                "local": a.addr.to_string(),
                                "prefixlen": a.prefix,
                                "scope": scope,
                                "label": d.name,
                            })
                        })
                        .collect();
                    json!({
                        "ifindex": d.ifindex,
                        "ifname": d.name,
                        "flags": self.flags(d),
                        "mtu": 1500,
                        "operstate": self.operstate(d),
                        "address": d.mac.to_string(),
                        "addr_info": info,
                    })
                })
                .collect();
            return ExecOutput::ok(render(Value::Array(records), fmt));
        }

        let mut out = String::new();
        for d in devices {
            if fmt.brief {
                let addrs: Vec<String> = d.addrs.iter().map(ToString::to_string).collect();
                out.push_str(&format!(
                    "{:<16} {:<14} {}\n",
                    self.display_name(d),
                    self.operstate(d),
                    addrs.join(" ")
                ));
                continue;
            }
            out.push_str(&format!(
                "{}: {}: <{}> mtu 1500 state {}\n    link/ether {} brd ff:ff:ff:ff:ff:ff\n",
                d.ifindex,
                self.display_name(d),
                self.flags(d).join(","),
                self.operstate(d),
                d.mac
            ));
            for a in &d.addrs {
                out.push_str(&format!("    inet {} scope global {}\n", a, d.name));
            }
        }
        ExecOutput::ok(out)
    }

    fn ip_route(&mut self, ns: Option<&str>, rest: &[&str]) -> ExecOutput {
        match rest.first().copied() {
            None | Some("show") | Some("list") => {
                let mut out = String::new();
                for d in self.in_ns(ns).filter(|d| d.up && d.kind != DeviceKind::Loopback) {
                    for a in &d.addrs {
                        out.push_str(&format!(
                            "{}/{} dev {} proto kernel scope link src {}\n",
                            a.network(),
                            a.prefix,
                            d.name,
                            a.addr
                        ));
                    }
                }
                for r in self.routes.iter().filter(|r| r.netns.as_deref() == ns) {
                    let dest = if r.dest.prefix == 32 {
                        r.dest.addr.to_string()
                    } else {
                        r.dest.to_string()
                    };
                    out.push_str(&format!("{} dev {} scope link\n", dest, r.dev));
                }
                ExecOutput::ok(out)
            }
            Some(verb @ ("add" | "replace" | "del" | "delete")) => {
                let Some(dest) = rest.get(1).and_then(|t| parse_prefix_or_host(t)) else {
                    return failed(1, "Error: inet prefix is expected.");
                };
                let existing = self
                    .routes
                    .iter()
                    .position(|r| r.netns.as_deref() == ns && r.dest == dest);
                if verb == "del" || verb == "delete" {
                    return match existing {
                        Some(pos) => {
                            self.routes.remove(pos);
                            ExecOutput::ok("")
                        }
                        None => failed(2, "RTNETLINK answers: No such process"),
                    };
                }
                let Some(dev) = value_after(rest, "dev") else {
                    return failed(2, "Error: Device for nexthop is not up.");
                };
                if self.find(ns, dev).is_none() {
                    return no_device(dev);
                }
                match (verb, existing) {
                    ("add", Some(_)) => return exists(),
                    (_, Some(pos)) => {
                        self.routes.remove(pos);
                    }
                    (_, None) => {}
                }
                self.routes.push(Route {
                    netns: ns.map(str::to_string),
                    dest,
                    dev: dev.to_string(),
                });
                ExecOutput::ok("")
            }
            Some(other) => failed(
                255,
                format!("Command \"{other}\" is unknown, try \"ip route help\"."),
            ),
        }
    }

    fn ip_neigh(&mut self, ns: Option<&str>, rest: &[&str], fmt: Format) -> ExecOutput {
        match rest.first().copied() {
            None | Some("show") | Some("list") => {
                let entries: Vec<&NeighEntry> = self
                    .neighbors
                    .iter()
                    .filter(|n| n.netns.as_deref() == ns)
                    .collect();
                if fmt.json {
                    let records: Vec<Value> = entries
                        .iter()
                        .map(|n| {
                            json!({
                                "dst": n.dst.to_string(),
                                "dev": n.dev,
                                "lladdr": n.lladdr.to_string(),
                                "state": ["PERMANENT"],
                            })
                        })
                        .collect();
                    return ExecOutput::ok(render(Value::Array(records), fmt));
                }
                let mut out = String::new();
                for n in entries {
                    out.push_str(&format!("{} dev {} lladdr {} PERMANENT\n", n.dst, n.dev, n.lladdr));
                }
                ExecOutput::ok(out)
            }
            Some(verb @ ("add" | "replace" | "del" | "delete")) => {
                let Some(dst) = rest.get(1).and_then(|t| validate_ipv4(t).ok()) else {
                    return failed(1, "Error: inet address is expected.");
                };
                let Some(dev) = value_after(rest, "dev") else {
                    return failed(255, "Device and destination are required arguments.");
                };
                if self.find(ns, dev).is_none() {
                    return no_device(dev);
                }
                let existing = self.neighbors.iter().position(|n| {
                    n.netns.as_deref() == ns && n.dst == dst && n.dev == dev
                });
                if verb == "del" || verb == "delete" {
                    return match existing {
                        Some(pos) => {
                            self.neighbors.remove(pos);
                            ExecOutput::ok("")
                        }
                        None => failed(2, "RTNETLINK answers: No such file or directory"),
                    };
                }
                let Some(lladdr) = value_after(rest, "lladdr").and_then(|m| validate_mac(m).ok()) else {
                    return failed(1, "Error: lladdr is expected.");
                };
                match (verb, existing) {
                    ("add", Some(_)) => return exists(),
                    (_, Some(pos)) => {
                        self.neighbors.remove(pos);
                    }
                    (_, None) => {}
                }
                self.neighbors.push(NeighEntry {
                    netns: ns.map(str::to_string),
                    dst,
                    lladdr,
                    dev: dev.to_string(),
                });
                ExecOutput::ok("")
            }
            Some(other) => failed(
                255,
                format!("Command \"{other}\" is unknown, try \"ip neigh help\"."),
            ),
        }
    }

    // ── bridge ──────────────────────────────────────────────────────

    /// `bridge link [show]`. Each listing renders the current port states
    /// and then advances STP one step (listening, learning, forwarding).
    fn bridge(&mut self, ns: Option<&str>, args: &[&str]) -> ExecOutput {
        let words: Vec<&str> = args.iter().copied().filter(|a| !a.starts_with('-')).collect();
        match words.as_slice() {
            ["link"] | ["link", "show"] => {}
            _ => return failed(255, "Usage: bridge link show"),
        }

        let mut out = String::new();
        let mut advance = Vec::new();
        for d in self.in_ns(ns) {
            let Some(bridge) = d.master.and_then(|m| self.by_index(m)) else {
                continue;
            };
            let state = if bridge.up && d.up {
                advance.push(d.ifindex);
                d.port_state
            } else {
                BridgePortState::Disabled
            };
            out.push_str(&format!(
                "{}: {}: <{}> mtu 1500 master {} state {} priority 32 cost 2\n",
                d.ifindex,
                self.display_name(d),
                self.flags(d).join(","),
                bridge.name,
                state
            ));
        }
        for d in self.devices.iter_mut().filter(|d| advance.contains(&d.ifindex)) {
            d.port_state = match d.port_state {
                BridgePortState::Listening => BridgePortState::Learning,
                BridgePortState::Learning => BridgePortState::Forwarding,
                other => other,
            };
        }
        ExecOutput::ok(out)
    }

    // ── ping ────────────────────────────────────────────────────────

    fn ping(&self, ns: Option<&str>, args: &[&str]) -> ExecOutput {
        let count: u32 = value_after(args, "-c").and_then(|c| c.parse().ok()).unwrap_or(1);
        let Some(target) = args.last().copied() else {
            return failed(2, "ping: usage error: Destination address required");
        };
        let Ok(target) = validate_ipv4(target) else {
            return failed(2, format!("ping: {target}: Name or service not known"));
        };

        let reached = if self.is_local(ns, target) {
            true
        } else {
            let Some(out_dev) = self.route_lookup(ns, target) else {
                return failed(2, "ping: connect: Network is unreachable");
            };
            self.round_trip(out_dev, target)
        };

        let received = if reached { count } else { 0 };
        let mut out = format!("PING {target} ({target}) 56(84) bytes of data.\n");
        for seq in 1..=received {
            out.push_str(&format!("64 bytes from {target}: icmp_seq={seq} ttl=64 time=0.050 ms\n"));
        }
        let loss = if reached { 0 } else { 100 };
        out.push_str(&format!(
            "\n--- {target} ping statistics ---\n{count} packets transmitted, {received} received, {loss}% packet loss, time 0ms\n"
        ));
        if reached {
            out.push_str("rtt min/avg/max/mdev = 0.050/0.050/0.050/0.000 ms\n");
            ExecOutput::ok(out)
        } else {
            ExecOutput {
                success: false,
                code: Some(1),
                stdout: out,
                stderr: String::new(),
            }
        }
    }

    fn is_local(&self, ns: Option<&str>, target: Ipv4Addr) -> bool {
        self.in_ns(ns)
            .any(|d| d.up && d.addrs.iter().any(|a| a.addr == target))
    }

    /// Outgoing device for `target`: host routes first, then the longest
    /// connected prefix on an up device.
    fn route_lookup(&self, ns: Option<&str>, target: Ipv4Addr) -> Option<u32> {
        let mut best: Option<(u8, u32)> = None;
        let mut consider = |prefix: u8, ifindex: u32| {
            if best.is_none_or(|(p, _)| prefix > p) {
                best = Some((prefix, ifindex));
            }
        };
        for r in self.routes.iter().filter(|r| r.netns.as_deref() == ns) {
            if r.dest.contains(target) {
                if let Some(idx) = self.find(ns, &r.dev) {
                    let dev = &self.devices[idx];
                    if dev.up {
                        consider(r.dest.prefix, dev.ifindex);
                    }
                }
            }
        }
        for d in self.in_ns(ns).filter(|d| d.up && d.kind != DeviceKind::Loopback) {
            for a in d.addrs.iter().filter(|a| a.contains(target)) {
                consider(a.prefix, d.ifindex);
            }
        }
        best.map(|(_, ifindex)| ifindex)
    }

    /// Echo request from `out_dev` to `target` and the reply back to the
    /// sender's address on that device.
    fn round_trip(&self, out_dev: u32, target: Ipv4Addr) -> bool {
        let Some(src) = self.by_index(out_dev) else {
            return false;
        };
        let Some(src_addr) = src
            .addrs
            .first()
            .map(|a| a.addr)
            .or_else(|| self.first_address(src.netns.as_deref()))
        else {
            return false;
        };
        let Some(dst_dev) = self.l2_reach(out_dev, |d| d.up && d.addrs.iter().any(|a| a.addr == target))
        else {
            return false;
        };
        let Some(dst) = self.by_index(dst_dev) else {
            return false;
        };
        let Some(back) = self.route_lookup(dst.netns.as_deref(), src_addr) else {
            return false;
        };
        self.l2_reach(back, |d| d.ifindex == out_dev).is_some()
    }

    fn first_address(&self, ns: Option<&str>) -> Option<Ipv4Addr> {
        self.in_ns(ns)
            .filter(|d| d.kind != DeviceKind::Loopback)
            .flat_map(|d| d.addrs.iter())
            .map(|a| a.addr)
            .next()
    }

    /// Breadth-first search over veth wires and forwarding bridge ports,
    /// starting by transmitting out of `start`.
    fn l2_reach(&self, start: u32, found: impl Fn(&Device) -> bool) -> Option<u32> {
        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::from([start]);
        while let Some(tx) = queue.pop_front() {
            let Some(dev) = self.by_index(tx) else {
                continue;
            };
            let DeviceKind::Veth { peer } = dev.kind else {
                continue;
            };
            if !self.carrier(dev) {
                continue;
            }
            let Some(rx) = self.by_index(peer) else {
                continue;
            };
            if found(rx) {
                return Some(rx.ifindex);
            }
            let Some(bridge) = rx.master.and_then(|m| self.by_index(m)) else {
                continue;
            };
            if !bridge.up || rx.port_state != BridgePortState::Forwarding {
                continue;
            }
            for port in self.devices.iter().filter(|d| {
                d.master == Some(bridge.ifindex)
                    && d.ifindex != rx.ifindex
                    && d.up
                    && d.port_state == BridgePortState::Forwarding
            }) {
                if seen.insert(port.ifindex) {
                    queue.push_back(port.ifindex);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(kernel: &FakeKernel, ns: Option<&str>, line: &str) -> ExecOutput {
        let mut words = line.split_whitespace();
        let program = words.next().unwrap();
        let request = ExecRequest::new(ns, program, words);
        kernel.execute(&request).unwrap()
    }

    #[test]
    fn unique_names_fit_the_limit() {
        let a = unique_name("nsnet-it-", 15);
        let b = unique_name("nsnet-it-", 15);
        assert_ne!(a, b);
        assert!(a.len() <= 15);
    }

    #[test]
    fn veth_peers_share_fate() {
        let kernel = FakeKernel::new();
        assert!(run(&kernel, None, "ip link add v0 type veth peer name v1").success);
        assert!(!run(&kernel, None, "ip link add v0 type dummy").success);
        assert!(run(&kernel, None, "ip link del v1").success);
        let out = run(&kernel, None, "ip link show dev v0");
        assert!(out.stderr.contains("does not exist"));
    }

    #[test]
    fn moving_a_device_resets_it() {
        let kernel = FakeKernel::new();
        run(&kernel, None, "ip netns add a");
        run(&kernel, None, "ip link add v0 type dummy");
        run(&kernel, None, "ip link set v0 up");
        run(&kernel, None, "ip address add 10.1.0.1/24 dev v0");
        assert!(run(&kernel, None, "ip link set v0 netns a").success);
        let out = run(&kernel, Some("a"), "ip -j address show dev v0");
        assert!(out.stdout.contains("\"addr_info\":[]"));
        assert!(run(&kernel, None, "ip netns exec a ip link set dev v0 up").success);
        assert!(!run(&kernel, Some("zz"), "ip link").success);
    }

    #[test]
    fn stp_ports_step_towards_forwarding() {
        let kernel = FakeKernel::new();
        run(&kernel, None, "ip link add name br0 type bridge");
        run(&kernel, None, "ip link set dev br0 type bridge stp_state 1 forward_delay 400");
        run(&kernel, None, "ip link add p0 type veth peer name q0");
        run(&kernel, None, "ip link set dev p0 master br0");
        run(&kernel, None, "ip link set dev p0 up");
        run(&kernel, None, "ip link set dev br0 up");
        let states: Vec<String> = (0..4)
            .map(|_| run(&kernel, None, "bridge link show").stdout)
            .collect();
        assert!(states[0].contains("state listening"));
        assert!(states[1].contains("state learning"));
        assert!(states[2].contains("state forwarding"));
        assert!(states[3].contains("master br0"));
    }

    #[test]
    fn renaming_an_up_device_is_refused() {
        let kernel = FakeKernel::new();
        run(&kernel, None, "ip link add d0 type dummy");
        run(&kernel, None, "ip link set dev d0 up");
        let out = run(&kernel, None, "ip link set dev d0 name d1");
        assert!(out.stderr.contains("busy"));
        run(&kernel, None, "ip link set dev d0 down");
        assert!(run(&kernel, None, "ip link set dev d0 name d1").success);
    }

    #[test]
    fn unique_names_keep_prefix_within_limit() {
        let names: HashSet<String> = (0..50).map(|_| unique_name("u", 15)).collect();
        assert_eq!(names.len(), 50);
        assert!(names.iter().all(|n| n.starts_with('u') && n.len() <= 15));

        let short = unique_name("nt", 4);
        assert_eq!(short.len(), 4);
        assert!(short.starts_with("nt"));
        assert_eq!(unique_name("abcdefghijklmnop", 15), "abcdefghijklmno");
    }

    #[test]
    fn privilege_check_namespaces_are_distinct() {
        let (a, b) = (privilege_check_name(), privilege_check_name());
        assert_ne!(a, b);
        for name in [&a, &b] {
            assert!(name.starts_with("nsnet-chk"));
            assert!(name.len() <= 15);
        }
    }

    #[test]
    fn failures_and_history_are_recorded() {
        let kernel = FakeKernel::new();
        kernel.fail_matching("netns add bad");
        assert!(!run(&kernel, None, "ip netns add bad").success);
        kernel.clear_failures();
        assert!(run(&kernel, None, "ip netns add bad").success);
        assert_eq!(kernel.history().len(), 2);
        assert_eq!(kernel.namespaces(), ["bad"]);
        assert!(kernel
            .execute(&ExecRequest::new(None, "tc", ["qdisc"]))
            .is_err());
    }
}
