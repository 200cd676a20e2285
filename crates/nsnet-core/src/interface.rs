//! One link endpoint inside a node's namespace.
//!
//! Address, MAC and up/down state are cached snapshots of kernel truth. They
//! match the kernel right after a synchronization or a mutation made through
//! this type; anything done behind its back (raw `Node::cmd`) is only seen
//! after an explicit [`Refresh::Sync`] or `synchronize_*` call.
//!
//! Each interface serializes its own operations: the state lock is held for
//! the whole of every mutation and synchronization, kernel commands included.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::addr::{parse_cidr, validate_ip_with_prefix, validate_mac, Ipv4Cidr, MacAddr};
use crate::config::{self, Batch, BatchOutput, ConfigCommand, Invocation};
use crate::context::NodeContext;
use crate::error::{NetError, Result};
use crate::iproute;
use crate::link::Link;
use crate::netns;

/// Whether an accessor trusts the cache or re-queries the kernel first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refresh {
    #[default]
    Cached,
    Sync,
}

/// Point-in-time copy of the cached fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSnapshot {
    pub name: String,
    pub ip: Option<Ipv4Cidr>,
    pub mac: MacAddr,
    pub is_up: bool,
}

#[derive(Debug)]
struct IntfState {
    name: String,
    ip: Option<Ipv4Cidr>,
    mac: MacAddr,
    is_up: bool,
}

pub struct Interface {
    ctx: Arc<NodeContext>,
    port: u32,
    state: Mutex<IntfState>,
    link: Mutex<Weak<Link>>,
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("node", &self.ctx.name())
            .field("port", &self.port)
            .field("state", &*self.lock())
            .finish()
    }
}

impl Interface {
    /// Bind to an existing device in the node's namespace and load its
    /// current state from the kernel.
    pub fn attach(ctx: Arc<NodeContext>, name: &str, port: u32) -> Result<Arc<Interface>> {
        let intf = Interface {
            ctx,
            port,
            state: Mutex::new(IntfState {
                name: name.to_string(),
                ip: None,
                mac: MacAddr::ZERO,
                is_up: false,
            }),
            link: Mutex::new(Weak::new()),
        };
        {
            let mut st = intf.lock();
            intf.sync_all_locked(&mut st)?;
        }
        Ok(Arc::new(intf))
    }

    fn lock(&self) -> MutexGuard<'_, IntfState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn node_name(&self) -> &str {
        self.ctx.name()
    }

    pub fn port(&self) -> u32 {
        self.port
    }

    pub(crate) fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// The link this interface terminates, if it is still alive.
    pub fn link(&self) -> Option<Arc<Link>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner()).upgrade()
    }

    pub(crate) fn set_link(&self, link: Weak<Link>) {
        *self.link.lock().unwrap_or_else(|e| e.into_inner()) = link;
    }

    pub fn snapshot(&self) -> InterfaceSnapshot {
        let st = self.lock();
        InterfaceSnapshot {
            name: st.name.clone(),
            ip: st.ip,
            mac: st.mac,
            is_up: st.is_up,
        }
    }

    // ── Cached accessors ────────────────────────────────────────────

    pub fn ip_address(&self, refresh: Refresh) -> Result<Option<Ipv4Addr>> {
        Ok(self.cidr(refresh)?.map(|c| c.addr))
    }

    pub fn prefix_len(&self, refresh: Refresh) -> Result<Option<u8>> {
        Ok(self.cidr(refresh)?.map(|c| c.prefix))
    }

    pub fn cidr(&self, refresh: Refresh) -> Result<Option<Ipv4Cidr>> {
        let mut st = self.lock();
        if refresh == Refresh::Sync {
            self.sync_address_locked(&mut st)?;
        }
        Ok(st.ip)
    }

    pub fn mac_address(&self, refresh: Refresh) -> Result<MacAddr> {
        let mut st = self.lock();
        if refresh == Refresh::Sync {
            self.sync_link_locked(&mut st)?;
        }
        Ok(st.mac)
    }

    pub fn is_up(&self, refresh: Refresh) -> Result<bool> {
        let mut st = self.lock();
        if refresh == Refresh::Sync {
            self.sync_link_locked(&mut st)?;
        }
        Ok(st.is_up)
    }

    // ── Synchronization ─────────────────────────────────────────────

    pub fn synchronize_address(&self) -> Result<Option<Ipv4Cidr>> {
        let mut st = self.lock();
        self.sync_address_locked(&mut st)?;
        Ok(st.ip)
    }

    pub fn synchronize_mac(&self) -> Result<MacAddr> {
        let mut st = self.lock();
        self.sync_link_locked(&mut st)?;
        Ok(st.mac)
    }

    pub fn synchronize_all(&self) -> Result<InterfaceSnapshot> {
        let mut st = self.lock();
        self.sync_all_locked(&mut st)?;
        Ok(InterfaceSnapshot {
            name: st.name.clone(),
            ip: st.ip,
            mac: st.mac,
            is_up: st.is_up,
        })
    }

    fn sync_all_locked(&self, st: &mut IntfState) -> Result<()> {
        self.sync_link_locked(st)?;
        self.sync_address_locked(st)
    }

    fn sync_address_locked(&self, st: &mut IntfState) -> Result<()> {
        st.ip = self.kernel_addresses(&st.name)?.first().copied();
        Ok(())
    }

    /// Every IPv4 address the kernel holds on `name`, primary first.
    fn kernel_addresses(&self, name: &str) -> Result<Vec<Ipv4Cidr>> {
        let raw = self
            .ctx
            .run_args(Some(name), "ip", &["-j", "address", "show", "dev", name])?;
        iproute::parse_inet_addresses(&raw).map_err(|e| e.on_node(self.ctx.name(), Some(name)))
    }

    /// Refresh MAC and up/down state from one brief link query.
    fn sync_link_locked(&self, st: &mut IntfState) -> Result<()> {
        let record = self.query_link(&st.name)?;
        st.mac = iproute::parse_link_mac(&record)?;
        st.is_up = record.is_up();
        Ok(())
    }

    fn sync_state_locked(&self, st: &mut IntfState) -> Result<()> {
        st.is_up = self.query_link(&st.name)?.is_up();
        Ok(())
    }

    fn query_link(&self, name: &str) -> Result<iproute::LinkRecord> {
        let raw = self
            .ctx
            .run_args(Some(name), "ip", &["-br", "-j", "link", "show", "dev", name])?;
        iproute::parse_link(&raw).map_err(|e| e.on_node(self.ctx.name(), Some(name)))
    }

    // ── Address ─────────────────────────────────────────────────────

    /// Validate and install `ip/prefix`, replacing the current address.
    ///
    /// `0.0.0.0` clears the address instead.
    pub fn set_address(&self, ip: &str, prefix: &str) -> Result<()> {
        let cidr = validate_ip_with_prefix(ip, prefix)?;
        self.set_cidr(cidr)
    }

    /// Same as [`set_address`](Self::set_address) for the `a.b.c.d/n` form.
    pub fn set_address_cidr(&self, cidr: &str) -> Result<()> {
        let cidr = parse_cidr(cidr)?;
        self.set_cidr(cidr)
    }

    /// Install `cidr` as the only address on the interface.
    ///
    /// The kernel is consulted under the lock first, so addresses added
    /// behind the cache's back are replaced too.
    pub fn set_cidr(&self, cidr: Ipv4Cidr) -> Result<()> {
        let mut st = self.lock();
        if cidr.is_unspecified() {
            return self.clear_locked(&mut st);
        }

        let name = st.name.clone();
        let current = self.kernel_addresses(&name)?;
        let operation = format!("set address {cidr} on {name}");
        let mut completed = Vec::new();
        for old in current.iter().filter(|old| **old != cidr) {
            if let Err(err) = self.del_address(&name, old) {
                return Err(self.partial(&mut st, operation, completed, format!("del {old}"), err));
            }
            completed.push(format!("del {old}"));
        }
        if current.contains(&cidr) {
            st.ip = Some(cidr);
            return Ok(());
        }

        let added = self.ctx.run_args(
            Some(&name),
            "ip",
            &["address", "add", &cidr.to_string(), "dev", &name],
        );
        match added {
            Ok(_) => {
                st.ip = Some(cidr);
                tracing::debug!(node = %self.ctx.name(), intf = %name, addr = %cidr, "address set");
                Ok(())
            }
            Err(err) => Err(self.partial(&mut st, operation, completed, format!("add {cidr}"), err)),
        }
    }

    /// Remove every address; both cached halves become absent.
    pub fn clear_address(&self) -> Result<()> {
        let mut st = self.lock();
        self.clear_locked(&mut st)
    }

    fn clear_locked(&self, st: &mut IntfState) -> Result<()> {
        let name = st.name.clone();
        let operation = format!("clear addresses on {name}");
        let mut completed = Vec::new();
        for old in self.kernel_addresses(&name)? {
            if let Err(err) = self.del_address(&name, &old) {
                return Err(self.partial(st, operation, completed, format!("del {old}"), err));
            }
            completed.push(format!("del {old}"));
        }
        st.ip = None;
        Ok(())
    }

    fn del_address(&self, name: &str, cidr: &Ipv4Cidr) -> Result<String> {
        self.ctx
            .run_args(Some(name), "ip", &["address", "del", &cidr.to_string(), "dev", name])
    }

    /// Wrap a failed address step. The cache is reloaded so it reflects
    /// whatever the completed steps left in the kernel.
    fn partial(
        &self,
        st: &mut IntfState,
        operation: String,
        completed: Vec<String>,
        failed: String,
        err: NetError,
    ) -> NetError {
        if completed.is_empty() {
            return err;
        }
        if let Err(resync) = self.sync_address_locked(st) {
            tracing::warn!(node = %self.ctx.name(), intf = %st.name, error = %resync, "address resync failed");
            st.ip = None;
        }
        NetError::PartialApplication {
            operation,
            completed,
            failed,
            source: Box::new(err),
        }
    }

    // ── Link layer ──────────────────────────────────────────────────

    /// Validate and install a new MAC: link down, set address, link up.
    ///
    /// A failure after the link went down leaves it down and is reported as
    /// [`NetError::PartialApplication`]; the cache holds whichever MAC the
    /// kernel has at that point.
    pub fn set_mac(&self, mac: &str) -> Result<()> {
        let mac = validate_mac(mac)?;
        let mut st = self.lock();
        let name = st.name.clone();
        let operation = format!("set MAC {mac} on {name}");

        self.ctx
            .run_args(Some(&name), "ip", &["link", "set", "dev", &name, "down"])?;
        st.is_up = false;

        if let Err(err) = self.ctx.run_args(
            Some(&name),
            "ip",
            &["link", "set", "dev", &name, "address", &mac.to_string()],
        ) {
            return Err(NetError::PartialApplication {
                operation,
                completed: vec!["link down".into()],
                failed: "set address".into(),
                source: Box::new(err),
            });
        }
        st.mac = mac;

        let up = self
            .ctx
            .run_args(Some(&name), "ip", &["link", "set", "dev", &name, "up"])
            .and_then(|_| self.sync_state_locked(&mut st));
        match up {
            Ok(()) if st.is_up => {
                tracing::debug!(node = %self.ctx.name(), intf = %name, %mac, "MAC set");
                Ok(())
            }
            Ok(()) => Err(NetError::PartialApplication {
                operation,
                completed: vec!["link down".into(), "set address".into()],
                failed: "link up".into(),
                source: Box::new(NetError::Command {
                    node: self.ctx.name().to_string(),
                    intf: Some(name.clone()),
                    command: format!("ip link set dev {name} up"),
                    detail: "interface still reports down".into(),
                }),
            }),
            Err(err) => Err(NetError::PartialApplication {
                operation,
                completed: vec!["link down".into(), "set address".into()],
                failed: "link up".into(),
                source: Box::new(err),
            }),
        }
    }

    /// Toggle the link-layer state; returns the state observed afterwards.
    pub fn set_up(&self, up: bool) -> Result<bool> {
        let mut st = self.lock();
        let name = st.name.clone();
        let state = if up { "up" } else { "down" };
        self.ctx
            .run_args(Some(&name), "ip", &["link", "set", "dev", &name, state])?;
        self.sync_state_locked(&mut st)?;
        Ok(st.is_up)
    }

    /// Rename the kernel device. Fails without touching either device when
    /// `new_name` already exists in the namespace.
    pub fn rename(&self, new_name: &str) -> Result<()> {
        let mut st = self.lock();
        let old = st.name.clone();
        if old == new_name {
            return Ok(());
        }
        if netns::device_exists(&self.ctx, new_name)? {
            return Err(NetError::DeviceExists {
                node: self.ctx.name().to_string(),
                name: new_name.to_string(),
            });
        }

        self.sync_state_locked(&mut st)?;
        let was_up = st.is_up;
        let mut completed = Vec::new();
        if was_up {
            self.ctx
                .run_args(Some(&old), "ip", &["link", "set", "dev", &old, "down"])?;
            st.is_up = false;
            completed.push("link down".to_string());
        }

        if let Err(err) = self.ctx.run_args(
            Some(&old),
            "ip",
            &["link", "set", "dev", &old, "name", new_name],
        ) {
            if completed.is_empty() {
                return Err(err);
            }
            return Err(NetError::PartialApplication {
                operation: format!("rename {old} to {new_name}"),
                completed,
                failed: "set name".into(),
                source: Box::new(err),
            });
        }
        st.name = new_name.to_string();
        completed.push("set name".into());

        if was_up {
            let up = self
                .ctx
                .run_args(Some(new_name), "ip", &["link", "set", "dev", new_name, "up"])
                .and_then(|_| self.sync_state_locked(&mut st));
            if let Err(err) = up {
                return Err(NetError::PartialApplication {
                    operation: format!("rename {old} to {new_name}"),
                    completed,
                    failed: "link up".into(),
                    source: Box::new(err),
                });
            }
        }
        tracing::info!(node = %self.ctx.name(), from = %old, to = %new_name, "interface renamed");
        Ok(())
    }

    // ── Generic command surface ─────────────────────────────────────

    /// Read-only `ip link` passthrough.
    pub fn show_link(&self, invocation: &Invocation) -> Result<String> {
        self.show(ConfigCommand::IpLink, invocation)
    }

    /// Read-only `ip address` passthrough.
    pub fn show_address(&self, invocation: &Invocation) -> Result<String> {
        self.show(ConfigCommand::IpAddress, invocation)
    }

    fn show(&self, command: ConfigCommand, invocation: &Invocation) -> Result<String> {
        let st = self.lock();
        self.check_owned(&st, invocation)?;
        if invocation.is_mutation() {
            return Err(NetError::Command {
                node: self.ctx.name().to_string(),
                intf: Some(st.name.clone()),
                command: invocation.argv(command).join(" "),
                detail: "show passthrough refuses mutations; use apply_config".into(),
            });
        }
        config::run(&self.ctx, Some(&st.name), command, invocation)
    }

    /// Run one invocation per command; outputs are keyed by command name.
    pub fn apply_config(&self, groups: &[(ConfigCommand, Invocation)]) -> Result<BatchOutput> {
        let mut result = BatchOutput::default();
        for (command, invocation) in groups {
            let batch = Batch::new().with(command.as_str(), invocation.clone());
            self.apply_named_command(&mut result, *command, &batch)?;
        }
        Ok(result)
    }

    /// Run a labeled batch against one command, merging outputs into `result`.
    ///
    /// Mutations are followed by a resynchronization of the fields they can
    /// affect, so the cache keeps its invariants on this path too.
    pub fn apply_named_command(
        &self,
        result: &mut BatchOutput,
        command: ConfigCommand,
        batch: &Batch,
    ) -> Result<()> {
        let mut st = self.lock();
        for (_, invocation) in batch.iter() {
            self.check_owned(&st, invocation)?;
        }

        let mutates = batch.iter().any(|(_, inv)| inv.is_mutation());
        let renamed_to = batch.iter().find_map(|(_, inv)| renamed_to(inv));
        let outcome = config::run_batch(&self.ctx, Some(&st.name), command, batch);

        // A refused rename leaves the target untouched, and the target may
        // already be some other device.
        if let Some(new_name) = renamed_to {
            if !netns::device_exists(&self.ctx, &st.name)?
                && netns::device_exists(&self.ctx, &new_name)?
            {
                st.name = new_name;
            }
        }
        if mutates {
            self.resync_after(&mut st, command)?;
        }

        result.extend(outcome?);
        Ok(())
    }

    fn resync_after(&self, st: &mut IntfState, command: ConfigCommand) -> Result<()> {
        match command {
            ConfigCommand::IpAddress => self.sync_address_locked(st),
            ConfigCommand::IpLink => {
                // A MAC change becomes visible once the link is up again.
                let record = self.query_link(&st.name)?;
                st.is_up = record.is_up();
                if st.is_up {
                    st.mac = iproute::parse_link_mac(&record)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_owned(&self, st: &IntfState, invocation: &Invocation) -> Result<()> {
        match invocation.devices().into_iter().find(|dev| *dev != st.name) {
            Some(other) => Err(NetError::NoSuchInterface {
                node: self.ctx.name().to_string(),
                intf: format!("{other} (requested through {})", st.name),
            }),
            None => Ok(()),
        }
    }
}

fn renamed_to(invocation: &Invocation) -> Option<String> {
    if invocation.verb() != Some("set") {
        return None;
    }
    invocation
        .args()
        .windows(2)
        .find(|w| w[0] == "name")
        .map(|w| w[1].clone())
}
