//! Virtual network topologies over Linux network namespaces.
//!
//! Hosts and switches each get their own namespace, links are veth pairs
//! and switches are Linux bridges, optionally running STP. Every kernel
//! interaction is an `ip`/`bridge`/`ping` invocation through a
//! [`CommandExecutor`], so the engine runs unchanged against the in-memory
//! [`test_util::FakeKernel`].
//!
//! ```no_run
//! use nsnet_core::{Network, NetSettings, SystemExecutor, TopoSpec};
//! use std::sync::Arc;
//!
//! let topo = TopoSpec::ring(3, 2)?;
//! let executor = Arc::new(SystemExecutor::new(false));
//! let mut net = Network::from_topo(NetSettings::default(), executor, &topo)?;
//! net.start()?;
//! net.wait_connected()?;
//! let report = net.ping_all()?;
//! println!("{:.0}% dropped", report.dropped_percent());
//! net.stop()?;
//! # Ok::<(), nsnet_core::NetError>(())
//! ```

pub mod addr;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod interface;
pub mod iproute;
pub mod link;
pub mod netns;
pub mod network;
pub mod node;
pub mod ping;
pub mod settings;
pub mod topology;

pub mod test_util;

pub use addr::{validate_ip_with_prefix, validate_mac, Ipv4Cidr, MacAddr};
pub use config::{Batch, BatchOutput, ConfigCommand, Invocation};
pub use error::{NetError, Result};
pub use exec::{CommandExecutor, ExecOutput, ExecRequest, SystemExecutor};
pub use interface::{Interface, Refresh};
pub use link::Link;
pub use network::{LinkStatus, Network};
pub use node::{Node, NodeKind, SwitchOptions};
pub use ping::{PingReport, PingStats};
pub use settings::{NetConfig, NetSettings};
pub use topology::TopoSpec;
