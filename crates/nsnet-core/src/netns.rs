//! Kernel object primitives: namespaces, veth pairs and device removal.
//!
//! All of these run in the root namespace through a root [`NodeContext`].
//! Creation deletes same-named leftovers first so a crashed previous run
//! does not make the next one fail.

use crate::context::NodeContext;
use crate::error::Result;

/// Create a network namespace and bring its loopback up.
pub fn create_namespace(root: &NodeContext, name: &str) -> Result<()> {
    // cleanup any existing namespace with the same name
    let _ = root.run_raw("ip", &args(&["netns", "del", name]));

    root.run_args(None, "ip", &["netns", "add", name])?;
    root.run_args(None, "ip", &["netns", "exec", name, "ip", "link", "set", "lo", "up"])?;
    tracing::debug!(netns = %name, "namespace created");
    Ok(())
}

pub fn delete_namespace(root: &NodeContext, name: &str) -> Result<()> {
    root.run_args(None, "ip", &["netns", "del", name])?;
    tracing::debug!(netns = %name, "namespace deleted");
    Ok(())
}

/// Create a veth pair in the root namespace.
pub fn create_veth_pair(root: &NodeContext, local: &str, peer: &str) -> Result<()> {
    // Clean up potential leftovers in host
    let _ = root.run_raw("ip", &args(&["link", "del", local]));

    root.run_args(
        Some(local),
        "ip",
        &["link", "add", local, "type", "veth", "peer", "name", peer],
    )?;
    Ok(())
}

/// Move a root-namespace device into `netns`.
pub fn move_to_namespace(root: &NodeContext, dev: &str, netns: &str) -> Result<()> {
    root.run_args(Some(dev), "ip", &["link", "set", dev, "netns", netns])?;
    Ok(())
}

/// Delete a device from the namespace `ctx` runs in. Deleting one end of a
/// veth pair removes the peer as well.
pub fn delete_link(ctx: &NodeContext, dev: &str) -> Result<()> {
    ctx.run_args(Some(dev), "ip", &["link", "del", dev])?;
    Ok(())
}

/// True when `dev` exists in the namespace `ctx` runs in.
pub fn device_exists(ctx: &NodeContext, dev: &str) -> Result<bool> {
    let output = ctx.run_raw("ip", &args(&["link", "show", "dev", dev]))?;
    Ok(output.success)
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FakeKernel;

    #[test]
    fn veth_pair_moves_into_namespaces() {
        let kernel = FakeKernel::new();
        let root = NodeContext::root(kernel.executor());
        create_namespace(&root, "ns-a").unwrap();
        create_namespace(&root, "ns-b").unwrap();
        create_veth_pair(&root, "a-eth0", "b-eth0").unwrap();
        move_to_namespace(&root, "a-eth0", "ns-a").unwrap();
        move_to_namespace(&root, "b-eth0", "ns-b").unwrap();

        assert!(!device_exists(&root, "a-eth0").unwrap());
        let a = NodeContext::new("a", Some("ns-a".into()), kernel.executor());
        let b = NodeContext::new("b", Some("ns-b".into()), kernel.executor());
        assert!(device_exists(&a, "a-eth0").unwrap());
        assert!(device_exists(&b, "b-eth0").unwrap());

        delete_link(&a, "a-eth0").unwrap();
        assert!(!device_exists(&b, "b-eth0").unwrap());
    }

    #[test]
    fn create_namespace_replaces_leftover() {
        let kernel = FakeKernel::new();
        let root = NodeContext::root(kernel.executor());
        create_namespace(&root, "ns-a").unwrap();
        create_namespace(&root, "ns-a").unwrap();
        delete_namespace(&root, "ns-a").unwrap();
        assert!(delete_namespace(&root, "ns-a").is_err());
    }
}
