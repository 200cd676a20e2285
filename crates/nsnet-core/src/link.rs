use std::sync::Arc;

use crate::error::{NetError, Result};
use crate::interface::Interface;
use crate::netns;

/// A veth cable between interfaces on two distinct nodes.
///
/// The link shares its endpoints with their nodes; endpoints only keep a
/// weak reference back. Deleting either end of the veth pair removes both.
#[derive(Debug)]
pub struct Link {
    intf1: Arc<Interface>,
    intf2: Arc<Interface>,
}

impl Link {
    pub fn connect(intf1: Arc<Interface>, intf2: Arc<Interface>) -> Result<Arc<Link>> {
        if intf1.node_name() == intf2.node_name() {
            return Err(NetError::InvalidTopology(format!(
                "link endpoints {} and {} are on the same node {}",
                intf1.name(),
                intf2.name(),
                intf1.node_name()
            )));
        }
        let link = Arc::new(Link { intf1, intf2 });
        link.intf1.set_link(Arc::downgrade(&link));
        link.intf2.set_link(Arc::downgrade(&link));
        Ok(link)
    }

    pub fn intf1(&self) -> &Arc<Interface> {
        &self.intf1
    }

    pub fn intf2(&self) -> &Arc<Interface> {
        &self.intf2
    }

    pub fn endpoints(&self) -> [&Arc<Interface>; 2] {
        [&self.intf1, &self.intf2]
    }

    /// True when this link joins the two named nodes, in either order.
    pub fn connects(&self, a: &str, b: &str) -> bool {
        let (n1, n2) = (self.intf1.node_name(), self.intf2.node_name());
        (n1 == a && n2 == b) || (n1 == b && n2 == a)
    }

    /// The endpoint on `node`, if this link touches it.
    pub fn endpoint_on(&self, node: &str) -> Option<&Arc<Interface>> {
        self.endpoints().into_iter().find(|i| i.node_name() == node)
    }

    /// The endpoint opposite `intf`.
    pub fn peer_of(&self, intf: &Interface) -> Option<&Arc<Interface>> {
        if std::ptr::eq(Arc::as_ptr(&self.intf1), intf) {
            Some(&self.intf2)
        } else if std::ptr::eq(Arc::as_ptr(&self.intf2), intf) {
            Some(&self.intf1)
        } else {
            None
        }
    }

    /// Remove the veth pair from the kernel.
    pub fn delete(&self) -> Result<()> {
        netns::delete_link(self.intf1.context(), &self.intf1.name())
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.intf1.name(), self.intf2.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeContext;
    use crate::test_util::FakeKernel;

    #[test]
    fn endpoints_point_back_weakly() {
        let kernel = FakeKernel::new();
        let root = NodeContext::root(kernel.executor());
        netns::create_namespace(&root, "ns-a").unwrap();
        netns::create_namespace(&root, "ns-b").unwrap();
        netns::create_veth_pair(&root, "a-eth0", "b-eth1").unwrap();
        netns::move_to_namespace(&root, "a-eth0", "ns-a").unwrap();
        netns::move_to_namespace(&root, "b-eth1", "ns-b").unwrap();

        let a = NodeContext::new("a", Some("ns-a".into()), kernel.executor());
        let b = NodeContext::new("b", Some("ns-b".into()), kernel.executor());
        let ia = Interface::attach(a, "a-eth0", 0).unwrap();
        let ib = Interface::attach(b, "b-eth1", 1).unwrap();

        let link = Link::connect(ia.clone(), ib.clone()).unwrap();
        assert!(link.connects("b", "a"));
        assert_eq!(link.to_string(), "a-eth0<->b-eth1");
        assert!(Arc::ptr_eq(link.peer_of(&ia).unwrap(), &ib));
        assert!(Arc::ptr_eq(&ia.link().unwrap(), &link));
        assert_eq!(link.endpoint_on("b").unwrap().name(), "b-eth1");

        link.delete().unwrap();
        drop(link);
        assert!(ia.link().is_none());
        assert!(ib.synchronize_all().is_err());
    }

    #[test]
    fn refuses_self_links() {
        let kernel = FakeKernel::new();
        let root = NodeContext::root(kernel.executor());
        root.run_args(None, "ip", &["link", "add", "x0", "type", "veth", "peer", "name", "x1"])
            .unwrap();
        let ctx = NodeContext::root(kernel.executor());
        let i0 = Interface::attach(ctx.clone(), "x0", 0).unwrap();
        let i1 = Interface::attach(ctx, "x1", 1).unwrap();
        assert!(matches!(
            Link::connect(i0, i1),
            Err(NetError::InvalidTopology(_))
        ));
    }
}
