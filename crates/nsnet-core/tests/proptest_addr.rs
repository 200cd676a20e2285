//! Property-based tests for address validation and the interface cache.
//!
//! Interfaces run against the in-memory kernel, so every case builds a
//! fresh two-host network without touching the machine.

use nsnet_core::addr::AddressPool;
use nsnet_core::test_util::FakeKernel;
use nsnet_core::{
    validate_ip_with_prefix, validate_mac, Interface, Ipv4Cidr, NetError, NetSettings, Network,
    Refresh,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

fn two_hosts() -> (Network, Arc<Interface>) {
    let kernel = FakeKernel::new();
    let settings = NetSettings {
        netns_prefix: "pt-".into(),
        ..NetSettings::default()
    };
    let mut net = Network::new(settings, kernel.executor());
    net.add_host_with_ip("h1", "10.0.0.1/8").unwrap();
    net.add_host_with_ip("h2", "10.0.0.2/8").unwrap();
    net.add_link("h1", "h2").unwrap();
    net.start().unwrap();
    let intf = net.node("h1").unwrap().default_interface().unwrap();
    (net, intf)
}

// ─── Strategies ─────────────────────────────────────────────────────────────

fn octet() -> impl Strategy<Value = u8> {
    any::<u8>()
}

/// Addresses with at least one octet out of range, a wrong group count,
/// an empty group or non-numeric content.
fn malformed_ip() -> impl Strategy<Value = String> {
    prop_oneof![
        (256u32..100_000, octet(), octet(), octet())
            .prop_map(|(a, b, c, d)| format!("{a}.{b}.{c}.{d}")),
        (octet(), octet(), octet()).prop_map(|(a, b, c)| format!("{a}.{b}.{c}")),
        (octet(), octet(), octet(), octet(), octet())
            .prop_map(|(a, b, c, d, e)| format!("{a}.{b}.{c}.{d}.{e}")),
        (octet(), octet(), octet()).prop_map(|(a, b, c)| format!("{a}..{b}.{c}")),
        "[a-z]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
        Just(String::new()),
    ]
}

fn malformed_prefix() -> impl Strategy<Value = String> {
    prop_oneof![
        (33u32..1000).prop_map(|p| p.to_string()),
        (1u32..32).prop_map(|p| format!("-{p}")),
        "[a-z]{1,2}",
        Just(String::new()),
    ]
}

/// A first octet whose low bit is set, i.e. an odd second hex digit.
fn multicast_mac() -> impl Strategy<Value = String> {
    (any::<u8>(), any::<[u8; 5]>()).prop_map(|(first, rest)| {
        let mut s = format!("{:02x}", first | 0x01);
        for b in rest {
            s.push_str(&format!(":{b:02x}"));
        }
        s
    })
}

fn unicast_mac() -> impl Strategy<Value = String> {
    (any::<u8>(), any::<[u8; 5]>())
        .prop_filter("not all-zero", |(first, rest)| {
            first & 0xfe != 0 || rest.iter().any(|b| *b != 0)
        })
        .prop_map(|(first, rest)| {
            let mut s = format!("{:02x}", first & 0xfe);
            for b in rest {
                s.push_str(&format!(":{b:02x}"));
            }
            s
        })
}

// ─── Properties ─────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn set_address_then_sync_returns_same_pair(
        a in 1u8..=223, b in octet(), c in octet(), d in 1u8..255, prefix in 1u8..=32
    ) {
        let (_net, intf) = two_hosts();
        let ip = format!("{a}.{b}.{c}.{d}");
        intf.set_address(&ip, &prefix.to_string()).unwrap();
        let synced = intf.synchronize_address().unwrap().unwrap();
        prop_assert_eq!(synced.addr.to_string(), ip);
        prop_assert_eq!(synced.prefix, prefix);
    }

    #[test]
    fn malformed_ip_is_rejected_without_side_effects(ip in malformed_ip()) {
        let (_net, intf) = two_hosts();
        let err = intf.set_address(&ip, "24").unwrap_err();
        let rejected = matches!(err, NetError::InvalidAddress { .. });
        prop_assert!(rejected, "unexpected error: {:?}", err);
        prop_assert_eq!(intf.cidr(Refresh::Cached).unwrap().unwrap().to_string(), "10.0.0.1/8");
        prop_assert_eq!(intf.cidr(Refresh::Sync).unwrap().unwrap().to_string(), "10.0.0.1/8");
    }

    #[test]
    fn malformed_prefix_is_rejected(prefix in malformed_prefix()) {
        prop_assert!(validate_ip_with_prefix("10.0.0.1", &prefix).is_err());
    }

    #[test]
    fn multicast_macs_are_rejected_and_previous_kept(mac in multicast_mac()) {
        let (_net, intf) = two_hosts();
        let before = intf.mac_address(Refresh::Sync).unwrap();
        let err = intf.set_mac(&mac).unwrap_err();
        let rejected = matches!(err, NetError::InvalidMac { .. });
        prop_assert!(rejected, "unexpected error: {:?}", err);
        prop_assert_eq!(intf.mac_address(Refresh::Cached).unwrap(), before);
        prop_assert_eq!(intf.mac_address(Refresh::Sync).unwrap(), before);
    }

    #[test]
    fn unicast_macs_are_accepted_and_normalized(mac in unicast_mac()) {
        let parsed = validate_mac(&mac.to_uppercase()).unwrap();
        prop_assert_eq!(parsed.to_string(), mac);
    }

    #[test]
    fn truncated_or_padded_macs_are_rejected(mac in unicast_mac(), extra in "[0-9a-f]{1,2}") {
        let short: String = mac.rsplit_once(':').unwrap().0.to_string();
        prop_assert!(validate_mac(&short).is_err());
        let long = format!("{mac}:{extra}");
        prop_assert!(validate_mac(&long).is_err());
        let garbage = format!("{mac}{extra}");
        prop_assert!(validate_mac(&garbage).is_err());
    }

    #[test]
    fn pool_allocations_are_distinct_and_inside_base(
        a in octet(), b in octet(), prefix in 20u8..=30, take in 1usize..64
    ) {
        let base = Ipv4Cidr::new(Ipv4Addr::new(10, a, b, 0), prefix).unwrap();
        let mut pool = AddressPool::new(base);
        let mut seen = HashSet::new();
        for _ in 0..take {
            let Some(next) = pool.allocate() else { break };
            prop_assert!(base.contains(next.addr));
            prop_assert_eq!(next.prefix, prefix);
            prop_assert!(seen.insert(next.addr));
        }
    }
}
