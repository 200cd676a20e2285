//! Connectivity probes between hosts.
//!
//! Probes are `ping` runs inside the source host's namespace; loss and
//! latency come from the tool's summary lines.

use std::net::Ipv4Addr;

use crate::error::{NetError, Result};
use crate::interface::Refresh;
use crate::network::Network;
use crate::node::Node;
use crate::settings::NetSettings;

/// Counts and round-trip times of one probe run, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PingStats {
    pub sent: u32,
    pub received: u32,
    pub rtt_min: f64,
    pub rtt_avg: f64,
    pub rtt_max: f64,
    pub rtt_mdev: f64,
}

impl PingStats {
    pub fn lost(&self) -> u32 {
        self.sent.saturating_sub(self.received)
    }
}

/// Parse the output of `ping -c N`.
///
/// Output without a `packets transmitted` summary means the tool gave up
/// before sending (`connect: Network is unreachable` and the like), which
/// counts as one probe sent and lost.
pub fn parse_ping(output: &str) -> PingStats {
    let Some((sent, received)) = parse_counts(output) else {
        return PingStats {
            sent: 1,
            ..PingStats::default()
        };
    };
    let mut stats = PingStats {
        sent,
        received,
        ..PingStats::default()
    };
    if let Some([min, avg, max, mdev]) = parse_rtt(output) {
        stats.rtt_min = min;
        stats.rtt_avg = avg;
        stats.rtt_max = max;
        stats.rtt_mdev = mdev;
    }
    stats
}

fn parse_counts(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().find(|l| l.contains("packets transmitted"))?;
    let mut parts = line.split(',');
    let sent = leading_number(parts.next()?)?;
    let received = leading_number(parts.next()?)?;
    Some((sent, received))
}

fn leading_number(part: &str) -> Option<u32> {
    part.split_whitespace().next()?.parse().ok()
}

/// `rtt min/avg/max/mdev = 0.045/0.061/0.077/0.016 ms`
fn parse_rtt(output: &str) -> Option<[f64; 4]> {
    let line = output
        .lines()
        .find(|l| l.starts_with("rtt") || l.starts_with("round-trip"))?;
    let (_, values) = line.split_once('=')?;
    let numbers = values.split_whitespace().next()?;
    let parsed: Vec<f64> = numbers
        .split('/')
        .map(|v| v.parse().ok())
        .collect::<Option<_>>()?;
    parsed.try_into().ok()
}

/// Result for one probed pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PairResult {
    pub src: String,
    pub dst: String,
    pub stats: PingStats,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingReport {
    pub pairs: Vec<PairResult>,
}

impl PingReport {
    pub fn sent(&self) -> u32 {
        self.pairs.iter().map(|p| p.stats.sent).sum()
    }

    pub fn received(&self) -> u32 {
        self.pairs.iter().map(|p| p.stats.received).sum()
    }

    /// Percentage of probes lost; 0 when nothing was sent.
    pub fn dropped_percent(&self) -> f64 {
        let sent = self.sent();
        if sent == 0 {
            return 0.0;
        }
        100.0 * f64::from(sent.saturating_sub(self.received())) / f64::from(sent)
    }

    pub fn lost_any(&self) -> bool {
        self.pairs.iter().any(|p| p.stats.lost() > 0)
    }

    pub fn get(&self, src: &str, dst: &str) -> Option<&PingStats> {
        self.pairs
            .iter()
            .find(|p| (p.src == src && p.dst == dst) || (p.src == dst && p.dst == src))
            .map(|p| &p.stats)
    }
}

fn address_of(node: &Node) -> Result<Option<Ipv4Addr>> {
    match node.default_interface() {
        Ok(intf) => intf.ip_address(Refresh::Cached),
        Err(NetError::NoSuchInterface { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Probe `dst` from `src`. Either side lacking an address yields
/// `(sent=0, received=0)` without running the tool.
pub fn ping_pair(src: &Node, dst: &Node, settings: &NetSettings) -> Result<PingStats> {
    let (Some(_), Some(target)) = (address_of(src)?, address_of(dst)?) else {
        tracing::debug!(src = %src.name(), dst = %dst.name(), "unaddressed endpoint, not probing");
        return Ok(PingStats::default());
    };
    let args = vec![
        "-c".to_string(),
        settings.probe_count.to_string(),
        "-W".to_string(),
        settings.probe_timeout.as_secs().max(1).to_string(),
        target.to_string(),
    ];
    let output = src.context().run_raw("ping", &args)?;
    Ok(parse_ping(&output.combined()))
}

/// Probe every unordered host pair once and log per-pair loss.
pub fn ping_all(net: &Network) -> Result<PingReport> {
    let report = probe_pairs(net)?;
    for pair in &report.pairs {
        tracing::info!(
            src = %pair.src,
            dst = %pair.dst,
            sent = pair.stats.sent,
            received = pair.stats.received,
            "probe"
        );
    }
    log_summary(&report);
    Ok(report)
}

/// Like [`ping_all`], logging round-trip statistics for every pair.
pub fn ping_all_full(net: &Network) -> Result<PingReport> {
    let report = probe_pairs(net)?;
    for pair in &report.pairs {
        let s = &pair.stats;
        tracing::info!(
            src = %pair.src,
            dst = %pair.dst,
            sent = s.sent,
            received = s.received,
            "rtt min/avg/max/mdev = {:.3}/{:.3}/{:.3}/{:.3} ms",
            s.rtt_min,
            s.rtt_avg,
            s.rtt_max,
            s.rtt_mdev
        );
    }
    log_summary(&report);
    Ok(report)
}

fn probe_pairs(net: &Network) -> Result<PingReport> {
    let hosts = net.hosts();
    let mut report = PingReport::default();
    for (i, src) in hosts.iter().enumerate() {
        for dst in &hosts[i + 1..] {
            let stats = ping_pair(src, dst, net.settings())?;
            report.pairs.push(PairResult {
                src: src.name().to_string(),
                dst: dst.name().to_string(),
                stats,
            });
        }
    }
    Ok(report)
}

fn log_summary(report: &PingReport) {
    tracing::info!(
        "*** Results: {:.0}% dropped ({}/{} received)",
        report.dropped_percent(),
        report.received(),
        report.sent()
    );
}

impl Network {
    pub fn ping_all(&self) -> Result<PingReport> {
        ping_all(self)
    }

    pub fn ping_all_full(&self) -> Result<PingReport> {
        ping_all_full(self)
    }

    pub fn ping_pair(&self, src: &str, dst: &str) -> Result<PingStats> {
        let (src, dst) = (self.node(src)?, self.node(dst)?);
        ping_pair(&src, &dst, self.settings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LinkStatus;
    use crate::test_util::FakeKernel;
    use crate::topology::TopoSpec;
    use std::time::Duration;

    const REPLY: &str = "\
PING 10.0.0.2 (10.0.0.2) 56(84) bytes of data.
64 bytes from 10.0.0.2: icmp_seq=1 ttl=64 time=0.061 ms

--- 10.0.0.2 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 0.061/0.061/0.061/0.000 ms
";

    fn settings() -> NetSettings {
        NetSettings {
            netns_prefix: "p-".into(),
            poll_interval: Duration::from_millis(1),
            ..NetSettings::default()
        }
    }

    #[test]
    fn parses_summary_and_rtt() {
        let stats = parse_ping(REPLY);
        assert_eq!((stats.sent, stats.received), (1, 1));
        assert_eq!(stats.rtt_avg, 0.061);

        let lossy = "3 packets transmitted, 0 received, +3 errors, 100% packet loss, time 2003ms\n";
        let stats = parse_ping(lossy);
        assert_eq!((stats.sent, stats.received, stats.lost()), (3, 0, 3));
        assert_eq!(stats.rtt_max, 0.0);
    }

    #[test]
    fn tool_error_counts_as_one_lost() {
        let stats = parse_ping("ping: connect: Network is unreachable\n");
        assert_eq!((stats.sent, stats.received), (1, 0));
    }

    #[test]
    fn report_percentages() {
        let pair = |sent, received| PairResult {
            src: "a".into(),
            dst: "b".into(),
            stats: PingStats {
                sent,
                received,
                ..PingStats::default()
            },
        };
        assert_eq!(PingReport::default().dropped_percent(), 0.0);
        let report = PingReport {
            pairs: vec![pair(1, 1), pair(1, 0), pair(0, 0), pair(2, 2)],
        };
        assert_eq!(report.dropped_percent(), 25.0);
        assert!(report.lost_any());
        assert_eq!(report.get("b", "a").unwrap().sent, 1);
    }

    #[test]
    fn unaddressed_hosts_report_nothing_sent() {
        let kernel = FakeKernel::new();
        let mut topo = TopoSpec::new();
        topo.add_host_with_ip("h1", "0.0.0.0/0").unwrap();
        topo.add_host_with_ip("h2", "0.0.0.0/0").unwrap();
        topo.add_link("h1", "h2").unwrap();
        let mut net = Network::from_topo(settings(), kernel.executor(), &topo).unwrap();
        net.start().unwrap();

        let report = net.ping_all_full().unwrap();
        assert_eq!(report.pairs.len(), 1);
        let stats = report.get("h1", "h2").unwrap();
        assert_eq!((stats.sent, stats.received), (0, 0));

        net.node("h1").unwrap().set_ip("10.0.0.1/8", None).unwrap();
        net.node("h2").unwrap().set_ip("10.0.0.2/8", None).unwrap();
        let stats = net.ping_pair("h1", "h2").unwrap();
        assert_eq!((stats.sent, stats.received), (1, 1));
    }

    #[test]
    fn ping_pair_by_name_resolves_both_nodes() {
        let kernel = FakeKernel::new();
        let topo = TopoSpec::single(2).unwrap();
        let mut net = Network::from_topo(settings(), kernel.executor(), &topo).unwrap();
        net.start().unwrap();
        assert!(net.wait_connected().unwrap());

        let stats = net.ping_pair("h2", "h1").unwrap();
        assert_eq!((stats.sent, stats.received), (1, 1));
        assert!(matches!(net.ping_pair("h1", "h9"), Err(NetError::NoSuchNode(n)) if n == "h9"));
        assert!(matches!(net.ping_pair("h0", "h1"), Err(NetError::NoSuchNode(n)) if n == "h0"));
    }

    #[test]
    fn host_route_reaches_peer_outside_subnet() {
        let kernel = FakeKernel::new();
        let mut topo = TopoSpec::new();
        topo.add_host_with_ip("h1", "10.0.0.1/32").unwrap();
        topo.add_host_with_ip("h2", "10.0.0.2/32").unwrap();
        topo.add_link("h1", "h2").unwrap();
        let mut net = Network::from_topo(settings(), kernel.executor(), &topo).unwrap();
        net.start().unwrap();

        let stats = net.ping_pair("h1", "h2").unwrap();
        assert_eq!((stats.sent, stats.received), (1, 0));

        net.node("h1").unwrap().set_host_route("10.0.0.2", "h1-eth0").unwrap();
        net.node("h2").unwrap().set_host_route("10.0.0.1", "h2-eth0").unwrap();
        let stats = net.ping_pair("h1", "h2").unwrap();
        assert_eq!((stats.sent, stats.received), (1, 1));
    }

    #[test]
    fn link_down_breaks_and_restores_connectivity() {
        let kernel = FakeKernel::new();
        let topo = TopoSpec::single(3).unwrap();
        let mut net = Network::from_topo(settings(), kernel.executor(), &topo).unwrap();
        net.start().unwrap();
        assert!(net.wait_connected().unwrap());
        let report = net.ping_all().unwrap();
        assert_eq!(report.pairs.len(), 3);
        assert!(!report.lost_any());

        net.config_link_status("h1", "s1", LinkStatus::Down).unwrap();
        let report = net.ping_all().unwrap();
        assert_eq!(report.get("h1", "h2").unwrap().received, 0);
        assert_eq!(report.get("h2", "h3").unwrap().received, 1);

        net.config_link_status("h1", "s1", LinkStatus::Up).unwrap();
        assert!(!net.ping_all().unwrap().lost_any());
    }

    #[test]
    fn stopped_ring_switch_isolates_its_hosts() {
        let kernel = FakeKernel::new();
        let topo = TopoSpec::ring(3, 1).unwrap();
        let mut net = Network::from_topo(settings(), kernel.executor(), &topo).unwrap();
        net.start().unwrap();
        assert!(net.wait_connected().unwrap());
        assert!(!net.ping_all().unwrap().lost_any());

        net.stop_switch("s1", false).unwrap();
        let report = net.ping_all().unwrap();
        assert_eq!(report.get("h1", "h2").unwrap().received, 0);
        assert_eq!(report.get("h2", "h3").unwrap().received, 1);

        net.start_switch("s1").unwrap();
        assert!(net.wait_connected().unwrap());
        assert!(!net.ping_all().unwrap().lost_any());
    }
}
