//! §4.10 netguard whitelist: a union of exact IPs and CIDR networks.
//!
//! Auto-includes `127.0.0.1` and `::1`. Accepts IPv4 and IPv6, exact
//! addresses or CIDRs, and strips an IPv6 zone suffix (`%eth0`) before
//! matching so `fe80::1%eth0` matches a whitelisted `fe80::1`.

use ipnet::IpNet;
use std::collections::HashSet;
use std::net::IpAddr;

pub struct Whitelist {
    exact: HashSet<IpAddr>,
    nets: Vec<IpNet>,
}

impl Whitelist {
    /// Build a whitelist from a mix of exact-IP and CIDR strings.
    /// Malformed entries are skipped (logged by the caller if desired).
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut exact = HashSet::new();
        let mut nets = Vec::new();

        for raw in entries {
            let entry = raw.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            if let Ok(net) = entry.parse::<IpNet>() {
                nets.push(net);
            } else if let Ok(ip) = entry.parse::<IpAddr>() {
                exact.insert(ip);
            }
        }

        exact.insert(IpAddr::from([127, 0, 0, 1]));
        exact.insert(IpAddr::from([0, 0, 0, 0, 0, 0, 0, 1]));

        Self { exact, nets }
    }

    /// Whether `raw_ip` (optionally carrying an IPv6 zone suffix like
    /// `%eth0`) is covered by this whitelist.
    pub fn allows(&self, raw_ip: &str) -> bool {
        let unzoned = raw_ip.split('%').next().unwrap_or(raw_ip);
        let Ok(ip) = unzoned.parse::<IpAddr>() else {
            return false;
        };
        self.allows_addr(&ip)
    }

    pub fn allows_addr(&self, ip: &IpAddr) -> bool {
        if self.exact.contains(ip) {
            return true;
        }
        self.nets.iter().any(|net| net.contains(ip))
    }

    pub fn is_loopback(ip: &IpAddr) -> bool {
        ip.is_loopback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_6_cidr_and_exact() {
        let wl = Whitelist::new(&["192.168.1.0/24", "10.0.0.1"]);
        assert!(wl.allows("192.168.1.100"));
        assert!(wl.allows("10.0.0.1"));
        assert!(!wl.allows("8.8.8.8"));
        assert!(wl.allows("127.0.0.1"));
        assert!(wl.allows("::1"));
    }

    #[test]
    fn ipv6_zone_suffix_matches_unzoned_entry() {
        let wl = Whitelist::new(&["fe80::1"]);
        assert!(wl.allows("fe80::1%eth0"));
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let wl = Whitelist::new(&["not-an-ip", "also garbage", "10.0.0.5"]);
        assert!(wl.allows("10.0.0.5"));
        assert!(!wl.allows("10.0.0.6"));
    }

    #[test]
    fn loopback_always_included_even_with_empty_config() {
        let wl: Whitelist = Whitelist::new::<&str>(&[]);
        assert!(wl.allows("127.0.0.1"));
        assert!(wl.allows("::1"));
    }
}
