//! C3 (ACL half): ordered CIDR allow/deny rules, first match wins. Not
//! present in the donor codebase at all — its closest analogue in the
//! example pack is the `IpNet`-based access-control surface in
//! yaleman-goatns's configuration, which is where the `ipnet` dependency
//! comes from.

use std::net::IpAddr;

use ipnet::IpNet;
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Allow,
    Deny,
}

#[derive(Debug, Clone)]
pub struct AclRule {
    pub network: IpNet,
    pub action: Action,
}

#[derive(Debug)]
struct AclInner {
    rules: Vec<AclRule>,
    default_action: Action,
}

/// Ordered CIDR allow/deny list behind a reader-writer lock so a config
/// reload can swap the rule set without the resolver needing a new `Arc`
/// per query — every frontend holds the same long-lived `Arc<Acl>`.
#[derive(Debug)]
pub struct Acl {
    inner: RwLock<AclInner>,
}

impl Acl {
    pub fn new(rules: Vec<AclRule>, default_action: Action) -> Self {
        Acl {
            inner: RwLock::new(AclInner { rules, default_action }),
        }
    }

    /// Allow everything; used when no ACL is configured.
    pub fn permissive() -> Self {
        Acl::new(Vec::new(), Action::Allow)
    }

    /// First-match-wins: returns the action of the first rule whose network
    /// contains `ip`, falling back to the default action.
    pub fn check(&self, ip: IpAddr) -> Action {
        let inner = self.inner.read();
        for rule in &inner.rules {
            if rule.network.contains(&ip) {
                return rule.action;
            }
        }
        inner.default_action
    }

    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.check(ip) == Action::Allow
    }

    /// Atomically swaps in a new rule set, used by the config hot-reload
    /// watcher. A query already past the ACL check is unaffected; the next
    /// one sees the new rules.
    pub fn replace(&self, rules: Vec<AclRule>, default_action: Action) {
        let mut inner = self.inner.write();
        inner.rules = rules;
        inner.default_action = default_action;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn permissive_allows_anything() {
        let acl = Acl::permissive();
        assert!(acl.is_allowed(ip(8, 8, 8, 8)));
    }

    #[test]
    fn first_match_wins() {
        let acl = Acl::new(
            vec![
                AclRule {
                    network: "10.0.0.0/8".parse().unwrap(),
                    action: Action::Deny,
                },
                AclRule {
                    network: "10.0.1.0/24".parse().unwrap(),
                    action: Action::Allow,
                },
            ],
            Action::Allow,
        );
        // Falls in both rules; the first (broader deny) wins.
        assert!(!acl.is_allowed(ip(10, 0, 1, 5)));
    }

    #[test]
    fn unmatched_ip_uses_default() {
        let acl = Acl::new(
            vec![AclRule {
                network: "192.168.0.0/16".parse().unwrap(),
                action: Action::Allow,
            }],
            Action::Deny,
        );
        assert!(acl.is_allowed(ip(192, 168, 1, 1)));
        assert!(!acl.is_allowed(ip(1, 2, 3, 4)));
    }
}
