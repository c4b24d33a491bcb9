//! Typed policy domains declared in `itpkg.json`.
//!
//! Policies are a closed set: `security` (network + filesystem), `privacy`
//! and `energy` (resources). Unknown keys are rejected when the manifest is
//! deserialized, so an invalid policy shape never reaches a validator.

use serde::{Deserialize, Serialize};

/// All policy domains of a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policies {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<PrivacyPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy: Option<ResourcePolicy>,
}

impl Policies {
    /// A policy set that denies all outbound network access and PII export.
    pub fn deny_all() -> Self {
        Self {
            security: Some(SecurityPolicy {
                network: Some(NetworkPolicy {
                    outbound: Some(RuleSet::deny_everything()),
                    inbound: None,
                }),
                filesystem: None,
            }),
            privacy: Some(PrivacyPolicy {
                pii: Some(PiiPolicy {
                    export: Access::Deny,
                }),
            }),
            energy: Some(ResourcePolicy {
                mode: EnergyMode::Balanced,
            }),
        }
    }

    /// The network policy, if declared.
    pub fn network(&self) -> Option<&NetworkPolicy> {
        self.security.as_ref().and_then(|s| s.network.as_ref())
    }

    /// Whether a non-empty network policy is declared.
    pub fn has_network_policy(&self) -> bool {
        self.network().is_some_and(|n| !n.is_empty())
    }

    /// Names of the domains that are declared, in a fixed order.
    pub fn declared_domains(&self) -> Vec<PolicyDomain> {
        let mut domains = Vec::new();
        if self.network().is_some() {
            domains.push(PolicyDomain::Network);
        }
        if self
            .security
            .as_ref()
            .is_some_and(|s| s.filesystem.is_some())
        {
            domains.push(PolicyDomain::Filesystem);
        }
        if self.privacy.is_some() {
            domains.push(PolicyDomain::Privacy);
        }
        if self.energy.is_some() {
            domains.push(PolicyDomain::Resource);
        }
        domains
    }
}

/// Identifies one policy domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDomain {
    Network,
    Filesystem,
    Privacy,
    Resource,
}

/// The `security` domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecurityPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemPolicy>,
}

/// Network egress/ingress rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<RuleSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound: Option<RuleSet>,
}

impl NetworkPolicy {
    /// A policy with neither direction declared.
    pub fn is_empty(&self) -> bool {
        self.outbound.is_none() && self.inbound.is_none()
    }

    /// Deny-by-default check for an outbound target host.
    pub fn allows_outbound(&self, host: &str) -> bool {
        self.outbound.as_ref().is_some_and(|r| r.permits(host))
    }

    /// Deny-by-default check for an inbound source host.
    pub fn allows_inbound(&self, host: &str) -> bool {
        self.inbound.as_ref().is_some_and(|r| r.permits(host))
    }
}

/// Allow/deny pattern lists. A target is permitted only when an allow
/// pattern matches and no deny pattern does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSet {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl RuleSet {
    pub fn deny_everything() -> Self {
        Self {
            allow: Vec::new(),
            deny: vec!["*".to_string()],
        }
    }

    pub fn permits(&self, target: &str) -> bool {
        let allowed = self.allow.iter().any(|p| pattern_matches(p, target));
        let denied = self.deny.iter().any(|p| pattern_matches(p, target));
        allowed && !denied
    }
}

/// `*` matches anything, `*.example.com` matches any subdomain of
/// `example.com`, anything else must match exactly (case-insensitive).
fn pattern_matches(pattern: &str, target: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let target = target.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => target
            .strip_suffix(suffix)
            .is_some_and(|head| head.ends_with('.') && head.len() > 1),
        None => pattern == target,
    }
}

/// Filesystem access patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemPolicy {
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
}

/// The `privacy` domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrivacyPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii: Option<PiiPolicy>,
}

impl PrivacyPolicy {
    pub fn allows_pii_export(&self) -> bool {
        self.pii.as_ref().is_some_and(|p| p.export == Access::Allow)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PiiPolicy {
    #[serde(default)]
    pub export: Access,
}

/// A binary allow/deny decision; absence means deny.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Allow,
    #[default]
    Deny,
}

/// The resource (`energy`) domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcePolicy {
    #[serde(default)]
    pub mode: EnergyMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyMode {
    Low,
    #[default]
    Balanced,
    Performance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_all_blocks_everything() {
        let policies = Policies::deny_all();
        let network = policies.network().unwrap();
        assert!(!network.allows_outbound("api.example.com"));
        assert!(!network.allows_inbound("api.example.com"));
        assert!(policies.has_network_policy());
    }

    #[test]
    fn test_rule_set_deny_by_default() {
        let rules = RuleSet::default();
        assert!(!rules.permits("example.com"));
    }

    #[test]
    fn test_rule_set_wildcard_subdomain() {
        let rules = RuleSet {
            allow: vec!["*.example.com".to_string()],
            deny: vec!["secret.example.com".to_string()],
        };
        assert!(rules.permits("api.example.com"));
        assert!(rules.permits("API.Example.com"));
        assert!(!rules.permits("example.com"));
        assert!(!rules.permits("badexample.com"));
        assert!(!rules.permits("secret.example.com"));
    }

    #[test]
    fn test_unknown_policy_domain_rejected() {
        let result: Result<Policies, _> =
            serde_json::from_value(serde_json::json!({ "telemetry": { "mode": "on" } }));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_access_value_rejected() {
        let result: Result<Policies, _> = serde_json::from_value(serde_json::json!({
            "privacy": { "pii": { "export": "maybe" } }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_network_policy_is_empty() {
        let policies: Policies = serde_json::from_value(serde_json::json!({
            "security": { "network": {} }
        }))
        .unwrap();
        assert!(policies.network().is_some());
        assert!(!policies.has_network_policy());
    }

    #[test]
    fn test_declared_domains() {
        let policies = Policies::deny_all();
        assert_eq!(
            policies.declared_domains(),
            vec![
                PolicyDomain::Network,
                PolicyDomain::Privacy,
                PolicyDomain::Resource
            ]
        );
    }
}
