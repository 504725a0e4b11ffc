//! Probe registry
//!
//! Immutable catalog of probe definitions. Built once at startup and shared
//! by the orchestrator, the eviction scheduler and the dashboard, so all
//! three always see the same set of probe identifiers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{ProberError, Result};

/// Shared call key used by the built-in account summary probes
pub const ACCOUNT_SUMMARY_CALL: &str = "account-summary";

/// How a probe gets its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Invoked on its own through the probe executor
    Independent,
    /// Derived from a response shared with other probes
    SharedDerived,
}

/// Dashboard grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeCategory {
    Security,
    CostManagement,
}

impl ProbeCategory {
    /// Heading shown on the dashboard
    pub fn heading(&self) -> &'static str {
        match self {
            ProbeCategory::Security => "SECURITY",
            ProbeCategory::CostManagement => "COST MANAGEMENT",
        }
    }
}

/// Which reading of a shared field counts as compliant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompliantWhen {
    Truthy,
    Falsy,
}

/// Rule deriving a probe value from one field of a shared response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeriveRule {
    /// Response field to read
    pub field: String,

    /// Expected reading for a compliant account
    pub compliant_when: CompliantWhen,
}

/// Catalog entry for a single probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeDefinition {
    /// Unique, stable probe identifier
    pub id: String,

    /// Executor kind
    pub executor_kind: ExecutorKind,

    /// Shared upstream call backing this probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_call_key: Option<String>,

    /// Derivation from the shared response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derive: Option<DeriveRule>,

    /// Human readable title
    #[serde(default)]
    pub title: String,

    /// Longer explanation shown under the title
    #[serde(default)]
    pub description: String,

    /// Remediation documentation, may be empty
    #[serde(default)]
    pub docs_url: String,

    /// Dashboard category
    pub category: ProbeCategory,
}

impl ProbeDefinition {
    /// Create an independent probe definition
    pub fn independent(id: impl Into<String>, category: ProbeCategory) -> Self {
        Self {
            id: id.into(),
            executor_kind: ExecutorKind::Independent,
            shared_call_key: None,
            derive: None,
            title: String::new(),
            description: String::new(),
            docs_url: String::new(),
            category,
        }
    }

    /// Create a probe derived from a shared call
    pub fn shared(
        id: impl Into<String>,
        category: ProbeCategory,
        shared_call_key: impl Into<String>,
        field: impl Into<String>,
        compliant_when: CompliantWhen,
    ) -> Self {
        Self {
            id: id.into(),
            executor_kind: ExecutorKind::SharedDerived,
            shared_call_key: Some(shared_call_key.into()),
            derive: Some(DeriveRule {
                field: field.into(),
                compliant_when,
            }),
            title: String::new(),
            description: String::new(),
            docs_url: String::new(),
            category,
        }
    }

    /// Attach presentation text
    pub fn with_text(
        mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        docs_url: impl Into<String>,
    ) -> Self {
        self.title = title.into();
        self.description = description.into();
        self.docs_url = docs_url.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ProberError::registry("probe id must not be empty"));
        }
        if !is_path_segment(&self.id) {
            return Err(ProberError::registry(format!(
                "probe id '{}' may only contain ASCII letters, digits, '-', '_' and '.'",
                self.id
            )));
        }

        match self.executor_kind {
            ExecutorKind::Independent => {
                if self.shared_call_key.is_some() || self.derive.is_some() {
                    return Err(ProberError::registry(format!(
                        "independent probe '{}' must not declare a shared call or derive rule",
                        self.id
                    )));
                }
            }
            ExecutorKind::SharedDerived => {
                let key_ok = self
                    .shared_call_key
                    .as_deref()
                    .is_some_and(|k| !k.trim().is_empty());
                if !key_ok || self.derive.is_none() {
                    return Err(ProberError::registry(format!(
                        "shared-derived probe '{}' needs both a shared call key and a derive rule",
                        self.id
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Validated, immutable probe catalog
#[derive(Debug, Clone)]
pub struct ProbeRegistry {
    probes: Vec<ProbeDefinition>,
}

impl ProbeRegistry {
    /// Build a registry, rejecting duplicate or inconsistent definitions
    pub fn new(probes: Vec<ProbeDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for probe in &probes {
            probe.validate()?;
            if !seen.insert(probe.id.as_str()) {
                return Err(ProberError::registry(format!(
                    "duplicate probe id '{}'",
                    probe.id
                )));
            }
        }
        Ok(Self { probes })
    }

    /// Catalog shipped with the prober
    pub fn builtin() -> Self {
        Self {
            probes: builtin_probes(),
        }
    }

    /// Look up a probe by id
    pub fn get(&self, id: &str) -> Option<&ProbeDefinition> {
        self.probes.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All probes in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &ProbeDefinition> {
        self.probes.iter()
    }

    /// All probe ids in catalog order
    pub fn ids(&self) -> Vec<String> {
        self.probes.iter().map(|p| p.id.clone()).collect()
    }

    /// Probes invoked on their own
    pub fn independent(&self) -> Vec<&ProbeDefinition> {
        self.probes
            .iter()
            .filter(|p| p.executor_kind == ExecutorKind::Independent)
            .collect()
    }

    /// Shared-derived probes grouped by their shared call key
    pub fn shared_groups(&self) -> BTreeMap<String, Vec<&ProbeDefinition>> {
        let mut groups: BTreeMap<String, Vec<&ProbeDefinition>> = BTreeMap::new();
        for probe in &self.probes {
            if let (ExecutorKind::SharedDerived, Some(key)) =
                (probe.executor_kind, probe.shared_call_key.as_ref())
            {
                groups.entry(key.clone()).or_default().push(probe);
            }
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_probes() -> Vec<ProbeDefinition> {
    use ProbeCategory::*;

    vec![
        ProbeDefinition::shared(
            "security-iam-root-access-key-check",
            Security,
            ACCOUNT_SUMMARY_CALL,
            "AccountAccessKeysPresent",
            CompliantWhen::Falsy,
        )
        .with_text(
            "No access keys for the AWS account root user exist",
            "Access keys for the root user provide permanent access to the account and should \
             not be used. The root user is the primary account administrator and has the \
             highest level of permissions within an AWS account.",
            "https://docs.aws.amazon.com/accounts/latest/reference/root-user-access-key.html#root-user-delete-access-key",
        ),
        ProbeDefinition::shared(
            "security-root-account-mfa-enabled",
            Security,
            ACCOUNT_SUMMARY_CALL,
            "AccountMFAEnabled",
            CompliantWhen::Truthy,
        )
        .with_text(
            "Multi-Factor Authentication (MFA) for the AWS root user account is enabled",
            "Enable MFA for the root user to protect the account that holds complete \
             administrative rights.",
            "https://docs.aws.amazon.com/IAM/latest/UserGuide/id_credentials_mfa_enable_virtual.html#enable-virt-mfa-for-root",
        ),
        ProbeDefinition::independent("security-account-has-no-iam-users", Security).with_text(
            "AWS Account has no IAM users",
            "Use Identity Center for human access and IAM roles for machine access instead of \
             IAM users with long-term credentials, which are hard to rotate and revoke.",
            "https://docs.aws.amazon.com/IAM/latest/UserGuide/id_users_manage.html#id_users_deleting",
        ),
        ProbeDefinition::independent(
            "security-account-is-organizations-management-account",
            Security,
        )
        .with_text(
            "AWS Organizations is enabled and this is the management account",
            "Set up a multi-account environment with AWS Organizations and move workloads into \
             member accounts.",
            "https://docs.aws.amazon.com/whitepapers/latest/organizing-your-aws-environment/benefits-of-using-multiple-aws-accounts.html",
        ),
        ProbeDefinition::independent("billing-iam-access-enabled", CostManagement).with_text(
            "IAM access to AWS billing and cost management services enabled",
            "Allow authorized IAM users and roles to reach billing so the root user is not \
             needed for daily operations.",
            "https://docs.aws.amazon.com/IAM/latest/UserGuide/tutorial_billing.html",
        ),
        ProbeDefinition::independent("billing-invoice-by-email-enabled", CostManagement)
            .with_text(
                "PDF invoices via email enabled",
                "Have PDF invoices delivered by email so invoices reach accounting without a \
                 console login.",
                "https://docs.aws.amazon.com/awsaccountbilling/latest/aboutv2/emailed-invoice.html",
            ),
        ProbeDefinition::independent("billing-budget-created", CostManagement).with_text(
            "AWS Budget created",
            "Create a budget with alerts, include credits in the settings and enable \
             auto-adjustment so the budget follows the actual bill.",
            "https://docs.aws.amazon.com/cost-management/latest/userguide/budgets-create.html",
        ),
        ProbeDefinition::independent("billing-tax-inheritance-enabled", CostManagement)
            .with_text(
                "Tax Inheritance enabled",
                "Consolidate usage from member accounts into a single tax invoice.",
                "https://docs.aws.amazon.com/awsaccountbilling/latest/aboutv2/manage-account-payment.html#manage-account-tax-linked-accounts",
            ),
        ProbeDefinition::independent("billing-cost-anomaly-detector-created", CostManagement)
            .with_text(
                "AWS Cost Anomaly Detection enabled",
                "Detect abnormal spikes or drops in spend early and get alerted when they happen.",
                "",
            ),
        ProbeDefinition::independent("billing-compute-optimizer-enabled", CostManagement)
            .with_text(
                "AWS Compute Optimizer enabled",
                "Receive rightsizing recommendations for EC2 instances, Lambda functions and \
                 Fargate containers.",
                "https://docs.aws.amazon.com/compute-optimizer/latest/ug/getting-started.html#account-opt-in",
            ),
    ]
}

/// One store key segment and one URL path segment
fn is_path_segment(id: &str) -> bool {
    id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let builtin = ProbeRegistry::builtin();
        let rebuilt = ProbeRegistry::new(builtin.iter().cloned().collect()).unwrap();
        assert_eq!(rebuilt.len(), 10);
        assert_eq!(builtin.independent().len(), 8);
    }

    #[test]
    fn test_shared_groups() {
        let registry = ProbeRegistry::builtin();
        let groups = registry.shared_groups();
        assert_eq!(groups.len(), 1);

        let ids: Vec<&str> = groups[ACCOUNT_SUMMARY_CALL]
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                "security-iam-root-access-key-check",
                "security-root-account-mfa-enabled"
            ]
        );
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let probes = vec![
            ProbeDefinition::independent("a", ProbeCategory::Security),
            ProbeDefinition::independent("a", ProbeCategory::CostManagement),
        ];
        let err = ProbeRegistry::new(probes).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_inconsistent_definitions_rejected() {
        let mut independent = ProbeDefinition::independent("a", ProbeCategory::Security);
        independent.shared_call_key = Some("account-summary".to_string());
        assert!(ProbeRegistry::new(vec![independent]).is_err());

        let mut shared = ProbeDefinition::shared(
            "b",
            ProbeCategory::Security,
            "account-summary",
            "AccountMFAEnabled",
            CompliantWhen::Truthy,
        );
        shared.derive = None;
        assert!(ProbeRegistry::new(vec![shared]).is_err());

        let blank = ProbeDefinition::independent("  ", ProbeCategory::Security);
        assert!(ProbeRegistry::new(vec![blank]).is_err());
    }

    #[test]
    fn test_ids_must_be_single_path_segment() {
        for id in ["a/b", "../a", "a b", "a?b", "a#b", "é", ".."] {
            let definition = ProbeDefinition::independent(id, ProbeCategory::Security);
            let err = ProbeRegistry::new(vec![definition]).unwrap_err();
            assert!(err.to_string().contains("may only contain"), "{}", id);
        }

        let ok = ProbeDefinition::independent("custom_check.v2-a", ProbeCategory::Security);
        assert!(ProbeRegistry::new(vec![ok]).is_ok());
    }

    #[test]
    fn test_definition_yaml_roundtrip_shape() {
        let yaml = r#"
- id: billing-budget-created
  executor_kind: independent
  category: cost_management
- id: security-root-account-mfa-enabled
  executor_kind: shared_derived
  shared_call_key: account-summary
  derive:
    field: AccountMFAEnabled
    compliant_when: truthy
  category: security
"#;
        let probes: Vec<ProbeDefinition> = serde_yaml::from_str(yaml).unwrap();
        let registry = ProbeRegistry::new(probes).unwrap();
        assert!(registry.contains("billing-budget-created"));
        assert_eq!(registry.shared_groups()["account-summary"].len(), 1);
    }
}
