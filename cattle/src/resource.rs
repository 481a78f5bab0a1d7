//! Custom resources in the `management.cattle.io/v3` API group
//!
//! Alert groups and rules are namespaced: cluster alerts live in the cluster's
//! namespace and project alerts in the project's namespace. Fields embedded by the
//! upstream API (timing, common rule fields) are flattened so that the wire format
//! matches the API server's.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The API group of all resources in this module.
pub const GROUP: &str = "management.cattle.io";

/// Controls how notifications for an alert are batched and repeated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimingField {
    /// Time to wait before sending the first notification for a group.
    pub group_wait_seconds: i64,

    /// Time to wait before sending a notification about new alerts in a group.
    pub group_interval_seconds: i64,

    /// Time to wait before re-sending a notification that was already sent.
    pub repeat_interval_seconds: i64,
}

/// How urgent an alert is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// How a metric rule compares its expression's value against the threshold.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Comparison {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    /// Fires whenever the expression yields any value.
    HasValue,
}

/// The state of an alert group or rule.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Active,
    Inactive,
    Alerting,
    Muted,
}

/// Status shared by every alert group and rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    pub alert_state: AlertState,
}

/// Fields common to cluster and project alert groups.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonGroupField {
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(flatten)]
    pub timing: TimingField,
}

/// Fields common to cluster and project alert rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommonRuleField {
    pub display_name: String,

    pub severity: Severity,

    /// Whether the rule inherits its timing from its group. Unset means inherited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inherited: Option<bool>,

    #[serde(flatten)]
    pub timing: TimingField,
}

/// A notification target for an alert group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    /// The notifier-specific address, e.g. a channel or an email address.
    #[serde(default)]
    pub recipient: String,

    pub notifier_name: String,

    #[serde(default)]
    pub notifier_type: String,
}

/// Alerts when a monitoring expression crosses a threshold for some duration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricRule {
    pub expression: String,

    #[serde(default)]
    pub description: String,

    /// How long the condition must hold, e.g. `3m`.
    pub duration: String,

    pub comparison: Comparison,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub threshold_value: f64,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// Alerts when a control-plane system service is unavailable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemServiceRule {
    /// The service, e.g. `etcd` or `scheduler`.
    pub condition: String,
}

/// Alerts on Kubernetes events of a type for a kind of resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventRule {
    /// `Normal` or `Warning`.
    pub event_type: String,

    pub resource_kind: String,
}

/// Alerts when too few of a workload's replicas are available.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workload_id: String,

    /// Selects the workloads the rule applies to when no workload id is set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    pub available_percentage: i32,
}

/// Describes a set of cluster alert rules sharing notification recipients.
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "ClusterAlertGroup",
    namespaced,
    status = "AlertStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGroupSpec {
    pub cluster_name: String,

    #[serde(flatten)]
    pub common: CommonGroupField,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<Recipient>,
}

/// Describes a single cluster-level alert condition.
///
/// Exactly one of the rule fields is expected to be set.
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "ClusterAlertRule",
    namespaced,
    status = "AlertStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAlertRuleSpec {
    pub cluster_name: String,

    /// The owning group's id, as returned by [`group_id`].
    pub group_name: String,

    #[serde(flatten)]
    pub common: CommonRuleField,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_rule: Option<MetricRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_service_rule: Option<SystemServiceRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_rule: Option<EventRule>,
}

/// Describes a set of project alert rules sharing notification recipients.
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "ProjectAlertGroup",
    namespaced,
    status = "AlertStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectGroupSpec {
    /// The project id, `<cluster>:<project>`.
    pub project_name: String,

    #[serde(flatten)]
    pub common: CommonGroupField,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<Recipient>,
}

/// Describes a single project-level alert condition.
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "ProjectAlertRule",
    namespaced,
    status = "AlertStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAlertRuleSpec {
    /// The project id, `<cluster>:<project>`.
    pub project_name: String,

    /// The owning group's id, as returned by [`group_id`].
    pub group_name: String,

    #[serde(flatten)]
    pub common: CommonRuleField,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_rule: Option<MetricRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_rule: Option<WorkloadRule>,
}

/// A project groups namespaces within a cluster. Projects live in their cluster's
/// namespace.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "Project",
    namespaced,
    derive = "PartialEq"
)]
#[kube(derive = "Default")]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    pub cluster_name: String,
}

/// A chart published by a catalog, listing all of its versions.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "CatalogTemplate",
    namespaced,
    derive = "PartialEq"
)]
#[kube(derive = "Default")]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub catalog_id: String,

    #[serde(default)]
    pub default_version: String,

    #[serde(default)]
    pub versions: Vec<TemplateVersionSpec>,
}

/// A single version of a catalog template.
///
/// The same structure describes both the entries of [`TemplateSpec::versions`] and
/// the standalone [`CatalogTemplateVersion`] resource.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "management.cattle.io",
    version = "v3",
    kind = "CatalogTemplateVersion",
    namespaced,
    derive = "PartialEq"
)]
#[kube(derive = "Default")]
#[serde(rename_all = "camelCase")]
pub struct TemplateVersionSpec {
    /// A `catalog://` URL identifying the catalog, template and version.
    #[serde(default)]
    pub external_id: String,

    pub version: String,

    /// Set for versions from catalogs that publish revisions instead of versions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,

    /// The lowest server version the template version supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rancher_min_version: Option<String>,

    /// The highest server version the template version supports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rancher_max_version: Option<String>,
}

/// Returns the id by which rules refer to their group: `<namespace>:<name>`.
pub fn group_id(namespace: &str, name: &str) -> String {
    format!("{namespace}:{name}")
}

// === impl TimingField ===

impl TimingField {
    /// The timing used by alerts that do not need anything more specific.
    pub const DEFAULT: Self = Self {
        group_wait_seconds: 180,
        group_interval_seconds: 180,
        repeat_interval_seconds: 3600,
    };
}

impl Default for TimingField {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// === impl AlertStatus ===

impl AlertStatus {
    /// The status of a newly created, enabled alert.
    pub fn active() -> Self {
        Self {
            alert_state: AlertState::Active,
        }
    }
}
