//! The built-in alert definitions

use crate::resource::{Comparison, Severity, TimingField};

/// A built-in alert group and its rules
#[derive(Clone, Debug, PartialEq)]
pub struct GroupTemplate<C: 'static> {
    /// The group's object name.
    pub name: &'static str,
    /// A short, human-readable title.
    pub display_name: &'static str,
    /// What the group's rules watch.
    pub description: &'static str,
    /// Notification timing for the group.
    pub timing: TimingField,
    /// The group's rules.
    pub rules: &'static [RuleTemplate<C>],
}

/// A built-in alert rule
#[derive(Clone, Debug, PartialEq)]
pub struct RuleTemplate<C> {
    /// The rule's object name.
    pub name: &'static str,
    /// A short, human-readable title.
    pub display_name: &'static str,
    /// How urgent the alert is.
    pub severity: Severity,
    /// Whether the rule inherits the group's timing. `None` leaves it unset.
    pub inherited: Option<bool>,
    /// Notification timing for the rule.
    pub timing: TimingField,
    /// What the rule watches.
    pub condition: C,
}

/// Conditions a cluster alert rule can watch
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterCondition {
    /// A monitoring expression compared against a threshold.
    Metric(MetricTemplate),
    /// The availability of a control-plane service.
    SystemService(&'static str),
    /// Kubernetes events of a type for a resource kind.
    Event {
        /// `Normal` or `Warning`.
        event_type: &'static str,
        /// The kind of the involved object, e.g. `Deployment`.
        resource_kind: &'static str,
    },
}

/// Conditions a project alert rule can watch
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectCondition {
    /// A monitoring expression compared against a threshold.
    Metric(MetricTemplate),
    /// The share of available replicas of the selected workloads.
    Workload {
        /// Label selector for the workloads.
        selector: &'static [(&'static str, &'static str)],
        /// Alert when fewer than this percentage of replicas is available.
        available_percentage: i32,
    },
}

/// A monitoring expression compared against a threshold for some duration
#[derive(Clone, Debug, PartialEq)]
pub struct MetricTemplate {
    #[allow(missing_docs)]
    pub description: &'static str,
    #[allow(missing_docs)]
    pub expression: &'static str,
    #[allow(missing_docs)]
    pub comparison: Comparison,
    #[allow(missing_docs)]
    pub duration: &'static str,
    #[allow(missing_docs)]
    pub threshold: f64,
}

const DEFAULT_TIMING: TimingField = TimingField::DEFAULT;

const fn metric(
    description: &'static str,
    expression: &'static str,
    comparison: Comparison,
    duration: &'static str,
    threshold: f64,
) -> MetricTemplate {
    MetricTemplate {
        description,
        expression,
        comparison,
        duration,
        threshold,
    }
}

/// The name of the group holding node resource alerts.
pub const NODE_ALERT_GROUP: &str = "node-alert";

/// Groups seeded into every cluster.
pub static CLUSTER_GROUPS: &[GroupTemplate<ClusterCondition>] = &[
    GroupTemplate {
        name: "etcd-alert",
        display_name: "A set of alerts for etcd",
        description: "Alert for etcd leader existence, db size",
        timing: DEFAULT_TIMING,
        rules: &[
            RuleTemplate {
                name: "no-leader",
                display_name: "Etcd member has no leader",
                severity: Severity::Critical,
                inherited: None,
                timing: DEFAULT_TIMING,
                condition: ClusterCondition::Metric(metric(
                    "Etcd member has no leader",
                    "etcd_server_has_leader",
                    Comparison::NotEqual,
                    "3m",
                    1.0,
                )),
            },
            RuleTemplate {
                name: "high-number-of-leader-changes",
                display_name:
                    "A high number of leader changes within the etcd cluster are happening",
                severity: Severity::Warning,
                inherited: None,
                timing: DEFAULT_TIMING,
                condition: ClusterCondition::Metric(metric(
                    "Etcd instance has seen high number of leader changes within the last hour",
                    "increase(etcd_server_leader_changes_seen_total[1h])",
                    Comparison::GreaterThan,
                    "3m",
                    3.0,
                )),
            },
            RuleTemplate {
                name: "db-over-size",
                display_name: "Database usage close to the quota 500M",
                severity: Severity::Warning,
                inherited: None,
                timing: DEFAULT_TIMING,
                condition: ClusterCondition::Metric(metric(
                    "Shows the etcd database size including free space waiting for defragmentation close to the quota",
                    "sum(etcd_debugging_mvcc_db_total_size_in_bytes)",
                    Comparison::GreaterThan,
                    "3m",
                    524288000.0,
                )),
            },
            RuleTemplate {
                name: "etcd-system-service",
                display_name: "Etcd is unavailable",
                severity: Severity::Critical,
                inherited: Some(false),
                timing: TimingField {
                    group_wait_seconds: 600,
                    group_interval_seconds: 180,
                    repeat_interval_seconds: 3600,
                },
                condition: ClusterCondition::SystemService("etcd"),
            },
        ],
    },
    GroupTemplate {
        name: "kube-components-alert",
        display_name: "A set of alerts for kube components",
        description: "Alert for kube components api server, scheduler, controller manager",
        timing: DEFAULT_TIMING,
        rules: &[
            RuleTemplate {
                name: "scheduler-system-service",
                display_name: "Scheduler is unavailable",
                severity: Severity::Critical,
                inherited: None,
                timing: DEFAULT_TIMING,
                condition: ClusterCondition::SystemService("scheduler"),
            },
            RuleTemplate {
                name: "controllermanager-system-service",
                display_name: "Controller Manager is unavailable",
                severity: Severity::Critical,
                inherited: None,
                timing: DEFAULT_TIMING,
                condition: ClusterCondition::SystemService("controller-manager"),
            },
        ],
    },
    GroupTemplate {
        name: NODE_ALERT_GROUP,
        display_name: "A set of alerts for node",
        description: "Alert for Node Memory, CPU, Disk Usage",
        timing: DEFAULT_TIMING,
        rules: &[
            RuleTemplate {
                name: "node-disk-running-full",
                display_name: "Node disk is running full within 24 hours",
                severity: Severity::Critical,
                inherited: None,
                timing: DEFAULT_TIMING,
                condition: ClusterCondition::Metric(metric(
                    "Device on node is running full within the next 24 hours",
                    r#"predict_linear(node_filesystem_free_bytes{mountpoint!~"^/etc/(?:resolv.conf|hosts|hostname)$"}[6h], 3600 * 24) < 0"#,
                    Comparison::HasValue,
                    "10m",
                    0.0,
                )),
            },
            // The misspelled name is what existing clusters already carry.
            RuleTemplate {
                name: "high-memmory",
                display_name: "High node memory utilization",
                severity: Severity::Warning,
                inherited: None,
                timing: DEFAULT_TIMING,
                condition: ClusterCondition::Metric(metric(
                    "Node memory utilization is over 80%",
                    "(1 - sum(node_memory_MemAvailable_bytes) by (instance) / sum(node_memory_MemTotal_bytes) by (instance)) * 100",
                    Comparison::GreaterOrEqual,
                    "3m",
                    80.0,
                )),
            },
            RuleTemplate {
                name: "high-cpu-load",
                display_name: "High cpu load",
                severity: Severity::Warning,
                inherited: None,
                timing: DEFAULT_TIMING,
                condition: ClusterCondition::Metric(metric(
                    "The cpu load is higher than 100",
                    "sum(node_load1) by (node)  / sum(machine_cpu_cores) by (node) * 100",
                    Comparison::GreaterThan,
                    "3m",
                    100.0,
                )),
            },
        ],
    },
    GroupTemplate {
        name: "event-alert",
        display_name: "A set of alerts when event happened",
        description: "Alert for receiving resource event",
        timing: DEFAULT_TIMING,
        rules: &[RuleTemplate {
            name: "deployment-event-alert",
            display_name: "Get warning deployment event",
            severity: Severity::Warning,
            inherited: None,
            timing: DEFAULT_TIMING,
            condition: ClusterCondition::Event {
                event_type: "Warning",
                resource_kind: "Deployment",
            },
        }],
    },
];

/// The rule added to [`NODE_ALERT_GROUP`] once a cluster has Windows nodes.
pub static WINDOWS_DISK_RULE: RuleTemplate<ClusterCondition> = RuleTemplate {
    name: "windows-node-disk-running-full",
    display_name: "Windows node disk is running full within 24 hours",
    severity: Severity::Critical,
    inherited: None,
    timing: DEFAULT_TIMING,
    condition: ClusterCondition::Metric(metric(
        "Device on node is running full within the next 24 hours",
        r#"predict_linear(node_filesystem_free_bytes{job=~"expose-node-metrics-windows", device!~"HarddiskVolume.+"}[6h], 3600 * 24) < 0"#,
        Comparison::HasValue,
        "10m",
        0.0,
    )),
};

/// The group seeded into every project.
pub static PROJECT_GROUP: GroupTemplate<ProjectCondition> = GroupTemplate {
    name: "projectalert-workload-alert",
    display_name: "A set of alerts for workload, pod, container",
    description: "Alert for cpu, memory, disk, network",
    timing: DEFAULT_TIMING,
    rules: &[
        RuleTemplate {
            name: "less-than-half-workload-available",
            display_name: "Less than half workload available",
            severity: Severity::Critical,
            inherited: None,
            timing: DEFAULT_TIMING,
            condition: ProjectCondition::Workload {
                selector: &[("app", "workload")],
                available_percentage: 50,
            },
        },
        RuleTemplate {
            name: "memory-close-to-resource-limited",
            display_name: "Memory usage close to the quota",
            severity: Severity::Warning,
            inherited: None,
            timing: DEFAULT_TIMING,
            condition: ProjectCondition::Metric(metric(
                "Container using memory close to the quota",
                r#"sum(container_memory_working_set_bytes) by (pod_name, container_name) / sum(label_join(label_join(kube_pod_container_resource_limits_memory_bytes,"pod_name", "", "pod"),"container_name", "", "container")) by (pod_name, container_name)"#,
                Comparison::GreaterThan,
                "3m",
                1.0,
            )),
        },
    ],
};
