use super::{
    table::{ClusterCondition, GroupTemplate, MetricTemplate, RuleTemplate, CLUSTER_GROUPS},
    Report,
};
use crate::{
    metrics::Metrics,
    resource::{
        group_id, AlertStatus, ClusterAlertGroup, ClusterAlertRule, ClusterAlertRuleSpec,
        ClusterGroupSpec, CommonGroupField, CommonRuleField, EventRule, MetricRule,
        SystemServiceRule,
    },
    store::ObjectStore,
};
use kube::core::ObjectMeta;

/// Seeds the built-in cluster alert groups and rules into a cluster's namespace
#[derive(Clone, Debug)]
pub struct ClusterSeeder<G, R> {
    groups: G,
    rules: R,
    metrics: Metrics,
}

impl<G, R> ClusterSeeder<G, R>
where
    G: ObjectStore<ClusterAlertGroup>,
    R: ObjectStore<ClusterAlertRule>,
{
    pub fn new(groups: G, rules: R) -> Self {
        Self {
            groups,
            rules,
            metrics: Metrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Ensures every built-in group and rule exists for the named cluster.
    ///
    /// Rules are seeded even when their group could not be.
    #[tracing::instrument(skip_all, fields(cluster = %cluster_name))]
    pub async fn seed(&self, cluster_name: &str) -> Report {
        let mut report = Report::default();
        for group in CLUSTER_GROUPS {
            let obj = cluster_group(cluster_name, group);
            let (obj, outcome) = super::get_or_create(&self.groups, "alert group", obj).await;
            report.record(&self.metrics, &obj, outcome);

            for rule in group.rules {
                let obj = cluster_rule(cluster_name, group.name, rule);
                let (obj, outcome) = super::get_or_create(&self.rules, "alert rule", obj).await;
                report.record(&self.metrics, &obj, outcome);
            }
        }

        tracing::debug!(
            created = report.count(super::Outcome::Created),
            failed = report.count(super::Outcome::Failed),
            "Seeded cluster alerts"
        );
        report
    }
}

fn cluster_group(
    cluster_name: &str,
    group: &GroupTemplate<ClusterCondition>,
) -> ClusterAlertGroup {
    ClusterAlertGroup {
        metadata: ObjectMeta {
            namespace: Some(cluster_name.to_string()),
            name: Some(group.name.to_string()),
            ..Default::default()
        },
        spec: ClusterGroupSpec {
            cluster_name: cluster_name.to_string(),
            common: CommonGroupField {
                display_name: group.display_name.to_string(),
                description: group.description.to_string(),
                timing: group.timing,
            },
            recipients: Vec::new(),
        },
        status: Some(AlertStatus::active()),
    }
}

pub(crate) fn cluster_rule(
    cluster_name: &str,
    group_name: &str,
    rule: &RuleTemplate<ClusterCondition>,
) -> ClusterAlertRule {
    let mut spec = ClusterAlertRuleSpec {
        cluster_name: cluster_name.to_string(),
        group_name: group_id(cluster_name, group_name),
        common: CommonRuleField {
            display_name: rule.display_name.to_string(),
            severity: rule.severity,
            inherited: rule.inherited,
            timing: rule.timing,
        },
        metric_rule: None,
        system_service_rule: None,
        event_rule: None,
    };
    match &rule.condition {
        ClusterCondition::Metric(m) => spec.metric_rule = Some(metric_rule(m)),
        ClusterCondition::SystemService(condition) => {
            spec.system_service_rule = Some(SystemServiceRule {
                condition: condition.to_string(),
            })
        }
        ClusterCondition::Event {
            event_type,
            resource_kind,
        } => {
            spec.event_rule = Some(EventRule {
                event_type: event_type.to_string(),
                resource_kind: resource_kind.to_string(),
            })
        }
    }

    ClusterAlertRule {
        metadata: ObjectMeta {
            namespace: Some(cluster_name.to_string()),
            name: Some(rule.name.to_string()),
            ..Default::default()
        },
        spec,
        status: Some(AlertStatus::active()),
    }
}

pub(super) fn metric_rule(m: &MetricTemplate) -> MetricRule {
    MetricRule {
        expression: m.expression.to_string(),
        description: m.description.to_string(),
        duration: m.duration.to_string(),
        comparison: m.comparison,
        threshold_value: m.threshold,
    }
}
