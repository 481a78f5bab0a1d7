use super::{
    cluster::metric_rule,
    table::{ProjectCondition, RuleTemplate, PROJECT_GROUP},
    Report,
};
use crate::{
    lifecycle::Lifecycle,
    metrics::Metrics,
    resource::{
        group_id, AlertStatus, CommonGroupField, CommonRuleField, Project, ProjectAlertGroup,
        ProjectAlertRule, ProjectAlertRuleSpec, ProjectGroupSpec, WorkloadRule,
    },
    store::ObjectStore,
};
use async_trait::async_trait;
use kube::{core::ObjectMeta, ResourceExt};
use std::convert::Infallible;

/// The name under which the project lifecycle records that a project was handled
pub const PROJECT_LIFECYCLE: &str = "project-precan-alert-controller";

/// Seeds the built-in project alert group and rules when a project is created
///
/// Project alerts live in a namespace named after the project and refer to the
/// project by its id, `<cluster>:<project>`.
#[derive(Clone, Debug)]
pub struct ProjectLifecycle<G, R> {
    groups: G,
    rules: R,
    metrics: Metrics,
}

impl<G, R> ProjectLifecycle<G, R>
where
    G: ObjectStore<ProjectAlertGroup>,
    R: ObjectStore<ProjectAlertRule>,
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

    /// Creates the project's alert group and rules, leaving existing ones alone.
    #[tracing::instrument(skip_all, fields(project = %project.name_any()))]
    pub async fn seed(&self, project: &Project) -> Report {
        let namespace = project.name_any();
        let project_id = group_id(&project.namespace().unwrap_or_default(), &namespace);
        let mut report = Report::default();

        let group = ProjectAlertGroup {
            metadata: ObjectMeta {
                namespace: Some(namespace.clone()),
                name: Some(PROJECT_GROUP.name.to_string()),
                ..Default::default()
            },
            spec: ProjectGroupSpec {
                project_name: project_id.clone(),
                common: CommonGroupField {
                    display_name: PROJECT_GROUP.display_name.to_string(),
                    description: PROJECT_GROUP.description.to_string(),
                    timing: PROJECT_GROUP.timing,
                },
                recipients: Vec::new(),
            },
            status: Some(AlertStatus::active()),
        };
        let (group, outcome) = super::create(&self.groups, "alert group", group).await;
        report.record(&self.metrics, &group, outcome);

        for rule in PROJECT_GROUP.rules {
            let obj = project_rule(&namespace, &project_id, rule);
            let (obj, outcome) = super::create(&self.rules, "alert rule", obj).await;
            report.record(&self.metrics, &obj, outcome);
        }

        report
    }
}

#[async_trait]
impl<G, R> Lifecycle<Project> for ProjectLifecycle<G, R>
where
    G: ObjectStore<ProjectAlertGroup>,
    R: ObjectStore<ProjectAlertRule>,
{
    type Error = Infallible;

    async fn create(&self, project: &Project) -> Result<(), Infallible> {
        self.seed(project).await;
        Ok(())
    }
}

fn project_rule(
    namespace: &str,
    project_id: &str,
    rule: &RuleTemplate<ProjectCondition>,
) -> ProjectAlertRule {
    let mut spec = ProjectAlertRuleSpec {
        project_name: project_id.to_string(),
        group_name: group_id(namespace, PROJECT_GROUP.name),
        common: CommonRuleField {
            display_name: rule.display_name.to_string(),
            severity: rule.severity,
            inherited: rule.inherited,
            timing: rule.timing,
        },
        metric_rule: None,
        workload_rule: None,
    };
    match &rule.condition {
        ProjectCondition::Metric(m) => spec.metric_rule = Some(metric_rule(m)),
        ProjectCondition::Workload {
            selector,
            available_percentage,
        } => {
            spec.workload_rule = Some(WorkloadRule {
                workload_id: String::new(),
                selector: selector
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                available_percentage: *available_percentage,
            })
        }
    }

    ProjectAlertRule {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(rule.name.to_string()),
            ..Default::default()
        },
        spec,
        status: Some(AlertStatus::active()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        precan::Outcome,
        resource::{Comparison, ProjectSpec, Severity},
        store::InMemory,
    };
    use maplit::{btreemap, convert_args};
    use std::sync::Arc;

    type Groups = Arc<InMemory<ProjectAlertGroup>>;
    type Rules = Arc<InMemory<ProjectAlertRule>>;

    fn lifecycle() -> (Groups, Rules, ProjectLifecycle<Groups, Rules>) {
        let groups = Groups::default();
        let rules = Rules::default();
        let lifecycle = ProjectLifecycle::new(groups.clone(), rules.clone());
        (groups, rules, lifecycle)
    }

    fn project() -> Project {
        let mut project = Project::new(
            "p-xyz12",
            ProjectSpec {
                display_name: "Default".to_string(),
                cluster_name: "c-abcde".to_string(),
                ..Default::default()
            },
        );
        project.metadata.namespace = Some("c-abcde".to_string());
        project
    }

    #[tokio::test]
    async fn seeds_project_alerts() {
        let (groups, rules, lifecycle) = lifecycle();
        let report = lifecycle.seed(&project()).await;
        assert_eq!(report.count(Outcome::Created), 3);

        let group = groups
            .peek("p-xyz12", "projectalert-workload-alert")
            .expect("group");
        assert_eq!(group.spec.project_name, "c-abcde:p-xyz12");
        assert_eq!(
            group.spec.common.display_name,
            "A set of alerts for workload, pod, container"
        );

        let rule = rules
            .peek("p-xyz12", "less-than-half-workload-available")
            .expect("workload rule");
        assert_eq!(rule.spec.group_name, "p-xyz12:projectalert-workload-alert");
        assert_eq!(rule.spec.project_name, "c-abcde:p-xyz12");
        assert_eq!(rule.spec.common.severity, Severity::Critical);
        let workload = rule.spec.workload_rule.expect("workload");
        assert_eq!(workload.selector, convert_args!(btreemap!("app" => "workload")));
        assert_eq!(workload.available_percentage, 50);

        let rule = rules
            .peek("p-xyz12", "memory-close-to-resource-limited")
            .expect("memory rule");
        assert_eq!(rule.spec.common.severity, Severity::Warning);
        let metric = rule.spec.metric_rule.expect("metric");
        assert_eq!(metric.comparison, Comparison::GreaterThan);
        assert_eq!(metric.duration, "3m");
        assert_eq!(metric.threshold_value, 1.0);
    }

    #[tokio::test]
    async fn conflicts_are_tolerated() {
        let (groups, rules, lifecycle) = lifecycle();
        lifecycle.seed(&project()).await;
        let report = lifecycle.seed(&project()).await;

        assert_eq!(report.count(Outcome::Existing), 3);
        assert_eq!(groups.len(), 1);
        assert_eq!(rules.len(), 2);
    }

    #[tokio::test]
    async fn create_never_fails() {
        let (groups, rules, lifecycle) = lifecycle();
        groups.fail_creates("connection refused");

        lifecycle.create(&project()).await.expect("infallible");
        assert!(groups.is_empty());
        assert_eq!(rules.len(), 2);

        rules.fail_creates("connection refused");
        let report = lifecycle.seed(&project()).await;
        assert_eq!(report.count(Outcome::Failed), 3);
    }

    #[tokio::test]
    async fn driven_under_its_lifecycle_name() {
        let (_, rules, lifecycle) = lifecycle();
        let projects = Arc::new(InMemory::with_objects([project()]));
        let driver = crate::lifecycle::Driver::new(PROJECT_LIFECYCLE, lifecycle, projects.clone());
        assert_eq!(
            driver.annotation(),
            "lifecycle.cattle.io/create.project-precan-alert-controller"
        );

        driver.applied(&project()).await.expect("create");
        let marked = projects.peek("c-abcde", "p-xyz12").expect("project");
        assert_eq!(
            marked.annotations().get(driver.annotation()).map(String::as_str),
            Some("true")
        );
        assert_eq!(rules.len(), 2);
    }
}
