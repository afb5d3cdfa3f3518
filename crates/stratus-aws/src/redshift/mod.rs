//! Redshift clusters
//!
//! ModifyCluster rejects some combinations of changes, so drift is split into
//! patch groups and issued one request at a time:
//!
//! | priority | group                 | exclusive |
//! |----------|-----------------------|-----------|
//! | 0        | rename                | yes       |
//! | 1        | resize                | yes       |
//! | 2        | public accessibility  | yes       |
//! | 3        | general modifications | no        |
//! | 4        | tags                  | no        |
//!
//! The remaining groups are picked up after a short requeue.

mod api;
mod crd;

pub use api::{FinalSnapshot, ModifyCluster, ObservedCluster, RedshiftApi, SdkRedshift};
pub use crd::{
    Cluster, ClusterEndpoint, ClusterObservation, ClusterParameters, ClusterSpec, ClusterStatus,
};

use crate::config::secret_value;
use async_trait::async_trait;
use aws_config::SdkConfig;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeSet;
use std::sync::Arc;
use stratus_core::conditions::Condition;
use stratus_core::drift::{
    cluster_type_for_nodes, diff_tags, is_up_to_date, late_init, late_init_string, late_init_vec,
    plan_patch, PatchGroup, TagDiff,
};
use stratus_core::error::{ProviderError, Result};
use stratus_core::external::{
    ExternalClient, ExternalCreation, ExternalDeletion, ExternalObservation, ExternalUpdate,
    HookedClient, Hooks,
};
use stratus_core::publisher::{generate_password, insert_detail, keys, ConnectionDetails};
use stratus_core::store::StoreSet;
use tracing::{debug, info};

const PASSWORD_LENGTH: usize = 27;

/// One unit of a cluster update
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterPatch {
    Modify(ModifyCluster),
    Tags(TagDiff),
}

fn group(priority: u8, name: &'static str, exclusive: bool, patch: ClusterPatch) -> PatchGroup<ClusterPatch> {
    PatchGroup {
        priority,
        name,
        exclusive,
        patch,
    }
}

/// Cluster type the spec asks for
fn desired_cluster_type(params: &ClusterParameters) -> Option<String> {
    params
        .cluster_type
        .clone()
        .or_else(|| params.number_of_nodes.map(|n| cluster_type_for_nodes(n).to_string()))
}

fn differs<T: PartialEq>(desired: &Option<T>, observed: &Option<T>) -> bool {
    !is_up_to_date(desired.as_ref(), observed.as_ref())
}

fn security_groups_differ(desired: &[String], observed: &[String]) -> bool {
    !desired.is_empty()
        && desired.iter().collect::<BTreeSet<_>>() != observed.iter().collect::<BTreeSet<_>>()
}

/// The master password is write-only in Redshift and never compared.
fn general_patch(p: &ClusterParameters, o: &ObservedCluster) -> ModifyCluster {
    let mut patch = ModifyCluster::default();
    macro_rules! diff {
        ($($field:ident),*) => {
            $(if differs(&p.$field, &o.$field) { patch.$field = p.$field.clone(); })*
        };
    }
    diff!(
        allow_version_upgrade,
        automated_snapshot_retention_period,
        manual_snapshot_retention_period,
        preferred_maintenance_window,
        cluster_version,
        enhanced_vpc_routing,
        cluster_parameter_group_name,
        encrypted,
        kms_key_id
    );
    if security_groups_differ(&p.vpc_security_group_ids, &o.vpc_security_group_ids) {
        patch.vpc_security_group_ids = Some(p.vpc_security_group_ids.clone());
    }
    patch
}

/// Every dirty modification group for `cluster` against `observed`
pub fn dirty_groups(cluster: &Cluster, observed: &ObservedCluster) -> Vec<PatchGroup<ClusterPatch>> {
    let p = &cluster.spec.for_provider;
    let mut groups = Vec::new();

    if let Some(new_id) = p
        .new_cluster_identifier
        .as_ref()
        .filter(|id| **id != cluster.cluster_identifier())
    {
        groups.push(group(
            0,
            "rename",
            true,
            ClusterPatch::Modify(ModifyCluster {
                new_cluster_identifier: Some(new_id.clone()),
                ..Default::default()
            }),
        ));
    }

    let observed_type = cluster_type_for_nodes(observed.number_of_nodes.unwrap_or(1)).to_string();
    let cluster_type = desired_cluster_type(p);
    if differs(&p.node_type, &observed.node_type)
        || differs(&p.number_of_nodes, &observed.number_of_nodes)
        || differs(&cluster_type, &Some(observed_type.clone()))
    {
        let cluster_type = cluster_type.unwrap_or(observed_type);
        let number_of_nodes = if cluster_type == "multi-node" {
            p.number_of_nodes.or(observed.number_of_nodes)
        } else {
            None
        };
        groups.push(group(
            1,
            "resize",
            true,
            ClusterPatch::Modify(ModifyCluster {
                cluster_type: Some(cluster_type),
                node_type: p.node_type.clone().or_else(|| observed.node_type.clone()),
                number_of_nodes,
                ..Default::default()
            }),
        ));
    }

    if differs(&p.publicly_accessible, &observed.publicly_accessible) {
        groups.push(group(
            2,
            "public-accessibility",
            true,
            ClusterPatch::Modify(ModifyCluster {
                publicly_accessible: p.publicly_accessible,
                ..Default::default()
            }),
        ));
    }

    let general = general_patch(p, observed);
    if !general.is_empty() {
        groups.push(group(3, "general", false, ClusterPatch::Modify(general)));
    }

    let tags = diff_tags(&p.tags, &observed.tags);
    if !tags.is_empty() {
        groups.push(group(4, "tags", false, ClusterPatch::Tags(tags)));
    }
    groups
}

/// Alphanumeric password with the character classes Redshift requires
fn master_password() -> SecretString {
    loop {
        let candidate = generate_password(PASSWORD_LENGTH);
        let s = candidate.expose_secret();
        if s.chars().any(|c| c.is_ascii_uppercase())
            && s.chars().any(|c| c.is_ascii_lowercase())
            && s.chars().any(|c| c.is_ascii_digit())
        {
            return candidate;
        }
    }
}

fn endpoint_details(observed: &ObservedCluster, username: &str) -> ConnectionDetails {
    let mut details = ConnectionDetails::new();
    if let Some(address) = &observed.endpoint_address {
        insert_detail(&mut details, keys::ENDPOINT, address);
    }
    if let Some(port) = observed.endpoint_port {
        insert_detail(&mut details, keys::PORT, port.to_string());
    }
    insert_detail(&mut details, keys::USERNAME, username);
    details
}

/// Hooks for the Cluster kind
pub struct ClusterHooks {
    api: Arc<dyn RedshiftApi>,
    stores: StoreSet,
}

impl ClusterHooks {
    pub fn new(api: Arc<dyn RedshiftApi>, stores: StoreSet) -> Self {
        Self { api, stores }
    }

    async fn arn(&self, cluster: &Cluster) -> Result<String> {
        if let Some(arn) = cluster.status.as_ref().and_then(|s| s.at_provider.arn.clone()) {
            return Ok(arn);
        }
        self.api.cluster_arn(&cluster.cluster_identifier()).await
    }
}

#[async_trait]
impl Hooks<Cluster> for ClusterHooks {
    type Observed = ObservedCluster;

    async fn describe(&self, cluster: &Cluster) -> Result<Option<ObservedCluster>> {
        match self.api.describe_cluster(&cluster.cluster_identifier()).await {
            Ok(observed) => Ok(Some(observed)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn late_initialize(&self, cluster: &mut Cluster, o: &ObservedCluster) -> bool {
        let p = &mut cluster.spec.for_provider;
        let mut changed = false;
        changed |= late_init_string(&mut p.node_type, o.node_type.as_deref());
        changed |= late_init(&mut p.number_of_nodes, o.number_of_nodes);
        changed |= late_init_string(&mut p.db_name, o.db_name.as_deref());
        changed |= late_init(&mut p.port, o.endpoint_port);
        changed |= late_init_string(&mut p.cluster_version, o.cluster_version.as_deref());
        changed |= late_init(&mut p.allow_version_upgrade, o.allow_version_upgrade);
        changed |= late_init(
            &mut p.automated_snapshot_retention_period,
            o.automated_snapshot_retention_period,
        );
        changed |= late_init(
            &mut p.manual_snapshot_retention_period,
            o.manual_snapshot_retention_period,
        );
        changed |= late_init_string(
            &mut p.preferred_maintenance_window,
            o.preferred_maintenance_window.as_deref(),
        );
        changed |= late_init(&mut p.publicly_accessible, o.publicly_accessible);
        changed |= late_init(&mut p.encrypted, o.encrypted);
        changed |= late_init_string(&mut p.kms_key_id, o.kms_key_id.as_deref());
        changed |= late_init(&mut p.enhanced_vpc_routing, o.enhanced_vpc_routing);
        changed |= late_init_string(
            &mut p.cluster_parameter_group_name,
            o.cluster_parameter_group_name.as_deref(),
        );
        changed |= late_init_string(
            &mut p.cluster_subnet_group_name,
            o.cluster_subnet_group_name.as_deref(),
        );
        changed |= late_init_string(&mut p.availability_zone, o.availability_zone.as_deref());
        changed |= late_init_vec(&mut p.vpc_security_group_ids, &o.vpc_security_group_ids);
        changed
    }

    async fn is_up_to_date(&self, cluster: &Cluster, observed: &ObservedCluster) -> Result<bool> {
        let groups = dirty_groups(cluster, observed);
        if !groups.is_empty() {
            debug!(
                cluster = %cluster.cluster_identifier(),
                groups = ?groups.iter().map(|g| g.name).collect::<Vec<_>>(),
                "Cluster drifted"
            );
        }
        Ok(groups.is_empty())
    }

    async fn post_observe(
        &self,
        cluster: &mut Cluster,
        observed: &ObservedCluster,
        observation: ExternalObservation,
    ) -> Result<ExternalObservation> {
        let arn = match cluster.status.as_ref().and_then(|s| s.at_provider.arn.clone()) {
            Some(arn) if observed.identifier == cluster.cluster_identifier() => arn,
            _ => self.api.cluster_arn(&observed.identifier).await?,
        };
        cluster.status.get_or_insert_with(Default::default).at_provider = ClusterObservation {
            cluster_status: Some(observed.status.clone()),
            cluster_availability_status: observed.availability_status.clone(),
            arn: Some(arn),
            endpoint: Some(ClusterEndpoint {
                address: observed.endpoint_address.clone(),
                port: observed.endpoint_port,
            }),
            vpc_id: observed.vpc_id.clone(),
            cluster_create_time: observed.create_time.clone(),
        };

        let details = endpoint_details(observed, &cluster.spec.for_provider.master_username);
        let late_initialized = observation.resource_late_initialized;
        let busy = |ready| ExternalObservation {
            resource_late_initialized: late_initialized,
            ..ExternalObservation::in_progress(true, ready)
        };
        let observation = match observed.status.as_str() {
            "available" => observation,
            "creating" => busy(Condition::creating()),
            "deleting" => busy(Condition::deleting()),
            other => busy(Condition::unavailable(format!("cluster is {other}"))),
        };
        Ok(observation.with_connection_details(details))
    }

    async fn create(&self, cluster: &mut Cluster) -> Result<ExternalCreation> {
        let p = &cluster.spec.for_provider;
        if p.node_type.is_none() {
            return Err(ProviderError::Validation(
                "nodeType: required to create a cluster".to_string(),
            ));
        }
        let password = match &p.master_password_secret_ref {
            Some(selector) => secret_value(&self.stores, selector).await?,
            None => master_password(),
        };
        let cluster_type = desired_cluster_type(p).unwrap_or_else(|| "single-node".to_string());
        let created = self
            .api
            .create_cluster(&cluster.cluster_identifier(), p, &cluster_type, &password)
            .await?;

        let mut details = endpoint_details(&created, &p.master_username);
        insert_detail(&mut details, keys::PASSWORD, password.expose_secret());
        Ok(ExternalCreation {
            connection_details: details,
            ..Default::default()
        })
    }

    async fn update(
        &self,
        cluster: &mut Cluster,
        observed: Option<&ObservedCluster>,
    ) -> Result<ExternalUpdate> {
        let described;
        let observed = match observed {
            Some(observed) => observed,
            None => {
                described = self
                    .api
                    .describe_cluster(&cluster.cluster_identifier())
                    .await?;
                &described
            }
        };

        let plan = plan_patch(dirty_groups(cluster, observed));
        let mut modify = ModifyCluster::default();
        let mut tags = None;
        for g in plan.groups {
            debug!(cluster = %cluster.cluster_identifier(), group = g.name, "Applying patch group");
            match g.patch {
                ClusterPatch::Modify(patch) => modify.merge(patch),
                ClusterPatch::Tags(diff) => tags = Some(diff),
            }
        }

        let current = cluster.cluster_identifier();
        let mut external_name = None;
        if !modify.is_empty() {
            self.api.modify_cluster(&current, &modify).await?;
            if let Some(new_id) = modify.new_cluster_identifier {
                info!(from = %current, to = %new_id, "Renamed cluster");
                cluster.status.get_or_insert_with(Default::default).at_provider.arn = None;
                external_name = Some(new_id);
            }
        }
        if let Some(diff) = tags {
            let arn = self.arn(cluster).await?;
            if !diff.remove.is_empty() {
                self.api.delete_tags(&arn, &diff.remove).await?;
            }
            if !diff.add.is_empty() {
                self.api.create_tags(&arn, &diff.add).await?;
            }
        }

        Ok(ExternalUpdate {
            external_name,
            remaining: plan.remaining,
            ..Default::default()
        })
    }

    async fn pre_delete(&self, cluster: &mut Cluster) -> Result<()> {
        let p = &cluster.spec.for_provider;
        if !p.skip_final_cluster_snapshot && p.final_cluster_snapshot_identifier.is_none() {
            return Err(ProviderError::Validation(
                "finalClusterSnapshotIdentifier: required unless skipFinalClusterSnapshot is set"
                    .to_string(),
            ));
        }
        Ok(())
    }

    async fn delete(
        &self,
        cluster: &mut Cluster,
        _observed: Option<&ObservedCluster>,
    ) -> Result<ExternalDeletion> {
        let p = &cluster.spec.for_provider;
        let snapshot = match (&p.final_cluster_snapshot_identifier, p.skip_final_cluster_snapshot) {
            (Some(identifier), false) => FinalSnapshot::Take {
                identifier: identifier.clone(),
                retention_period: p.final_cluster_snapshot_retention_period,
            },
            _ => FinalSnapshot::Skip,
        };
        self.api
            .delete_cluster(&cluster.cluster_identifier(), &snapshot)
            .await?;
        // Gone once DescribeClusters stops finding it
        Ok(ExternalDeletion::default())
    }
}

/// External client for Clusters over an SDK config
pub fn client(sdk: &SdkConfig, stores: &StoreSet) -> Box<dyn ExternalClient<Cluster>> {
    let region = sdk.region().map(|r| r.to_string()).unwrap_or_default();
    let api = SdkRedshift::new(
        aws_sdk_redshift::Client::new(sdk),
        aws_sdk_sts::Client::new(sdk),
        region,
    );
    Box::new(HookedClient::new(ClusterHooks::new(
        Arc::new(api),
        stores.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use stratus_core::resource::set_external_name;

    fn cluster() -> Cluster {
        let mut c = Cluster::new(
            "warehouse",
            ClusterSpec {
                for_provider: ClusterParameters {
                    region: "us-east-1".into(),
                    master_username: "admin".into(),
                    node_type: Some("ra3.xlplus".into()),
                    number_of_nodes: Some(1),
                    allow_version_upgrade: Some(false),
                    ..Default::default()
                },
                resource: Default::default(),
            },
        );
        set_external_name(&mut c, "prod-a");
        c
    }

    fn observed() -> ObservedCluster {
        ObservedCluster {
            identifier: "prod-a".into(),
            status: "available".into(),
            node_type: Some("ra3.xlplus".into()),
            number_of_nodes: Some(1),
            allow_version_upgrade: Some(false),
            ..Default::default()
        }
    }

    fn names(groups: &[PatchGroup<ClusterPatch>]) -> Vec<&'static str> {
        groups.iter().map(|g| g.name).collect()
    }

    #[test]
    fn test_in_sync_has_no_groups() {
        assert!(dirty_groups(&cluster(), &observed()).is_empty());
    }

    #[test]
    fn test_rename_is_sent_alone() {
        let mut c = cluster();
        c.spec.for_provider.new_cluster_identifier = Some("prod-b".into());
        c.spec.for_provider.allow_version_upgrade = Some(true);
        c.spec.for_provider.number_of_nodes = Some(3);

        let plan = plan_patch(dirty_groups(&c, &observed()));
        assert_eq!(names(&plan.groups), vec!["rename"]);
        assert!(plan.remaining);
        assert_eq!(
            plan.groups[0].patch,
            ClusterPatch::Modify(ModifyCluster {
                new_cluster_identifier: Some("prod-b".into()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_resize_carries_shape_only() {
        let mut c = cluster();
        c.spec.for_provider.number_of_nodes = Some(3);
        c.spec.for_provider.allow_version_upgrade = Some(true);

        let groups = dirty_groups(&c, &observed());
        assert_eq!(names(&groups), vec!["resize", "general"]);
        let plan = plan_patch(groups);
        assert_eq!(
            plan.groups[0].patch,
            ClusterPatch::Modify(ModifyCluster {
                cluster_type: Some("multi-node".into()),
                node_type: Some("ra3.xlplus".into()),
                number_of_nodes: Some(3),
                ..Default::default()
            })
        );
        assert!(plan.remaining);
    }

    #[test]
    fn test_general_and_tags_go_together() {
        let mut c = cluster();
        c.spec.for_provider.automated_snapshot_retention_period = Some(7);
        c.spec.for_provider.tags = BTreeMap::from([("env".to_string(), "prod".to_string())]);

        let plan = plan_patch(dirty_groups(&c, &observed()));
        assert_eq!(names(&plan.groups), vec!["general", "tags"]);
        assert!(!plan.remaining);
    }

    #[test]
    fn test_cluster_type_derived_from_nodes() {
        let mut o = observed();
        o.number_of_nodes = Some(2);
        let mut c = cluster();
        c.spec.for_provider.number_of_nodes = Some(2);
        assert!(dirty_groups(&c, &o).is_empty());

        c.spec.for_provider.cluster_type = Some("multi-node".into());
        assert!(dirty_groups(&c, &o).is_empty());
    }

    #[test]
    fn test_security_groups_compared_as_sets() {
        let mut o = observed();
        o.vpc_security_group_ids = vec!["sg-2".into(), "sg-1".into()];
        let mut c = cluster();
        c.spec.for_provider.vpc_security_group_ids = vec!["sg-1".into(), "sg-2".into()];
        assert!(dirty_groups(&c, &o).is_empty());
    }

    #[test]
    fn test_generated_password_shape() {
        let password = master_password();
        let s = password.expose_secret();
        assert_eq!(s.len(), PASSWORD_LENGTH);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
