//! The Redshift calls the Cluster adapter makes

use super::crd::ClusterParameters;
use crate::error::classify;
use async_trait::async_trait;
use aws_sdk_redshift::types::{Cluster as SdkCluster, Tag};
use aws_sdk_redshift::Client;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use stratus_core::error::{ProviderError, Result};
use tokio::sync::OnceCell;

/// What DescribeClusters reports about one cluster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedCluster {
    pub identifier: String,
    pub status: String,
    pub availability_status: Option<String>,
    pub node_type: Option<String>,
    pub number_of_nodes: Option<i32>,
    pub master_username: Option<String>,
    pub db_name: Option<String>,
    pub endpoint_address: Option<String>,
    pub endpoint_port: Option<i32>,
    pub cluster_version: Option<String>,
    pub allow_version_upgrade: Option<bool>,
    pub automated_snapshot_retention_period: Option<i32>,
    pub manual_snapshot_retention_period: Option<i32>,
    pub preferred_maintenance_window: Option<String>,
    pub publicly_accessible: Option<bool>,
    pub encrypted: Option<bool>,
    pub kms_key_id: Option<String>,
    pub enhanced_vpc_routing: Option<bool>,
    pub cluster_parameter_group_name: Option<String>,
    pub cluster_subnet_group_name: Option<String>,
    pub availability_zone: Option<String>,
    pub vpc_id: Option<String>,
    pub vpc_security_group_ids: Vec<String>,
    pub iam_roles: Vec<String>,
    pub create_time: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// Fields of one ModifyCluster request; unset fields are not sent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModifyCluster {
    pub new_cluster_identifier: Option<String>,
    pub cluster_type: Option<String>,
    pub node_type: Option<String>,
    pub number_of_nodes: Option<i32>,
    pub publicly_accessible: Option<bool>,
    pub allow_version_upgrade: Option<bool>,
    pub automated_snapshot_retention_period: Option<i32>,
    pub manual_snapshot_retention_period: Option<i32>,
    pub preferred_maintenance_window: Option<String>,
    pub cluster_version: Option<String>,
    pub enhanced_vpc_routing: Option<bool>,
    pub cluster_parameter_group_name: Option<String>,
    pub vpc_security_group_ids: Option<Vec<String>>,
    pub encrypted: Option<bool>,
    pub kms_key_id: Option<String>,
}

impl ModifyCluster {
    /// Fold `other` into this request; fields set in `other` win
    pub fn merge(&mut self, other: ModifyCluster) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            new_cluster_identifier,
            cluster_type,
            node_type,
            number_of_nodes,
            publicly_accessible,
            allow_version_upgrade,
            automated_snapshot_retention_period,
            manual_snapshot_retention_period,
            preferred_maintenance_window,
            cluster_version,
            enhanced_vpc_routing,
            cluster_parameter_group_name,
            vpc_security_group_ids,
            encrypted,
            kms_key_id
        );
    }

    pub fn is_empty(&self) -> bool {
        *self == ModifyCluster::default()
    }
}

/// Final snapshot handling for DeleteCluster
#[derive(Debug, Clone, PartialEq)]
pub enum FinalSnapshot {
    Skip,
    Take {
        identifier: String,
        retention_period: Option<i32>,
    },
}

#[async_trait]
pub trait RedshiftApi: Send + Sync {
    /// `NotFound` when no cluster has the identifier
    async fn describe_cluster(&self, identifier: &str) -> Result<ObservedCluster>;

    async fn create_cluster(
        &self,
        identifier: &str,
        params: &ClusterParameters,
        cluster_type: &str,
        master_password: &SecretString,
    ) -> Result<ObservedCluster>;

    async fn modify_cluster(&self, identifier: &str, patch: &ModifyCluster) -> Result<()>;

    async fn delete_cluster(&self, identifier: &str, snapshot: &FinalSnapshot) -> Result<()>;

    async fn create_tags(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<()>;

    async fn delete_tags(&self, arn: &str, keys: &[String]) -> Result<()>;

    /// ARN of the cluster, which DescribeClusters does not report
    async fn cluster_arn(&self, identifier: &str) -> Result<String>;
}

/// [`RedshiftApi`] over the AWS SDK; the account id comes from STS
pub struct SdkRedshift {
    client: Client,
    sts: aws_sdk_sts::Client,
    region: String,
    account: OnceCell<String>,
}

impl SdkRedshift {
    pub fn new(client: Client, sts: aws_sdk_sts::Client, region: impl Into<String>) -> Self {
        Self {
            client,
            sts,
            region: region.into(),
            account: OnceCell::new(),
        }
    }

    async fn account_id(&self) -> Result<&str> {
        let account = self
            .account
            .get_or_try_init(|| async {
                let out = self
                    .sts
                    .get_caller_identity()
                    .send()
                    .await
                    .map_err(classify)?;
                out.account().map(str::to_string).ok_or_else(|| {
                    ProviderError::Auth("caller identity has no account id".to_string())
                })
            })
            .await?;
        Ok(account.as_str())
    }
}

fn sdk_tags(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

fn observed(cluster: &SdkCluster) -> ObservedCluster {
    let endpoint = cluster.endpoint();
    ObservedCluster {
        identifier: cluster.cluster_identifier().unwrap_or_default().to_string(),
        status: cluster.cluster_status().unwrap_or_default().to_string(),
        availability_status: cluster.cluster_availability_status().map(str::to_string),
        node_type: cluster.node_type().map(str::to_string),
        number_of_nodes: cluster.number_of_nodes(),
        master_username: cluster.master_username().map(str::to_string),
        db_name: cluster.db_name().map(str::to_string),
        endpoint_address: endpoint.and_then(|e| e.address()).map(str::to_string),
        endpoint_port: endpoint.and_then(|e| e.port()),
        cluster_version: cluster.cluster_version().map(str::to_string),
        allow_version_upgrade: cluster.allow_version_upgrade(),
        automated_snapshot_retention_period: cluster.automated_snapshot_retention_period(),
        manual_snapshot_retention_period: cluster.manual_snapshot_retention_period(),
        preferred_maintenance_window: cluster.preferred_maintenance_window().map(str::to_string),
        publicly_accessible: cluster.publicly_accessible(),
        encrypted: cluster.encrypted(),
        kms_key_id: cluster.kms_key_id().map(str::to_string),
        enhanced_vpc_routing: cluster.enhanced_vpc_routing(),
        cluster_parameter_group_name: cluster
            .cluster_parameter_groups()
            .first()
            .and_then(|g| g.parameter_group_name())
            .map(str::to_string),
        cluster_subnet_group_name: cluster.cluster_subnet_group_name().map(str::to_string),
        availability_zone: cluster.availability_zone().map(str::to_string),
        vpc_id: cluster.vpc_id().map(str::to_string),
        vpc_security_group_ids: cluster
            .vpc_security_groups()
            .iter()
            .filter_map(|g| g.vpc_security_group_id())
            .map(str::to_string)
            .collect(),
        iam_roles: cluster
            .iam_roles()
            .iter()
            .filter_map(|r| r.iam_role_arn())
            .map(str::to_string)
            .collect(),
        create_time: cluster.cluster_create_time().map(|t| t.to_string()),
        tags: cluster
            .tags()
            .iter()
            .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
            .collect(),
    }
}

#[async_trait]
impl RedshiftApi for SdkRedshift {
    async fn describe_cluster(&self, identifier: &str) -> Result<ObservedCluster> {
        let out = self
            .client
            .describe_clusters()
            .cluster_identifier(identifier)
            .send()
            .await
            .map_err(classify)?;
        out.clusters()
            .first()
            .map(observed)
            .ok_or_else(|| ProviderError::NotFound(format!("cluster {identifier}")))
    }

    async fn create_cluster(
        &self,
        identifier: &str,
        params: &ClusterParameters,
        cluster_type: &str,
        master_password: &SecretString,
    ) -> Result<ObservedCluster> {
        let multi_node = cluster_type == "multi-node";
        let out = self
            .client
            .create_cluster()
            .cluster_identifier(identifier)
            .cluster_type(cluster_type)
            .set_node_type(params.node_type.clone())
            .set_number_of_nodes(params.number_of_nodes.filter(|_| multi_node))
            .master_username(&params.master_username)
            .master_user_password(master_password.expose_secret())
            .set_db_name(params.db_name.clone())
            .set_port(params.port)
            .set_cluster_version(params.cluster_version.clone())
            .set_allow_version_upgrade(params.allow_version_upgrade)
            .set_automated_snapshot_retention_period(params.automated_snapshot_retention_period)
            .set_manual_snapshot_retention_period(params.manual_snapshot_retention_period)
            .set_preferred_maintenance_window(params.preferred_maintenance_window.clone())
            .set_publicly_accessible(params.publicly_accessible)
            .set_encrypted(params.encrypted)
            .set_kms_key_id(params.kms_key_id.clone())
            .set_enhanced_vpc_routing(params.enhanced_vpc_routing)
            .set_cluster_parameter_group_name(params.cluster_parameter_group_name.clone())
            .set_cluster_subnet_group_name(params.cluster_subnet_group_name.clone())
            .set_availability_zone(params.availability_zone.clone())
            .set_vpc_security_group_ids(
                (!params.vpc_security_group_ids.is_empty())
                    .then(|| params.vpc_security_group_ids.clone()),
            )
            .set_iam_roles((!params.iam_roles.is_empty()).then(|| params.iam_roles.clone()))
            .set_tags((!params.tags.is_empty()).then(|| sdk_tags(&params.tags)))
            .send()
            .await
            .map_err(classify)?;
        Ok(out.cluster().map(observed).unwrap_or_default())
    }

    async fn modify_cluster(&self, identifier: &str, patch: &ModifyCluster) -> Result<()> {
        self.client
            .modify_cluster()
            .cluster_identifier(identifier)
            .set_new_cluster_identifier(patch.new_cluster_identifier.clone())
            .set_cluster_type(patch.cluster_type.clone())
            .set_node_type(patch.node_type.clone())
            .set_number_of_nodes(patch.number_of_nodes)
            .set_publicly_accessible(patch.publicly_accessible)
            .set_allow_version_upgrade(patch.allow_version_upgrade)
            .set_automated_snapshot_retention_period(patch.automated_snapshot_retention_period)
            .set_manual_snapshot_retention_period(patch.manual_snapshot_retention_period)
            .set_preferred_maintenance_window(patch.preferred_maintenance_window.clone())
            .set_cluster_version(patch.cluster_version.clone())
            .set_enhanced_vpc_routing(patch.enhanced_vpc_routing)
            .set_cluster_parameter_group_name(patch.cluster_parameter_group_name.clone())
            .set_vpc_security_group_ids(patch.vpc_security_group_ids.clone())
            .set_encrypted(patch.encrypted)
            .set_kms_key_id(patch.kms_key_id.clone())
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_cluster(&self, identifier: &str, snapshot: &FinalSnapshot) -> Result<()> {
        let request = self.client.delete_cluster().cluster_identifier(identifier);
        let request = match snapshot {
            FinalSnapshot::Skip => request.skip_final_cluster_snapshot(true),
            FinalSnapshot::Take {
                identifier,
                retention_period,
            } => request
                .skip_final_cluster_snapshot(false)
                .final_cluster_snapshot_identifier(identifier)
                .set_final_cluster_snapshot_retention_period(*retention_period),
        };
        request.send().await.map_err(classify)?;
        Ok(())
    }

    async fn create_tags(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        self.client
            .create_tags()
            .resource_name(arn)
            .set_tags(Some(sdk_tags(tags)))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_tags(&self, arn: &str, keys: &[String]) -> Result<()> {
        self.client
            .delete_tags()
            .resource_name(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn cluster_arn(&self, identifier: &str) -> Result<String> {
        let account = self.account_id().await?;
        Ok(format!(
            "arn:aws:redshift:{}:{account}:cluster:{identifier}",
            self.region
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_both_sides() {
        let mut a = ModifyCluster {
            allow_version_upgrade: Some(true),
            ..Default::default()
        };
        a.merge(ModifyCluster {
            automated_snapshot_retention_period: Some(7),
            ..Default::default()
        });
        assert_eq!(a.allow_version_upgrade, Some(true));
        assert_eq!(a.automated_snapshot_retention_period, Some(7));
        assert!(!a.is_empty());
        assert!(ModifyCluster::default().is_empty());
    }
}
