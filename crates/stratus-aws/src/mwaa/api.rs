//! The MWAA calls the Environment adapter makes

use super::crd::EnvironmentParameters;
use crate::error::classify;
use async_trait::async_trait;
use aws_sdk_mwaa::types::{NetworkConfiguration, UpdateNetworkConfigurationInput, WebserverAccessMode};
use aws_sdk_mwaa::Client;
use secrecy::SecretString;
use std::collections::{BTreeMap, HashMap};
use stratus_core::error::{ProviderError, Result};

/// What GetEnvironment reports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedEnvironment {
    pub name: String,
    pub arn: String,
    pub status: String,
    pub webserver_url: Option<String>,
    pub execution_role_arn: Option<String>,
    pub source_bucket_arn: Option<String>,
    pub dag_s3_path: Option<String>,
    pub airflow_version: Option<String>,
    pub environment_class: Option<String>,
    pub max_workers: Option<i32>,
    pub min_workers: Option<i32>,
    pub schedulers: Option<i32>,
    pub kms_key: Option<String>,
    pub plugins_s3_path: Option<String>,
    pub requirements_s3_path: Option<String>,
    pub startup_script_s3_path: Option<String>,
    pub webserver_access_mode: Option<String>,
    pub weekly_maintenance_window_start: Option<String>,
    pub security_group_ids: Vec<String>,
    pub airflow_configuration_options: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub created_at: Option<String>,
}

/// Fields of one UpdateEnvironment request; unset fields are not sent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateEnvironment {
    pub execution_role_arn: Option<String>,
    pub source_bucket_arn: Option<String>,
    pub dag_s3_path: Option<String>,
    pub airflow_version: Option<String>,
    pub environment_class: Option<String>,
    pub max_workers: Option<i32>,
    pub min_workers: Option<i32>,
    pub schedulers: Option<i32>,
    pub plugins_s3_path: Option<String>,
    pub requirements_s3_path: Option<String>,
    pub startup_script_s3_path: Option<String>,
    pub webserver_access_mode: Option<String>,
    pub weekly_maintenance_window_start: Option<String>,
    pub security_group_ids: Option<Vec<String>>,
    pub airflow_configuration_options: Option<BTreeMap<String, String>>,
}

impl UpdateEnvironment {
    pub fn is_empty(&self) -> bool {
        *self == UpdateEnvironment::default()
    }
}

#[async_trait]
pub trait MwaaApi: Send + Sync {
    /// `NotFound` when no environment has the name
    async fn get_environment(&self, name: &str) -> Result<ObservedEnvironment>;

    /// Returns the environment ARN
    async fn create_environment(
        &self,
        name: &str,
        params: &EnvironmentParameters,
    ) -> Result<String>;

    async fn update_environment(&self, name: &str, patch: &UpdateEnvironment) -> Result<()>;

    async fn delete_environment(&self, name: &str) -> Result<()>;

    async fn tag_resource(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<()>;

    async fn untag_resource(&self, arn: &str, keys: &[String]) -> Result<()>;

    async fn create_cli_token(&self, name: &str) -> Result<SecretString>;

    async fn create_web_login_token(&self, name: &str) -> Result<SecretString>;
}

/// [`MwaaApi`] over the AWS SDK
pub struct SdkMwaa {
    client: Client,
}

impl SdkMwaa {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_hash_map(map: &BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    (!map.is_empty()).then(|| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn to_btree_map(map: Option<&HashMap<String, String>>) -> BTreeMap<String, String> {
    map.map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn token(value: Option<&str>, call: &str) -> Result<SecretString> {
    value
        .map(SecretString::from)
        .ok_or_else(|| ProviderError::Transient(format!("{call} returned no token")))
}

#[async_trait]
impl MwaaApi for SdkMwaa {
    async fn get_environment(&self, name: &str) -> Result<ObservedEnvironment> {
        let out = self
            .client
            .get_environment()
            .name(name)
            .send()
            .await
            .map_err(classify)?;
        let env = out
            .environment()
            .ok_or_else(|| ProviderError::NotFound(format!("environment {name}")))?;
        Ok(ObservedEnvironment {
            name: env.name().unwrap_or(name).to_string(),
            arn: env.arn().unwrap_or_default().to_string(),
            status: env
                .status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            webserver_url: env.webserver_url().map(str::to_string),
            execution_role_arn: env.execution_role_arn().map(str::to_string),
            source_bucket_arn: env.source_bucket_arn().map(str::to_string),
            dag_s3_path: env.dag_s3_path().map(str::to_string),
            airflow_version: env.airflow_version().map(str::to_string),
            environment_class: env.environment_class().map(str::to_string),
            max_workers: env.max_workers(),
            min_workers: env.min_workers(),
            schedulers: env.schedulers(),
            kms_key: env.kms_key().map(str::to_string),
            plugins_s3_path: env.plugins_s3_path().map(str::to_string),
            requirements_s3_path: env.requirements_s3_path().map(str::to_string),
            startup_script_s3_path: env.startup_script_s3_path().map(str::to_string),
            webserver_access_mode: env
                .webserver_access_mode()
                .map(|m| m.as_str().to_string()),
            weekly_maintenance_window_start: env
                .weekly_maintenance_window_start()
                .map(str::to_string),
            security_group_ids: env
                .network_configuration()
                .map(|n| n.security_group_ids().to_vec())
                .unwrap_or_default(),
            airflow_configuration_options: to_btree_map(env.airflow_configuration_options()),
            tags: to_btree_map(env.tags()),
            created_at: env.created_at().map(|d| d.to_string()),
        })
    }

    async fn create_environment(
        &self,
        name: &str,
        params: &EnvironmentParameters,
    ) -> Result<String> {
        let network = NetworkConfiguration::builder()
            .set_subnet_ids(Some(params.network_configuration.subnet_ids.clone()))
            .set_security_group_ids(Some(params.network_configuration.security_group_ids.clone()))
            .build();
        let out = self
            .client
            .create_environment()
            .name(name)
            .execution_role_arn(&params.execution_role_arn)
            .source_bucket_arn(&params.source_bucket_arn)
            .dag_s3_path(&params.dag_s3_path)
            .network_configuration(network)
            .set_airflow_version(params.airflow_version.clone())
            .set_environment_class(params.environment_class.clone())
            .set_max_workers(params.max_workers)
            .set_min_workers(params.min_workers)
            .set_schedulers(params.schedulers)
            .set_kms_key(params.kms_key.clone())
            .set_plugins_s3_path(params.plugins_s3_path.clone())
            .set_requirements_s3_path(params.requirements_s3_path.clone())
            .set_startup_script_s3_path(params.startup_script_s3_path.clone())
            .set_webserver_access_mode(
                params
                    .webserver_access_mode
                    .as_deref()
                    .map(WebserverAccessMode::from),
            )
            .set_weekly_maintenance_window_start(params.weekly_maintenance_window_start.clone())
            .set_airflow_configuration_options(to_hash_map(&params.airflow_configuration_options))
            .set_tags(to_hash_map(&params.tags))
            .send()
            .await
            .map_err(classify)?;
        out.arn()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Transient(format!("no ARN returned for environment {name}")))
    }

    async fn update_environment(&self, name: &str, patch: &UpdateEnvironment) -> Result<()> {
        let network = patch
            .security_group_ids
            .clone()
            .map(|groups| {
                UpdateNetworkConfigurationInput::builder()
                    .set_security_group_ids(Some(groups))
                    .build()
                    .map_err(|e| {
                        ProviderError::Internal(format!("cannot build network configuration: {e}"))
                    })
            })
            .transpose()?;
        self.client
            .update_environment()
            .name(name)
            .set_execution_role_arn(patch.execution_role_arn.clone())
            .set_source_bucket_arn(patch.source_bucket_arn.clone())
            .set_dag_s3_path(patch.dag_s3_path.clone())
            .set_airflow_version(patch.airflow_version.clone())
            .set_environment_class(patch.environment_class.clone())
            .set_max_workers(patch.max_workers)
            .set_min_workers(patch.min_workers)
            .set_schedulers(patch.schedulers)
            .set_plugins_s3_path(patch.plugins_s3_path.clone())
            .set_requirements_s3_path(patch.requirements_s3_path.clone())
            .set_startup_script_s3_path(patch.startup_script_s3_path.clone())
            .set_webserver_access_mode(
                patch
                    .webserver_access_mode
                    .as_deref()
                    .map(WebserverAccessMode::from),
            )
            .set_weekly_maintenance_window_start(patch.weekly_maintenance_window_start.clone())
            .set_network_configuration(network)
            .set_airflow_configuration_options(
                patch
                    .airflow_configuration_options
                    .as_ref()
                    .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            )
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_environment(&self, name: &str) -> Result<()> {
        self.client
            .delete_environment()
            .name(name)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn tag_resource(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        self.client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(to_hash_map(tags))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn untag_resource(&self, arn: &str, keys: &[String]) -> Result<()> {
        self.client
            .untag_resource()
            .resource_arn(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_cli_token(&self, name: &str) -> Result<SecretString> {
        let out = self
            .client
            .create_cli_token()
            .name(name)
            .send()
            .await
            .map_err(classify)?;
        token(out.cli_token(), "CreateCliToken")
    }

    async fn create_web_login_token(&self, name: &str) -> Result<SecretString> {
        let out = self
            .client
            .create_web_login_token()
            .name(name)
            .send()
            .await
            .map_err(classify)?;
        token(out.web_token(), "CreateWebLoginToken")
    }
}
