//! MWAA environments
//!
//! Environment changes run for tens of minutes and are tracked through the
//! environment status rather than an operation id. While the environment is
//! busy the resource stays pending; drift is only acted on once it is
//! `AVAILABLE` again or a change has failed.

mod api;
mod crd;

pub use api::{MwaaApi, ObservedEnvironment, SdkMwaa, UpdateEnvironment};
pub use crd::{
    Environment, EnvironmentObservation, EnvironmentParameters, EnvironmentSpec,
    EnvironmentStatus, NetworkConfiguration,
};

use async_trait::async_trait;
use aws_config::SdkConfig;
use secrecy::ExposeSecret;
use std::collections::BTreeSet;
use std::sync::Arc;
use stratus_core::conditions::Condition;
use stratus_core::drift::{diff_tags, late_init, late_init_string};
use stratus_core::error::{ProviderError, Result};
use stratus_core::external::{
    ExternalClient, ExternalCreation, ExternalDeletion, ExternalObservation, ExternalUpdate,
    HookedClient, Hooks,
};
use stratus_core::publisher::{insert_detail, keys, ConnectionDetails};
use stratus_core::store::StoreSet;
use tracing::{debug, info};

/// Where an environment is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
enum EnvironmentState {
    Available,
    /// Being created; nothing to do but wait
    Creating,
    Deleting,
    /// An existing environment in transition, e.g. `UPDATING` or `MAINTENANCE`
    Busy(String),
    /// The last change failed; the environment is usable at best partially
    Failed(String),
    Gone,
}

fn environment_state(status: &str) -> EnvironmentState {
    match status {
        "AVAILABLE" => EnvironmentState::Available,
        "CREATING" | "PENDING" => EnvironmentState::Creating,
        "DELETING" => EnvironmentState::Deleting,
        "DELETED" => EnvironmentState::Gone,
        "CREATE_FAILED" | "UPDATE_FAILED" | "UNAVAILABLE" => {
            EnvironmentState::Failed(format!("environment is {status}"))
        }
        other => EnvironmentState::Busy(format!("environment is {other}")),
    }
}

fn differs<T: PartialEq>(desired: &Option<T>, observed: &Option<T>) -> bool {
    desired.is_some() && desired != observed
}

fn changed<T: PartialEq + Clone>(desired: &Option<T>, observed: &Option<T>) -> Option<T> {
    desired.clone().filter(|_| differs(desired, observed))
}

/// UpdateEnvironment request that brings `observed` to the spec.
///
/// The KMS key cannot change after creation and is not compared.
pub fn environment_patch(
    params: &EnvironmentParameters,
    observed: &ObservedEnvironment,
) -> UpdateEnvironment {
    let some = |s: &String| Some(s.clone());
    let desired_groups: BTreeSet<_> = params.network_configuration.security_group_ids.iter().collect();
    let observed_groups: BTreeSet<_> = observed.security_group_ids.iter().collect();
    let options = &params.airflow_configuration_options;
    UpdateEnvironment {
        execution_role_arn: changed(&some(&params.execution_role_arn), &observed.execution_role_arn),
        source_bucket_arn: changed(&some(&params.source_bucket_arn), &observed.source_bucket_arn),
        dag_s3_path: changed(&some(&params.dag_s3_path), &observed.dag_s3_path),
        airflow_version: changed(&params.airflow_version, &observed.airflow_version),
        environment_class: changed(&params.environment_class, &observed.environment_class),
        max_workers: changed(&params.max_workers, &observed.max_workers),
        min_workers: changed(&params.min_workers, &observed.min_workers),
        schedulers: changed(&params.schedulers, &observed.schedulers),
        plugins_s3_path: changed(&params.plugins_s3_path, &observed.plugins_s3_path),
        requirements_s3_path: changed(&params.requirements_s3_path, &observed.requirements_s3_path),
        startup_script_s3_path: changed(
            &params.startup_script_s3_path,
            &observed.startup_script_s3_path,
        ),
        webserver_access_mode: changed(
            &params.webserver_access_mode,
            &observed.webserver_access_mode,
        ),
        weekly_maintenance_window_start: changed(
            &params.weekly_maintenance_window_start,
            &observed.weekly_maintenance_window_start,
        ),
        security_group_ids: (desired_groups != observed_groups)
            .then(|| params.network_configuration.security_group_ids.clone()),
        airflow_configuration_options: (!options.is_empty()
            && *options != observed.airflow_configuration_options)
            .then(|| options.clone()),
    }
}

/// Hooks for the Environment kind
pub struct EnvironmentHooks {
    api: Arc<dyn MwaaApi>,
}

impl EnvironmentHooks {
    pub fn new(api: Arc<dyn MwaaApi>) -> Self {
        Self { api }
    }

    async fn details(&self, name: &str, observed: &ObservedEnvironment) -> Result<ConnectionDetails> {
        let mut details = ConnectionDetails::new();
        if let Some(url) = &observed.webserver_url {
            insert_detail(&mut details, keys::WEB_SERVER_URL, format!("https://{url}"));
        }
        let cli = self.api.create_cli_token(name).await?;
        insert_detail(&mut details, keys::CLI_TOKEN, cli.expose_secret());
        let web = self.api.create_web_login_token(name).await?;
        insert_detail(&mut details, keys::WEB_TOKEN, web.expose_secret());
        Ok(details)
    }
}

#[async_trait]
impl Hooks<Environment> for EnvironmentHooks {
    type Observed = ObservedEnvironment;

    async fn describe(&self, env: &Environment) -> Result<Option<ObservedEnvironment>> {
        match self.api.get_environment(&env.environment_name()).await {
            Ok(observed) if environment_state(&observed.status) == EnvironmentState::Gone => {
                Ok(None)
            }
            Ok(observed) => Ok(Some(observed)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn late_initialize(&self, env: &mut Environment, observed: &ObservedEnvironment) -> bool {
        let p = &mut env.spec.for_provider;
        let o = observed;
        let mut changed = late_init_string(&mut p.airflow_version, o.airflow_version.as_deref());
        changed |= late_init_string(&mut p.environment_class, o.environment_class.as_deref());
        changed |= late_init(&mut p.max_workers, o.max_workers);
        changed |= late_init(&mut p.min_workers, o.min_workers);
        changed |= late_init(&mut p.schedulers, o.schedulers);
        changed |= late_init_string(&mut p.kms_key, o.kms_key.as_deref());
        changed |= late_init_string(&mut p.plugins_s3_path, o.plugins_s3_path.as_deref());
        changed |= late_init_string(&mut p.requirements_s3_path, o.requirements_s3_path.as_deref());
        changed |= late_init_string(
            &mut p.startup_script_s3_path,
            o.startup_script_s3_path.as_deref(),
        );
        changed |= late_init_string(
            &mut p.webserver_access_mode,
            o.webserver_access_mode.as_deref(),
        );
        changed |= late_init_string(
            &mut p.weekly_maintenance_window_start,
            o.weekly_maintenance_window_start.as_deref(),
        );
        if p.airflow_configuration_options.is_empty() && !o.airflow_configuration_options.is_empty()
        {
            p.airflow_configuration_options = o.airflow_configuration_options.clone();
            changed = true;
        }
        changed
    }

    async fn is_up_to_date(&self, env: &Environment, observed: &ObservedEnvironment) -> Result<bool> {
        let p = &env.spec.for_provider;
        let patch = environment_patch(p, observed);
        let tags = diff_tags(&p.tags, &observed.tags);
        if !patch.is_empty() || !tags.is_empty() {
            debug!(environment = %observed.name, ?patch, ?tags, "Environment drifted");
        }
        Ok(patch.is_empty() && tags.is_empty())
    }

    async fn post_observe(
        &self,
        env: &mut Environment,
        observed: &ObservedEnvironment,
        observation: ExternalObservation,
    ) -> Result<ExternalObservation> {
        env.status.get_or_insert_with(Default::default).at_provider = EnvironmentObservation {
            arn: Some(observed.arn.clone()),
            status: Some(observed.status.clone()),
            webserver_url: observed.webserver_url.clone(),
            created_at: observed.created_at.clone(),
        };
        let late_initialized = observation.resource_late_initialized;
        let busy = |ready| ExternalObservation {
            resource_late_initialized: late_initialized,
            ..ExternalObservation::in_progress(true, ready)
        };
        match environment_state(&observed.status) {
            EnvironmentState::Available => {
                let details = self.details(&observed.name, observed).await?;
                Ok(observation.with_connection_details(details))
            }
            EnvironmentState::Creating => Ok(busy(Condition::creating())),
            EnvironmentState::Deleting => Ok(busy(Condition::deleting())),
            EnvironmentState::Busy(message) => Ok(busy(Condition::unavailable(message))),
            EnvironmentState::Failed(message) => Ok(ExternalObservation {
                ready: Some(Condition::unavailable(message)),
                ..observation
            }),
            EnvironmentState::Gone => Ok(ExternalObservation::absent()),
        }
    }

    async fn create(&self, env: &mut Environment) -> Result<ExternalCreation> {
        let name = env.environment_name();
        let arn = self
            .api
            .create_environment(&name, &env.spec.for_provider)
            .await?;
        info!(environment = %name, "Environment create submitted");
        env.status.get_or_insert_with(Default::default).at_provider.arn = Some(arn);
        Ok(ExternalCreation::default())
    }

    async fn update(
        &self,
        env: &mut Environment,
        observed: Option<&ObservedEnvironment>,
    ) -> Result<ExternalUpdate> {
        let name = env.environment_name();
        let described;
        let observed = match observed {
            Some(observed) => observed,
            None => {
                described = self
                    .describe(env)
                    .await?
                    .ok_or_else(|| ProviderError::NotFound(format!("environment {name}")))?;
                &described
            }
        };
        let p = &env.spec.for_provider;

        let tags = diff_tags(&p.tags, &observed.tags);
        if !tags.remove.is_empty() {
            self.api.untag_resource(&observed.arn, &tags.remove).await?;
        }
        if !tags.add.is_empty() {
            self.api.tag_resource(&observed.arn, &tags.add).await?;
        }

        let patch = environment_patch(p, observed);
        if !patch.is_empty() {
            self.api.update_environment(&name, &patch).await?;
            info!(environment = %name, "Environment update submitted");
        }
        Ok(ExternalUpdate::default())
    }

    async fn delete(
        &self,
        env: &mut Environment,
        _observed: Option<&ObservedEnvironment>,
    ) -> Result<ExternalDeletion> {
        self.api.delete_environment(&env.environment_name()).await?;
        // Confirmed once GetEnvironment reports NotFound
        Ok(ExternalDeletion::default())
    }
}

/// External client for Environments over an SDK config
pub fn client(sdk: &SdkConfig, _stores: &StoreSet) -> Box<dyn ExternalClient<Environment>> {
    let api = SdkMwaa::new(aws_sdk_mwaa::Client::new(sdk));
    Box::new(HookedClient::new(EnvironmentHooks::new(Arc::new(api))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use std::collections::BTreeMap;

    fn params() -> EnvironmentParameters {
        EnvironmentParameters {
            region: "eu-west-1".into(),
            execution_role_arn: "arn:aws:iam::123456789012:role/airflow".into(),
            source_bucket_arn: "arn:aws:s3:::dags".into(),
            dag_s3_path: "dags".into(),
            network_configuration: NetworkConfiguration {
                subnet_ids: vec!["subnet-a".into(), "subnet-b".into()],
                security_group_ids: vec!["sg-1".into(), "sg-2".into()],
            },
            ..Default::default()
        }
    }

    fn observed(status: &str) -> ObservedEnvironment {
        ObservedEnvironment {
            name: "airflow".into(),
            arn: "arn:aws:airflow:eu-west-1:123456789012:environment/airflow".into(),
            status: status.into(),
            webserver_url: Some("abc.airflow.eu-west-1.on.aws".into()),
            execution_role_arn: Some("arn:aws:iam::123456789012:role/airflow".into()),
            source_bucket_arn: Some("arn:aws:s3:::dags".into()),
            dag_s3_path: Some("dags".into()),
            airflow_version: Some("2.8.1".into()),
            environment_class: Some("mw1.small".into()),
            max_workers: Some(10),
            min_workers: Some(1),
            kms_key: Some("arn:aws:kms:eu-west-1:123456789012:key/k".into()),
            security_group_ids: vec!["sg-2".into(), "sg-1".into()],
            ..Default::default()
        }
    }

    struct TokenApi;

    #[async_trait]
    impl MwaaApi for TokenApi {
        async fn get_environment(&self, _name: &str) -> Result<ObservedEnvironment> {
            Ok(observed("AVAILABLE"))
        }
        async fn create_environment(&self, _: &str, _: &EnvironmentParameters) -> Result<String> {
            unreachable!()
        }
        async fn update_environment(&self, _: &str, _: &UpdateEnvironment) -> Result<()> {
            unreachable!()
        }
        async fn delete_environment(&self, _: &str) -> Result<()> {
            unreachable!()
        }
        async fn tag_resource(&self, _: &str, _: &BTreeMap<String, String>) -> Result<()> {
            unreachable!()
        }
        async fn untag_resource(&self, _: &str, _: &[String]) -> Result<()> {
            unreachable!()
        }
        async fn create_cli_token(&self, _name: &str) -> Result<SecretString> {
            Ok(SecretString::from("cli"))
        }
        async fn create_web_login_token(&self, _name: &str) -> Result<SecretString> {
            Ok(SecretString::from("web"))
        }
    }

    fn environment() -> Environment {
        Environment::new(
            "airflow",
            EnvironmentSpec {
                for_provider: params(),
                resource: Default::default(),
            },
        )
    }

    #[test]
    fn test_states() {
        assert_eq!(environment_state("AVAILABLE"), EnvironmentState::Available);
        assert_eq!(environment_state("CREATING"), EnvironmentState::Creating);
        assert_eq!(
            environment_state("UPDATING"),
            EnvironmentState::Busy("environment is UPDATING".into())
        );
        assert_eq!(environment_state("DELETING"), EnvironmentState::Deleting);
        assert!(matches!(
            environment_state("MAINTENANCE"),
            EnvironmentState::Busy(_)
        ));
        assert!(matches!(
            environment_state("UPDATE_FAILED"),
            EnvironmentState::Failed(_)
        ));
        assert_eq!(environment_state("DELETED"), EnvironmentState::Gone);
    }

    #[test]
    fn test_in_sync_ignores_group_order() {
        assert!(environment_patch(&params(), &observed("AVAILABLE")).is_empty());
    }

    #[test]
    fn test_kms_key_is_not_compared() {
        let mut p = params();
        p.kms_key = Some("arn:aws:kms:eu-west-1:123456789012:key/other".into());
        assert!(environment_patch(&p, &observed("AVAILABLE")).is_empty());
    }

    #[test]
    fn test_patch_carries_changes_only() {
        let mut p = params();
        p.max_workers = Some(20);
        p.environment_class = Some("mw1.small".into());
        p.airflow_configuration_options =
            BTreeMap::from([("core.default_timezone".to_string(), "utc".to_string())]);

        let patch = environment_patch(&p, &observed("AVAILABLE"));
        assert_eq!(patch.max_workers, Some(20));
        assert_eq!(patch.environment_class, None);
        assert_eq!(patch.security_group_ids, None);
        assert!(patch.airflow_configuration_options.is_some());
    }

    #[tokio::test]
    async fn test_available_publishes_tokens() {
        let hooks = EnvironmentHooks::new(Arc::new(TokenApi));
        let mut env = environment();
        let observed = observed("AVAILABLE");

        let obs = hooks
            .post_observe(&mut env, &observed, ExternalObservation::exists(true))
            .await
            .unwrap();
        assert!(!obs.pending);
        assert_eq!(obs.connection_details[keys::CLI_TOKEN], b"cli");
        assert_eq!(obs.connection_details[keys::WEB_TOKEN], b"web");
        assert_eq!(
            obs.connection_details[keys::WEB_SERVER_URL],
            b"https://abc.airflow.eu-west-1.on.aws"
        );
        let status = env.status.unwrap().at_provider;
        assert_eq!(status.status.as_deref(), Some("AVAILABLE"));
    }

    #[tokio::test]
    async fn test_busy_environment_is_pending() {
        let hooks = EnvironmentHooks::new(Arc::new(TokenApi));
        let mut env = environment();
        let obs = hooks
            .post_observe(&mut env, &observed("CREATING"), ExternalObservation::exists(false))
            .await
            .unwrap();
        assert!(obs.pending);
        assert!(obs.resource_up_to_date);
        assert_eq!(obs.ready.unwrap().reason, "Creating");
    }

    #[tokio::test]
    async fn test_updating_environment_keeps_late_init() {
        let hooks = EnvironmentHooks::new(Arc::new(TokenApi));
        let mut env = environment();
        let incoming = ExternalObservation {
            resource_late_initialized: true,
            ..ExternalObservation::exists(true)
        };
        let obs = hooks
            .post_observe(&mut env, &observed("UPDATING"), incoming)
            .await
            .unwrap();
        assert!(obs.pending);
        assert!(obs.resource_late_initialized);
        let ready = obs.ready.unwrap();
        assert_eq!(ready.reason, "Unavailable");
        assert!(ready.message.contains("UPDATING"));
    }

    #[tokio::test]
    async fn test_failed_update_reports_unavailable() {
        let hooks = EnvironmentHooks::new(Arc::new(TokenApi));
        let mut env = environment();
        let obs = hooks
            .post_observe(&mut env, &observed("UPDATE_FAILED"), ExternalObservation::exists(false))
            .await
            .unwrap();
        assert!(!obs.pending);
        assert!(!obs.resource_up_to_date);
        assert_eq!(obs.ready.unwrap().reason, "Unavailable");
    }
}
