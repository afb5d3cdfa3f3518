//! SQS queues
//!
//! Observe resolves the queue URL from the external name, then reads every
//! attribute and the tags. Drift is repaired with one `SetQueueAttributes`
//! carrying only the changed attributes, followed by tag changes.
//!
//! Other Queues can fill the dead-letter target and the redrive allow list.

mod api;
mod crd;

pub use api::{Attributes, SdkSqs, SqsApi};
pub use crd::{
    Queue, QueueObservation, QueueParameters, QueueSpec, QueueStatus, RedriveAllowPolicy,
    RedrivePolicy,
};

use async_trait::async_trait;
use aws_config::SdkConfig;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use stratus_core::drift::{diff_tags, late_init, late_init_string, policies_equal};
use stratus_core::error::{ProviderError, Result, Stage, StageExt};
use stratus_core::external::{
    ExternalClient, ExternalCreation, ExternalDeletion, ExternalObservation, ExternalUpdate,
    HookedClient, Hooks,
};
use stratus_core::publisher::{insert_detail, keys, ConnectionDetails};
use stratus_core::resolver::{FieldResolver, MultiReference, SingleReference};
use stratus_core::store::StoreSet;
use tracing::debug;

/// SQS attribute names
pub mod attributes {
    pub const DELAY_SECONDS: &str = "DelaySeconds";
    pub const MAXIMUM_MESSAGE_SIZE: &str = "MaximumMessageSize";
    pub const MESSAGE_RETENTION_PERIOD: &str = "MessageRetentionPeriod";
    pub const RECEIVE_MESSAGE_WAIT_TIME_SECONDS: &str = "ReceiveMessageWaitTimeSeconds";
    pub const VISIBILITY_TIMEOUT: &str = "VisibilityTimeout";
    pub const POLICY: &str = "Policy";
    pub const REDRIVE_POLICY: &str = "RedrivePolicy";
    pub const REDRIVE_ALLOW_POLICY: &str = "RedriveAllowPolicy";
    pub const KMS_MASTER_KEY_ID: &str = "KmsMasterKeyId";
    pub const KMS_DATA_KEY_REUSE_PERIOD_SECONDS: &str = "KmsDataKeyReusePeriodSeconds";
    pub const SQS_MANAGED_SSE_ENABLED: &str = "SqsManagedSseEnabled";
    pub const FIFO_QUEUE: &str = "FifoQueue";
    pub const CONTENT_BASED_DEDUPLICATION: &str = "ContentBasedDeduplication";

    pub const QUEUE_ARN: &str = "QueueArn";
    pub const APPROXIMATE_NUMBER_OF_MESSAGES: &str = "ApproximateNumberOfMessages";
    pub const APPROXIMATE_NUMBER_OF_MESSAGES_DELAYED: &str = "ApproximateNumberOfMessagesDelayed";
    pub const APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE: &str =
        "ApproximateNumberOfMessagesNotVisible";
    pub const CREATED_TIMESTAMP: &str = "CreatedTimestamp";
    pub const LAST_MODIFIED_TIMESTAMP: &str = "LastModifiedTimestamp";
}

use attributes as attr;

/// What one observe read about a queue
#[derive(Debug, Clone)]
pub struct ObservedQueue {
    pub url: String,
    pub attributes: Attributes,
    pub tags: BTreeMap<String, String>,
}

/// Attributes the spec asks for; unset fields are left out
pub fn desired_attributes(queue: &Queue) -> Attributes {
    let p = &queue.spec.for_provider;
    let mut out = Attributes::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            out.insert(key.to_string(), value);
        }
    };
    put(attr::DELAY_SECONDS, p.delay_seconds.map(|v| v.to_string()));
    put(attr::MAXIMUM_MESSAGE_SIZE, p.maximum_message_size.map(|v| v.to_string()));
    put(attr::MESSAGE_RETENTION_PERIOD, p.message_retention_period.map(|v| v.to_string()));
    put(
        attr::RECEIVE_MESSAGE_WAIT_TIME_SECONDS,
        p.receive_message_wait_time_seconds.map(|v| v.to_string()),
    );
    put(attr::VISIBILITY_TIMEOUT, p.visibility_timeout.map(|v| v.to_string()));
    put(attr::POLICY, p.policy.clone());
    put(
        attr::REDRIVE_POLICY,
        p.redrive_policy.as_ref().and_then(|r| {
            r.dead_letter_target_arn.as_ref().map(|arn| {
                json!({ "deadLetterTargetArn": arn, "maxReceiveCount": r.max_receive_count })
                    .to_string()
            })
        }),
    );
    put(
        attr::REDRIVE_ALLOW_POLICY,
        p.redrive_allow_policy
            .as_ref()
            // byQueue waits for its source queues to resolve
            .filter(|r| r.redrive_permission != "byQueue" || !r.source_queue_arns.is_empty())
            .map(|r| {
                let mut policy = json!({ "redrivePermission": r.redrive_permission });
                if !r.source_queue_arns.is_empty() {
                    policy["sourceQueueArns"] = json!(r.source_queue_arns);
                }
                policy.to_string()
            }),
    );
    put(attr::KMS_MASTER_KEY_ID, p.kms_master_key_id.clone());
    put(
        attr::KMS_DATA_KEY_REUSE_PERIOD_SECONDS,
        p.kms_data_key_reuse_period_seconds.map(|v| v.to_string()),
    );
    put(attr::SQS_MANAGED_SSE_ENABLED, p.sqs_managed_sse_enabled.map(|v| v.to_string()));
    if queue.is_fifo() {
        put(attr::FIFO_QUEUE, Some("true".to_string()));
        put(
            attr::CONTENT_BASED_DEDUPLICATION,
            p.content_based_deduplication.map(|v| v.to_string()),
        );
    }
    out
}

fn attribute_matches(key: &str, desired: &str, observed: Option<&String>) -> bool {
    match key {
        attr::POLICY | attr::REDRIVE_POLICY => {
            policies_equal(Some(desired), observed.map(String::as_str))
        }
        attr::REDRIVE_ALLOW_POLICY => {
            let parse = |raw: &str| {
                parse_redrive_allow(raw).map(|r| {
                    let sources: BTreeSet<String> = r.source_queue_arns.into_iter().collect();
                    (r.redrive_permission, sources)
                })
            };
            match (parse(desired), observed.and_then(|o| parse(o))) {
                (Some(d), Some(o)) => d == o,
                _ => false,
            }
        }
        _ => observed.is_some_and(|o| o == desired),
    }
}

/// Desired attributes that differ from the observed ones
///
/// `FifoQueue` is immutable and never part of an update.
pub fn changed_attributes(desired: &Attributes, observed: &Attributes) -> Attributes {
    desired
        .iter()
        .filter(|(k, _)| k.as_str() != attr::FIFO_QUEUE)
        .filter(|(k, v)| !attribute_matches(k, v, observed.get(*k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn parse<T: std::str::FromStr>(attrs: &Attributes, key: &str) -> Option<T> {
    attrs.get(key).and_then(|v| v.parse().ok())
}

fn observed_redrive(attrs: &Attributes) -> Option<RedrivePolicy> {
    let raw: serde_json::Value = serde_json::from_str(attrs.get(attr::REDRIVE_POLICY)?).ok()?;
    let arn = raw.get("deadLetterTargetArn")?.as_str()?.to_string();
    let max = raw.get("maxReceiveCount").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })?;
    Some(RedrivePolicy {
        dead_letter_target_arn: Some(arn),
        max_receive_count: max,
        ..Default::default()
    })
}

fn parse_redrive_allow(raw: &str) -> Option<RedriveAllowPolicy> {
    let raw: serde_json::Value = serde_json::from_str(raw).ok()?;
    let permission = raw.get("redrivePermission")?.as_str()?.to_string();
    let sources = raw
        .get("sourceQueueArns")
        .and_then(|v| v.as_array())
        .map(|arns| {
            arns.iter()
                .filter_map(|a| a.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Some(RedriveAllowPolicy {
        redrive_permission: permission,
        source_queue_arns: sources,
        ..Default::default()
    })
}

fn observed_redrive_allow(attrs: &Attributes) -> Option<RedriveAllowPolicy> {
    parse_redrive_allow(attrs.get(attr::REDRIVE_ALLOW_POLICY)?)
}

/// Hooks for the Queue kind
pub struct QueueHooks {
    api: Arc<dyn SqsApi>,
}

impl QueueHooks {
    pub fn new(api: Arc<dyn SqsApi>) -> Self {
        Self { api }
    }

    async fn queue_url(&self, queue: &Queue, observed: Option<&ObservedQueue>) -> Result<String> {
        if let Some(observed) = observed {
            return Ok(observed.url.clone());
        }
        if let Some(url) = queue
            .status
            .as_ref()
            .and_then(|s| s.at_provider.url.clone())
        {
            return Ok(url);
        }
        self.api.get_queue_url(&queue.queue_name()).await
    }
}

#[async_trait]
impl Hooks<Queue> for QueueHooks {
    type Observed = ObservedQueue;

    async fn describe(&self, queue: &Queue) -> Result<Option<ObservedQueue>> {
        let url = match self.api.get_queue_url(&queue.queue_name()).await {
            Ok(url) => url,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.at(Stage::GetQueueUrl)),
        };
        let attributes = self
            .api
            .get_queue_attributes(&url)
            .await
            .stage(Stage::GetQueueAttributes)?;
        let tags = self.api.list_queue_tags(&url).await.stage(Stage::ListTags)?;
        Ok(Some(ObservedQueue {
            url,
            attributes,
            tags,
        }))
    }

    fn late_initialize(&self, queue: &mut Queue, observed: &ObservedQueue) -> bool {
        let attrs = &observed.attributes;
        let p = &mut queue.spec.for_provider;
        let mut changed = false;
        changed |= late_init(&mut p.delay_seconds, parse(attrs, attr::DELAY_SECONDS));
        changed |= late_init(&mut p.maximum_message_size, parse(attrs, attr::MAXIMUM_MESSAGE_SIZE));
        changed |= late_init(
            &mut p.message_retention_period,
            parse(attrs, attr::MESSAGE_RETENTION_PERIOD),
        );
        changed |= late_init(
            &mut p.receive_message_wait_time_seconds,
            parse(attrs, attr::RECEIVE_MESSAGE_WAIT_TIME_SECONDS),
        );
        changed |= late_init(&mut p.visibility_timeout, parse(attrs, attr::VISIBILITY_TIMEOUT));
        changed |= late_init_string(&mut p.policy, attrs.get(attr::POLICY).map(String::as_str));
        changed |= late_init(&mut p.redrive_policy, observed_redrive(attrs));
        changed |= late_init(&mut p.redrive_allow_policy, observed_redrive_allow(attrs));
        changed |= late_init_string(
            &mut p.kms_master_key_id,
            attrs.get(attr::KMS_MASTER_KEY_ID).map(String::as_str),
        );
        changed |= late_init(
            &mut p.kms_data_key_reuse_period_seconds,
            parse(attrs, attr::KMS_DATA_KEY_REUSE_PERIOD_SECONDS),
        );
        changed |= late_init(
            &mut p.sqs_managed_sse_enabled,
            parse(attrs, attr::SQS_MANAGED_SSE_ENABLED),
        );
        changed |= late_init(&mut p.fifo_queue, parse(attrs, attr::FIFO_QUEUE));
        if p.fifo_queue == Some(true) {
            changed |= late_init(
                &mut p.content_based_deduplication,
                parse(attrs, attr::CONTENT_BASED_DEDUPLICATION),
            );
        }
        changed
    }

    async fn is_up_to_date(&self, queue: &Queue, observed: &ObservedQueue) -> Result<bool> {
        let changed = changed_attributes(&desired_attributes(queue), &observed.attributes);
        let tags = diff_tags(&queue.spec.for_provider.tags, &observed.tags);
        if !changed.is_empty() || !tags.is_empty() {
            debug!(
                queue = %queue.queue_name(),
                attributes = ?changed.keys().collect::<Vec<_>>(),
                tags_added = tags.add.len(),
                tags_removed = tags.remove.len(),
                "Queue drifted"
            );
        }
        Ok(changed.is_empty() && tags.is_empty())
    }

    async fn post_observe(
        &self,
        queue: &mut Queue,
        observed: &ObservedQueue,
        observation: ExternalObservation,
    ) -> Result<ExternalObservation> {
        let attrs = &observed.attributes;
        queue.status.get_or_insert_with(Default::default).at_provider = QueueObservation {
            url: Some(observed.url.clone()),
            arn: attrs.get(attr::QUEUE_ARN).cloned(),
            approximate_number_of_messages: parse(attrs, attr::APPROXIMATE_NUMBER_OF_MESSAGES),
            approximate_number_of_messages_delayed: parse(
                attrs,
                attr::APPROXIMATE_NUMBER_OF_MESSAGES_DELAYED,
            ),
            approximate_number_of_messages_not_visible: parse(
                attrs,
                attr::APPROXIMATE_NUMBER_OF_MESSAGES_NOT_VISIBLE,
            ),
            created_timestamp: parse(attrs, attr::CREATED_TIMESTAMP),
            last_modified_timestamp: parse(attrs, attr::LAST_MODIFIED_TIMESTAMP),
        };
        Ok(observation.with_connection_details(url_details(&observed.url)))
    }

    async fn create(&self, queue: &mut Queue) -> Result<ExternalCreation> {
        let url = self
            .api
            .create_queue(
                &queue.queue_name(),
                &desired_attributes(queue),
                &queue.spec.for_provider.tags,
            )
            .await?;
        queue.status.get_or_insert_with(Default::default).at_provider.url = Some(url.clone());
        Ok(ExternalCreation {
            connection_details: url_details(&url),
            ..Default::default()
        })
    }

    async fn update(
        &self,
        queue: &mut Queue,
        observed: Option<&ObservedQueue>,
    ) -> Result<ExternalUpdate> {
        let described;
        let observed = match observed {
            Some(observed) => observed,
            None => {
                described = self.describe(queue).await?.ok_or_else(|| {
                    ProviderError::NotFound(format!(
                        "queue {}",
                        queue.queue_name()
                    ))
                })?;
                &described
            }
        };

        let changed = changed_attributes(&desired_attributes(queue), &observed.attributes);
        if !changed.is_empty() {
            self.api
                .set_queue_attributes(&observed.url, &changed)
                .await?;
        }
        let tags = diff_tags(&queue.spec.for_provider.tags, &observed.tags);
        if !tags.remove.is_empty() {
            self.api.untag_queue(&observed.url, &tags.remove).await?;
        }
        if !tags.add.is_empty() {
            self.api.tag_queue(&observed.url, &tags.add).await?;
        }
        Ok(ExternalUpdate {
            connection_details: url_details(&observed.url),
            ..Default::default()
        })
    }

    async fn delete(
        &self,
        queue: &mut Queue,
        observed: Option<&ObservedQueue>,
    ) -> Result<ExternalDeletion> {
        let url = self.queue_url(queue, observed).await?;
        self.api.delete_queue(&url).await?;
        Ok(ExternalDeletion {
            completed: true,
            operation_id: None,
        })
    }
}

fn url_details(url: &str) -> ConnectionDetails {
    let mut details = ConnectionDetails::new();
    insert_detail(&mut details, keys::URL, url);
    details
}

/// Reference fields of a Queue
pub fn references() -> Vec<Box<dyn FieldResolver<Queue>>> {
    vec![
        Box::new(SingleReference::<Queue, Queue> {
            field: "spec.forProvider.redrivePolicy.deadLetterTargetArn",
            value: |q| {
                q.spec
                    .for_provider
                    .redrive_policy
                    .as_ref()
                    .and_then(|r| r.dead_letter_target_arn.as_ref())
            },
            reference: |q| {
                q.spec
                    .for_provider
                    .redrive_policy
                    .as_ref()
                    .and_then(|r| r.dead_letter_target_arn_ref.as_ref())
            },
            selector: |q| {
                q.spec
                    .for_provider
                    .redrive_policy
                    .as_ref()
                    .and_then(|r| r.dead_letter_target_arn_selector.as_ref())
            },
            set: |q, value, reference| {
                if let Some(redrive) = q.spec.for_provider.redrive_policy.as_mut() {
                    redrive.dead_letter_target_arn = value;
                    redrive.dead_letter_target_arn_ref = reference;
                }
            },
            extract: |target| target.arn().map(str::to_string),
        }),
        Box::new(MultiReference::<Queue, Queue> {
            field: "spec.forProvider.redriveAllowPolicy.sourceQueueArns",
            values: |q| {
                q.spec
                    .for_provider
                    .redrive_allow_policy
                    .as_ref()
                    .map(|r| r.source_queue_arns.as_slice())
                    .unwrap_or_default()
            },
            references: |q| {
                q.spec
                    .for_provider
                    .redrive_allow_policy
                    .as_ref()
                    .map(|r| r.source_queue_arn_refs.as_slice())
                    .unwrap_or_default()
            },
            selector: |q| {
                q.spec
                    .for_provider
                    .redrive_allow_policy
                    .as_ref()
                    .and_then(|r| r.source_queue_arn_selector.as_ref())
            },
            set: |q, values, references| {
                if let Some(allow) = q.spec.for_provider.redrive_allow_policy.as_mut() {
                    allow.source_queue_arns = values;
                    allow.source_queue_arn_refs = references;
                }
            },
            extract: |target| target.arn().map(str::to_string),
        }),
    ]
}

/// External client for Queues over an SDK config
pub fn client(sdk: &SdkConfig, _stores: &StoreSet) -> Box<dyn ExternalClient<Queue>> {
    let api = SdkSqs::new(aws_sdk_sqs::Client::new(sdk));
    Box::new(HookedClient::new(QueueHooks::new(Arc::new(api))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::AwsResource;
    use pretty_assertions::assert_eq;
    use stratus_core::error::ErrorKind;
    use stratus_core::resource::set_external_name;

    fn queue(name: &str) -> Queue {
        Queue::new(
            name,
            QueueSpec {
                for_provider: QueueParameters {
                    region: "us-east-1".into(),
                    ..Default::default()
                },
                resource: Default::default(),
            },
        )
    }

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_desired_attributes() {
        let mut q = queue("orders");
        q.spec.for_provider.delay_seconds = Some(30);
        q.spec.for_provider.redrive_policy = Some(RedrivePolicy {
            dead_letter_target_arn: Some("arn:aws:sqs:us-east-1:123456789012:dlq".into()),
            max_receive_count: 5,
            ..Default::default()
        });
        q.spec.for_provider.content_based_deduplication = Some(true);

        let desired = desired_attributes(&q);
        assert_eq!(desired.get(attr::DELAY_SECONDS).unwrap(), "30");
        assert!(policies_equal(
            desired.get(attr::REDRIVE_POLICY).map(String::as_str),
            Some(r#"{"maxReceiveCount":5,"deadLetterTargetArn":"arn:aws:sqs:us-east-1:123456789012:dlq"}"#)
        ));
        // Only meaningful on FIFO queues
        assert!(!desired.contains_key(attr::CONTENT_BASED_DEDUPLICATION));
        assert!(!desired.contains_key(attr::FIFO_QUEUE));
    }

    #[test]
    fn test_unresolved_redrive_is_left_out() {
        let mut q = queue("orders");
        q.spec.for_provider.redrive_policy = Some(RedrivePolicy {
            max_receive_count: 5,
            ..Default::default()
        });
        assert!(!desired_attributes(&q).contains_key(attr::REDRIVE_POLICY));
    }

    #[test]
    fn test_redrive_allow_by_queue_waits_for_sources() {
        let mut q = queue("orders-dlq");
        q.spec.for_provider.redrive_allow_policy = Some(RedriveAllowPolicy {
            redrive_permission: "byQueue".into(),
            ..Default::default()
        });
        assert!(!desired_attributes(&q).contains_key(attr::REDRIVE_ALLOW_POLICY));

        q.spec.for_provider.redrive_allow_policy = Some(RedriveAllowPolicy {
            redrive_permission: "allowAll".into(),
            ..Default::default()
        });
        assert_eq!(
            desired_attributes(&q)[attr::REDRIVE_ALLOW_POLICY],
            r#"{"redrivePermission":"allowAll"}"#
        );
    }

    #[test]
    fn test_redrive_allow_sources_compared_as_set() {
        let desired = attrs(&[(
            attr::REDRIVE_ALLOW_POLICY,
            r#"{"redrivePermission":"byQueue","sourceQueueArns":["arn:a","arn:b"]}"#,
        )]);
        let reordered = attrs(&[(
            attr::REDRIVE_ALLOW_POLICY,
            r#"{"sourceQueueArns":["arn:b","arn:a"],"redrivePermission":"byQueue"}"#,
        )]);
        assert!(changed_attributes(&desired, &reordered).is_empty());

        let fewer = attrs(&[(
            attr::REDRIVE_ALLOW_POLICY,
            r#"{"redrivePermission":"byQueue","sourceQueueArns":["arn:a"]}"#,
        )]);
        assert_eq!(changed_attributes(&desired, &fewer), desired);
    }

    #[test]
    fn test_changed_attributes_only_differences() {
        let desired = attrs(&[
            (attr::VISIBILITY_TIMEOUT, "60"),
            (attr::DELAY_SECONDS, "0"),
            (attr::FIFO_QUEUE, "true"),
        ]);
        let observed = attrs(&[
            (attr::VISIBILITY_TIMEOUT, "30"),
            (attr::DELAY_SECONDS, "0"),
            (attr::FIFO_QUEUE, "false"),
        ]);
        assert_eq!(
            changed_attributes(&desired, &observed),
            attrs(&[(attr::VISIBILITY_TIMEOUT, "60")])
        );
    }

    #[test]
    fn test_redrive_policy_compared_semantically() {
        let desired = attrs(&[(
            attr::REDRIVE_POLICY,
            r#"{"deadLetterTargetArn":"arn:dlq","maxReceiveCount":5}"#,
        )]);
        let observed = attrs(&[(
            attr::REDRIVE_POLICY,
            r#"{ "maxReceiveCount": 5, "deadLetterTargetArn": "arn:dlq" }"#,
        )]);
        assert!(changed_attributes(&desired, &observed).is_empty());
    }

    #[test]
    fn test_late_init_is_idempotent() {
        let hooks = QueueHooks::new(Arc::new(NoApi));
        let observed = ObservedQueue {
            url: "https://sqs/orders".into(),
            attributes: attrs(&[
                (attr::DELAY_SECONDS, "0"),
                (attr::VISIBILITY_TIMEOUT, "30"),
                (attr::SQS_MANAGED_SSE_ENABLED, "true"),
                (
                    attr::REDRIVE_POLICY,
                    r#"{"deadLetterTargetArn":"arn:dlq","maxReceiveCount":"3"}"#,
                ),
                (attr::QUEUE_ARN, "arn:orders"),
            ]),
            tags: BTreeMap::new(),
        };
        let mut q = queue("orders");
        q.spec.for_provider.visibility_timeout = Some(60);

        assert!(hooks.late_initialize(&mut q, &observed));
        let once = q.spec.clone();
        assert!(!hooks.late_initialize(&mut q, &observed));
        assert_eq!(q.spec, once);

        // Set fields are never overwritten
        assert_eq!(q.spec.for_provider.visibility_timeout, Some(60));
        assert_eq!(q.spec.for_provider.delay_seconds, Some(0));
        assert_eq!(
            q.spec.for_provider.redrive_policy.unwrap().max_receive_count,
            3
        );
    }

    #[test]
    fn test_fifo_name_validation() {
        let mut q = queue("orders");
        q.spec.for_provider.fifo_queue = Some(true);
        set_external_name(&mut q, "orders");
        let err = q.validate_parameters().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains(".fifo"));

        set_external_name(&mut q, "orders.fifo");
        assert!(q.validate_parameters().is_ok());
    }

    #[test]
    fn test_range_validation() {
        let mut q = queue("orders");
        q.spec.for_provider.delay_seconds = Some(901);
        let err = q.validate_parameters().unwrap_err();
        assert!(err.to_string().contains("delay_seconds"));
    }

    #[test]
    fn test_redrive_permission_validation() {
        let mut q = queue("orders-dlq");
        q.spec.for_provider.redrive_allow_policy = Some(RedriveAllowPolicy {
            redrive_permission: "allowSome".into(),
            ..Default::default()
        });
        let err = q.validate_parameters().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        q.spec.for_provider.redrive_allow_policy = Some(RedriveAllowPolicy {
            redrive_permission: "byQueue".into(),
            source_queue_arns: (0..11).map(|i| format!("arn:{i}")).collect(),
            ..Default::default()
        });
        assert!(q.validate_parameters().is_err());
    }

    struct NoApi;

    #[async_trait]
    impl SqsApi for NoApi {
        async fn get_queue_url(&self, _name: &str) -> Result<String> {
            unreachable!()
        }
        async fn get_queue_attributes(&self, _url: &str) -> Result<Attributes> {
            unreachable!()
        }
        async fn list_queue_tags(&self, _url: &str) -> Result<BTreeMap<String, String>> {
            unreachable!()
        }
        async fn create_queue(
            &self,
            _name: &str,
            _attributes: &Attributes,
            _tags: &BTreeMap<String, String>,
        ) -> Result<String> {
            unreachable!()
        }
        async fn set_queue_attributes(&self, _url: &str, _attributes: &Attributes) -> Result<()> {
            unreachable!()
        }
        async fn tag_queue(&self, _url: &str, _tags: &BTreeMap<String, String>) -> Result<()> {
            unreachable!()
        }
        async fn untag_queue(&self, _url: &str, _keys: &[String]) -> Result<()> {
            unreachable!()
        }
        async fn delete_queue(&self, _url: &str) -> Result<()> {
            unreachable!()
        }
    }
}
