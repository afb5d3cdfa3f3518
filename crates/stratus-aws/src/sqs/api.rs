//! The SQS calls the Queue adapter makes

use crate::error::classify;
use async_trait::async_trait;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use std::collections::{BTreeMap, HashMap};
use stratus_core::error::{ProviderError, Result};

/// Attribute name to value, as SQS reports and accepts them
pub type Attributes = BTreeMap<String, String>;

#[async_trait]
pub trait SqsApi: Send + Sync {
    async fn get_queue_url(&self, name: &str) -> Result<String>;

    /// All attributes, read-only ones included
    async fn get_queue_attributes(&self, url: &str) -> Result<Attributes>;

    async fn list_queue_tags(&self, url: &str) -> Result<BTreeMap<String, String>>;

    /// Returns the queue URL
    async fn create_queue(
        &self,
        name: &str,
        attributes: &Attributes,
        tags: &BTreeMap<String, String>,
    ) -> Result<String>;

    async fn set_queue_attributes(&self, url: &str, attributes: &Attributes) -> Result<()>;

    async fn tag_queue(&self, url: &str, tags: &BTreeMap<String, String>) -> Result<()>;

    async fn untag_queue(&self, url: &str, keys: &[String]) -> Result<()>;

    async fn delete_queue(&self, url: &str) -> Result<()>;
}

/// [`SqsApi`] over the AWS SDK
pub struct SdkSqs {
    client: Client,
}

impl SdkSqs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn sdk_attributes(attributes: &Attributes) -> HashMap<QueueAttributeName, String> {
    attributes
        .iter()
        .map(|(k, v)| (QueueAttributeName::from(k.as_str()), v.clone()))
        .collect()
}

fn sdk_tags(tags: &BTreeMap<String, String>) -> HashMap<String, String> {
    tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

#[async_trait]
impl SqsApi for SdkSqs {
    async fn get_queue_url(&self, name: &str) -> Result<String> {
        let out = self
            .client
            .get_queue_url()
            .queue_name(name)
            .send()
            .await
            .map_err(classify)?;
        out.queue_url()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Transient(format!("no URL returned for queue {name}")))
    }

    async fn get_queue_attributes(&self, url: &str) -> Result<Attributes> {
        let out = self
            .client
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::All)
            .send()
            .await
            .map_err(classify)?;
        Ok(out
            .attributes()
            .map(|attrs| {
                attrs
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_queue_tags(&self, url: &str) -> Result<BTreeMap<String, String>> {
        let out = self
            .client
            .list_queue_tags()
            .queue_url(url)
            .send()
            .await
            .map_err(classify)?;
        Ok(out
            .tags()
            .map(|tags| tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn create_queue(
        &self,
        name: &str,
        attributes: &Attributes,
        tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        let out = self
            .client
            .create_queue()
            .queue_name(name)
            .set_attributes(Some(sdk_attributes(attributes)))
            .set_tags((!tags.is_empty()).then(|| sdk_tags(tags)))
            .send()
            .await
            .map_err(classify)?;
        out.queue_url()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Transient(format!("no URL returned for queue {name}")))
    }

    async fn set_queue_attributes(&self, url: &str, attributes: &Attributes) -> Result<()> {
        self.client
            .set_queue_attributes()
            .queue_url(url)
            .set_attributes(Some(sdk_attributes(attributes)))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn tag_queue(&self, url: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        self.client
            .tag_queue()
            .queue_url(url)
            .set_tags(Some(sdk_tags(tags)))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn untag_queue(&self, url: &str, keys: &[String]) -> Result<()> {
        self.client
            .untag_queue()
            .queue_url(url)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_queue(&self, url: &str) -> Result<()> {
        self.client
            .delete_queue()
            .queue_url(url)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}
