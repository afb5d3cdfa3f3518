//! # Stratus AWS
//!
//! AWS managed resources for the Stratus reconciliation engine.
//!
//! Every kind pairs a custom resource definition with a narrow API trait
//! (one per service, with an SDK-backed implementation) and a
//! [`Hooks`](stratus_core::external::Hooks) implementation that the generic
//! reconciler drives.
//!
//! ## Kinds
//!
//! | Kind | Group | External name |
//! |------|-------|---------------|
//! | `Queue` | `sqs.aws.stratus.dev` | queue name |
//! | `Cluster` | `redshift.aws.stratus.dev` | cluster identifier |
//! | `Secret` | `secretsmanager.aws.stratus.dev` | secret name |
//! | `PrivateDNSNamespace`, `PublicDNSNamespace`, `HTTPNamespace` | `servicediscovery.aws.stratus.dev` | namespace id |
//! | `Environment` | `mwaa.aws.stratus.dev` | environment name |
//! | `IdentityPool` | `cognitoidentity.aws.stratus.dev` | identity pool id |
//!
//! ## Credentials
//!
//! Each resource names a cluster-scoped `ProviderConfig` (default:
//! `default`). [`clients::ClientFactory`] resolves it into an SDK config and
//! caches the result per config and region until the config or its
//! credentials secret changes.
//!
//! ```rust,ignore
//! use stratus_aws::prelude::*;
//!
//! let factory = Arc::new(ClientFactory::new(stores.clone(), ClientFactoryConfig::default()));
//! let connector = Arc::new(AwsConnector::new(factory, sqs::client));
//! let reconciler = Reconciler::<Queue>::new(stores, connector)
//!     .with_references(sqs::references());
//! ```

pub mod clients;
pub mod cognitoidentity;
pub mod config;
pub mod error;
pub mod mwaa;
pub mod redshift;
pub mod secretsmanager;
pub mod servicediscovery;
pub mod sqs;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// Every custom resource definition the provider serves, `ProviderConfig` included
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![
        config::ProviderConfig::crd(),
        sqs::Queue::crd(),
        redshift::Cluster::crd(),
        secretsmanager::Secret::crd(),
        servicediscovery::PrivateDNSNamespace::crd(),
        servicediscovery::PublicDNSNamespace::crd(),
        servicediscovery::HTTPNamespace::crd(),
        mwaa::Environment::crd(),
        cognitoidentity::IdentityPool::crd(),
    ]
}

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::clients::{
        AwsConnector, AwsResource, ClientBuilder, ClientFactory, ClientFactoryConfig,
        StaticConnector,
    };
    pub use crate::cognitoidentity::IdentityPool;
    pub use crate::config::{ProviderConfig, ProviderConfigSpec};
    pub use crate::crds;
    pub use crate::error::classify;
    pub use crate::mwaa::Environment;
    pub use crate::redshift::Cluster;
    pub use crate::secretsmanager::Secret;
    pub use crate::servicediscovery::{HTTPNamespace, PrivateDNSNamespace, PublicDNSNamespace};
    pub use crate::sqs::Queue;
    pub use crate::{cognitoidentity, mwaa, redshift, secretsmanager, servicediscovery, sqs};
    pub use stratus_core::prelude::*;
}
