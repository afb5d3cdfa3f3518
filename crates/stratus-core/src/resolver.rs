//! Cross-resource reference resolution
//!
//! A reference field has three slots: the concrete value, a reference to
//! another object by name, and a label selector. Each kind lists its
//! reference fields as static descriptors ([`SingleReference`],
//! [`MultiReference`]); [`resolve_references`] walks them and fills the value
//! slots from the referenced objects.
//!
//! Resolution reads only the direct target of each reference. A cycle (queue A
//! dead-letters to B, B to A) shows up as both resources waiting on each other
//! until one of them is created, which the requeue loop absorbs.

use crate::error::{ProviderError, Result, Stage};
use crate::resource::{Reference, Selector};
use crate::store::{StoreObject, StoreSet};
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

/// Pulls the concrete value out of a referenced object
pub type Extractor<T> = fn(&T) -> Option<String>;

/// Extract the external name of the referenced object
pub fn external_name<T: StoreObject>(target: &T) -> Option<String> {
    crate::resource::external_name(target).map(str::to_string)
}

/// Resolves one reference field of `K`
#[async_trait]
pub trait FieldResolver<K>: Send + Sync {
    /// Path of the value field, for messages
    fn field(&self) -> &'static str;

    /// Resolve in place. Returns true if the object was changed.
    async fn resolve(&self, obj: &mut K, stores: &StoreSet) -> Result<bool>;
}

/// Descriptor of a single-valued reference field of `K` pointing at kind `T`
pub struct SingleReference<K, T> {
    pub field: &'static str,
    pub value: fn(&K) -> Option<&String>,
    pub reference: fn(&K) -> Option<&Reference>,
    pub selector: fn(&K) -> Option<&Selector>,
    pub set: fn(&mut K, Option<String>, Option<Reference>),
    pub extract: Extractor<T>,
}

/// Descriptor of a list-valued reference field of `K` pointing at kind `T`
pub struct MultiReference<K, T> {
    pub field: &'static str,
    pub values: fn(&K) -> &[String],
    pub references: fn(&K) -> &[Reference],
    pub selector: fn(&K) -> Option<&Selector>,
    pub set: fn(&mut K, Vec<String>, Vec<Reference>),
    pub extract: Extractor<T>,
}

fn not_ready(field: &str, kind: &str, name: &str) -> ProviderError {
    ProviderError::ReferenceNotReady(format!(
        "{field}: {kind} {name} does not have a value for the referenced field yet"
    ))
}

fn not_found(field: &str, kind: &str, name: &str) -> ProviderError {
    ProviderError::ReferenceNotFound(format!("{field}: {kind} {name} not found"))
}

/// Objects of kind `T` selected by labels, ordered by name
async fn select<T: StoreObject>(stores: &StoreSet, selector: &Selector) -> Result<Vec<T>> {
    let mut found = stores.store::<T>().list(&selector.match_labels).await?;
    found.sort_by_key(|o| o.name_any());
    Ok(found)
}

#[async_trait]
impl<K, T> FieldResolver<K> for SingleReference<K, T>
where
    K: Send + Sync + 'static,
    T: StoreObject,
{
    fn field(&self) -> &'static str {
        self.field
    }

    async fn resolve(&self, obj: &mut K, stores: &StoreSet) -> Result<bool> {
        let kind = T::kind(&());
        let current = (self.value)(obj).filter(|v| !v.is_empty()).cloned();
        let reference = (self.reference)(obj).cloned();

        let always = reference.as_ref().is_some_and(Reference::resolve_always);
        if current.is_some() && !always {
            return Ok(false);
        }

        if let Some(reference) = reference {
            let target = stores.store::<T>().get(&reference.name).await?;
            let Some(target) = target else {
                if reference.is_optional() {
                    return Ok(false);
                }
                return Err(not_found(self.field, &kind, &reference.name));
            };
            let value = (self.extract)(&target)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| not_ready(self.field, &kind, &reference.name))?;
            if current.as_deref() == Some(value.as_str()) {
                return Ok(false);
            }
            debug!(field = self.field, target = %reference.name, "Resolved reference");
            (self.set)(obj, Some(value), Some(reference));
            return Ok(true);
        }

        let Some(selector) = (self.selector)(obj).cloned() else {
            return Ok(false);
        };
        let matches = select::<T>(stores, &selector).await?;
        let target = match matches.as_slice() {
            [only] => only,
            [] if selector.is_optional() => return Ok(false),
            [] => {
                return Err(ProviderError::ReferenceNotFound(format!(
                    "{}: no {kind} matches selector",
                    self.field
                )))
            }
            many => {
                return Err(ProviderError::Validation(format!(
                    "{}: selector matches {} {kind} objects, expected exactly one",
                    self.field,
                    many.len()
                )))
            }
        };
        let name = target.name_any();
        let value = (self.extract)(target)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| not_ready(self.field, &kind, &name))?;
        debug!(field = self.field, target = %name, "Resolved selector");
        // Pin the selected object so later reconciles do not flip between matches
        (self.set)(obj, Some(value), Some(Reference::new(name)));
        Ok(true)
    }
}

#[async_trait]
impl<K, T> FieldResolver<K> for MultiReference<K, T>
where
    K: Send + Sync + 'static,
    T: StoreObject,
{
    fn field(&self) -> &'static str {
        self.field
    }

    async fn resolve(&self, obj: &mut K, stores: &StoreSet) -> Result<bool> {
        let kind = T::kind(&());
        let current = (self.values)(obj).to_vec();
        let mut references = (self.references)(obj).to_vec();

        let always = references.iter().any(Reference::resolve_always);
        if !current.is_empty() && !always {
            return Ok(false);
        }

        if references.is_empty() {
            let Some(selector) = (self.selector)(obj).cloned() else {
                return Ok(false);
            };
            let matches = select::<T>(stores, &selector).await?;
            if matches.is_empty() && !selector.is_optional() {
                return Err(ProviderError::ReferenceNotFound(format!(
                    "{}: no {kind} matches selector",
                    self.field
                )));
            }
            references = matches
                .iter()
                .map(|m| Reference::new(m.name_any()))
                .collect();
        }

        let store = stores.store::<T>();
        let mut values = Vec::with_capacity(references.len());
        let mut kept = Vec::with_capacity(references.len());
        for reference in references {
            match store.get(&reference.name).await? {
                Some(target) => {
                    let value = (self.extract)(&target)
                        .filter(|v| !v.is_empty())
                        .ok_or_else(|| not_ready(self.field, &kind, &reference.name))?;
                    values.push(value);
                    kept.push(reference);
                }
                None if reference.is_optional() => kept.push(reference),
                None => return Err(not_found(self.field, &kind, &reference.name)),
            }
        }

        if values == current && kept.as_slice() == (self.references)(obj) {
            return Ok(false);
        }
        debug!(field = self.field, count = values.len(), "Resolved references");
        (self.set)(obj, values, kept);
        Ok(true)
    }
}

/// Resolve every reference field of `obj`.
///
/// Returns true if any value slot changed and the object must be persisted.
/// Errors carry the `ReferenceResolution` stage.
pub async fn resolve_references<K: Send + Sync>(
    obj: &mut K,
    fields: &[Box<dyn FieldResolver<K>>],
    stores: &StoreSet,
) -> Result<bool> {
    let mut changed = false;
    for field in fields {
        changed |= field
            .resolve(obj, stores)
            .await
            .map_err(|e| e.at(Stage::ReferenceResolution))?;
    }
    Ok(changed)
}
