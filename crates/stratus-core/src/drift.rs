//! Drift detection helpers shared by the per-kind adapters
//!
//! - late-initialization: copy observed values into unset spec fields
//! - tag diff: compute add/remove sets between desired and observed tags
//! - policy comparison: JSON documents compared semantically
//! - patch groups: pick one exclusive modification group per call

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

/// Fill an unset optional field from an observed value.
///
/// Never overwrites a set value. Returns true if the field changed.
pub fn late_init<T>(field: &mut Option<T>, observed: Option<T>) -> bool {
    if field.is_some() {
        return false;
    }
    match observed {
        Some(value) => {
            *field = Some(value);
            true
        }
        None => false,
    }
}

/// Like [`late_init`], but treats empty observed strings as absent
pub fn late_init_string(field: &mut Option<String>, observed: Option<&str>) -> bool {
    late_init(
        field,
        observed.filter(|s| !s.is_empty()).map(str::to_string),
    )
}

/// Fill an empty list from an observed list
pub fn late_init_vec<T: Clone>(field: &mut Vec<T>, observed: &[T]) -> bool {
    if !field.is_empty() || observed.is_empty() {
        return false;
    }
    *field = observed.to_vec();
    true
}

/// Fill an empty map from an observed map
pub fn late_init_map<S: BuildHasher>(
    field: &mut BTreeMap<String, String>,
    observed: &HashMap<String, String, S>,
) -> bool {
    if !field.is_empty() || observed.is_empty() {
        return false;
    }
    *field = observed
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    true
}

/// Changes needed to bring an observed tag set to the desired one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// Keys to set, with their desired values
    pub add: BTreeMap<String, String>,
    /// Keys to remove
    pub remove: Vec<String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Apply to an observed tag set: remove first, then add
    pub fn apply(&self, current: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut result = current.clone();
        for key in &self.remove {
            result.remove(key);
        }
        for (k, v) in &self.add {
            result.insert(k.clone(), v.clone());
        }
        result
    }
}

/// Compare desired and observed tags.
///
/// `add` holds keys that are absent remotely or carry a different value;
/// `remove` holds keys present remotely but not desired.
pub fn diff_tags(
    desired: &BTreeMap<String, String>,
    observed: &BTreeMap<String, String>,
) -> TagDiff {
    let add = desired
        .iter()
        .filter(|(k, v)| observed.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let remove = observed
        .keys()
        .filter(|k| !desired.contains_key(*k))
        .cloned()
        .collect();
    TagDiff { add, remove }
}

/// Normalize a JSON value for comparison.
///
/// Object keys are ordered by `serde_json::Map`, whitespace is lost on parse,
/// and single-element arrays collapse to their element the way AWS policy
/// grammar treats `"Action": "x"` and `"Action": ["x"]` alike.
fn normalize(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().map(normalize).collect();
            if items.len() == 1 {
                items.remove(0)
            } else {
                Value::Array(items)
            }
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Semantic equality of two JSON policy documents.
///
/// Two empty/absent documents are equal; documents that fail to parse are
/// compared as trimmed strings.
pub fn policies_equal(a: Option<&str>, b: Option<&str>) -> bool {
    let a = a.map(str::trim).filter(|s| !s.is_empty());
    let b = b.map(str::trim).filter(|s| !s.is_empty());
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => match (
            serde_json::from_str::<serde_json::Value>(a),
            serde_json::from_str::<serde_json::Value>(b),
        ) {
            (Ok(x), Ok(y)) => normalize(x) == normalize(y),
            _ => a == b,
        },
        _ => false,
    }
}

/// Canonical JSON rendering of a policy, for storing observed values
pub fn canonical_policy(raw: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .map(|v| v.to_string())
}

/// Optional field is up to date: unset desired values are not compared
pub fn is_up_to_date<T: PartialEq>(desired: Option<&T>, observed: Option<&T>) -> bool {
    match desired {
        None => true,
        Some(d) => observed == Some(d),
    }
}

/// One modification group of a targeted update
#[derive(Debug, Clone, PartialEq)]
pub struct PatchGroup<P> {
    /// Lower values are issued first
    pub priority: u8,
    pub name: &'static str,
    /// Whether this group must be sent on its own
    pub exclusive: bool,
    pub patch: P,
}

/// The groups to send this call and whether more remain
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPlan<P> {
    pub groups: Vec<PatchGroup<P>>,
    pub remaining: bool,
}

/// Pick the groups to send now from the dirty ones.
///
/// If the highest-priority dirty group is exclusive it is sent alone. If not,
/// all non-exclusive groups are sent together; exclusive groups never share a
/// request. `remaining` tells the caller to requeue for the rest.
pub fn plan_patch<P>(mut dirty: Vec<PatchGroup<P>>) -> PatchPlan<P> {
    dirty.sort_by_key(|g| g.priority);
    let total = dirty.len();
    let first_exclusive = dirty.first().is_some_and(|g| g.exclusive);

    let groups: Vec<PatchGroup<P>> = if first_exclusive {
        dirty.into_iter().take(1).collect()
    } else {
        dirty.into_iter().filter(|g| !g.exclusive).collect()
    };
    let remaining = groups.len() < total;
    PatchPlan { groups, remaining }
}

/// Cluster type implied by a node count, for services that do not report it
pub fn cluster_type_for_nodes(number_of_nodes: i32) -> &'static str {
    if number_of_nodes > 1 {
        "multi-node"
    } else {
        "single-node"
    }
}
