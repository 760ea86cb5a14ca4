//! Definition of volume type records and their extra-specs comparison.

use crate::transport::VolumeTypeId;
use memstor::{ObjectKey, StorableObject, StorableObjectType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Extra-spec key carrying the encryption configuration.
pub const SPEC_ENCRYPTION: &str = "encryption";
/// Extra-spec key prefix carrying QoS configuration.
pub const SPEC_QOS_PREFIX: &str = "qos:";
/// Extra-spec key flagging replication.
pub const SPEC_REPLICATION: &str = "replication_enabled";

/// The persisted record of a volume type: a named bundle of backend-selection
/// extra-specs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct VolumeTypeSpec {
    /// Volume type Id.
    pub id: VolumeTypeId,
    /// Human readable name.
    pub name: String,
    /// Backend-selection extra-specs.
    pub extra_specs: HashMap<String, String>,
}

impl VolumeTypeSpec {
    /// Whether the type requires replication.
    pub fn replication_enabled(&self) -> bool {
        self.extra_specs
            .get(SPEC_REPLICATION)
            .map(|value| value == "true" || value == "<is> True")
            .unwrap_or(false)
    }

    /// Diff the extra-specs which decide whether a retype can happen in
    /// place: encryption, QoS and replication.
    pub fn diff(old: Option<&VolumeTypeSpec>, new: &VolumeTypeSpec) -> ExtraSpecsDiff {
        let empty = HashMap::new();
        let old_specs = old.map(|t| &t.extra_specs).unwrap_or(&empty);
        let relevant = |key: &String| {
            key == SPEC_ENCRYPTION || key == SPEC_REPLICATION || key.starts_with(SPEC_QOS_PREFIX)
        };
        let mut changed = Vec::new();
        for (key, value) in new.extra_specs.iter().filter(|(key, _)| relevant(key)) {
            if old_specs.get(key) != Some(value) {
                changed.push(key.clone());
            }
        }
        for key in old_specs.keys().filter(|key| relevant(key)) {
            if !new.extra_specs.contains_key(key) {
                changed.push(key.clone());
            }
        }
        changed.sort();
        changed.dedup();
        ExtraSpecsDiff { changed }
    }
}

/// Outcome of comparing two volume types' migration-deciding extra-specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraSpecsDiff {
    changed: Vec<String>,
}

impl ExtraSpecsDiff {
    /// No relevant extra-spec differs.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
    /// The differing extra-spec keys, sorted.
    pub fn changed(&self) -> &[String] {
        &self.changed
    }
    /// Whether the replication configuration differs.
    pub fn replication_changed(&self) -> bool {
        self.changed.iter().any(|key| key == SPEC_REPLICATION)
    }
}

/// Key used by the store to uniquely identify a VolumeTypeSpec structure.
pub struct VolumeTypeSpecKey(VolumeTypeId);

impl From<&VolumeTypeId> for VolumeTypeSpecKey {
    fn from(id: &VolumeTypeId) -> Self {
        Self(id.clone())
    }
}

impl ObjectKey for VolumeTypeSpecKey {
    fn key_type(&self) -> StorableObjectType {
        StorableObjectType::VolumeTypeSpec
    }

    fn key_uuid(&self) -> String {
        self.0.to_string()
    }
}

impl StorableObject for VolumeTypeSpec {
    type Key = VolumeTypeSpecKey;

    fn key(&self) -> Self::Key {
        VolumeTypeSpecKey(self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_type(id: &str, specs: &[(&str, &str)]) -> VolumeTypeSpec {
        VolumeTypeSpec {
            id: VolumeTypeId::from(id),
            name: id.to_string(),
            extra_specs: specs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn irrelevant_specs_do_not_diff() {
        let old = volume_type("silver", &[("vendor:tier", "7200rpm")]);
        let new = volume_type("gold", &[("vendor:tier", "ssd")]);
        assert!(VolumeTypeSpec::diff(Some(&old), &new).is_empty());
    }

    #[test]
    fn qos_and_replication_diff() {
        let old = volume_type("silver", &[("qos:iops", "100")]);
        let new = volume_type("gold", &[("qos:iops", "1000"), (SPEC_REPLICATION, "true")]);
        let diff = VolumeTypeSpec::diff(Some(&old), &new);
        assert_eq!(diff.changed(), ["qos:iops", SPEC_REPLICATION]);
        assert!(diff.replication_changed());
    }

    #[test]
    fn removed_spec_diffs() {
        let old = volume_type("gold", &[(SPEC_ENCRYPTION, "luks")]);
        let new = volume_type("plain", &[]);
        let diff = VolumeTypeSpec::diff(Some(&old), &new);
        assert_eq!(diff.changed(), [SPEC_ENCRYPTION]);
    }
}
