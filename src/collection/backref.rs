//! Reverse index of forward references, read by back-reference fields.

use crate::model::{EntityKey, RefId, TypeTag};
use std::collections::HashMap;

type Slot = (TypeTag, String);

#[derive(Debug, Default)]
pub(crate) struct BackRefIndex {
    /// (referencing type, field) -> target -> referencing models.
    incoming: HashMap<Slot, HashMap<RefId, Vec<EntityKey>>>,
    /// owner -> field -> (owner type, targets), to undo a previous write.
    outgoing: HashMap<EntityKey, HashMap<String, (TypeTag, Vec<RefId>)>>,
}

impl BackRefIndex {
    /// Replaces what `owner.field` points at.
    pub(crate) fn set(&mut self, owner: EntityKey, owner_type: &TypeTag, field: &str, targets: Vec<RefId>) {
        self.unlink(owner, field);
        if targets.is_empty() {
            return;
        }
        let by_target = self
            .incoming
            .entry((owner_type.clone(), field.to_string()))
            .or_default();
        for target in &targets {
            let owners = by_target.entry(target.clone()).or_default();
            if !owners.contains(&owner) {
                owners.push(owner);
            }
        }
        self.outgoing
            .entry(owner)
            .or_default()
            .insert(field.to_string(), (owner_type.clone(), targets));
    }

    pub(crate) fn remove_owner(&mut self, owner: EntityKey) {
        let fields: Vec<String> = self
            .outgoing
            .get(&owner)
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        for field in fields {
            self.unlink(owner, &field);
        }
    }

    /// Re-keys every entry pointing at `old`.
    pub(crate) fn rename_target(&mut self, old: &RefId, new: &RefId) {
        for by_target in self.incoming.values_mut() {
            if let Some(owners) = by_target.remove(old) {
                by_target.entry(new.clone()).or_default().extend(owners);
            }
        }
        for fields in self.outgoing.values_mut() {
            for (_, targets) in fields.values_mut() {
                for target in targets.iter_mut().filter(|t| *t == old) {
                    *target = new.clone();
                }
            }
        }
    }

    pub(crate) fn referencing(&self, owner_type: &TypeTag, field: &str, target: &RefId) -> Vec<EntityKey> {
        self.incoming
            .get(&(owner_type.clone(), field.to_string()))
            .and_then(|by_target| by_target.get(target))
            .cloned()
            .unwrap_or_default()
    }

    /// Every owner with some field pointing at `target`.
    pub(crate) fn owners_of(&self, target: &RefId) -> Vec<EntityKey> {
        let mut owners: Vec<EntityKey> = self
            .incoming
            .values()
            .filter_map(|by_target| by_target.get(target))
            .flatten()
            .copied()
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    pub(crate) fn clear(&mut self) {
        self.incoming.clear();
        self.outgoing.clear();
    }

    fn unlink(&mut self, owner: EntityKey, field: &str) {
        let Some(fields) = self.outgoing.get_mut(&owner) else {
            return;
        };
        if let Some((owner_type, targets)) = fields.remove(field) {
            if let Some(by_target) = self.incoming.get_mut(&(owner_type, field.to_string())) {
                for target in targets {
                    if let Some(owners) = by_target.get_mut(&target) {
                        owners.retain(|k| *k != owner);
                        if owners.is_empty() {
                            by_target.remove(&target);
                        }
                    }
                }
            }
        }
        if fields.is_empty() {
            self.outgoing.remove(&owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_replace_previous_targets() {
        let mut index = BackRefIndex::default();
        let owner = EntityKey::next();
        let pet = TypeTag::from("pet");

        index.set(owner, &pet, "owner", vec![RefId::new("person", 1)]);
        index.set(owner, &pet, "owner", vec![RefId::new("person", 2)]);

        assert!(index.referencing(&pet, "owner", &RefId::new("person", 1)).is_empty());
        assert_eq!(index.referencing(&pet, "owner", &RefId::new("person", 2)), vec![owner]);
    }

    #[test]
    fn rename_and_removal() {
        let mut index = BackRefIndex::default();
        let a = EntityKey::next();
        let b = EntityKey::next();
        let pet = TypeTag::from("pet");
        let old = RefId::new("person", -1);
        let new = RefId::new("person", 10);

        index.set(a, &pet, "owner", vec![old.clone()]);
        index.set(b, &pet, "owner", vec![old.clone()]);
        index.rename_target(&old, &new);
        assert_eq!(index.referencing(&pet, "owner", &new), vec![a, b]);

        index.set(a, &TypeTag::from("vet"), "patient_of", vec![new.clone()]);
        assert_eq!(index.owners_of(&new), vec![a, b]);

        index.remove_owner(a);
        assert_eq!(index.referencing(&pet, "owner", &new), vec![b]);
        assert_eq!(index.owners_of(&new), vec![b]);
        // The renamed target survives a rewrite of the remaining owner.
        index.set(b, &pet, "owner", Vec::new());
        assert!(index.referencing(&pet, "owner", &new).is_empty());
    }
}
