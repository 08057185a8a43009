// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Ordered machine collections with set algebra.

use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::machine::{Machine, Role};

/// An ordered collection of machines, unique by machine id.
///
/// All operations return new sets and never mutate their inputs.
#[derive(Clone, Default)]
pub struct MachineSet {
    machines: Vec<Arc<dyn Machine>>,
}

impl MachineSet {
    /// Creates a set from `machines`, keeping the first occurrence of each id.
    pub fn new(machines: Vec<Arc<dyn Machine>>) -> Self {
        machines.into_iter().collect()
    }

    /// Returns the number of machines.
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Iterates over the machines in order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Machine>> {
        self.machines.iter()
    }

    /// Returns the machine ids in order.
    pub fn ids(&self) -> Vec<String> {
        self.machines.iter().map(|m| m.id().to_string()).collect()
    }

    /// Returns true if a machine with `id` is in the set.
    pub fn contains(&self, id: &str) -> bool {
        self.machines.iter().any(|m| m.id() == id)
    }

    /// Returns the machine with `id`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Machine>> {
        self.machines.iter().find(|m| m.id() == id).cloned()
    }

    /// Machines in `self` or `other`; `self`'s order first.
    pub fn union(&self, other: &MachineSet) -> MachineSet {
        self.machines.iter().chain(other.machines.iter()).cloned().collect()
    }

    /// Machines in both `self` and `other`, in `self`'s order.
    pub fn intersection(&self, other: &MachineSet) -> MachineSet {
        self.filter(|m| other.contains(m.id()))
    }

    /// Machines in `self` but not in `other`.
    pub fn difference(&self, other: &MachineSet) -> MachineSet {
        self.filter(|m| !other.contains(m.id()))
    }

    /// Machines that do not host an agent.
    pub fn without_agent(&self) -> MachineSet {
        self.filter(|m| !m.has_agent())
    }

    /// Machines that host `role`.
    pub fn with_role(&self, role: Role) -> MachineSet {
        self.filter(|m| m.has_role(role))
    }

    /// Machines matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&Arc<dyn Machine>) -> bool) -> MachineSet {
        Self { machines: self.machines.iter().filter(|m| predicate(m)).cloned().collect() }
    }

    /// Picks a machine uniformly at random.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<dyn Machine>> {
        self.machines.choose(rng).cloned()
    }
}

impl FromIterator<Arc<dyn Machine>> for MachineSet {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Machine>>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let machines =
            iter.into_iter().filter(|m| seen.insert(m.id().to_string())).collect::<Vec<_>>();
        Self { machines }
    }
}

impl std::fmt::Debug for MachineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.machines.iter().map(|m| m.id())).finish()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::testing::FakeMachine;

    fn set(specs: &[(&str, bool)]) -> MachineSet {
        MachineSet::new(
            specs
                .iter()
                .map(|(id, agent)| Arc::new(FakeMachine::new(*id, *agent)) as Arc<dyn Machine>)
                .collect(),
        )
    }

    #[test]
    fn test_new_deduplicates_by_id() {
        let machines = set(&[("m1", true), ("m2", false), ("m1", false)]);
        assert_eq!(machines.ids(), vec!["m1", "m2"]);
        // First occurrence wins
        assert!(machines.get("m1").unwrap().has_agent());
    }

    #[test]
    fn test_set_algebra() {
        let a = set(&[("m1", true), ("m2", true), ("m3", false)]);
        let b = set(&[("m3", false), ("m4", false)]);

        assert_eq!(a.union(&b).ids(), vec!["m1", "m2", "m3", "m4"]);
        assert_eq!(a.intersection(&b).ids(), vec!["m3"]);
        assert_eq!(a.difference(&b).ids(), vec!["m1", "m2"]);
        assert_eq!(a.without_agent().ids(), vec!["m3"]);
        assert_eq!(a.with_role(Role::Agent).ids(), vec!["m1", "m2"]);
        assert_eq!(a.with_role(Role::Coordinator).len(), 3);

        // Inputs untouched
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_choose() {
        let machines = set(&[("m1", true), ("m2", true)]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10 {
            let chosen = machines.choose(&mut rng).unwrap();
            assert!(machines.contains(chosen.id()));
        }
        assert!(MachineSet::default().choose(&mut rng).is_none());
    }

    #[test]
    fn test_debug_lists_ids() {
        let machines = set(&[("m1", true), ("m2", false)]);
        assert_eq!(format!("{:?}", machines), r#"["m1", "m2"]"#);
    }
}
