// SPDX-License-Identifier: GPL-2.0-or-later

//! Payload generators.
//!
//! A template may declare named payload lists together with an attack
//! combination. The resulting iterator is a cold, finite source of
//! variable overlays; it is obtained fresh for every execution and
//! consumed exactly once.

use serde::Deserialize;
use thiserror::Error;

use crate::vars::{VarValue, Variables};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("no payloads defined")]
    Empty,
    #[error("payload list {0} is empty")]
    EmptyList(String),
}

/// How multiple payload lists are combined into iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackType {
    /// The first list is cycled into every payload position.
    #[default]
    #[serde(rename = "batteringram")]
    BatteringRam,
    /// All lists advance in lockstep, ending with the shortest.
    Pitchfork,
    /// Cartesian product over all lists.
    ClusterBomb,
}

/// Named payload lists in declaration order plus the attack combination.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayloadSet {
    #[serde(default, rename = "attack")]
    pub attack: AttackType,
    #[serde(default, deserialize_with = "payload_lists")]
    pub payloads: Vec<(String, Vec<VarValue>)>,
}

/// Deserializes a document mapping into name/list pairs, keeping the
/// declaration order the attack combinations depend on.
fn payload_lists<'de, D>(deserializer: D) -> Result<Vec<(String, Vec<VarValue>)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Lists;

    impl<'de> serde::de::Visitor<'de> for Lists {
        type Value = Vec<(String, Vec<VarValue>)>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a mapping of payload names to value lists")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry()? {
                out.push(entry);
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(Lists)
}

impl PayloadSet {
    pub fn new(attack: AttackType, payloads: Vec<(String, Vec<VarValue>)>) -> Self {
        Self { attack, payloads }
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Total number of iterations the iterator will yield.
    pub fn total(&self) -> usize {
        if self.payloads.is_empty() {
            return 0;
        }
        match self.attack {
            AttackType::BatteringRam => self.payloads[0].1.len(),
            AttackType::Pitchfork => self.payloads.iter().map(|(_, v)| v.len()).min().unwrap_or(0),
            AttackType::ClusterBomb => self.payloads.iter().map(|(_, v)| v.len()).product(),
        }
    }

    /// Creates a fresh iterator over this payload set. Reusing an
    /// exhausted iterator across targets is undefined, callers obtain a
    /// new one per execution.
    pub fn iterator(&self) -> Result<PayloadIterator, GeneratorError> {
        if self.payloads.is_empty() {
            return Err(GeneratorError::Empty);
        }
        for (name, values) in &self.payloads {
            if values.is_empty() {
                return Err(GeneratorError::EmptyList(name.clone()));
            }
        }
        let limit = match self.attack {
            AttackType::BatteringRam => self.payloads[0].1.len(),
            AttackType::Pitchfork => self.payloads.iter().map(|(_, v)| v.len()).min().unwrap_or(0),
            // the cluster bomb cursor carries its own end condition
            AttackType::ClusterBomb => 0,
        };
        Ok(PayloadIterator {
            attack: self.attack,
            payloads: self.payloads.clone(),
            limit,
            position: 0,
            indices: vec![0; self.payloads.len()],
            done: false,
        })
    }
}

/// Lazy, finite, non-restartable source of payload overlays.
///
/// Combinations are computed on demand from a cursor; the cartesian
/// product of a cluster bomb is never materialized.
pub struct PayloadIterator {
    attack: AttackType,
    payloads: Vec<(String, Vec<VarValue>)>,
    limit: usize,
    position: usize,
    /// Per-list cursors for the cluster bomb, last list advancing first.
    indices: Vec<usize>,
    done: bool,
}

impl Iterator for PayloadIterator {
    type Item = Variables;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.attack {
            AttackType::BatteringRam => {
                if self.position >= self.limit {
                    self.done = true;
                    return None;
                }
                let value = self.payloads[0].1[self.position].clone();
                self.position += 1;
                Some(
                    self.payloads
                        .iter()
                        .map(|(name, _)| (name.clone(), value.clone()))
                        .collect(),
                )
            }
            AttackType::Pitchfork => {
                if self.position >= self.limit {
                    self.done = true;
                    return None;
                }
                let combination = self
                    .payloads
                    .iter()
                    .map(|(name, values)| (name.clone(), values[self.position].clone()))
                    .collect();
                self.position += 1;
                Some(combination)
            }
            AttackType::ClusterBomb => {
                let combination = self
                    .payloads
                    .iter()
                    .zip(&self.indices)
                    .map(|((name, values), &i)| (name.clone(), values[i].clone()))
                    .collect();
                for slot in (0..self.indices.len()).rev() {
                    self.indices[slot] += 1;
                    if self.indices[slot] < self.payloads[slot].1.len() {
                        return Some(combination);
                    }
                    self.indices[slot] = 0;
                }
                self.done = true;
                Some(combination)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(v: &[&str]) -> Vec<VarValue> {
        v.iter().map(|s| VarValue::from(*s)).collect()
    }

    #[test]
    fn battering_ram_fills_all_positions() {
        let set = PayloadSet::new(
            AttackType::BatteringRam,
            vec![
                ("a".to_string(), values(&["1", "2"])),
                ("b".to_string(), values(&["x"])),
            ],
        );
        let all: Vec<_> = set.iterator().unwrap().collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].get("a"), all[0].get("b"));
        assert_eq!(all[1].get("a").unwrap().to_string(), "2");
    }

    #[test]
    fn pitchfork_stops_at_shortest() {
        let set = PayloadSet::new(
            AttackType::Pitchfork,
            vec![
                ("user".to_string(), values(&["u1", "u2", "u3"])),
                ("pass".to_string(), values(&["p1", "p2"])),
            ],
        );
        let all: Vec<_> = set.iterator().unwrap().collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].get("user").unwrap().to_string(), "u2");
        assert_eq!(all[1].get("pass").unwrap().to_string(), "p2");
    }

    #[test]
    fn cluster_bomb_is_cartesian() {
        let set = PayloadSet::new(
            AttackType::ClusterBomb,
            vec![
                ("a".to_string(), values(&["1", "2"])),
                ("b".to_string(), values(&["x", "y", "z"])),
            ],
        );
        assert_eq!(set.total(), 6);
        let all: Vec<_> = set.iterator().unwrap().collect();
        assert_eq!(all.len(), 6);
        assert_eq!(all[5].get("a").unwrap().to_string(), "2");
        assert_eq!(all[5].get("b").unwrap().to_string(), "z");
    }

    #[test]
    fn empty_list_is_rejected() {
        let set = PayloadSet::new(
            AttackType::Pitchfork,
            vec![("a".to_string(), Vec::new())],
        );
        assert!(matches!(
            set.iterator(),
            Err(GeneratorError::EmptyList(_))
        ));
    }
}
