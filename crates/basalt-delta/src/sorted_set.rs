//! Members ordered by score.

use crate::delta_info::DeltaInfo;
use crate::entity::{DeltaEntity, EntityHeader, EntityKind};
use crate::error::{DeltaError, Result};
use basalt_wire::{DataInput, DataOutput, WireError};
use bytes::Bytes;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SortedSetEntity {
    header: EntityHeader,
    scores: BTreeMap<Bytes, f64>,
}

impl SortedSetEntity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add members or update their scores. The delta lists only pairs that
    /// changed something.
    pub fn zadd(&mut self, pairs: Vec<(Bytes, f64)>) -> Option<DeltaInfo> {
        let mut changed = Vec::new();
        for (member, score) in pairs {
            let previous = self.scores.insert(member.clone(), score);
            if previous != Some(score) {
                changed.push((member, score));
            }
        }
        (!changed.is_empty()).then_some(DeltaInfo::ZAdds(changed))
    }

    pub fn zrem(&mut self, members: Vec<Bytes>) -> Option<DeltaInfo> {
        let removed: Vec<Bytes> = members
            .into_iter()
            .filter(|m| self.scores.remove(m).is_some())
            .collect();
        (!removed.is_empty()).then_some(DeltaInfo::Rems(removed))
    }

    pub fn zscore(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn zcard(&self) -> usize {
        self.scores.len()
    }

    /// Members in ascending score order; ties broken by member bytes.
    pub fn range_by_score(&self) -> Vec<(Bytes, f64)> {
        let mut ordered: Vec<(Bytes, f64)> =
            self.scores.iter().map(|(m, s)| (m.clone(), *s)).collect();
        ordered.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        ordered
    }
}

impl DeltaEntity for SortedSetEntity {
    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn kind(&self) -> EntityKind {
        EntityKind::SortedSet
    }

    fn apply_data_delta(&mut self, delta: &DeltaInfo) -> Result<()> {
        match delta {
            DeltaInfo::ZAdds(pairs) => {
                for (member, score) in pairs {
                    self.scores.insert(member.clone(), *score);
                }
                Ok(())
            }
            DeltaInfo::Rems(members) => {
                for member in members {
                    self.scores.remove(member);
                }
                Ok(())
            }
            other => Err(DeltaError::invalid(
                self.kind().name(),
                other.delta_type().name(),
            )),
        }
    }

    fn is_logically_empty(&self) -> bool {
        self.scores.is_empty()
    }

    fn write_body(&self, out: &mut DataOutput) -> Result<()> {
        out.write_i32(self.scores.len() as i32);
        for (member, score) in &self.scores {
            out.write_byte_array(member);
            out.write_f64(*score);
        }
        Ok(())
    }

    fn read_body(input: &mut DataInput) -> Result<Self> {
        let count = input.read_i32()?;
        let count = usize::try_from(count)
            .map_err(|_| DeltaError::Wire(WireError::InvalidArrayLength(count)))?;
        let mut scores = BTreeMap::new();
        for _ in 0..count {
            let member = input.read_byte_array()?;
            let score = input.read_f64()?;
            scores.insert(member, score);
        }
        Ok(Self {
            header: EntityHeader::new(),
            scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::apply_delta;

    fn m(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_zadd_reports_changes_only() {
        let mut z = SortedSetEntity::new();
        assert_eq!(
            z.zadd(vec![(m("a"), 1.0), (m("b"), 2.0)]),
            Some(DeltaInfo::ZAdds(vec![(m("a"), 1.0), (m("b"), 2.0)]))
        );
        assert_eq!(z.zadd(vec![(m("a"), 1.0)]), None);
        assert_eq!(
            z.zadd(vec![(m("a"), 3.0)]),
            Some(DeltaInfo::ZAdds(vec![(m("a"), 3.0)]))
        );
        assert_eq!(z.zscore(b"a"), Some(3.0));
    }

    #[test]
    fn test_range_order() {
        let mut z = SortedSetEntity::new();
        z.zadd(vec![(m("c"), 1.0), (m("a"), 2.0), (m("b"), 1.0)]);
        let names: Vec<_> = z.range_by_score().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![m("b"), m("c"), m("a")]);
    }

    #[test]
    fn test_replica_follows_deltas() {
        let mut primary = SortedSetEntity::new();
        let mut replica = SortedSetEntity::new();
        let deltas = [
            primary.zadd(vec![(m("a"), 1.0), (m("b"), 2.0)]),
            primary.zrem(vec![m("a")]),
            primary.zadd(vec![(m("b"), 5.5)]),
        ];
        for delta in deltas.iter().flatten() {
            apply_delta(&mut replica, delta).unwrap();
        }
        assert_eq!(replica, primary);
        assert_eq!(replica.zcard(), 1);
    }

    #[test]
    fn test_adds_rejected() {
        let mut z = SortedSetEntity::new();
        assert_eq!(
            apply_delta(&mut z, &DeltaInfo::Adds(vec![m("a")])),
            Err(DeltaError::invalid("sorted set", "ADDS"))
        );
        assert!(z.is_logically_empty());
    }
}
