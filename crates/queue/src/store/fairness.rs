//! Per-tenant pending lanes with round-robin selection.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use convoy_core::{JobId, TenantId};

/// Orders a tenant's pending jobs: earliest `available_at`, then enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LaneKey {
    pub available_at: DateTime<Utc>,
    pub seq: u64,
    pub job_id: JobId,
}

/// Pending jobs of one queue, split by tenant.
///
/// A tenant is in `ring` exactly when its lane is non-empty. `pop_eligible`
/// serves the first tenant in ring order that has an eligible job and moves
/// it to the back, so with T tenants holding eligible jobs each one is served
/// within T consecutive pops.
#[derive(Debug, Default)]
pub(crate) struct TenantLanes {
    lanes: HashMap<TenantId, BTreeSet<LaneKey>>,
    ring: VecDeque<TenantId>,
    len: usize,
}

impl TenantLanes {
    pub fn push(&mut self, tenant: &TenantId, key: LaneKey) {
        let lane = self.lanes.entry(tenant.clone()).or_default();
        if lane.is_empty() {
            self.ring.push_back(tenant.clone());
        }
        if lane.insert(key) {
            self.len += 1;
        }
    }

    pub fn pop_eligible(&mut self, now: DateTime<Utc>) -> Option<(TenantId, LaneKey)> {
        let pos = self.ring.iter().position(|tenant| {
            self.lanes
                .get(tenant)
                .and_then(|lane| lane.first())
                .is_some_and(|head| head.available_at <= now)
        })?;

        let tenant = self.ring.remove(pos)?;
        let lane = self.lanes.get_mut(&tenant)?;
        let key = lane.pop_first()?;
        self.len -= 1;

        if lane.is_empty() {
            self.lanes.remove(&tenant);
        } else {
            self.ring.push_back(tenant.clone());
        }
        Some((tenant, key))
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn key(at: DateTime<Utc>, seq: u64) -> LaneKey {
        LaneKey {
            available_at: at,
            seq,
            job_id: JobId::new(),
        }
    }

    #[test]
    fn alternates_between_tenants() {
        let now = Utc::now();
        let (a, b) = (TenantId::new("a"), TenantId::new("b"));
        let mut lanes = TenantLanes::default();
        for seq in 0..3 {
            lanes.push(&a, key(now, seq));
        }
        lanes.push(&b, key(now, 10));

        let served: Vec<_> = std::iter::from_fn(|| lanes.pop_eligible(now).map(|(t, _)| t)).collect();
        assert_eq!(served, vec![a.clone(), b, a.clone(), a]);
        assert_eq!(lanes.len(), 0);
    }

    #[test]
    fn delayed_tenant_is_skipped_but_keeps_its_place() {
        let now = Utc::now();
        let (a, b) = (TenantId::new("a"), TenantId::new("b"));
        let mut lanes = TenantLanes::default();
        lanes.push(&a, key(now + Duration::seconds(10), 0));
        lanes.push(&b, key(now, 1));

        assert_eq!(lanes.pop_eligible(now).map(|(t, _)| t), Some(b));
        assert!(lanes.pop_eligible(now).is_none());
        assert_eq!(lanes.len(), 1);
        assert!(lanes.pop_eligible(now + Duration::seconds(10)).is_some());
    }

    #[test]
    fn fifo_within_tenant_with_seq_tiebreak() {
        let now = Utc::now();
        let t = TenantId::new("t");
        let mut lanes = TenantLanes::default();
        let late = key(now, 2);
        let early = key(now, 1);
        lanes.push(&t, late);
        lanes.push(&t, early);

        assert_eq!(lanes.pop_eligible(now).map(|(_, k)| k.seq), Some(1));
        assert_eq!(lanes.pop_eligible(now).map(|(_, k)| k.seq), Some(2));
    }
}
