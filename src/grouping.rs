// 🧮 Movement grouping & migrated-order refinement
//
// A transfer's movements only cancel out within one (loop_id, currency)
// pair, so the detector always works on one group at a time. Each group is
// ordered by (number, amount_index).

use crate::models::FileMovement;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

// ============================================================================
// GROUP KEY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub loop_id: String,
    pub currency: String,
}

impl GroupKey {
    pub fn of(fm: &FileMovement) -> Self {
        GroupKey {
            loop_id: fm.movement.loop_id.clone(),
            currency: fm.movement.currency.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MovementGroup<'a> {
    pub key: GroupKey,
    pub movements: Vec<&'a FileMovement>,
}

// ============================================================================
// MOVEMENT GROUPER
// ============================================================================

pub struct MovementGrouper;

impl MovementGrouper {
    /// Partition movements by (loop_id, currency), dropping zero deltas.
    /// Groups come back in key order; each group is sorted by
    /// (number, amount_index) with input order breaking exact ties.
    pub fn group(moves: &[FileMovement]) -> Vec<MovementGroup<'_>> {
        let mut groups: BTreeMap<GroupKey, Vec<&FileMovement>> = BTreeMap::new();

        for fm in moves.iter().filter(|fm| !fm.delta().is_zero()) {
            groups.entry(GroupKey::of(fm)).or_default().push(fm);
        }

        groups
            .into_iter()
            .map(|(key, mut movements)| {
                movements.sort_by_key(|fm| (fm.movement.number, fm.movement.amount_index));
                MovementGroup { key, movements }
            })
            .collect()
    }
}

// ============================================================================
// MIGRATED ORDER REFINER
// ============================================================================

/// Repairs the order of migrated movements that share a timestamp.
///
/// Historical imports stored such clusters in arbitrary order, which can hide
/// an obvious hill or valley. Only the leading part of a group is touched:
/// scanning stops at the first movement carrying an action. The neighbour
/// right after a cluster decides its shape; the one before it is used only
/// when there is no usable neighbour after. A neighbour that belongs to
/// another ambiguous cluster is not usable, since its own position is in
/// question.
pub struct MigratedOrderRefiner;

impl MigratedOrderRefiner {
    pub fn refine<'a>(group: &[&'a FileMovement]) -> Vec<&'a FileMovement> {
        let mut refined = group.to_vec();
        let clusters = Self::clusters(group);

        let mut ambiguous = vec![false; group.len()];
        for &(start, end) in &clusters {
            ambiguous[start..end].iter_mut().for_each(|a| *a = true);
        }

        for &(start, end) in &clusters {
            let Some(make_valley) = Self::decide_shape(group, &ambiguous, start, end) else {
                continue;
            };

            // sort_by_key is stable, so the original order breaks ties
            refined[start..end].sort_by_key(|fm| {
                if make_valley {
                    fm.delta() >= Decimal::ZERO
                } else {
                    fm.delta() <= Decimal::ZERO
                }
            });
        }

        refined
    }

    /// Maximal same-timestamp runs (len >= 2) before the first action
    fn clusters(group: &[&FileMovement]) -> Vec<(usize, usize)> {
        let limit = group
            .iter()
            .position(|fm| !fm.movement.action.is_empty())
            .unwrap_or(group.len());

        let mut clusters = Vec::new();
        let mut start = 0;
        while start < limit {
            let ts = group[start].movement.ts;
            let mut end = start + 1;
            while end < limit && group[end].movement.ts == ts {
                end += 1;
            }
            if end - start > 1 {
                clusters.push((start, end));
            }
            start = end;
        }
        clusters
    }

    /// Some(true) = order the cluster as a valley, Some(false) = as a hill,
    /// None = no usable neighbour.
    fn decide_shape(
        group: &[&FileMovement],
        ambiguous: &[bool],
        start: usize,
        end: usize,
    ) -> Option<bool> {
        let usable = |i: usize| !ambiguous[i] && !group[i].delta().is_zero();

        if end < group.len() && usable(end) {
            return Some(group[end].delta() > Decimal::ZERO);
        }

        if start > 0 && usable(start - 1) {
            return Some(group[start - 1].delta() < Decimal::ZERO);
        }

        None
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Movement, MovementId};
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 1, 15, 10, minute, 0).unwrap()
    }

    fn create_test_movement(
        id: MovementId,
        number: i64,
        delta: Decimal,
        currency: &str,
        at: DateTime<Utc>,
        action: &str,
    ) -> FileMovement {
        FileMovement {
            movement: Movement {
                id,
                transfer_id: "500".to_string(),
                owner_id: "owner".to_string(),
                number,
                amount_index: 0,
                loop_id: "0".to_string(),
                currency: currency.to_string(),
                issuer_id: "issuer".to_string(),
                peer_id: "peer".to_string(),
                ts: at,
                action: action.to_string(),
            },
            period_id: 1,
            wallet_delta: delta,
            vault_delta: Decimal::ZERO,
            reco_id: None,
        }
    }

    fn ids(moves: &[&FileMovement]) -> Vec<MovementId> {
        moves.iter().map(|fm| fm.id()).collect()
    }

    #[test]
    fn test_group_by_loop_and_currency() {
        let moves = vec![
            create_test_movement(1, 2, dec!(5), "USD", ts(0), ""),
            create_test_movement(2, 1, dec!(-5), "USD", ts(0), ""),
            create_test_movement(3, 1, dec!(3), "EUR", ts(0), ""),
        ];

        let groups = MovementGrouper::group(&moves);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key.currency, "EUR");
        assert_eq!(ids(&groups[0].movements), vec![3]);
        // USD sorted by number
        assert_eq!(ids(&groups[1].movements), vec![2, 1]);
    }

    #[test]
    fn test_group_orders_by_amount_index_within_number() {
        let mut a = create_test_movement(1, 7, dec!(1), "USD", ts(0), "");
        a.movement.amount_index = 1;
        let b = create_test_movement(2, 7, dec!(-1), "USD", ts(0), "");

        let moves = vec![a, b];
        let groups = MovementGrouper::group(&moves);
        assert_eq!(ids(&groups[0].movements), vec![2, 1]);
    }

    #[test]
    fn test_group_drops_zero_deltas() {
        let moves = vec![
            create_test_movement(1, 1, dec!(0), "USD", ts(0), ""),
            create_test_movement(2, 2, dec!(1), "USD", ts(0), ""),
        ];

        let groups = MovementGrouper::group(&moves);
        assert_eq!(ids(&groups[0].movements), vec![2]);
    }

    #[test]
    fn test_group_empty_input() {
        assert!(MovementGrouper::group(&[]).is_empty());
    }

    #[test]
    fn test_refine_cluster_followed_by_negative_forms_hill() {
        let moves = vec![
            create_test_movement(1, 1, dec!(-1), "USD", ts(0), ""),
            create_test_movement(2, 2, dec!(2), "USD", ts(0), ""),
            create_test_movement(3, 3, dec!(-4), "USD", ts(1), ""),
        ];
        let group: Vec<&FileMovement> = moves.iter().collect();

        let refined = MigratedOrderRefiner::refine(&group);

        // Positive first, negative last
        assert_eq!(ids(&refined), vec![2, 1, 3]);
    }

    #[test]
    fn test_refine_cluster_followed_by_positive_forms_valley() {
        let moves = vec![
            create_test_movement(1, 1, dec!(2), "USD", ts(0), ""),
            create_test_movement(2, 2, dec!(-1), "USD", ts(0), ""),
            create_test_movement(3, 3, dec!(-3), "USD", ts(0), ""),
            create_test_movement(4, 4, dec!(4), "USD", ts(1), ""),
        ];
        let group: Vec<&FileMovement> = moves.iter().collect();

        let refined = MigratedOrderRefiner::refine(&group);

        assert_eq!(ids(&refined), vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_refine_uses_previous_neighbour_at_group_end() {
        let moves = vec![
            create_test_movement(1, 1, dec!(-4), "USD", ts(0), ""),
            create_test_movement(2, 2, dec!(3), "USD", ts(1), ""),
            create_test_movement(3, 3, dec!(-2), "USD", ts(1), ""),
            create_test_movement(4, 4, dec!(3), "USD", ts(1), ""),
        ];
        let group: Vec<&FileMovement> = moves.iter().collect();

        let refined = MigratedOrderRefiner::refine(&group);

        // Previous neighbour is negative, so the cluster reads as a valley
        assert_eq!(ids(&refined), vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_refine_leaves_isolated_cluster_alone() {
        let moves = vec![
            create_test_movement(1, 1, dec!(3), "USD", ts(0), ""),
            create_test_movement(2, 2, dec!(-2), "USD", ts(0), ""),
        ];
        let group: Vec<&FileMovement> = moves.iter().collect();

        assert_eq!(ids(&MigratedOrderRefiner::refine(&group)), vec![1, 2]);
    }

    #[test]
    fn test_refine_stops_at_first_action() {
        let moves = vec![
            create_test_movement(1, 1, dec!(1), "USD", ts(0), "move"),
            create_test_movement(2, 2, dec!(-1), "USD", ts(1), ""),
            create_test_movement(3, 3, dec!(2), "USD", ts(1), ""),
            create_test_movement(4, 4, dec!(-5), "USD", ts(2), ""),
        ];
        let group: Vec<&FileMovement> = moves.iter().collect();

        // Cluster 2/3 sits after the "move" and must not be reordered
        assert_eq!(ids(&MigratedOrderRefiner::refine(&group)), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_refine_is_idempotent() {
        let moves = vec![
            create_test_movement(1, 1, dec!(-1), "USD", ts(0), ""),
            create_test_movement(2, 2, dec!(2), "USD", ts(0), ""),
            create_test_movement(3, 3, dec!(-3), "USD", ts(0), ""),
            create_test_movement(4, 4, dec!(5), "USD", ts(0), ""),
            create_test_movement(5, 5, dec!(-3), "USD", ts(1), ""),
            create_test_movement(6, 6, dec!(1), "USD", ts(2), ""),
            create_test_movement(7, 7, dec!(-1), "USD", ts(2), ""),
        ];
        let group: Vec<&FileMovement> = moves.iter().collect();

        let once = MigratedOrderRefiner::refine(&group);
        let twice = MigratedOrderRefiner::refine(&once);

        assert_eq!(ids(&once), vec![2, 4, 1, 3, 5, 7, 6]);
        assert_eq!(ids(&once), ids(&twice));
    }

    #[test]
    fn test_refine_skips_neighbour_inside_another_cluster() {
        let moves = vec![
            create_test_movement(1, 1, dec!(1), "USD", ts(0), ""),
            create_test_movement(2, 2, dec!(-2), "USD", ts(0), ""),
            create_test_movement(3, 3, dec!(-1), "USD", ts(1), ""),
            create_test_movement(4, 4, dec!(3), "USD", ts(1), ""),
            create_test_movement(5, 5, dec!(-5), "USD", ts(2), ""),
        ];
        let group: Vec<&FileMovement> = moves.iter().collect();

        let once = MigratedOrderRefiner::refine(&group);

        // First cluster only borders the second one, so it stays put;
        // the second is followed by a negative and becomes a hill.
        assert_eq!(ids(&once), vec![1, 2, 4, 3, 5]);
        assert_eq!(ids(&MigratedOrderRefiner::refine(&once)), ids(&once));
    }
}
