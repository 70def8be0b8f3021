// 📚 RecoBook - In-memory arena of movements, statement entries and Recos
//
// Both matching paths plan against a RecoBook and write their Recos into it.
// Reco ids are allocated here once, so nothing upstream ever needs a
// placeholder id. Persisting the book is the caller's job (see db.rs).

use crate::error::{RecoError, Result};
use crate::models::{
    AccountEntry, EntryId, FileMovement, MovementId, PeriodId, Reco, RecoId, RecoType,
    StatementId,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Clone)]
pub struct RecoBook {
    movements: BTreeMap<MovementId, FileMovement>,
    entries: BTreeMap<EntryId, AccountEntry>,
    recos: BTreeMap<RecoId, Reco>,
    next_reco_id: RecoId,
}

impl RecoBook {
    pub fn new() -> Self {
        RecoBook {
            movements: BTreeMap::new(),
            entries: BTreeMap::new(),
            recos: BTreeMap::new(),
            next_reco_id: 1,
        }
    }

    /// Rebuild a book from stored rows; new Reco ids continue after the highest one
    pub fn from_parts(
        movements: Vec<FileMovement>,
        entries: Vec<AccountEntry>,
        recos: Vec<Reco>,
    ) -> Self {
        let mut book = RecoBook::new();
        for reco in recos {
            book.next_reco_id = book.next_reco_id.max(reco.id + 1);
            book.recos.insert(reco.id, reco);
        }
        for fm in movements {
            book.add_movement(fm);
        }
        for entry in entries {
            book.add_entry(entry);
        }
        book
    }

    pub fn add_movement(&mut self, fm: FileMovement) {
        self.movements.insert(fm.id(), fm);
    }

    pub fn add_entry(&mut self, entry: AccountEntry) {
        self.entries.insert(entry.id, entry);
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    pub fn movement(&self, id: MovementId) -> Option<&FileMovement> {
        self.movements.get(&id)
    }

    pub fn entry(&self, id: EntryId) -> Option<&AccountEntry> {
        self.entries.get(&id)
    }

    pub fn reco(&self, id: RecoId) -> Option<&Reco> {
        self.recos.get(&id)
    }

    pub fn movements(&self) -> impl Iterator<Item = &FileMovement> {
        self.movements.values()
    }

    pub fn entries(&self) -> impl Iterator<Item = &AccountEntry> {
        self.entries.values()
    }

    pub fn recos(&self) -> impl Iterator<Item = &Reco> {
        self.recos.values()
    }

    /// All file movements of one transfer, in (number, amount_index) order
    pub fn movements_for_transfer(&self, transfer_id: &str) -> Vec<FileMovement> {
        let mut moves: Vec<FileMovement> = self
            .movements
            .values()
            .filter(|fm| fm.movement.transfer_id == transfer_id)
            .cloned()
            .collect();
        moves.sort_by_key(|fm| (fm.movement.number, fm.movement.amount_index));
        moves
    }

    pub fn reconciled_movement_ids(&self) -> HashSet<MovementId> {
        self.movements
            .values()
            .filter(|fm| fm.is_reconciled())
            .map(|fm| fm.id())
            .collect()
    }

    pub fn unreconciled_movements(&self, period_id: PeriodId) -> Vec<&FileMovement> {
        self.movements
            .values()
            .filter(|fm| fm.period_id == period_id && !fm.is_reconciled())
            .collect()
    }

    pub fn unreconciled_entries(&self, statement_id: StatementId) -> Vec<&AccountEntry> {
        self.entries
            .values()
            .filter(|e| e.statement_id == statement_id && !e.is_reconciled())
            .collect()
    }

    pub fn statement_ids(&self) -> BTreeSet<StatementId> {
        self.entries.values().map(|e| e.statement_id).collect()
    }

    pub fn reco_movements(&self, reco_id: RecoId) -> Vec<&FileMovement> {
        self.movements
            .values()
            .filter(|fm| fm.reco_id == Some(reco_id))
            .collect()
    }

    pub fn reco_entries(&self, reco_id: RecoId) -> Vec<&AccountEntry> {
        self.entries
            .values()
            .filter(|e| e.reco_id == Some(reco_id))
            .collect()
    }

    // ========================================================================
    // RECO CREATION & ATTACHMENT
    // ========================================================================

    pub fn create_reco(&mut self, period_id: PeriodId, internal: bool) -> RecoId {
        let id = self.next_reco_id;
        self.next_reco_id += 1;
        self.recos.insert(id, Reco::new_standard(id, period_id, internal));
        id
    }

    /// Attach a movement to a Reco, moving it into the Reco's period.
    /// Re-attaching to the same Reco is a no-op.
    pub fn attach_movement(&mut self, reco_id: RecoId, movement_id: MovementId) -> Result<()> {
        let period_id = self
            .recos
            .get(&reco_id)
            .ok_or(RecoError::UnknownReco(reco_id))?
            .period_id;
        let fm = self
            .movements
            .get_mut(&movement_id)
            .ok_or(RecoError::UnknownMovement(movement_id))?;

        match fm.reco_id {
            Some(existing) if existing == reco_id => Ok(()),
            Some(existing) => Err(RecoError::AlreadyReconciled {
                kind: "movement",
                id: movement_id,
                reco_id: existing,
            }),
            None => {
                fm.reco_id = Some(reco_id);
                fm.period_id = period_id;
                Ok(())
            }
        }
    }

    /// Attach a statement entry to a Reco, moving it into the Reco's period.
    pub fn attach_entry(&mut self, reco_id: RecoId, entry_id: EntryId) -> Result<()> {
        let period_id = self
            .recos
            .get(&reco_id)
            .ok_or(RecoError::UnknownReco(reco_id))?
            .period_id;
        let entry = self
            .entries
            .get_mut(&entry_id)
            .ok_or(RecoError::UnknownEntry(entry_id))?;

        match entry.reco_id {
            Some(existing) if existing == reco_id => Ok(()),
            Some(existing) => Err(RecoError::AlreadyReconciled {
                kind: "account entry",
                id: entry_id,
                reco_id: existing,
            }),
            None => {
                entry.reco_id = Some(reco_id);
                entry.period_id = period_id;
                Ok(())
            }
        }
    }

    // ========================================================================
    // BALANCE
    // ========================================================================

    /// Movement deltas minus entry deltas; statement entries mirror movements
    /// under the file sign convention, so a balanced standard Reco yields zero.
    /// Internal Recos carry no entries and reduce to the plain movement sum.
    pub fn reco_imbalance(&self, reco_id: RecoId) -> Result<Decimal> {
        if !self.recos.contains_key(&reco_id) {
            return Err(RecoError::UnknownReco(reco_id));
        }

        let movements: Decimal = self.reco_movements(reco_id).iter().map(|fm| fm.delta()).sum();
        let entries: Decimal = self.reco_entries(reco_id).iter().map(|e| e.delta).sum();
        Ok(movements - entries)
    }

    pub fn check_balanced(&self, reco_id: RecoId) -> Result<()> {
        let reco = self.reco(reco_id).ok_or(RecoError::UnknownReco(reco_id))?;
        if reco.reco_type != RecoType::Standard {
            return Ok(());
        }

        let imbalance = self.reco_imbalance(reco_id)?;
        if imbalance.is_zero() {
            Ok(())
        } else {
            Err(RecoError::UnbalancedReco { reco_id, imbalance })
        }
    }

    /// A standard external Reco holding one movement and no statement entry
    /// is waiting for its statement counterpart.
    pub fn is_incomplete(&self, reco_id: RecoId) -> bool {
        match self.reco(reco_id) {
            Some(reco) if reco.reco_type == RecoType::Standard && !reco.internal => {
                self.reco_entries(reco_id).is_empty() && self.reco_movements(reco_id).len() == 1
            }
            _ => false,
        }
    }

    /// The incomplete Reco a movement sits in, if any
    pub fn incomplete_reco_for(&self, movement_id: MovementId) -> Option<RecoId> {
        self.movement(movement_id)
            .and_then(|fm| fm.reco_id)
            .filter(|reco_id| self.is_incomplete(*reco_id))
    }
}

impl Default for RecoBook {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Movement;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn create_test_movement(id: MovementId, delta: Decimal, period_id: PeriodId) -> FileMovement {
        FileMovement {
            movement: Movement {
                id,
                transfer_id: "100".to_string(),
                owner_id: "owner".to_string(),
                number: id,
                amount_index: 0,
                loop_id: "0".to_string(),
                currency: "USD".to_string(),
                issuer_id: "issuer".to_string(),
                peer_id: "peer".to_string(),
                ts: Utc.with_ymd_and_hms(2018, 1, 15, 10, 0, 0).unwrap(),
                action: String::new(),
            },
            period_id,
            wallet_delta: Decimal::ZERO,
            vault_delta: delta,
            reco_id: None,
        }
    }

    fn create_test_entry(id: EntryId, delta: Decimal, period_id: PeriodId) -> AccountEntry {
        AccountEntry {
            id,
            statement_id: 1,
            period_id,
            entry_date: NaiveDate::from_ymd_opt(2018, 1, 16).unwrap(),
            delta,
            description: "ACH".to_string(),
            currency: "USD".to_string(),
            loop_id: "0".to_string(),
            peer_id: "peer".to_string(),
            reco_id: None,
        }
    }

    #[test]
    fn test_attach_sets_reco_and_period() {
        let mut book = RecoBook::new();
        book.add_movement(create_test_movement(1, dec!(-2), 5));
        book.add_entry(create_test_entry(10, dec!(-2), 5));

        let reco_id = book.create_reco(7, false);
        book.attach_movement(reco_id, 1).unwrap();
        book.attach_entry(reco_id, 10).unwrap();

        assert_eq!(book.movement(1).unwrap().reco_id, Some(reco_id));
        assert_eq!(book.movement(1).unwrap().period_id, 7);
        assert_eq!(book.entry(10).unwrap().period_id, 7);
        assert!(book.check_balanced(reco_id).is_ok());
    }

    #[test]
    fn test_attach_to_other_reco_is_refused() {
        let mut book = RecoBook::new();
        book.add_movement(create_test_movement(1, dec!(1), 1));

        let first = book.create_reco(1, true);
        let second = book.create_reco(1, true);
        book.attach_movement(first, 1).unwrap();

        // Same reco again is fine
        assert!(book.attach_movement(first, 1).is_ok());

        let err = book.attach_movement(second, 1).unwrap_err();
        assert!(matches!(err, RecoError::AlreadyReconciled { reco_id, .. } if reco_id == first));
    }

    #[test]
    fn test_unknown_ids() {
        let mut book = RecoBook::new();
        assert!(matches!(book.attach_movement(1, 1), Err(RecoError::UnknownReco(1))));

        let reco_id = book.create_reco(1, false);
        assert!(matches!(
            book.attach_movement(reco_id, 42),
            Err(RecoError::UnknownMovement(42))
        ));
        assert!(matches!(
            book.attach_entry(reco_id, 43),
            Err(RecoError::UnknownEntry(43))
        ));
    }

    #[test]
    fn test_unbalanced_reco_detected() {
        let mut book = RecoBook::new();
        book.add_movement(create_test_movement(1, dec!(4.1), 1));
        book.add_movement(create_test_movement(2, dec!(-4), 1));

        let reco_id = book.create_reco(1, true);
        book.attach_movement(reco_id, 1).unwrap();
        book.attach_movement(reco_id, 2).unwrap();

        assert_eq!(book.reco_imbalance(reco_id).unwrap(), dec!(0.1));
        assert!(matches!(
            book.check_balanced(reco_id),
            Err(RecoError::UnbalancedReco { .. })
        ));
    }

    #[test]
    fn test_from_parts_continues_reco_ids() {
        let mut existing = Reco::new_standard(41, 1, false);
        existing.comment = Some("manual".to_string());
        let mut fm = create_test_movement(1, dec!(-2), 1);
        fm.reco_id = Some(41);

        let mut book = RecoBook::from_parts(vec![fm], vec![], vec![existing]);
        assert_eq!(book.create_reco(1, false), 42);
        assert_eq!(book.reco_movements(41).len(), 1);
    }

    #[test]
    fn test_incomplete_reco() {
        let mut book = RecoBook::new();
        book.add_movement(create_test_movement(1, dec!(-2), 1));
        book.add_entry(create_test_entry(10, dec!(-2), 1));

        let reco_id = book.create_reco(1, false);
        book.attach_movement(reco_id, 1).unwrap();
        assert!(book.is_incomplete(reco_id));
        assert_eq!(book.incomplete_reco_for(1), Some(reco_id));

        book.attach_entry(reco_id, 10).unwrap();
        assert!(!book.is_incomplete(reco_id));
        assert_eq!(book.incomplete_reco_for(1), None);
    }

    #[test]
    fn test_internal_reco_is_never_incomplete() {
        let mut book = RecoBook::new();
        book.add_movement(create_test_movement(1, dec!(-2), 1));

        let reco_id = book.create_reco(1, true);
        book.attach_movement(reco_id, 1).unwrap();
        assert!(!book.is_incomplete(reco_id));
    }

    #[test]
    fn test_unreconciled_queries() {
        let mut book = RecoBook::new();
        book.add_movement(create_test_movement(1, dec!(-2), 1));
        book.add_movement(create_test_movement(2, dec!(-3), 1));
        book.add_movement(create_test_movement(3, dec!(-3), 2));
        book.add_entry(create_test_entry(10, dec!(-2), 1));

        let reco_id = book.create_reco(1, false);
        book.attach_movement(reco_id, 1).unwrap();

        let ids: Vec<MovementId> = book.unreconciled_movements(1).iter().map(|fm| fm.id()).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(book.unreconciled_entries(1).len(), 1);
        assert_eq!(book.reconciled_movement_ids(), HashSet::from([1]));
        assert_eq!(book.statement_ids(), BTreeSet::from([1]));
    }
}
