// 🔗 Statement Matcher - Pair statement lines with unreconciled movements
//
// Four stages, run once per imported statement:
//   1. CandidateMatchFinder  - same signed delta, peer, loop and currency,
//                              entry dated within the window after the movement
//   2. MatchScorer           - transfer id in the description, minus day gap
//   3. GreedyMatchAssigner   - best score first, each side claimed once
//   4. ExternalRecoBuilder   - one Reco per committed pair
//
// Finding nothing is a normal outcome and simply creates no Recos.

use crate::book::RecoBook;
use crate::config::EngineConfig;
use crate::error::{RecoError, Result};
use crate::models::{AccountEntry, EntryId, FileMovement, MovementId, RecoId, StatementId};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

// ============================================================================
// MATCH CANDIDATE
// ============================================================================

#[derive(Debug, Clone)]
pub struct MatchCandidate<'a> {
    pub entry: &'a AccountEntry,
    pub movement: &'a FileMovement,

    /// Filled in by MatchScorer
    pub score: i64,
}

impl MatchCandidate<'_> {
    /// Ascending sort key: best score first, then earliest entry, then ids
    fn rank_key(&self) -> (Reverse<i64>, NaiveDate, EntryId, MovementId) {
        (
            Reverse(self.score),
            self.entry.entry_date,
            self.entry.id,
            self.movement.id(),
        )
    }
}

// ============================================================================
// CANDIDATE MATCH FINDER
// ============================================================================

pub struct CandidateMatchFinder {
    pub date_window_days: i64,
    pub reuse_incomplete_recos: bool,
}

impl CandidateMatchFinder {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        CandidateMatchFinder {
            date_window_days: config.date_window_days,
            reuse_incomplete_recos: config.reuse_incomplete_recos,
        }
    }

    /// A movement can only be the same real-world event as an entry dated
    /// on or up to `date_window_days` after it.
    /// A window past the calendar's range has no upper bound.
    pub fn within_window(&self, movement_date: NaiveDate, entry_date: NaiveDate) -> bool {
        if entry_date < movement_date {
            return false;
        }

        match Duration::try_days(self.date_window_days)
            .and_then(|window| movement_date.checked_add_signed(window))
        {
            Some(last_day) => entry_date <= last_day,
            None => true,
        }
    }

    fn is_available(&self, book: &RecoBook, fm: &FileMovement) -> bool {
        match fm.reco_id {
            None => true,
            Some(_) => self.reuse_incomplete_recos && book.incomplete_reco_for(fm.id()).is_some(),
        }
    }

    /// Cross join of the statement's open entries with the open movements of
    /// each entry's period, filtered on identity and date.
    pub fn find<'a>(&self, book: &'a RecoBook, statement_id: StatementId) -> Vec<MatchCandidate<'a>> {
        let entries = book.unreconciled_entries(statement_id);
        let mut candidates = Vec::new();

        for entry in entries.into_iter().filter(|e| !e.delta.is_zero()) {
            for fm in book.movements() {
                if fm.period_id != entry.period_id || !self.is_available(book, fm) {
                    continue;
                }
                if fm.delta() != entry.delta
                    || fm.movement.peer_id != entry.peer_id
                    || fm.movement.loop_id != entry.loop_id
                    || fm.movement.currency != entry.currency
                {
                    continue;
                }
                if !self.within_window(fm.date(), entry.entry_date) {
                    continue;
                }

                candidates.push(MatchCandidate {
                    entry,
                    movement: fm,
                    score: 0,
                });
            }
        }

        candidates
    }
}

impl Default for CandidateMatchFinder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MATCH SCORER
// ============================================================================

pub struct MatchScorer {
    pub description_bonus: i64,
}

impl MatchScorer {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        MatchScorer {
            description_bonus: config.description_bonus,
        }
    }

    /// Higher is better. The bonus applies when the transfer id, with dashes
    /// removed, appears in the statement description; every day between the
    /// two dates costs one point.
    pub fn rank_match(&self, entry: &AccountEntry, fm: &FileMovement) -> i64 {
        let transfer_id = fm.movement.transfer_id.replace('-', "");
        let base = if !transfer_id.is_empty() && entry.description.contains(&transfer_id) {
            self.description_bonus
        } else {
            0
        };

        base - (entry.entry_date - fm.date()).num_days().abs()
    }

    pub fn score(&self, candidates: &mut [MatchCandidate<'_>]) {
        for candidate in candidates.iter_mut() {
            candidate.score = self.rank_match(candidate.entry, candidate.movement);
        }
    }
}

impl Default for MatchScorer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// GREEDY MATCH ASSIGNER
// ============================================================================

/// A committed pairing, not yet backed by a Reco
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReco {
    pub entry_id: EntryId,
    pub movement_id: MovementId,
    pub delta: Decimal,
    pub score: i64,

    /// Existing incomplete Reco to complete instead of creating one
    pub existing_reco_id: Option<RecoId>,
}

pub struct GreedyMatchAssigner;

impl GreedyMatchAssigner {
    /// Walk each amount bucket in rank order and keep every candidate whose
    /// movement and entry are both still unclaimed.
    pub fn assign(candidates: &[MatchCandidate<'_>]) -> Vec<PendingReco> {
        let mut by_amount: BTreeMap<Decimal, Vec<&MatchCandidate<'_>>> = BTreeMap::new();
        for candidate in candidates {
            by_amount.entry(candidate.entry.delta).or_default().push(candidate);
        }

        let mut claimed_movements: HashSet<MovementId> = HashSet::new();
        let mut claimed_entries: HashSet<EntryId> = HashSet::new();
        let mut pending = Vec::new();

        for (amount, mut bucket) in by_amount {
            bucket.sort_by_key(|c| c.rank_key());

            for candidate in bucket {
                let movement_id = candidate.movement.id();
                let entry_id = candidate.entry.id;

                if claimed_movements.contains(&movement_id) || claimed_entries.contains(&entry_id) {
                    debug!(
                        entry_id,
                        movement_id,
                        score = candidate.score,
                        "Skipping candidate with a claimed side"
                    );
                    continue;
                }

                claimed_movements.insert(movement_id);
                claimed_entries.insert(entry_id);
                pending.push(PendingReco {
                    entry_id,
                    movement_id,
                    delta: amount,
                    score: candidate.score,
                    existing_reco_id: candidate.movement.reco_id,
                });
            }
        }

        pending
    }
}

// ============================================================================
// EXTERNAL RECO BUILDER
// ============================================================================

/// A pairing backed by a Reco
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedPair {
    pub reco_id: RecoId,
    pub entry_id: EntryId,
    pub movement_id: MovementId,
    pub score: i64,
    pub reused: bool,
}

pub struct ExternalRecoBuilder;

impl ExternalRecoBuilder {
    /// Allocate the Recos first, then attach movement and entry to each.
    /// New Recos land in the entry's period. All pairs commit or none do.
    pub fn commit(book: &mut RecoBook, pending: &[PendingReco]) -> Result<Vec<CommittedPair>> {
        let mut staged = book.clone();

        let mut reco_ids = Vec::with_capacity(pending.len());
        for p in pending {
            let reco_id = match p.existing_reco_id {
                Some(existing) => existing,
                None => {
                    let period_id = staged
                        .entry(p.entry_id)
                        .ok_or(RecoError::UnknownEntry(p.entry_id))?
                        .period_id;
                    staged.create_reco(period_id, false)
                }
            };
            reco_ids.push(reco_id);
        }

        let mut committed = Vec::with_capacity(pending.len());
        for (p, reco_id) in pending.iter().zip(reco_ids) {
            staged.attach_movement(reco_id, p.movement_id)?;
            staged.attach_entry(reco_id, p.entry_id)?;
            staged.check_balanced(reco_id)?;

            committed.push(CommittedPair {
                reco_id,
                entry_id: p.entry_id,
                movement_id: p.movement_id,
                score: p.score,
                reused: p.existing_reco_id.is_some(),
            });
        }

        *book = staged;
        Ok(committed)
    }
}

// ============================================================================
// STATEMENT MATCHER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchReport {
    pub statement_id: StatementId,
    pub pairs: Vec<CommittedPair>,
}

impl MatchReport {
    /// Recos created by this import (completed incomplete Recos excluded)
    pub fn created_count(&self) -> usize {
        self.pairs.iter().filter(|p| !p.reused).count()
    }

    pub fn reused_count(&self) -> usize {
        self.pairs.iter().filter(|p| p.reused).count()
    }

    pub fn reco_ids(&self) -> Vec<RecoId> {
        self.pairs.iter().map(|p| p.reco_id).collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "Statement {}: {} pair(s) matched, {} new reco(s), {} completed",
            self.statement_id,
            self.pairs.len(),
            self.created_count(),
            self.reused_count()
        )
    }
}

pub struct StatementMatcher {
    pub finder: CandidateMatchFinder,
    pub scorer: MatchScorer,
}

impl StatementMatcher {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        StatementMatcher {
            finder: CandidateMatchFinder::with_config(config),
            scorer: MatchScorer::with_config(config),
        }
    }

    /// Decide the pairings for one statement without touching the book
    pub fn plan(&self, book: &RecoBook, statement_id: StatementId) -> Vec<PendingReco> {
        let mut candidates = self.finder.find(book, statement_id);
        self.scorer.score(&mut candidates);
        GreedyMatchAssigner::assign(&candidates)
    }

    pub fn import_statement(
        &self,
        book: &mut RecoBook,
        statement_id: StatementId,
    ) -> Result<MatchReport> {
        let pending = self.plan(book, statement_id);
        let pairs = ExternalRecoBuilder::commit(book, &pending)?;

        let report = MatchReport {
            statement_id,
            pairs,
        };

        if !report.pairs.is_empty() {
            info!(
                statement_id,
                created = report.created_count(),
                reused = report.reused_count(),
                reco_ids = ?report.reco_ids(),
                "Matched statement entries"
            );
        }

        Ok(report)
    }
}

impl Default for StatementMatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
