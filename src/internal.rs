// ⛰️ Internal Movement Detector - Hills & valleys that cancel out
//
// Within one transfer, money often goes out and comes straight back (or the
// reverse) in the same loop and currency. Those legs net to zero and need no
// statement counterpart, so they are reconciled automatically as one
// "internal" Reco per run.
//
// A run is a contiguous slice of an ordered group whose running balance
// rises then falls back to where it started (a hill) or falls then rises
// back (a valley).

use crate::book::RecoBook;
use crate::config::EngineConfig;
use crate::error::{RecoError, Result};
use crate::grouping::{MigratedOrderRefiner, MovementGrouper};
use crate::models::{FileMovement, MovementId, RecoId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

// ============================================================================
// INTERNAL RUN
// ============================================================================

/// One accepted hill or valley: movement ids in group order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalRun {
    pub transfer_id: String,
    pub movement_ids: Vec<MovementId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trend {
    Flat,
    Rising,
    Falling,
}

// ============================================================================
// SCAN STATE (one per group)
// ============================================================================

#[derive(Debug)]
struct Scan {
    trend: Trend,
    prev_amount: Decimal,

    /// Running balance -> index where a hill could start
    hill_starts: BTreeMap<Decimal, usize>,
    /// (index, running balance after it) where a hill could end
    hill_ends: Vec<(usize, Decimal)>,

    valley_starts: BTreeMap<Decimal, usize>,
    valley_ends: Vec<(usize, Decimal)>,

    /// No new run may start before this index
    min_start: usize,

    /// Inclusive (start, end) index pairs
    runs: Vec<(usize, usize)>,
}

impl Scan {
    fn new() -> Self {
        Scan {
            trend: Trend::Flat,
            prev_amount: Decimal::ZERO,
            hill_starts: BTreeMap::new(),
            hill_ends: Vec::new(),
            valley_starts: BTreeMap::new(),
            valley_ends: Vec::new(),
            min_start: 0,
            runs: Vec::new(),
        }
    }

    fn step(&mut self, index: usize, delta: Decimal) {
        let new_amount = self.prev_amount + delta;

        if delta > Decimal::ZERO {
            if self.trend != Trend::Rising {
                self.find_hill();
                self.hill_starts.clear();
                self.hill_ends.clear();
                self.trend = Trend::Rising;
            }
            self.hill_starts.entry(self.prev_amount).or_insert(index);
            if !self.valley_starts.is_empty() {
                self.valley_ends.push((index, new_amount));
            }
        } else if delta < Decimal::ZERO {
            if self.trend != Trend::Falling {
                self.find_valley();
                self.valley_starts.clear();
                self.valley_ends.clear();
                self.trend = Trend::Falling;
            }
            self.valley_starts.entry(self.prev_amount).or_insert(index);
            if !self.hill_starts.is_empty() {
                self.hill_ends.push((index, new_amount));
            }
        }

        self.prev_amount = new_amount;
    }

    /// Close whatever shape is still open (end of group or barrier)
    fn flush(&mut self) {
        match self.trend {
            Trend::Rising => self.find_valley(),
            Trend::Falling => self.find_hill(),
            Trend::Flat => {}
        }
    }

    /// A barrier: nothing may span it
    fn barrier(&mut self) {
        self.flush();
        self.hill_starts.clear();
        self.hill_ends.clear();
        self.valley_starts.clear();
        self.valley_ends.clear();
        self.trend = Trend::Flat;
    }

    fn find_hill(&mut self) {
        if let Some((start, end)) = find_run(&self.hill_starts, &self.hill_ends, self.min_start) {
            self.accept(start, end);
        }
    }

    fn find_valley(&mut self) {
        if let Some((start, end)) =
            find_run(&self.valley_starts, &self.valley_ends, self.min_start)
        {
            self.accept(start, end);
        }
    }

    fn accept(&mut self, start: usize, end: usize) {
        self.runs.push((start, end));
        self.min_start = end + 1;
    }
}

/// Latest end whose balance returns to a start at or after min_start
fn find_run(
    starts: &BTreeMap<Decimal, usize>,
    ends: &[(usize, Decimal)],
    min_start: usize,
) -> Option<(usize, usize)> {
    ends.iter().rev().find_map(|(end, amount)| {
        starts
            .get(amount)
            .filter(|start| **start >= min_start)
            .map(|start| (*start, *end))
    })
}

// ============================================================================
// HILL / VALLEY DETECTOR
// ============================================================================

pub struct HillValleyDetector {
    pub config: EngineConfig,
}

impl HillValleyDetector {
    pub fn new() -> Self {
        HillValleyDetector {
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(config: EngineConfig) -> Self {
        HillValleyDetector { config }
    }

    fn is_barrier(&self, fm: &FileMovement, done_movement_ids: &HashSet<MovementId>) -> bool {
        fm.is_reconciled()
            || done_movement_ids.contains(&fm.id())
            || self.config.is_non_internal_action(&fm.movement.action)
    }

    /// Scan one ordered group; returns inclusive (start, end) index pairs
    pub fn scan_group(
        &self,
        group: &[&FileMovement],
        done_movement_ids: &HashSet<MovementId>,
    ) -> Vec<(usize, usize)> {
        let mut scan = Scan::new();

        for (index, fm) in group.iter().enumerate() {
            if self.is_barrier(fm, done_movement_ids) {
                scan.barrier();
                continue;
            }
            scan.step(index, fm.delta());
        }

        scan.flush();
        scan.runs
    }

    /// Find every internal run among one transfer's file movements.
    ///
    /// `done_movement_ids` lists movements already attached to a Reco in
    /// addition to whatever `reco_id` the movements themselves carry.
    /// A run that does not sum to zero is a bug upstream and aborts the
    /// whole detection.
    pub fn detect(
        &self,
        moves: &[FileMovement],
        done_movement_ids: &HashSet<MovementId>,
    ) -> Result<Vec<InternalRun>> {
        let mut runs = Vec::new();

        for group in MovementGrouper::group(moves) {
            let ordered = MigratedOrderRefiner::refine(&group.movements);

            for (start, end) in self.scan_group(&ordered, done_movement_ids) {
                let Some(run) = Self::check_run(&ordered[start..=end], done_movement_ids)? else {
                    continue;
                };

                debug!(
                    transfer_id = %run.transfer_id,
                    loop_id = %group.key.loop_id,
                    currency = %group.key.currency,
                    start,
                    end,
                    "Found internal movement run"
                );
                runs.push(run);
            }
        }

        Ok(runs)
    }

    /// Post-check one scanned slice. Too short or already (partly)
    /// reconciled: skipped. Non-zero sum: fatal.
    fn check_run(
        slice: &[&FileMovement],
        done_movement_ids: &HashSet<MovementId>,
    ) -> Result<Option<InternalRun>> {
        if slice.len() < 2 {
            return Ok(None);
        }

        if let Some(taken) = slice
            .iter()
            .find(|fm| fm.is_reconciled() || done_movement_ids.contains(&fm.id()))
        {
            warn!(
                movement_id = taken.id(),
                reco_id = ?taken.reco_id,
                "Skipping internal run containing a reconciled movement"
            );
            return Ok(None);
        }

        let transfer_id = slice[0].movement.transfer_id.clone();
        let imbalance: Decimal = slice.iter().map(|fm| fm.delta()).sum();
        if !imbalance.is_zero() {
            return Err(RecoError::UnbalancedRun {
                transfer_id,
                imbalance,
            });
        }

        Ok(Some(InternalRun {
            transfer_id,
            movement_ids: slice.iter().map(|fm| fm.id()).collect(),
        }))
    }
}

impl Default for HillValleyDetector {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SYNC REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub transfer_id: String,
    pub runs: Vec<InternalRun>,
    pub reco_ids: Vec<RecoId>,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        format!(
            "Transfer {}: {} internal run(s), recos {:?}",
            self.transfer_id,
            self.runs.len(),
            self.reco_ids
        )
    }
}

// ============================================================================
// INTERNAL RECO BUILDER
// ============================================================================

pub struct InternalRecoBuilder {
    pub detector: HillValleyDetector,
}

impl InternalRecoBuilder {
    pub fn new() -> Self {
        InternalRecoBuilder {
            detector: HillValleyDetector::new(),
        }
    }

    pub fn with_config(config: EngineConfig) -> Self {
        InternalRecoBuilder {
            detector: HillValleyDetector::with_config(config),
        }
    }

    /// Turn each run into one internal Reco in the period of its first
    /// movement. All runs are built or none: on error the book is untouched.
    pub fn build(&self, book: &mut RecoBook, runs: &[InternalRun]) -> Result<Vec<RecoId>> {
        let mut staged = book.clone();
        let mut reco_ids = Vec::with_capacity(runs.len());

        for run in runs {
            let Some(&first) = run.movement_ids.first() else {
                continue;
            };
            let period_id = staged
                .movement(first)
                .ok_or(RecoError::UnknownMovement(first))?
                .period_id;

            let reco_id = staged.create_reco(period_id, true);
            for &movement_id in &run.movement_ids {
                staged.attach_movement(reco_id, movement_id)?;
            }
            staged.check_balanced(reco_id)?;
            reco_ids.push(reco_id);
        }

        *book = staged;
        Ok(reco_ids)
    }

    /// Detect and reconcile the internal runs of one transfer
    pub fn sync_transfer(&self, book: &mut RecoBook, transfer_id: &str) -> Result<SyncReport> {
        let moves = book.movements_for_transfer(transfer_id);
        let done = book.reconciled_movement_ids();

        let runs = self.detector.detect(&moves, &done)?;
        let reco_ids = self.build(book, &runs)?;

        if !reco_ids.is_empty() {
            info!(
                transfer_id = %transfer_id,
                reco_ids = ?reco_ids,
                "Created internal recos"
            );
        }

        Ok(SyncReport {
            transfer_id: transfer_id.to_string(),
            runs,
            reco_ids,
        })
    }
}

impl Default for InternalRecoBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
