// 📒 Domain Models - Movements, statement entries and Recos
//
// A Movement is an immutable monetary leg of a transfer. Its projection onto
// one reconciliation file (FileMovement) carries the signed deltas, the period
// it currently sits in and the Reco it belongs to, if any.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type MovementId = i64;
pub type EntryId = i64;
pub type RecoId = i64;
pub type PeriodId = i64;
pub type StatementId = i64;

// ============================================================================
// MOVEMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,

    /// Transfer this leg belongs to (as issued by the upstream ledger)
    pub transfer_id: String,

    pub owner_id: String,

    /// Stable sequence number within the transfer
    pub number: i64,

    /// Disambiguates transfers that move several amounts at once
    pub amount_index: i64,

    /// Cash design identifier ("0" for plain cash)
    pub loop_id: String,

    pub currency: String,
    pub issuer_id: String,

    /// Counterparty of this leg
    pub peer_id: String,

    pub ts: DateTime<Utc>,

    /// Free-text action tag; empty for most migrated history
    pub action: String,
}

/// A Movement as seen by one reconciliation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMovement {
    pub movement: Movement,
    pub period_id: PeriodId,
    pub wallet_delta: Decimal,
    pub vault_delta: Decimal,
    pub reco_id: Option<RecoId>,
}

impl FileMovement {
    pub fn id(&self) -> MovementId {
        self.movement.id
    }

    /// Signed delta used by the matching engine
    pub fn delta(&self) -> Decimal {
        self.wallet_delta + self.vault_delta
    }

    pub fn is_reconciled(&self) -> bool {
        self.reco_id.is_some()
    }

    pub fn date(&self) -> NaiveDate {
        self.movement.ts.date_naive()
    }
}

// ============================================================================
// ACCOUNT ENTRY (statement line)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: EntryId,
    pub statement_id: StatementId,
    pub period_id: PeriodId,
    pub entry_date: NaiveDate,
    pub delta: Decimal,
    pub description: String,
    pub currency: String,
    pub loop_id: String,
    pub peer_id: String,
    pub reco_id: Option<RecoId>,
}

impl AccountEntry {
    pub fn is_reconciled(&self) -> bool {
        self.reco_id.is_some()
    }
}

// ============================================================================
// RECO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoType {
    /// Movements and entries must balance
    Standard,

    /// Movements with no statement counterpart
    WalletOnly,

    /// Statement entries with no movement counterpart
    AccountOnly,
}

impl RecoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoType::Standard => "standard",
            RecoType::WalletOnly => "wallet_only",
            RecoType::AccountOnly => "account_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(RecoType::Standard),
            "wallet_only" => Some(RecoType::WalletOnly),
            "account_only" => Some(RecoType::AccountOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reco {
    pub id: RecoId,
    pub reco_type: RecoType,

    /// Created by the hill/valley detector rather than by statement matching
    pub internal: bool,

    pub period_id: PeriodId,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Reco {
    pub fn new_standard(id: RecoId, period_id: PeriodId, internal: bool) -> Self {
        Reco {
            id,
            reco_type: RecoType::Standard,
            internal,
            period_id,
            comment: None,
            created_at: Utc::now(),
        }
    }
}
