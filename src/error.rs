// ⚠️ Error taxonomy for the matching engine
//
// "No match" and "conflicting claim" are normal outcomes and never show up
// here. Everything in RecoError aborts the operation that raised it.

use crate::models::{EntryId, MovementId, RecoId};
use rust_decimal::Decimal;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecoError>;

#[derive(Debug, Error)]
pub enum RecoError {
    /// A detected hill/valley whose deltas do not cancel out
    #[error("internal movement run for transfer {transfer_id} is unbalanced by {imbalance}")]
    UnbalancedRun {
        transfer_id: String,
        imbalance: Decimal,
    },

    #[error("reco {reco_id} is unbalanced by {imbalance}")]
    UnbalancedReco { reco_id: RecoId, imbalance: Decimal },

    #[error("unknown movement {0}")]
    UnknownMovement(MovementId),

    #[error("unknown account entry {0}")]
    UnknownEntry(EntryId),

    #[error("unknown reco {0}")]
    UnknownReco(RecoId),

    #[error("{kind} {id} already belongs to reco {reco_id}")]
    AlreadyReconciled {
        kind: &'static str,
        id: i64,
        reco_id: RecoId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unbalanced_run_names_transfer_and_imbalance() {
        let err = RecoError::UnbalancedRun {
            transfer_id: "6502".to_string(),
            imbalance: dec!(0.10),
        };

        let msg = err.to_string();
        assert!(msg.contains("6502"));
        assert!(msg.contains("0.10"));
    }
}
