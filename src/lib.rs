// Reco Engine - Core Library
// Exposes the matching engine for use in the CLI, host applications and tests

pub mod models;
pub mod config;
pub mod error;
pub mod book;
pub mod grouping;       // Movement grouping + migrated-order refinement
pub mod internal;       // Hill/valley internal movement detection
pub mod matcher;        // Statement-to-movement matching
pub mod db;
pub mod import;

// Re-export commonly used types
pub use models::{
    Movement, FileMovement, AccountEntry, Reco, RecoType,
    MovementId, EntryId, RecoId, PeriodId, StatementId,
};
pub use config::EngineConfig;
pub use error::RecoError;
pub use book::RecoBook;
pub use grouping::{
    GroupKey, MovementGroup, MovementGrouper, MigratedOrderRefiner,
};
pub use internal::{
    HillValleyDetector, InternalRecoBuilder, InternalRun, SyncReport,
};
pub use matcher::{
    CandidateMatchFinder, MatchScorer, GreedyMatchAssigner, ExternalRecoBuilder,
    StatementMatcher, MatchCandidate, PendingReco, CommittedPair, MatchReport,
};
pub use db::{
    Event,
    setup_database, insert_movements, insert_account_entries,
    load_book, save_book, insert_event, get_events_for_entity,
};
pub use import::{load_movements_csv, load_account_entries_csv};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
