pub mod database;
pub mod history_repository;
pub mod ledger_repository;
pub mod mock;

pub use database::Database;
pub use history_repository::HistoryRepository;
pub use ledger_repository::SqliteRiskLedger;
