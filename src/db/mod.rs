//! Database layer.
//!
//! - `pool`: lazy, replaceable connection pool manager
//! - `executor`: statement execution with timeouts and transactions
//! - `history`: in-memory query history
//! - `types`: row to JSON decoding

pub mod executor;
pub mod history;
pub mod pool;
pub mod types;

pub use executor::{QueryExecutor, StatementRunner, TransactionFailure, run_in_order};
pub use history::QueryHistory;
pub use pool::{PgPoolFactory, PoolFactory, PoolManager, PoolStats};
