//! Natural-language querying over the ledger.

pub mod extract;
pub mod planner;
pub mod predicate;

pub use extract::FilterExtractor;
pub use planner::{QueryOptions, QueryOutcome, QueryPlanner};
pub use predicate::{DateRange, NameMatch, QueryPredicate};
