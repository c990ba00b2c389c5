pub mod executor;
pub mod gate;
pub mod history;
pub mod models;
pub mod source;
pub mod validator;

pub use executor::QueryExecutor;
pub use history::HistoryStore;
pub use source::{DataSource, DuckDbSource};
pub use validator::{QueryValidator, ValidationVerdict};
