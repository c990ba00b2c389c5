pub mod adapter;
pub mod ddl;
pub mod manager;
pub mod model;

pub use adapter::{SchemaAdapter, SchemaInfo};
pub use manager::{SchemaManager, SchemaUploadResponse};
pub use model::DatabaseSchema;
