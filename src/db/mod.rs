pub mod db_pool;
pub mod introspect;
