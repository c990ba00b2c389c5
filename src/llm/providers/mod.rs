pub mod offline;
pub mod ollama;
pub mod remote;
