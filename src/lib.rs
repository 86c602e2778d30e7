// lib.rs
pub mod error;
pub mod filter;
pub mod merge;
pub mod oracle;
pub mod pipeline;
pub mod region;
pub mod table;
