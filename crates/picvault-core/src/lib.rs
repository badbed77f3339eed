//! Core abstractions for picvault: record types plus the document store and
//! image validation contracts. Kept free of crypto and network dependencies.

pub mod records;
pub mod store;
pub mod validator;
