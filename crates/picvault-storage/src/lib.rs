//! Document store backends: local JSON files and a Firestore REST client.
//! Both implement the merge-write contract from `picvault_core::store`.

pub mod file_store;
pub mod firestore;
