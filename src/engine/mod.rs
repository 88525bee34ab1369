//! Key lifecycle and authenticated encryption. Nothing in here touches the database.

pub mod crypto;
pub mod keys;
