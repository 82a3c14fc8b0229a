//! Offline-verifiable authorization tokens.
//!
//! A token is a chain of blocks signed with Ed25519. Each block carries
//! Datalog facts, rules and checks; a [`Verifier`] loads them one block at
//! a time into a [`World`], derives new facts under [`RunLimits`], and
//! decides with its own checks and policies.
//!
//! ```ignore
//! use datalog::{builder::BlockBuilder, crypto::KeyPair, Biscuit};
//!
//! let root = KeyPair::new();
//! let symbols = datalog::default_symbol_table();
//! let authority = BlockBuilder::new().build(&symbols);
//! let token = Biscuit::new(None, &root, &symbols, authority)?;
//! ```

pub mod ast;
pub mod builder;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod expression;
pub mod format;
pub mod parser;
pub mod symbols;
pub mod token;
pub mod unify;
pub mod verifier;

pub use engine::{RunLimits, World};
pub use symbols::{default_symbol_table, SymbolTable};
pub use token::Biscuit;
pub use verifier::Verifier;
