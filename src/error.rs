//! Error types shared by the engine, the signature chain and the verifier.

use std::fmt;
use thiserror::Error;

/// The crate's error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Token {
    #[error("error deserializing or verifying the token: {0}")]
    Format(#[from] FormatError),

    #[error("error in the token's cryptographic signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("tried to append a block to a sealed token")]
    Sealed,

    #[error("check validation failed: {0}")]
    FailedLogic(#[from] LogicError),

    #[error("reached datalog execution limit: {0}")]
    RunLimit(#[from] RunLimitError),

    #[error("multiple blocks declare the same symbols")]
    SymbolTableOverlap,

    #[error("the symbol table is missing either \"authority\" or \"ambient\"")]
    MissingSymbols,

    #[error("invalid term: {0}")]
    InvalidTerm(#[from] TermError),

    #[error("datalog parsing error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Token>;

/// Serialization format errors. Always fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("the root public key was not recognized")]
    UnknownPublicKey,

    #[error("could not deserialize the wrapper object: {0}")]
    Deserialization(String),

    #[error("could not serialize the wrapper object: {0}")]
    Serialization(String),

    #[error("could not deserialize the block: {0}")]
    BlockDeserialization(String),

    #[error("could not serialize the block: {0}")]
    BlockSerialization(String),

    #[error("block format version is higher than supported ({actual} > {maximum})")]
    Version { maximum: u32, actual: u32 },

    #[error("invalid key size: {0}")]
    InvalidKeySize(usize),

    #[error("invalid signature size: {0}")]
    InvalidSignatureSize(usize),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("cannot decode base64 token: {0}")]
    Base64(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("block {0} has not been signed with the correct key")]
    InvalidBlockSignature(usize),

    #[error("the last public key does not match the private key")]
    LastKeyMismatch,

    #[error("the final signature of the sealed token is invalid")]
    InvalidSeal,
}

/// Runtime limit errors, fatal to the current run.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLimitError {
    #[error("too many facts generated")]
    TooManyFacts,

    #[error("too many engine iterations")]
    TooManyIterations,

    #[error("spent too much time verifying")]
    Timeout,
}

/// Term construction errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermError {
    #[error("sets cannot contain variables")]
    VariableInSet,

    #[error("sets cannot contain other sets")]
    NestedSet,

    #[error("set elements must all have the same kind")]
    MixedSet,

    #[error("facts cannot contain variables")]
    VariableInFact,
}

/// Errors in the Datalog evaluation of a token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogicError {
    #[error("a fact provided by block {0} had the authority or ambient tag: {1}")]
    InvalidBlockFact(u32, String),

    #[error("a rule provided by block {0} generates authority or ambient facts, or has variables not bound by its body: {1}")]
    InvalidBlockRule(u32, String),

    #[error("checks failed: {}", FailedChecks(.0))]
    FailedChecks(Vec<FailedCheck>),

    #[error("the verifier already contains a token")]
    VerifierNotEmpty,

    #[error("denied by policy {0}")]
    Deny(usize),

    #[error("no matching policy was found")]
    NoMatchingPolicy,
}

/// A check that did not pass, with the rendered text of the check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailedCheck {
    #[error("check {check_id} in block {block_id} failed: {rule}")]
    Block {
        block_id: u32,
        check_id: u32,
        rule: String,
    },

    #[error("check {check_id} provided by the verifier failed: {rule}")]
    Verifier { check_id: u32, rule: String },
}

struct FailedChecks<'a>(&'a [FailedCheck]);

impl fmt::Display for FailedChecks<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, check) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", check)?;
        }
        Ok(())
    }
}

impl From<nom::Err<nom::error::Error<&str>>> for Token {
    fn from(e: nom::Err<nom::error::Error<&str>>) -> Self {
        match e {
            nom::Err::Incomplete(_) => Token::Parse("incomplete input".to_owned()),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Token::Parse(format!("{:?} at \"{}\"", e.code, e.input))
            }
        }
    }
}
