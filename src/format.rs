//! Wire format for tokens, blocks and saved verifiers.
//!
//! Everything is `bincode` over `serde` structures. Signed blocks carry
//! their payload as opaque bytes so the signature chain can be checked
//! before any payload is decoded.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::ast::{Check, Fact, Policy, Rule, Term};
use crate::crypto::{self, PrivateKey, PublicKey, Signature, Tail};
use crate::error::{self, FormatError, TermError};
use crate::expression::Op;
use crate::symbols::SymbolTable;
use crate::token::Block;

/// Highest block payload version this crate understands.
pub const MAX_SCHEMA_VERSION: u32 = 2;

#[derive(Serialize, Deserialize)]
struct WireSignedBlock {
    block: Vec<u8>,
    next_key: Vec<u8>,
    signature: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
enum WireProof {
    NextSecret(Vec<u8>),
    FinalSignature(Vec<u8>),
}

#[derive(Serialize, Deserialize)]
struct WireToken {
    root_key_id: Option<u32>,
    authority: WireSignedBlock,
    blocks: Vec<WireSignedBlock>,
    proof: WireProof,
}

// version comes first so it can be read without decoding the rest
#[derive(Serialize, Deserialize)]
struct WireBlock {
    version: u32,
    symbols: Vec<String>,
    facts: Vec<Fact>,
    rules: Vec<Rule>,
    checks: Vec<Check>,
    context: Option<String>,
}

#[derive(Deserialize)]
struct WireVersion {
    version: u32,
}

#[derive(Serialize, Deserialize)]
struct WireVerifier {
    version: u32,
    symbols: Vec<String>,
    facts: Vec<Fact>,
    rules: Vec<Rule>,
    checks: Vec<Check>,
    policies: Vec<Policy>,
}

/// Contents of a saved verifier, with indices into `symbols`.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifierPolicies {
    pub symbols: SymbolTable,
    pub facts: Vec<Fact>,
    pub rules: Vec<Rule>,
    pub checks: Vec<Check>,
    pub policies: Vec<Policy>,
}

fn signed_block(block: &crypto::Block) -> WireSignedBlock {
    WireSignedBlock {
        block: block.data.clone(),
        next_key: block.next_key.to_bytes().to_vec(),
        signature: block.signature.to_bytes().to_vec(),
    }
}

fn crypto_block(wire: WireSignedBlock) -> Result<crypto::Block, FormatError> {
    let next_key = PublicKey::from_bytes(&wire.next_key)?;
    let signature = Signature::from_bytes(&wire.signature)?;
    Ok(crypto::Block::new(wire.block, next_key, signature))
}

pub fn serialize_token(token: &crypto::Token) -> Result<Vec<u8>, FormatError> {
    let (authority, rest) = token
        .blocks
        .split_first()
        .ok_or_else(|| FormatError::Serialization("token has no authority block".to_owned()))?;

    let proof = match &token.tail {
        Tail::Open(private) => WireProof::NextSecret(private.to_bytes().to_vec()),
        Tail::Sealed(signature) => WireProof::FinalSignature(signature.to_bytes().to_vec()),
    };

    let wire = WireToken {
        root_key_id: token.root_key_id,
        authority: signed_block(authority),
        blocks: rest.iter().map(signed_block).collect(),
        proof,
    };

    bincode::serialize(&wire).map_err(|e| FormatError::Serialization(e.to_string()))
}

/// Decodes the envelope and checks key and signature sizes. Signatures
/// are not verified here.
pub fn deserialize_token(bytes: &[u8]) -> Result<crypto::Token, FormatError> {
    let wire: WireToken =
        bincode::deserialize(bytes).map_err(|e| FormatError::Deserialization(e.to_string()))?;

    let mut blocks = Vec::with_capacity(wire.blocks.len() + 1);
    blocks.push(crypto_block(wire.authority)?);
    for block in wire.blocks {
        blocks.push(crypto_block(block)?);
    }

    let tail = match wire.proof {
        WireProof::NextSecret(bytes) => Tail::Open(PrivateKey::from_bytes(&bytes)?),
        WireProof::FinalSignature(bytes) => Tail::Sealed(Signature::from_bytes(&bytes)?),
    };

    Ok(crypto::Token::from_parts(wire.root_key_id, blocks, tail))
}

pub fn serialize_block(block: &Block) -> Result<Vec<u8>, FormatError> {
    let wire = WireBlock {
        version: block.version,
        symbols: block.symbols.to_vec(),
        facts: block.facts.clone(),
        rules: block.rules.clone(),
        checks: block.checks.clone(),
        context: block.context.clone(),
    };
    bincode::serialize(&wire).map_err(|e| FormatError::BlockSerialization(e.to_string()))
}

pub fn deserialize_block(bytes: &[u8]) -> error::Result<Block> {
    let WireVersion { version } = bincode::deserialize(bytes)
        .map_err(|e| FormatError::BlockDeserialization(e.to_string()))?;
    if version > MAX_SCHEMA_VERSION {
        return Err(FormatError::Version {
            maximum: MAX_SCHEMA_VERSION,
            actual: version,
        }
        .into());
    }

    let wire: WireBlock = bincode::deserialize(bytes)
        .map_err(|e| FormatError::BlockDeserialization(e.to_string()))?;

    validate_facts(&wire.facts)?;
    validate_rules(&wire.rules)?;
    for check in &wire.checks {
        validate_rules(&check.queries)?;
    }

    Ok(Block {
        symbols: table(&wire.symbols),
        facts: wire.facts,
        rules: wire.rules,
        checks: wire.checks,
        context: wire.context,
        version: wire.version,
    })
}

pub fn serialize_verifier(policies: &VerifierPolicies) -> Result<Vec<u8>, FormatError> {
    let wire = WireVerifier {
        version: MAX_SCHEMA_VERSION,
        symbols: policies.symbols.to_vec(),
        facts: policies.facts.clone(),
        rules: policies.rules.clone(),
        checks: policies.checks.clone(),
        policies: policies.policies.clone(),
    };
    bincode::serialize(&wire).map_err(|e| FormatError::Serialization(e.to_string()))
}

pub fn deserialize_verifier(bytes: &[u8]) -> error::Result<VerifierPolicies> {
    let wire: WireVerifier =
        bincode::deserialize(bytes).map_err(|e| FormatError::Deserialization(e.to_string()))?;
    if wire.version > MAX_SCHEMA_VERSION {
        return Err(FormatError::Version {
            maximum: MAX_SCHEMA_VERSION,
            actual: wire.version,
        }
        .into());
    }

    validate_facts(&wire.facts)?;
    validate_rules(&wire.rules)?;
    for check in &wire.checks {
        validate_rules(&check.queries)?;
    }
    for policy in &wire.policies {
        validate_rules(&policy.queries)?;
    }

    Ok(VerifierPolicies {
        symbols: table(&wire.symbols),
        facts: wire.facts,
        rules: wire.rules,
        checks: wire.checks,
        policies: wire.policies,
    })
}

pub fn encode_base64(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

pub fn decode_base64(s: &str) -> Result<Vec<u8>, FormatError> {
    URL_SAFE
        .decode(s.trim())
        .map_err(|e| FormatError::Base64(e.to_string()))
}

fn table(symbols: &[String]) -> SymbolTable {
    let mut table = SymbolTable::new();
    for s in symbols {
        table.insert(s);
    }
    table
}

fn validate_terms<'a, I: IntoIterator<Item = &'a Term>>(terms: I) -> error::Result<()> {
    for term in terms {
        term.validate()?;
    }
    Ok(())
}

fn validate_facts(facts: &[Fact]) -> error::Result<()> {
    for fact in facts {
        if !fact.predicate.is_ground() {
            return Err(TermError::VariableInFact.into());
        }
        validate_terms(&fact.predicate.terms)?;
    }
    Ok(())
}

fn validate_rules(rules: &[Rule]) -> error::Result<()> {
    for rule in rules {
        let predicates = std::iter::once(&rule.head).chain(rule.body.iter());
        validate_terms(predicates.flat_map(|p| p.terms.iter()))?;
        let values = rule.expressions.iter().flat_map(|e| e.ops.iter());
        validate_terms(values.filter_map(|op| match op {
            Op::Value(t) => Some(t),
            _ => None,
        }))?;
    }
    Ok(())
}
