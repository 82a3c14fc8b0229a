//! Tokens: decoded blocks on top of the signature chain.

use std::fmt;

use crate::ast::{Check, Fact, Rule};
use crate::crypto::{self, KeyPair, PublicKey};
use crate::error::{self, FormatError};
use crate::format::{self, MAX_SCHEMA_VERSION};
use crate::symbols::{default_symbol_table, SymbolTable};
use crate::verifier::Verifier;

/// A block contained in a token.
///
/// Indices in facts, rules and checks point into the token's whole symbol
/// table; `symbols` only lists the strings this block introduced.
#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub symbols: SymbolTable,
    pub facts: Vec<Fact>,
    pub rules: Vec<Rule>,
    pub checks: Vec<Check>,
    /// free form text looked up before verification, such as a user id
    pub context: Option<String>,
    pub version: u32,
}

impl Block {
    pub fn new(symbols: SymbolTable) -> Block {
        Block {
            symbols,
            facts: vec![],
            rules: vec![],
            checks: vec![],
            context: None,
            version: MAX_SCHEMA_VERSION,
        }
    }

    pub fn print(&self, symbols: &SymbolTable) -> String {
        let facts: Vec<String> = self.facts.iter().map(|f| symbols.print_fact(f)).collect();
        let rules: Vec<String> = self.rules.iter().map(|r| symbols.print_rule(r)).collect();
        let checks: Vec<String> = self.checks.iter().map(|c| symbols.print_check(c)).collect();

        format!(
            "Block {{\n\t\tsymbols: {:?}\n\t\tversion: {}\n\t\tcontext: \"{}\"\n\t\tfacts: [{}]\n\t\trules: [{}]\n\t\tchecks: [{}]\n\t}}",
            self.symbols.to_vec(),
            self.version,
            self.context.as_deref().unwrap_or(""),
            facts.join(", "),
            rules.join(", "),
            checks.join(", "),
        )
    }
}

#[derive(Clone, Debug)]
pub struct Biscuit {
    root_key_id: Option<u32>,
    authority: Block,
    blocks: Vec<Block>,
    symbols: SymbolTable,
    container: crypto::Token,
}

impl Biscuit {
    /// Creates a token signed by `root`.
    ///
    /// `authority` must only introduce symbols that are not already in
    /// `base_symbols`.
    pub fn new(
        root_key_id: Option<u32>,
        root: &KeyPair,
        base_symbols: &SymbolTable,
        authority: Block,
    ) -> error::Result<Biscuit> {
        if !base_symbols.is_disjoint(&authority.symbols) {
            return Err(error::Token::SymbolTableOverlap);
        }

        let mut symbols = base_symbols.clone();
        symbols.extend(&authority.symbols);

        let data = format::serialize_block(&authority)?;
        let container = crypto::Token::create(root_key_id, data, root, &KeyPair::new());

        Ok(Biscuit {
            root_key_id,
            authority,
            blocks: vec![],
            symbols,
            container,
        })
    }

    /// Adds a block; the key pair can be dropped once this returns.
    pub fn append(&self, next: &KeyPair, block: Block) -> error::Result<Biscuit> {
        if self.container.is_sealed() {
            return Err(error::Token::Sealed);
        }
        if !self.symbols.is_disjoint(&block.symbols) {
            return Err(error::Token::SymbolTableOverlap);
        }

        let data = format::serialize_block(&block)?;
        let container = self.container.append(data, next)?;

        let mut symbols = self.symbols.clone();
        symbols.extend(&block.symbols);
        let mut blocks = self.blocks.clone();
        blocks.push(block);

        Ok(Biscuit {
            root_key_id: self.root_key_id,
            authority: self.authority.clone(),
            blocks,
            symbols,
            container,
        })
    }

    pub fn seal(&self) -> error::Result<Biscuit> {
        Ok(Biscuit {
            container: self.container.seal()?,
            ..self.clone()
        })
    }

    /// Deserializes a token and verifies its signatures with the root key
    /// returned by `key_for_id` for the token's root key id.
    pub fn from_bytes<F>(bytes: &[u8], key_for_id: F) -> error::Result<Biscuit>
    where
        F: Fn(Option<u32>) -> Option<PublicKey>,
    {
        Biscuit::from_bytes_with_symbols(bytes, key_for_id, default_symbol_table())
    }

    pub fn from_bytes_with_symbols<F>(
        bytes: &[u8],
        key_for_id: F,
        mut symbols: SymbolTable,
    ) -> error::Result<Biscuit>
    where
        F: Fn(Option<u32>) -> Option<PublicKey>,
    {
        let container = format::deserialize_token(bytes)?;
        let root = key_for_id(container.root_key_id()).ok_or(FormatError::UnknownPublicKey)?;
        container.verify(&root)?;

        let mut decoded = Vec::with_capacity(container.blocks().len());
        for block in container.blocks() {
            let block = format::deserialize_block(block.data())?;
            if !symbols.is_disjoint(&block.symbols) {
                return Err(error::Token::SymbolTableOverlap);
            }
            symbols.extend(&block.symbols);
            decoded.push(block);
        }

        let mut decoded = decoded.into_iter();
        let authority = decoded
            .next()
            .ok_or_else(|| FormatError::Deserialization("missing authority block".to_owned()))?;

        Ok(Biscuit {
            root_key_id: container.root_key_id(),
            authority,
            blocks: decoded.collect(),
            symbols,
            container,
        })
    }

    pub fn from_base64<F>(s: &str, key_for_id: F) -> error::Result<Biscuit>
    where
        F: Fn(Option<u32>) -> Option<PublicKey>,
    {
        let bytes = format::decode_base64(s)?;
        Biscuit::from_bytes(&bytes, key_for_id)
    }

    pub fn to_bytes(&self) -> error::Result<Vec<u8>> {
        Ok(format::serialize_token(&self.container)?)
    }

    pub fn to_base64(&self) -> error::Result<String> {
        Ok(format::encode_base64(&self.to_bytes()?))
    }

    /// Creates a verifier loaded with this token.
    pub fn verifier(&self) -> error::Result<Verifier> {
        let mut verifier = Verifier::new();
        verifier.add_token(self)?;
        Ok(verifier)
    }

    /// One identifier per block, in chain order. They stay the same for a
    /// token generated with the same keys and content.
    pub fn revocation_identifiers(&self) -> Vec<Vec<u8>> {
        self.container
            .blocks()
            .iter()
            .map(|b| b.signature().to_bytes().to_vec())
            .collect()
    }

    pub fn context(&self) -> Vec<Option<String>> {
        std::iter::once(&self.authority)
            .chain(self.blocks.iter())
            .map(|b| b.context.clone())
            .collect()
    }

    pub fn root_key_id(&self) -> Option<u32> {
        self.root_key_id
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn authority(&self) -> &Block {
        &self.authority
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks, authority included.
    pub fn block_count(&self) -> usize {
        1 + self.blocks.len()
    }

    pub fn is_sealed(&self) -> bool {
        self.container.is_sealed()
    }
}

impl fmt::Display for Biscuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let blocks: Vec<String> = self.blocks.iter().map(|b| b.print(&self.symbols)).collect();

        write!(
            f,
            "Biscuit {{\n\tsymbols: {:?}\n\tauthority: {}\n\tblocks: [\n\t{}\n\t]\n}}",
            self.symbols.to_vec(),
            self.authority.print(&self.symbols),
            blocks.join(",\n\t"),
        )
    }
}
