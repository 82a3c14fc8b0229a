//! Chained Ed25519 signatures.
//!
//! Each block is signed over `data || next_key` by the key of the previous
//! link. The private key of the last link travels with an open token so
//! that anybody holding it can append a block; sealing replaces it with a
//! final signature and makes the chain immutable.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{self, FormatError, SignatureError};

pub const KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;

#[derive(Clone, Debug)]
pub struct PrivateKey(SigningKey);

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<PrivateKey, FormatError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| FormatError::InvalidKeySize(bytes.len()))?;
        Ok(PrivateKey(SigningKey::from_bytes(&bytes)))
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<PublicKey, FormatError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| FormatError::InvalidKeySize(bytes.len()))?;
        VerifyingKey::from_bytes(&bytes)
            .map(PublicKey)
            .map_err(|e| FormatError::InvalidKey(e.to_string()))
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.0.verify_strict(message, &signature.0).is_ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Signature, FormatError> {
        let bytes: [u8; SIGNATURE_SIZE] = bytes
            .try_into()
            .map_err(|_| FormatError::InvalidSignatureSize(bytes.len()))?;
        Ok(Signature(ed25519_dalek::Signature::from_bytes(&bytes)))
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        self.0.to_bytes()
    }
}

#[derive(Clone, Debug)]
pub struct KeyPair {
    private: PrivateKey,
}

impl KeyPair {
    pub fn new() -> KeyPair {
        KeyPair {
            private: PrivateKey(SigningKey::generate(&mut OsRng)),
        }
    }

    pub fn private(&self) -> &PrivateKey {
        &self.private
    }

    pub fn public(&self) -> PublicKey {
        self.private.public()
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        KeyPair::new()
    }
}

impl From<PrivateKey> for KeyPair {
    fn from(private: PrivateKey) -> Self {
        KeyPair { private }
    }
}

/// Detached signature over the raw message.
pub fn sign(message: &[u8], keypair: &KeyPair) -> Signature {
    Signature(keypair.private.0.sign(message))
}

fn block_message(data: &[u8], next_key: &PublicKey) -> Vec<u8> {
    let mut message = Vec::with_capacity(data.len() + KEY_SIZE);
    message.extend_from_slice(data);
    message.extend_from_slice(&next_key.to_bytes());
    message
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub(crate) data: Vec<u8>,
    pub(crate) next_key: PublicKey,
    pub(crate) signature: Signature,
}

impl Block {
    pub fn new(data: Vec<u8>, next_key: PublicKey, signature: Signature) -> Block {
        Block {
            data,
            next_key,
            signature,
        }
    }

    fn signed(data: Vec<u8>, signer: &KeyPair, next: &KeyPair) -> Block {
        let next_key = next.public();
        let signature = sign(&block_message(&data, &next_key), signer);
        Block {
            data,
            next_key,
            signature,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn next_key(&self) -> &PublicKey {
        &self.next_key
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    fn seal_message(&self) -> Vec<u8> {
        let mut message = block_message(&self.data, &self.next_key);
        message.extend_from_slice(&self.signature.to_bytes());
        message
    }
}

/// State of the end of the chain.
#[derive(Clone, Debug)]
pub enum Tail {
    Open(PrivateKey),
    Sealed(Signature),
}

#[derive(Clone, Debug)]
pub struct Token {
    pub(crate) root_key_id: Option<u32>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) tail: Tail,
}

impl Token {
    /// Signs the authority block with `root`; `next` becomes the first link.
    pub fn create(root_key_id: Option<u32>, data: Vec<u8>, root: &KeyPair, next: &KeyPair) -> Token {
        Token {
            root_key_id,
            blocks: vec![Block::signed(data, root, next)],
            tail: Tail::Open(next.private().clone()),
        }
    }

    pub(crate) fn from_parts(root_key_id: Option<u32>, blocks: Vec<Block>, tail: Tail) -> Token {
        Token {
            root_key_id,
            blocks,
            tail,
        }
    }

    fn current_signer(&self) -> error::Result<KeyPair> {
        match &self.tail {
            Tail::Open(private) => Ok(KeyPair::from(private.clone())),
            Tail::Sealed(_) => Err(error::Token::Sealed),
        }
    }

    pub fn append(&self, data: Vec<u8>, next: &KeyPair) -> error::Result<Token> {
        let signer = self.current_signer()?;
        let mut blocks = self.blocks.clone();
        blocks.push(Block::signed(data, &signer, next));

        Ok(Token {
            root_key_id: self.root_key_id,
            blocks,
            tail: Tail::Open(next.private().clone()),
        })
    }

    /// Replaces the tail private key with a signature over the last block.
    pub fn seal(&self) -> error::Result<Token> {
        let signer = self.current_signer()?;
        let signature = sign(&self.last().seal_message(), &signer);

        Ok(Token {
            root_key_id: self.root_key_id,
            blocks: self.blocks.clone(),
            tail: Tail::Sealed(signature),
        })
    }

    pub fn verify(&self, root: &PublicKey) -> error::Result<()> {
        let mut current = *root;

        for (i, block) in self.blocks.iter().enumerate() {
            if !current.verify(&block_message(&block.data, &block.next_key), &block.signature) {
                return Err(SignatureError::InvalidBlockSignature(i).into());
            }
            current = block.next_key;
        }

        match &self.tail {
            Tail::Open(private) => {
                if private.public() != current {
                    return Err(SignatureError::LastKeyMismatch.into());
                }
            }
            Tail::Sealed(signature) => {
                if !current.verify(&self.last().seal_message(), signature) {
                    return Err(SignatureError::InvalidSeal.into());
                }
            }
        }
        Ok(())
    }

    pub fn root_key_id(&self) -> Option<u32> {
        self.root_key_id
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn tail(&self) -> &Tail {
        &self.tail
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.tail, Tail::Sealed(_))
    }

    fn last(&self) -> &Block {
        // a token always holds its authority block
        &self.blocks[self.blocks.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_signature() {
        let message = b"hello world";
        let keypair = KeyPair::new();
        let signature = sign(message, &keypair);

        assert!(keypair.public().verify(message, &signature));
        assert!(!keypair.public().verify(b"AAAA", &signature));
    }

    #[test]
    fn three_messages() {
        let root = KeyPair::new();
        let token1 = Token::create(None, b"hello".to_vec(), &root, &KeyPair::new());
        token1.verify(&root.public()).unwrap();

        let token2 = token1.append(b"world".to_vec(), &KeyPair::new()).unwrap();
        token2.verify(&root.public()).unwrap();

        let token3 = token2.append(b"!!!".to_vec(), &KeyPair::new()).unwrap();
        token3.verify(&root.public()).unwrap();
        assert_eq!(3, token3.blocks().len());
        // appending does not touch the original
        assert_eq!(1, token1.blocks().len());
    }

    #[test]
    fn change_message() {
        let root = KeyPair::new();
        let token1 = Token::create(None, b"hello".to_vec(), &root, &KeyPair::new());
        let mut token2 = token1.append(b"world".to_vec(), &KeyPair::new()).unwrap();
        token2.blocks[1].data = b"you".to_vec();

        assert_eq!(
            Err(SignatureError::InvalidBlockSignature(1).into()),
            token2.verify(&root.public())
        );

        let token3 = token2.append(b"!!!".to_vec(), &KeyPair::new()).unwrap();
        assert_eq!(
            Err(SignatureError::InvalidBlockSignature(1).into()),
            token3.verify(&root.public())
        );
    }

    #[test]
    fn changed_authority_breaks_every_link() {
        let root = KeyPair::new();
        let token = Token::create(None, b"hello".to_vec(), &root, &KeyPair::new())
            .append(b"world".to_vec(), &KeyPair::new())
            .unwrap();
        let mut tampered = token.clone();
        tampered.blocks[0].data = b"HELLO".to_vec();

        assert_eq!(
            Err(SignatureError::InvalidBlockSignature(0).into()),
            tampered.verify(&root.public())
        );
    }

    #[test]
    fn wrong_root_key() {
        let root = KeyPair::new();
        let token = Token::create(Some(1), b"hello".to_vec(), &root, &KeyPair::new());
        assert_eq!(
            Err(SignatureError::InvalidBlockSignature(0).into()),
            token.verify(&KeyPair::new().public())
        );
        assert_eq!(Some(1), token.root_key_id());
    }

    #[test]
    fn swapped_tail_key() {
        let root = KeyPair::new();
        let mut token = Token::create(None, b"hello".to_vec(), &root, &KeyPair::new());
        token.tail = Tail::Open(KeyPair::new().private().clone());
        assert_eq!(
            Err(SignatureError::LastKeyMismatch.into()),
            token.verify(&root.public())
        );
    }

    #[test]
    fn sealed_token() {
        let root = KeyPair::new();
        let token = Token::create(None, b"hello".to_vec(), &root, &KeyPair::new())
            .append(b"world".to_vec(), &KeyPair::new())
            .unwrap();
        let sealed = token.seal().unwrap();
        assert!(sealed.is_sealed());
        sealed.verify(&root.public()).unwrap();

        assert_eq!(
            Err(error::Token::Sealed),
            sealed.append(b"!!!".to_vec(), &KeyPair::new()).map(|_| ())
        );
        assert_eq!(Err(error::Token::Sealed), sealed.seal().map(|_| ()));

        let mut tampered = sealed.clone();
        tampered.tail = Tail::Sealed(sign(b"something else", &KeyPair::new()));
        assert_eq!(
            Err(SignatureError::InvalidSeal.into()),
            tampered.verify(&root.public())
        );
    }

    #[test]
    fn key_and_signature_sizes() {
        assert_eq!(
            Err(FormatError::InvalidKeySize(3)),
            PublicKey::from_bytes(&[0, 1, 2])
        );
        assert!(matches!(
            PrivateKey::from_bytes(&[0; 31]),
            Err(FormatError::InvalidKeySize(31))
        ));
        assert_eq!(
            Err(FormatError::InvalidSignatureSize(63)),
            Signature::from_bytes(&[0; 63])
        );

        let keypair = KeyPair::new();
        let public = PublicKey::from_bytes(&keypair.public().to_bytes()).unwrap();
        assert_eq!(keypair.public(), public);
        let private = PrivateKey::from_bytes(&keypair.private().to_bytes()).unwrap();
        assert_eq!(keypair.public(), private.public());
    }
}
