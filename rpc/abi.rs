/// Minimal contract-call encoding for the market and token contracts
///
/// Only the static head types the two contracts use are supported, plus a
/// single trailing-dynamic `string` for market text fields.

use sha3::{Digest, Keccak256};
use thiserror::Error;

const WORD: usize = 32;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AbiError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("payload too short: need {needed} bytes, have {have}")]
    TooShort { needed: usize, have: usize },
    #[error("invalid utf-8 in string field")]
    InvalidString,
}

/// Argument to an encoded call.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Uint(u128),
    Address(String),
    Bool(bool),
    Str(String),
}

/// First four bytes of keccak256(signature).
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encode `signature(args...)` as 0x-prefixed calldata.
pub fn encode_call(signature: &str, args: &[Token]) -> Result<String, AbiError> {
    let mut head: Vec<u8> = Vec::with_capacity(args.len() * WORD);
    let mut tail: Vec<u8> = Vec::new();
    let head_len = args.len() * WORD;

    for arg in args {
        match arg {
            Token::Uint(v) => head.extend_from_slice(&uint_word(*v)),
            Token::Bool(b) => head.extend_from_slice(&uint_word(*b as u128)),
            Token::Address(a) => head.extend_from_slice(&address_word(a)?),
            Token::Str(s) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                tail.extend_from_slice(&uint_word(s.len() as u128));
                tail.extend_from_slice(s.as_bytes());
                let pad = (WORD - s.len() % WORD) % WORD;
                tail.extend(std::iter::repeat(0u8).take(pad));
            }
        }
    }

    let mut out = selector(signature).to_vec();
    out.extend(head);
    out.extend(tail);
    Ok(format!("0x{}", hex::encode(out)))
}

fn uint_word(v: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&v.to_be_bytes());
    word
}

fn address_word(address: &str) -> Result<[u8; WORD], AbiError> {
    let raw = hex::decode(address.trim_start_matches("0x"))
        .map_err(|_| AbiError::InvalidAddress(address.to_string()))?;
    if raw.len() != 20 {
        return Err(AbiError::InvalidAddress(address.to_string()));
    }
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(&raw);
    Ok(word)
}

/// Decode a 0x-prefixed hex payload.
pub fn decode_hex(data: &str) -> Result<Vec<u8>, AbiError> {
    let trimmed = data.trim_start_matches("0x");
    if trimmed.len() % 2 == 1 {
        return hex::decode(format!("0{}", trimmed)).map_err(|_| AbiError::InvalidHex(data.to_string()));
    }
    hex::decode(trimmed).map_err(|_| AbiError::InvalidHex(data.to_string()))
}

/// Parse a JSON-RPC quantity such as `"0x1b4"`.
pub fn parse_quantity(quantity: &str) -> Result<u128, AbiError> {
    let trimmed = quantity.trim_start_matches("0x");
    if trimmed.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(trimmed, 16).map_err(|_| AbiError::InvalidHex(quantity.to_string()))
}

/// Cursor over a returned ABI payload.
pub struct Decoder<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0 }
    }

    fn word_at(&self, offset: usize) -> Result<&'a [u8], AbiError> {
        let end = offset.checked_add(WORD).ok_or(self.out_of_range())?;
        if self.data.len() < end {
            return Err(AbiError::TooShort { needed: end, have: self.data.len() });
        }
        Ok(&self.data[offset..end])
    }

    fn out_of_range(&self) -> AbiError {
        AbiError::TooShort { needed: usize::MAX, have: self.data.len() }
    }

    /// Offsets and lengths read from the payload itself.
    fn usize_word(&mut self) -> Result<usize, AbiError> {
        let value = self.uint()?;
        usize::try_from(value).map_err(|_| self.out_of_range())
    }

    fn next_word(&mut self) -> Result<&'a [u8], AbiError> {
        let offset = self.index.checked_mul(WORD).ok_or(self.out_of_range())?;
        let word = self.word_at(offset)?;
        self.index += 1;
        Ok(word)
    }

    /// uint256, saturating at u128::MAX (unlimited allowances exceed u128)
    pub fn uint(&mut self) -> Result<u128, AbiError> {
        Ok(word_to_u128(self.next_word()?))
    }

    pub fn uint8(&mut self) -> Result<u8, AbiError> {
        Ok(self.uint()?.min(u8::MAX as u128) as u8)
    }

    pub fn boolean(&mut self) -> Result<bool, AbiError> {
        Ok(self.uint()? != 0)
    }

    pub fn address(&mut self) -> Result<String, AbiError> {
        let word = self.next_word()?;
        Ok(format!("0x{}", hex::encode(&word[12..])))
    }

    /// Dynamic string referenced by an offset in the head.
    pub fn string(&mut self) -> Result<String, AbiError> {
        let offset = self.usize_word()?;
        let len = usize::try_from(word_to_u128(self.word_at(offset)?)).map_err(|_| self.out_of_range())?;
        let start = offset.checked_add(WORD).ok_or(self.out_of_range())?;
        let end = start.checked_add(len).ok_or(self.out_of_range())?;
        if self.data.len() < end {
            return Err(AbiError::TooShort { needed: end, have: self.data.len() });
        }
        String::from_utf8(self.data[start..end].to_vec()).map_err(|_| AbiError::InvalidString)
    }
}

fn word_to_u128(word: &[u8]) -> u128 {
    if word[..16].iter().any(|b| *b != 0) {
        return u128::MAX;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    u128::from_be_bytes(low)
}
