//! Classic ledger address codec
//!
//! A classic address is the base58 encoding (ledger alphabet) of
//! `0x00 || account_id[20] || checksum[4]`, where the checksum is the first
//! four bytes of SHA-256(SHA-256(version || account_id)). The ledger
//! alphabet differs from the Bitcoin ordering.

use sha2::{Digest, Sha256};

/// Version byte for account ids
const ACCOUNT_ID_VERSION: u8 = 0x00;

/// Encoded payload: version + account id + checksum
const PAYLOAD_LEN: usize = 1 + 20 + 4;

fn checksum(data: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    [second[0], second[1], second[2], second[3]]
}

/// Encode a 20-byte account id as a classic address
pub fn encode_account_id(account_id: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(PAYLOAD_LEN);
    payload.push(ACCOUNT_ID_VERSION);
    payload.extend_from_slice(account_id);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(&payload)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_string()
}

/// Decode a classic address, returning the account id if alphabet, length,
/// version and checksum are all valid
pub fn decode_account_id(address: &str) -> Option<[u8; 20]> {
    // 25 bytes never encode to fewer than 25 or more than 35 characters
    if address.len() < 25 || address.len() > 35 {
        return None;
    }

    let payload = bs58::decode(address)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .into_vec()
        .ok()?;
    if payload.len() != PAYLOAD_LEN || payload[0] != ACCOUNT_ID_VERSION {
        return None;
    }

    let (body, check) = payload.split_at(21);
    if checksum(body) != check {
        return None;
    }

    let mut account_id = [0u8; 20];
    account_id.copy_from_slice(&body[1..]);
    Some(account_id)
}

/// Whether a string is a well-formed classic address
pub fn is_valid(address: &str) -> bool {
    decode_account_id(address).is_some()
}
