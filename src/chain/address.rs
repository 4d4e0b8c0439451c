//! EVM address format checks (with EIP-55 checksum verification)

use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use sha3::{Digest, Keccak256};

lazy_static! {
    static ref EVM_ADDRESS: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static pattern");
}

/// Check that `address` is a 0x-prefixed 20-byte hex string.
///
/// All-lowercase and all-uppercase forms are accepted as-is; mixed case must
/// carry a valid EIP-55 checksum.
pub fn validate_address_format(address: &str) -> bool {
    if !EVM_ADDRESS.is_match(address) {
        return false;
    }

    let hex_part = &address[2..];
    let has_lower = hex_part.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = hex_part.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return verify_eip55_checksum(hex_part);
    }

    true
}

/// Validate the format and parse into an [`Address`]
pub fn parse_address(address: &str) -> Option<Address> {
    let address = address.trim();
    if !validate_address_format(address) {
        return None;
    }

    let bytes = hex::decode(&address[2..]).ok()?;
    Some(Address::from_slice(&bytes))
}

fn verify_eip55_checksum(hex_part: &str) -> bool {
    let lower = hex_part.to_ascii_lowercase();
    let hash = Keccak256::digest(lower.as_bytes());

    hex_part.chars().enumerate().all(|(i, ch)| {
        if !ch.is_ascii_alphabetic() {
            return true;
        }
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        ch.is_ascii_uppercase() == (nibble >= 8)
    })
}
