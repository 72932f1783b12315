// DANS : src/decoders/address.rs

use crate::error::{RelayError, RelayResult};
use solana_sdk::{pubkey::Pubkey, signature::Signature};

pub const PUBKEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Une adresse telle qu'elle arrive sur le fil : octets bruts (protobuf)
/// ou déjà sous forme texte (JSON).
#[derive(Debug, Clone, Copy)]
pub enum AddressValue<'a> {
    Bytes(&'a [u8]),
    Text(&'a str),
}

impl<'a> From<&'a [u8]> for AddressValue<'a> {
    fn from(value: &'a [u8]) -> Self {
        AddressValue::Bytes(value)
    }
}

impl<'a> From<&'a str> for AddressValue<'a> {
    fn from(value: &'a str) -> Self {
        AddressValue::Text(value)
    }
}

/// Rend une adresse dans sa forme texte canonique (base58).
/// Le texte est renvoyé tel quel.
pub fn decode<'a>(value: impl Into<AddressValue<'a>>) -> RelayResult<String> {
    match value.into() {
        AddressValue::Text(text) => Ok(text.to_string()),
        AddressValue::Bytes(bytes) => Ok(decode_pubkey(bytes)?.to_string()),
    }
}

pub fn decode_pubkey(bytes: &[u8]) -> RelayResult<Pubkey> {
    Pubkey::try_from(bytes).map_err(|_| RelayError::InvalidAddressLength(bytes.len()))
}

/// Une signature fait 64 octets, pas 32 : elle a son propre contrôle de longueur.
pub fn decode_signature(bytes: &[u8]) -> RelayResult<String> {
    if bytes.len() != SIGNATURE_LEN {
        return Err(RelayError::InvalidSignatureLength(bytes.len()));
    }
    let signature = Signature::try_from(bytes)
        .map_err(|_| RelayError::InvalidSignatureLength(bytes.len()))?;
    Ok(signature.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn rejects_every_length_other_than_32() {
        for len in [0usize, 1, 31, 33, 64] {
            let bytes = vec![7u8; len];
            match decode(bytes.as_slice()) {
                Err(RelayError::InvalidAddressLength(got)) => assert_eq!(got, len),
                other => panic!("longueur {len}: résultat inattendu {other:?}"),
            }
        }
    }

    #[test]
    fn valid_bytes_round_trip_through_text() {
        let usdc = Pubkey::from_str("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v").unwrap();
        let text = decode(usdc.to_bytes().as_slice()).unwrap();
        assert_eq!(text, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
        assert_eq!(Pubkey::from_str(&text).unwrap(), usdc);

        let bytes = bs58::decode(&text).into_vec().unwrap();
        assert_eq!(decode(bytes.as_slice()).unwrap(), text);
    }

    #[test]
    fn text_input_is_returned_unchanged() {
        let text = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
        assert_eq!(decode(text).unwrap(), text);
        assert_eq!(decode(decode(text).unwrap().as_str()).unwrap(), text);
    }

    #[test]
    fn signature_width_is_checked() {
        assert!(matches!(
            decode_signature(&[1u8; 32]),
            Err(RelayError::InvalidSignatureLength(32))
        ));
        let encoded = decode_signature(&[1u8; 64]).unwrap();
        assert_eq!(bs58::decode(&encoded).into_vec().unwrap(), vec![1u8; 64]);
    }
}
