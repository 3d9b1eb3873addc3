use alloy::primitives::{keccak256, Address};
use batch_verifier::BLS_DST;
use blst::min_pk::{PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use dvt_types::{ClusterId, OperatorId, PublicKeyBytes, PUBLIC_KEY_LENGTH};
use openssl::pkey::Private;
use openssl::rsa::{Padding, Rsa};
use std::collections::HashSet;

// Signature over the owner/nonce registration payload
const SIGNATURE_LENGTH: usize = 96;
// Length of an RSA-encrypted share key
const ENCRYPTED_KEY_LENGTH: usize = 256;

/// The maximum number of operators a validator can have
pub const MAX_OPERATORS: usize = 13;

// Parses the share blob of a ValidatorAdded event. The blob is a byte stream
// of the form [signature | share public keys | encrypted keys].
#[allow(clippy::type_complexity)]
pub fn parse_shares(
    shares: &[u8],
    operator_count: usize,
) -> Result<(Vec<u8>, Vec<PublicKeyBytes>, Vec<[u8; ENCRYPTED_KEY_LENGTH]>), String> {
    // Offsets of the components within the blob
    let signature_offset = SIGNATURE_LENGTH;
    let pub_keys_offset = PUBLIC_KEY_LENGTH * operator_count + signature_offset;
    let shares_expected_length = ENCRYPTED_KEY_LENGTH * operator_count + pub_keys_offset;

    if shares_expected_length != shares.len() {
        return Err(format!(
            "Share data has invalid length: expected {}, got {}",
            shares_expected_length,
            shares.len()
        ));
    }

    let signature = shares[..signature_offset].to_vec();
    let share_pubkeys = shares[signature_offset..pub_keys_offset]
        .chunks(PUBLIC_KEY_LENGTH)
        .map(PublicKeyBytes::from_slice)
        .collect::<Result<Vec<_>, _>>()?;
    let encrypted_keys = shares[pub_keys_offset..]
        .chunks(ENCRYPTED_KEY_LENGTH)
        .map(|chunk| {
            chunk
                .try_into()
                .map_err(|_| "Encrypted key has wrong length".to_string())
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((signature, share_pubkeys, encrypted_keys))
}

// Verify the auxiliary registration signature over keccak256("owner:nonce")
// using the submitted validator public key. The owner address is rendered in
// EIP-55 checksum form, the exact string the registration tooling signs;
// a lowercase rendering would reject every signature published on chain.
pub fn verify_nonce_signature(
    signature: &[u8],
    nonce: u64,
    owner: &Address,
    validator_pubkey: &PublicKeyBytes,
) -> bool {
    let data = format!("{}:{}", owner.to_checksum(None), nonce);
    let hash = keccak256(data.as_bytes());

    let signature = match Signature::from_bytes(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    let pubkey = match PublicKey::from_bytes(validator_pubkey.as_slice()) {
        Ok(pubkey) => pubkey,
        Err(_) => return false,
    };

    signature.verify(true, hash.as_slice(), BLS_DST, &[], &pubkey, true) == BLST_ERROR::BLST_SUCCESS
}

// Decrypt this operator's share out of the event blob and check that the
// recovered secret matches the advertised share public key
pub fn decrypt_share_secret(
    key: &Rsa<Private>,
    encrypted: &[u8; ENCRYPTED_KEY_LENGTH],
    expected_pubkey: &PublicKeyBytes,
) -> Result<[u8; 32], String> {
    let mut buf = vec![0u8; key.size() as usize];
    let decrypted_len = key
        .private_decrypt(encrypted, &mut buf, Padding::PKCS1)
        .map_err(|e| format!("Could not decrypt share private key: {}", e))?;

    // The plaintext is the hex encoding of the BLS secret scalar
    let hex_str = std::str::from_utf8(&buf[..decrypted_len])
        .map_err(|e| format!("Decrypted share key is not valid utf8: {}", e))?;
    let secret_bytes = hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|e| format!("Decrypted share key is not valid hex: {}", e))?;
    let secret: [u8; 32] = secret_bytes
        .try_into()
        .map_err(|_| "Decrypted share key has wrong length".to_string())?;

    let secret_key = SecretKey::from_bytes(&secret)
        .map_err(|e| format!("Could not set decrypted share private key: {:?}", e))?;
    if secret_key.sk_to_pk().to_bytes() != expected_pubkey.0 {
        return Err("Share private key does not match public key".to_string());
    }

    Ok(secret)
}

// Perform basic verification on the operator set
pub fn validate_operators(operator_ids: &[OperatorId]) -> Result<(), String> {
    let num_operators = operator_ids.len();

    if num_operators > MAX_OPERATORS {
        return Err(format!(
            "Validator has too many operators: {}",
            num_operators
        ));
    }
    if num_operators == 0 {
        return Err("Validator has no operators".to_string());
    }

    // make sure the committee can form a 3f+1 quorum
    let threshold = (num_operators - 1) / 3;
    if (num_operators - 1) % 3 != 0 || !(1..=4).contains(&threshold) {
        return Err(format!(
            "Given {} operators. Cannot build a 3f+1 quorum",
            num_operators
        ));
    }

    let mut seen = HashSet::new();
    let are_duplicates = !operator_ids.iter().all(|x| seen.insert(x));
    if are_duplicates {
        return Err("Operator IDs contain duplicates".to_string());
    }

    Ok(())
}

// Compute the cluster identifier from the owner and the chosen operators
pub fn compute_cluster_id(owner: Address, mut operator_ids: Vec<u64>) -> ClusterId {
    operator_ids.sort();
    // 20 bytes for the address and 32 per id
    let data_size = 20 + (operator_ids.len() * 32);
    let mut data: Vec<u8> = Vec::with_capacity(data_size);

    data.extend_from_slice(owner.as_slice());
    for id in operator_ids {
        let mut id_bytes = [0u8; 32];
        id_bytes[24..].copy_from_slice(&id.to_be_bytes());
        data.extend_from_slice(&id_bytes);
    }

    let hashed_data: [u8; 32] = keccak256(data)
        .as_slice()
        .try_into()
        .expect("Conversion Failed");
    ClusterId(hashed_data)
}
