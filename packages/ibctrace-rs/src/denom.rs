//! IBC denomination hashing and escrow address derivation.
//!
//! The ICS-20 denom of a token that crossed `port/channel` is
//! `ibc/UPPER_HEX(SHA256(port + "/" + channel + "/" + base))`; a base denom
//! that already contains slashes (a multi-hop denom) is hashed verbatim.
//!
//! The escrow account for a channel is derived as
//! `Bech32(prefix, SHA256("ics20-1" || 0x00 || port || "/" || channel)[..20])`.
//! The runtime prefers the on-chain escrow-address query and only falls back
//! to this local derivation when the query is unavailable.

use bech32::{ToBase32, Variant};
use eyre::{eyre, Result};
use sha2::{Digest, Sha256};

/// Version string that domain-separates ICS-20 escrow account derivation.
const ICS20_VERSION: &str = "ics20-1";

/// Prefix marking a wrapped (non-native) denomination.
pub const IBC_DENOM_PREFIX: &str = "ibc/";

/// Whether a denom is a wrapped `ibc/<hash>` representation.
pub fn is_ibc_denom(denom: &str) -> bool {
    denom.starts_with(IBC_DENOM_PREFIX)
}

/// The hex hash part of an `ibc/<hash>` denom, if it is one.
pub fn ibc_denom_hash(denom: &str) -> Option<&str> {
    denom.strip_prefix(IBC_DENOM_PREFIX)
}

/// Compute the `ibc/<hash>` denom for a token sent over `port/channel`.
///
/// `base` may itself contain slashes (an already-wrapped multi-hop denom);
/// the full `port/channel/base` string is hashed as a single byte sequence.
pub fn ibc_denom(port: &str, channel: &str, base: &str) -> String {
    hash_trace_path(&format!("{port}/{channel}/{base}"))
}

/// Hash a full `port/channel/.../base` trace string into its `ibc/` denom.
pub fn hash_trace_path(full_path: &str) -> String {
    let digest = Sha256::digest(full_path.as_bytes());
    format!("{IBC_DENOM_PREFIX}{}", hex::encode_upper(digest))
}

/// Derive the escrow account address for `port/channel` on a chain with the
/// given bech32 prefix.
///
/// Matches the upstream module-account derivation: a domain-separated
/// SHA-256 truncated to 20 bytes, bech32-encoded.
pub fn escrow_address(bech32_prefix: &str, port: &str, channel: &str) -> Result<String> {
    let mut preimage = Vec::with_capacity(ICS20_VERSION.len() + 1 + port.len() + 1 + channel.len());
    preimage.extend_from_slice(ICS20_VERSION.as_bytes());
    preimage.push(0);
    preimage.extend_from_slice(port.as_bytes());
    preimage.push(b'/');
    preimage.extend_from_slice(channel.as_bytes());

    let digest = Sha256::digest(&preimage);
    bech32::encode(bech32_prefix, (&digest[..20]).to_base32(), Variant::Bech32)
        .map_err(|e| eyre!("Failed to encode escrow address: {}", e))
}

/// Split a trace path into `(port, channel)` pairs.
///
/// Returns an error when the segment count is odd or zero: a valid ICS-20
/// trace path is a non-empty sequence of `port/channel` pairs.
pub fn split_trace_path(path: &str) -> Result<Vec<(String, String)>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.len() % 2 != 0 {
        return Err(eyre!(
            "Trace path {:?} is not a sequence of port/channel pairs",
            path
        ));
    }
    Ok(segments
        .chunks(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect())
}

/// Strip the outermost `port/channel` pair from a trace path and return the
/// denom as seen on the counterparty chain.
///
/// When the stripped path is empty the counterparty sees the base denom
/// itself; otherwise it sees the `ibc/` hash of the remaining path plus the
/// base denom.
pub fn peel_outer_hop(path: &str, base_denom: &str) -> Result<(String, String, String)> {
    let pairs = split_trace_path(path)?;
    let (port, channel) = pairs[0].clone();

    let remaining: Vec<String> = pairs[1..]
        .iter()
        .map(|(p, c)| format!("{p}/{c}"))
        .collect();

    let next_denom = if remaining.is_empty() {
        base_denom.to_string()
    } else {
        hash_trace_path(&format!("{}/{}", remaining.join("/"), base_denom))
    };

    Ok((port, channel, next_denom))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Pinned against live mainnet values: ATOM on Osmosis over channel-0,
    // and the Cosmos Hub escrow for the hub->osmosis channel-141.
    const ATOM_ON_OSMOSIS: &str =
        "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2";
    const HUB_CHANNEL_141_ESCROW: &str = "cosmos1x54ltnyg88k0ejmk8ytwrhd3ltm84xehrnlslf";

    #[test]
    fn test_ibc_denom_mainnet_vector() {
        assert_eq!(ibc_denom("transfer", "channel-0", "uatom"), ATOM_ON_OSMOSIS);
    }

    #[test]
    fn test_ibc_denom_deterministic_and_upper_hex() {
        let a = ibc_denom("transfer", "channel-7", "ujuno");
        let b = ibc_denom("transfer", "channel-7", "ujuno");
        assert_eq!(a, b);
        let hash = a.strip_prefix("ibc/").unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash.to_uppercase());
    }

    #[test]
    fn test_ibc_denom_distinct_inputs_distinct_hashes() {
        let denoms = [
            ibc_denom("transfer", "channel-0", "uatom"),
            ibc_denom("transfer", "channel-1", "uatom"),
            ibc_denom("transfer", "channel-0", "uosmo"),
            ibc_denom("wasm.contract", "channel-0", "uatom"),
        ];
        for (i, a) in denoms.iter().enumerate() {
            for b in denoms.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_ibc_denom_multihop_base_hashed_verbatim() {
        // A base that already contains path segments hashes as one string.
        let direct = hash_trace_path("transfer/channel-7/transfer/channel-3/uatom");
        let via_base = ibc_denom("transfer", "channel-7", "transfer/channel-3/uatom");
        assert_eq!(direct, via_base);
        assert_eq!(
            direct,
            "ibc/610C394848300F313AA24541D62C39343D7AD3DEA515FFAAFB5EF18D6CEC44EA"
        );
    }

    #[test]
    fn test_escrow_address_mainnet_vector() {
        let addr = escrow_address("cosmos", "transfer", "channel-141").unwrap();
        assert_eq!(addr, HUB_CHANNEL_141_ESCROW);
    }

    #[test]
    fn test_escrow_address_prefix_and_channel_sensitivity() {
        let cosmos = escrow_address("cosmos", "transfer", "channel-0").unwrap();
        let osmo = escrow_address("osmo", "transfer", "channel-0").unwrap();
        assert!(cosmos.starts_with("cosmos1"));
        assert!(osmo.starts_with("osmo1"));

        let other_channel = escrow_address("cosmos", "transfer", "channel-1").unwrap();
        assert_ne!(cosmos, other_channel);
    }

    #[test]
    fn test_is_ibc_denom() {
        assert!(is_ibc_denom(ATOM_ON_OSMOSIS));
        assert!(!is_ibc_denom("uatom"));
        assert!(!is_ibc_denom("factory/osmo1abc/token"));
        assert_eq!(
            ibc_denom_hash(ATOM_ON_OSMOSIS),
            Some("27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2")
        );
    }

    #[test]
    fn test_split_trace_path() {
        let pairs = split_trace_path("transfer/channel-7/transfer/channel-3").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("transfer".to_string(), "channel-7".to_string()),
                ("transfer".to_string(), "channel-3".to_string()),
            ]
        );

        assert!(split_trace_path("").is_err());
        assert!(split_trace_path("transfer").is_err());
        assert!(split_trace_path("transfer/channel-0/orphan").is_err());
    }

    #[test]
    fn test_peel_outer_hop_single() {
        let (port, channel, next) = peel_outer_hop("transfer/channel-0", "uatom").unwrap();
        assert_eq!(port, "transfer");
        assert_eq!(channel, "channel-0");
        // Fully peeled: the counterparty sees the base denom.
        assert_eq!(next, "uatom");
    }

    #[test]
    fn test_peel_outer_hop_multihop_rehashes_remainder() {
        let (port, channel, next) =
            peel_outer_hop("transfer/channel-7/transfer/channel-3", "uatom").unwrap();
        assert_eq!(port, "transfer");
        assert_eq!(channel, "channel-7");
        // The next chain sees the hash of the remaining single-hop path.
        assert_eq!(next, hash_trace_path("transfer/channel-3/uatom"));
        assert_eq!(
            next,
            "ibc/A4DB47A9D3CF9A068D454513891B526702455D3EF08FB9EB558C561F9DC2B701"
        );
    }
}
