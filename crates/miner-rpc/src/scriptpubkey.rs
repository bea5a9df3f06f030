//! Extracts a usable address/script hint from a node's `scriptPubKey`
//! object, which drifts across node versions.
//!
//! Ordered extraction policy: try the direct `address` field, then the
//! head of the legacy `addresses` list, then — for the early P2PK shape —
//! derive from `hex` when `type == "pubkey"`. The first match wins; no
//! attempt is made to reconcile disagreements between fields.

use serde_json::Value;

/// Pull a spendable address string out of a `getblocktemplate` /
/// `getrawtransaction` `scriptPubKey` object. Returns `None` if none of the
/// known shapes matched.
pub fn extract_script_pubkey(script_pub_key: &Value) -> Option<String> {
    if let Some(address) = script_pub_key.get("address").and_then(Value::as_str) {
        return Some(address.to_string());
    }

    if let Some(address) = script_pub_key
        .get("addresses")
        .and_then(Value::as_array)
        .and_then(|addrs| addrs.first())
        .and_then(Value::as_str)
    {
        return Some(address.to_string());
    }

    let is_pubkey = script_pub_key.get("type").and_then(Value::as_str) == Some("pubkey");
    if is_pubkey {
        // Early P2PK outputs carry the raw pubkey in `hex` with no address
        // field at all; the caller is responsible for turning this into a
        // scriptPubKey (`OP_PUSH <pubkey> OP_CHECKSIG`) if it needs one.
        return script_pub_key.get("hex").and_then(Value::as_str).map(str::to_string);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prefers_direct_address_field() {
        let spk = json!({"address": "bc1qexample", "addresses": ["bc1qother"]});
        assert_eq!(extract_script_pubkey(&spk).as_deref(), Some("bc1qexample"));
    }

    #[test]
    fn test_falls_back_to_addresses_list_head() {
        let spk = json!({"addresses": ["bc1qlegacy", "bc1qunused"]});
        assert_eq!(extract_script_pubkey(&spk).as_deref(), Some("bc1qlegacy"));
    }

    #[test]
    fn test_falls_back_to_pubkey_hex() {
        let spk = json!({"type": "pubkey", "hex": "04deadbeef"});
        assert_eq!(extract_script_pubkey(&spk).as_deref(), Some("04deadbeef"));
    }

    #[test]
    fn test_returns_none_for_unrecognized_shape() {
        let spk = json!({"type": "nonstandard"});
        assert_eq!(extract_script_pubkey(&spk), None);
    }
}
