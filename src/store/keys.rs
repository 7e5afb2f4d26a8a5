/// Key layout for the state store partitions
///
/// Partition structure:
/// - `timestamps`: run:{kind} -> RFC 3339 timestamp (string)
/// - `items`: item:{catalog}:{name} -> ItemRecord (JSON)
/// - `versions`: ver:{component} -> installed version (string)

/// Encode a last-run key: run:{kind}
pub fn encode_run_key(kind: &str) -> Vec<u8> {
    format!("run:{}", kind).into_bytes()
}

/// Encode an item key: item:{catalog}:{name}
pub fn encode_item_key(catalog: &str, name: &str) -> Vec<u8> {
    format!("item:{}:{}", catalog, name).into_bytes()
}

/// Encode an item prefix for range scan: item:{catalog}:
pub fn encode_item_prefix(catalog: &str) -> Vec<u8> {
    format!("item:{}:", catalog).into_bytes()
}

/// Decode an item key: item:{catalog}:{name} -> (catalog, name)
///
/// Names may contain `:`; only the first separator after the catalog splits.
pub fn decode_item_key(key: &[u8]) -> Option<(String, String)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let (catalog, name) = key_str.strip_prefix("item:")?.split_once(':')?;
    if catalog.is_empty() || name.is_empty() {
        return None;
    }
    Some((catalog.to_string(), name.to_string()))
}

/// Encode an installed-version key: ver:{component}
pub fn encode_version_key(component: &str) -> Vec<u8> {
    format!("ver:{}", component).into_bytes()
}
