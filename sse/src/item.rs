//! Item identity used by the sent ledger.

use serde_json::Value;

/// Capability of a streamed item to name itself with a stable identifier.
///
/// Identifiers must stay the same across poll ticks for the same underlying
/// record, otherwise the record is delivered again on every tick.
pub trait Identifiable {
    fn identifier(&self) -> Option<String>;
}

/// JSON items are identified by their top level `id` field.
impl Identifiable for Value {
    fn identifier(&self) -> Option<String> {
        match self.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

/// Derives the ledger key for `item`. Returns `None` when the item carries no
/// usable identifier and the address fallback is not compiled in.
pub(crate) fn item_id<T: Identifiable>(item: &T, timestamp: i64) -> Option<String> {
    match item.identifier() {
        Some(id) if !id.is_empty() => Some(id),
        _ => fallback_id(item, timestamp),
    }
}

#[cfg(feature = "address-fallback")]
fn fallback_id<T>(item: &T, timestamp: i64) -> Option<String> {
    Some(format!("{timestamp}_{:p}", item as *const T))
}

#[cfg(not(feature = "address-fallback"))]
fn fallback_id<T>(_item: &T, _timestamp: i64) -> Option<String> {
    None
}
