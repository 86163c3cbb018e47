//! Pagination Cursor Codec (§4.6): URL-safe Base64 of a JSON array of
//! `{EntityName, FieldName, FieldValue, Direction}` tuples.
//!
//! Grounded on the donor's `prax-query/src/pagination.rs` `Cursor`/`CursorDirection` pair, generalized
//! from a single-column cursor into the spec's ordered multi-column list, and made entity-aware so a
//! cursor minted for one endpoint can't be replayed against another (§4.6 last sentence).

use base64::Engine;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::{GatewayError, GatewayResult};
use crate::model::{FilterValue, KeysetPagePredicate, SortDirection};

/// Wire-format direction tag: `0 = ASC`, `1 = DESC` (§6 "Persistent/wire interfaces").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WireDirection {
    Asc = 0,
    Desc = 1,
}

impl From<SortDirection> for WireDirection {
    fn from(d: SortDirection) -> Self {
        match d {
            SortDirection::Asc => Self::Asc,
            SortDirection::Desc => Self::Desc,
        }
    }
}

impl From<WireDirection> for SortDirection {
    fn from(d: WireDirection) -> Self {
        match d {
            WireDirection::Asc => Self::Asc,
            WireDirection::Desc => Self::Desc,
        }
    }
}

/// One element of the wire-format cursor array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorEntry {
    #[serde(rename = "EntityName")]
    pub entity_name: SmolStr,
    #[serde(rename = "FieldName")]
    pub field_name: SmolStr,
    #[serde(rename = "FieldValue")]
    pub field_value: FilterValue,
    #[serde(rename = "Direction")]
    pub direction: WireDirection,
}

/// The decoded, opaque continuation (§3 `PaginationCursor`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaginationCursor {
    pub entries: Vec<CursorEntry>,
}

impl PaginationCursor {
    pub fn new(entity_name: &str, predicates: &[KeysetPagePredicate]) -> Self {
        Self {
            entries: predicates
                .iter()
                .map(|p| CursorEntry {
                    entity_name: entity_name.into(),
                    field_name: p.column.clone(),
                    field_value: p.value.clone(),
                    direction: p.direction.into(),
                })
                .collect(),
        }
    }

    /// URL-safe Base64 (no padding) of the UTF-8 JSON array (§4.6).
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(&self.entries).expect("cursor entries always serialize");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    /// Rejects malformed Base64 or malformed JSON with `BadRequest` (§4.6, §8 cursor-codec property).
    pub fn decode(encoded: &str) -> GatewayResult<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| GatewayError::bad_request("pagination cursor is not valid URL-safe Base64"))?;
        let entries: Vec<CursorEntry> = serde_json::from_slice(&bytes)
            .map_err(|_| GatewayError::bad_request("pagination cursor is not a valid JSON array of cursor entries"))?;
        Ok(Self { entries })
    }

    /// Rejects a cursor minted for a different entity so cursors can't be replayed cross-endpoint
    /// (§4.6 last sentence — enforced here, at decode-against-entity time).
    pub fn decode_for_entity(encoded: &str, entity_name: &str) -> GatewayResult<Self> {
        let cursor = Self::decode(encoded)?;
        if cursor.entries.iter().any(|e| e.entity_name != entity_name) {
            return Err(GatewayError::bad_request(format!(
                "pagination cursor was not issued for entity {entity_name}"
            )));
        }
        Ok(cursor)
    }

    pub fn to_keyset_predicates(&self) -> Vec<KeysetPagePredicate> {
        self.entries
            .iter()
            .map(|e| KeysetPagePredicate {
                column: e.field_name.clone(),
                value: e.field_value.clone(),
                direction: e.direction.into(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PaginationCursor {
        PaginationCursor::new(
            "Reviews",
            &[
                KeysetPagePredicate { column: "book_id".into(), value: FilterValue::Int(1), direction: SortDirection::Asc },
                KeysetPagePredicate { column: "id".into(), value: FilterValue::Int(567), direction: SortDirection::Asc },
            ],
        )
    }

    #[test]
    fn roundtrip_preserves_all_fields() {
        let cursor = sample();
        let encoded = cursor.encode();
        let decoded = PaginationCursor::decode(&encoded).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let err = PaginationCursor::decode("not base64 !!!").unwrap_err();
        assert_eq!(err.sub_status(), crate::error::SubStatus::BadRequest);
    }

    #[test]
    fn decode_rejects_valid_base64_non_json() {
        let garbage = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b"not json");
        let err = PaginationCursor::decode(&garbage).unwrap_err();
        assert_eq!(err.sub_status(), crate::error::SubStatus::BadRequest);
    }

    #[test]
    fn decode_for_entity_rejects_cross_entity_reuse() {
        let cursor = sample();
        let encoded = cursor.encode();
        assert!(PaginationCursor::decode_for_entity(&encoded, "Reviews").is_ok());
        let err = PaginationCursor::decode_for_entity(&encoded, "Book").unwrap_err();
        assert_eq!(err.sub_status(), crate::error::SubStatus::BadRequest);
    }

    #[test]
    fn scenario_3_cursor_matches_composite_pk_example() {
        let cursor = sample();
        let predicates = cursor.to_keyset_predicates();
        assert_eq!(predicates.len(), 2);
        assert_eq!(predicates[0].column, "book_id");
        assert_eq!(predicates[0].value, FilterValue::Int(1));
        assert_eq!(predicates[1].column, "id");
        assert_eq!(predicates[1].value, FilterValue::Int(567));
    }
}
