//! The model catalog advertised on `/v1/models`.
//!
//! Editors use this list to populate their model pickers. It is static: the
//! upstream model listing endpoint does not accept subscription tokens.

use crate::translate::openai_types::{ModelList, ModelObject};

/// Models offered to clients, newest first.
pub const CATALOG: &[&str] = &[
    "claude-opus-4-6",
    "claude-sonnet-4-5-20250929",
    "claude-3-5-haiku-20241022",
];

const CATALOG_CREATED: i64 = 1_700_000_000;

#[must_use]
pub fn list_models() -> ModelList {
    ModelList {
        object: "list".to_string(),
        data: CATALOG
            .iter()
            .map(|id| ModelObject {
                id: (*id).to_string(),
                object: "model".to_string(),
                created: CATALOG_CREATED,
                owned_by: "anthropic".to_string(),
            })
            .collect(),
    }
}
