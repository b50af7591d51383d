// UUIDv7 helper.
//
// Principal, API-key and token ids are generated app-side so that the
// in-memory and PostgreSQL stores hand out the same kind of identifier and
// ids sort by creation time.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
