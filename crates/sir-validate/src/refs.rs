use sir_arena::JsonValue;
use sir_ir::{IdNewtype, Interner};

/// Resolves a `{t:"ref", k?, id}` field value against an id namespace's
/// interner. A bare int/string is accepted too, for fields that store a
/// plain id rather than a wrapped ref object. Does not register a new
/// id for an unseen string: an unseen ref is exactly the dangling
/// reference the validator exists to report, not something to paper
/// over by minting a fresh id for it on the spot.
pub fn resolve_ref<Id: IdNewtype + Copy>(v: &JsonValue, interner: &Interner<Id>) -> Option<Id> {
    let id_v = v.get("id").unwrap_or(*v);
    match id_v {
        JsonValue::Int(i) => Some(Id::from_raw(i)),
        JsonValue::Str(s) => interner.lookup_str(s.as_str()),
        _ => None,
    }
}

/// True if the JSON value looks like a `{t:"ref", ...}` object, as
/// opposed to a bare literal.
pub fn is_ref_object(v: &JsonValue) -> bool {
    v.get("t").and_then(|t| t.as_str()) == Some("ref")
}
