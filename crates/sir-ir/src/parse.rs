use std::collections::HashSet;

use sir_arena::{Arena, JsonValue};

use crate::diag::{DiagnosticSurface, Severity};
use crate::ids::{IdNewtype, Interner, NodeId, SrcId, SymId, TypeId};
use crate::instr::validate_instr_record;
use crate::records::{
    Loc, NodeRecord, OpaqueRecord, PrimType, RecordTables, SourceRecord, SymbolRecord, TypeKind, TypeRecord,
};

/// Everything a parsed JSONL stream produces: the four id interners,
/// the record tables, accumulated diagnostics, and the feature/target
/// state contributed by `meta` records.
pub struct Program<'a> {
    pub src_ids: Interner<'a, SrcId>,
    pub sym_ids: Interner<'a, SymId>,
    pub type_ids: Interner<'a, TypeId>,
    pub node_ids: Interner<'a, NodeId>,
    pub tables: RecordTables<'a>,
    pub diags: DiagnosticSurface,
    pub features: HashSet<String>,
    pub target_triple: Option<String>,
}

impl<'a> Program<'a> {
    fn new() -> Self {
        Self {
            src_ids: Interner::new(),
            sym_ids: Interner::new(),
            type_ids: Interner::new(),
            node_ids: Interner::new(),
            tables: RecordTables::default(),
            diags: DiagnosticSurface::new(),
            features: HashSet::new(),
            target_triple: None,
        }
    }

    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.contains(name)
    }
}

const SRC_KEYS: &[&str] = &["ir", "k", "id", "file", "line", "col", "end_line", "end_col", "text"];
const SYM_KEYS: &[&str] = &["ir", "k", "id", "name", "kind", "linkage", "type_ref", "attrs", "src_ref", "loc"];
const TYPE_KEYS: &[&str] = &["ir", "k", "id", "kind", "of", "len", "params", "ret", "varargs", "lanes"];
const NODE_KEYS: &[&str] = &["ir", "k", "id", "tag", "type_ref", "fields"];
const META_KEYS: &[&str] = &["ir", "k", "ext"];

/// Parses an entire JSONL document into a [`Program`]. Errors within a
/// single record are recorded on the diagnostic surface and parsing
/// continues with the next line; callers must check
/// `program.diags.has_errors()` before trusting the result for
/// anything beyond further diagnostics.
pub fn parse_program<'a>(text: &str, arena: &'a Arena) -> Program<'a> {
    let mut prog = Program::new();
    for (line_no, line) in text.lines().enumerate() {
        let line_no = (line_no + 1) as i64;
        if line.trim().is_empty() {
            continue;
        }
        let value = match sir_arena::parse_line(line, arena) {
            Ok(v) => v,
            Err(e) => {
                prog.diags.emit(
                    Severity::Error,
                    "sircc.schema.malformed_json",
                    format!("line {line_no}: {e}"),
                );
                continue;
            }
        };
        let Some(_) = value.as_object() else {
            prog.diags.emit(
                Severity::Error,
                "sircc.schema.not_object",
                format!("line {line_no}: record must be a JSON object"),
            );
            continue;
        };
        let Some(kind) = value.get("k").and_then(JsonValue::as_str) else {
            prog.diags.emit(
                Severity::Error,
                "sircc.schema.missing_kind",
                format!("line {line_no}: missing 'k' field"),
            );
            continue;
        };
        if !check_ir_version(&value, &mut prog.diags) {
            continue;
        }
        match kind {
            "meta" => parse_meta(&value, &mut prog),
            "src" => parse_src(&value, &mut prog),
            "sym" => parse_sym(&value, &mut prog),
            "type" => parse_type(&value, &mut prog, arena),
            "node" => parse_node(&value, &mut prog),
            "diag" => { /* accepted, validated and stored by nobody: a non-goal */ }
            "instr" => {
                let _g = prog.diags.push_context("instr", 0, value.get("mnemonic").and_then(JsonValue::as_str).map(str::to_string));
                validate_instr_record(&value, &mut prog.diags);
                parse_opaque(kind, &value, &mut prog);
            }
            "ext" | "label" | "dir" => parse_opaque(kind, &value, &mut prog),
            other => {
                prog.diags.emit(
                    Severity::Error,
                    "sircc.schema.unknown_kind",
                    format!("line {line_no}: unknown record kind '{other}'"),
                );
            }
        }
    }
    prog
}

fn check_ir_version(value: &JsonValue, diags: &mut DiagnosticSurface) -> bool {
    match value.get("ir").and_then(JsonValue::as_str) {
        Some("sir-v1.0") => true,
        _ => {
            diags.emit(
                Severity::Error,
                "sircc.schema.ir.unsupported",
                "record's 'ir' field is missing or unsupported (expected \"sir-v1.0\")",
            );
            false
        }
    }
}

fn check_keys(value: &JsonValue, allowed: &[&str], diags: &mut DiagnosticSurface) -> bool {
    let mut ok = true;
    for k in value.object_keys() {
        if !allowed.contains(&k) {
            diags.emit(Severity::Error, "sircc.schema.unknown_key", format!("unknown key '{k}'"));
            ok = false;
        }
    }
    ok
}

/// Interns an id field that may be a JSON integer or string, per the
/// "integers preserved verbatim, strings hashed and assigned" rule.
fn intern_id_field<'a, Id: IdNewtype + Copy>(value: &JsonValue<'a>, interner: &mut Interner<'a, Id>) -> Option<Id> {
    match value {
        JsonValue::Int(i) if *i >= 0 => Some(interner.reserve_int(*i)),
        JsonValue::Str(_) => Some(interner.intern_str(value.as_str()?)),
        _ => None,
    }
}

fn parse_meta(value: &JsonValue, prog: &mut Program<'_>) {
    let _g = prog.diags.push_context("meta", 0, None);
    check_keys(value, META_KEYS, &mut prog.diags);
    let Some(ext) = value.get("ext") else { return };
    if let Some(features) = ext.get("features").and_then(JsonValue::as_array) {
        for f in features {
            if let Some(name) = f.as_str() {
                prog.features.insert(name.to_string());
            }
        }
    }
    if let Some(triple) = ext.get("target").and_then(|t| t.get("triple")).and_then(JsonValue::as_str) {
        prog.target_triple = Some(triple.to_string());
    }
}

fn parse_src(value: &JsonValue, prog: &mut Program<'_>) {
    check_keys(value, SRC_KEYS, &mut prog.diags);
    let Some(id_v) = value.get("id") else {
        prog.diags.emit(Severity::Error, "sircc.schema.missing_id", "src record missing 'id'");
        return;
    };
    let Some(id) = intern_id_field(&id_v, &mut prog.src_ids) else {
        prog.diags.emit(Severity::Error, "sircc.schema.bad_id", "src record 'id' must be int or string");
        return;
    };
    let _g = prog.diags.push_context("src", id.get(), None);

    let line = value.get("line").and_then(JsonValue::as_i64).unwrap_or(0);
    let loc = Loc {
        line,
        col: value.get("col").and_then(JsonValue::as_i64),
        end_line: value.get("end_line").and_then(JsonValue::as_i64),
        end_col: value.get("end_col").and_then(JsonValue::as_i64),
    };
    if loc.end_line.is_some() != loc.end_col.is_some() {
        prog.diags.emit(
            Severity::Error,
            "sircc.schema.src.partial_end",
            "'end_line' and 'end_col' must both be present or both absent",
        );
    }
    prog.diags.set_loc(loc);

    let rec = SourceRecord {
        id,
        file: value.get("file").and_then(JsonValue::as_str),
        line,
        col: loc.col,
        end_line: loc.end_line,
        end_col: loc.end_col,
        text: value.get("text").and_then(JsonValue::as_str),
    };
    if let Err(e) = prog.tables.sources.insert(id.get(), rec) {
        prog.diags.emit(Severity::Error, "sircc.schema.duplicate_id", e.to_string());
    }
}

fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
}

fn parse_sym(value: &JsonValue, prog: &mut Program<'_>) {
    check_keys(value, SYM_KEYS, &mut prog.diags);
    let Some(id_v) = value.get("id") else {
        prog.diags.emit(Severity::Error, "sircc.schema.missing_id", "sym record missing 'id'");
        return;
    };
    let Some(id) = intern_id_field(&id_v, &mut prog.sym_ids) else {
        prog.diags.emit(Severity::Error, "sircc.schema.bad_id", "sym record 'id' must be int or string");
        return;
    };
    let _g = prog.diags.push_context("sym", id.get(), None);

    let Some(name) = value.get("name").and_then(JsonValue::as_str) else {
        prog.diags.emit(Severity::Error, "sircc.schema.sym.missing_name", "sym record missing 'name'");
        return;
    };
    if !is_valid_identifier(name) {
        prog.diags.emit(
            Severity::Error,
            "sircc.schema.sym.bad_name",
            format!("'{name}' is not a valid identifier"),
        );
    }
    let Some(kind) = value.get("kind").and_then(JsonValue::as_str) else {
        prog.diags.emit(Severity::Error, "sircc.schema.sym.missing_kind", "sym record missing 'kind'");
        return;
    };

    let type_ref = value.get("type_ref").and_then(|v| intern_id_field(&v, &mut prog.type_ids));
    let src_ref = value.get("src_ref").and_then(|v| intern_id_field(&v, &mut prog.src_ids));
    if let Some(src_ref) = src_ref {
        prog.diags.set_src_ref(src_ref);
    }
    let loc = value.get("loc").map(|l| Loc {
        line: l.get("line").and_then(JsonValue::as_i64).unwrap_or(0),
        col: l.get("col").and_then(JsonValue::as_i64),
        end_line: l.get("end_line").and_then(JsonValue::as_i64),
        end_col: l.get("end_col").and_then(JsonValue::as_i64),
    });
    if let Some(loc) = loc {
        prog.diags.set_loc(loc);
    }

    let rec = SymbolRecord {
        id,
        name,
        kind,
        linkage: value.get("linkage").and_then(JsonValue::as_str),
        type_ref,
        attrs: value.get("attrs").copied(),
        src_ref,
        loc,
    };
    if let Err(e) = prog.tables.symbols.insert(id.get(), rec) {
        prog.diags.emit(Severity::Error, "sircc.schema.duplicate_id", e.to_string());
    }
}

fn parse_type<'a>(value: &JsonValue<'a>, prog: &mut Program<'a>, arena: &'a Arena) {
    let Some(id_v) = value.get("id") else {
        prog.diags.emit(Severity::Error, "sircc.schema.missing_id", "type record missing 'id'");
        return;
    };
    let Some(id) = intern_id_field(&id_v, &mut prog.type_ids) else {
        prog.diags.emit(Severity::Error, "sircc.schema.bad_id", "type record 'id' must be int or string");
        return;
    };
    let _g = prog.diags.push_context("type", id.get(), None);

    let Some(kind) = value.get("kind").and_then(JsonValue::as_str) else {
        prog.diags.emit(Severity::Error, "sircc.schema.type.missing_kind", "type record missing 'kind'");
        return;
    };

    let shape = match kind {
        "prim" => {
            check_keys(value, TYPE_KEYS, &mut prog.diags);
            let name = value.get("of").and_then(JsonValue::as_str).unwrap_or("");
            match PrimType::from_name(name) {
                Some(p) => TypeKind::Prim(p),
                None => {
                    prog.diags.emit(
                        Severity::Error,
                        "sircc.schema.type.bad_prim",
                        format!("unknown primitive type '{name}'"),
                    );
                    return;
                }
            }
        }
        "ptr" => {
            check_keys(value, TYPE_KEYS, &mut prog.diags);
            let Some(of) = value.get("of").and_then(|v| intern_id_field(&v, &mut prog.type_ids)) else {
                prog.diags.emit(Severity::Error, "sircc.schema.type.ptr.missing_of", "ptr type missing 'of'");
                return;
            };
            TypeKind::Ptr { of }
        }
        "array" => {
            check_keys(value, TYPE_KEYS, &mut prog.diags);
            let Some(of) = value.get("of").and_then(|v| intern_id_field(&v, &mut prog.type_ids)) else {
                prog.diags.emit(Severity::Error, "sircc.schema.type.array.missing_of", "array type missing 'of'");
                return;
            };
            let len = value.get("len").and_then(JsonValue::as_i64).unwrap_or(-1);
            if len < 0 {
                prog.diags.emit(Severity::Error, "sircc.schema.type.array.bad_len", "array 'len' must be >= 0");
            }
            TypeKind::Array { of, len }
        }
        "fn" => {
            check_keys(value, TYPE_KEYS, &mut prog.diags);
            let params: Vec<TypeId> = value
                .get("params")
                .and_then(|v| v.as_array().map(|a| a.to_vec()))
                .unwrap_or_default()
                .iter()
                .filter_map(|v| intern_id_field(v, &mut prog.type_ids))
                .collect();
            let Some(ret) = value.get("ret").and_then(|v| intern_id_field(&v, &mut prog.type_ids)) else {
                prog.diags.emit(Severity::Error, "sircc.schema.type.fn.missing_ret", "fn type missing 'ret'");
                return;
            };
            let varargs = value.get("varargs").and_then(JsonValue::as_bool).unwrap_or(false);
            TypeKind::Fn { params: arena.alloc_slice_copy(&params), ret, varargs }
        }
        "vec" => {
            check_keys(value, TYPE_KEYS, &mut prog.diags);
            let Some(of) = value.get("of").and_then(|v| intern_id_field(&v, &mut prog.type_ids)) else {
                prog.diags.emit(Severity::Error, "sircc.schema.type.vec.missing_of", "vec type missing 'of'");
                return;
            };
            let lanes = value.get("lanes").and_then(JsonValue::as_i64).unwrap_or(0);
            TypeKind::Vec { of, lanes }
        }
        "fun" | "closure" | "sum" => TypeKind::Reserved { kind, raw: *value },
        other => {
            prog.diags.emit(
                Severity::Error,
                "sircc.schema.type.unknown_kind",
                format!("unknown type kind '{other}'"),
            );
            return;
        }
    };

    let rec = TypeRecord { id, kind: shape };
    if let Err(e) = prog.tables.types.insert(id.get(), rec) {
        prog.diags.emit(Severity::Error, "sircc.schema.duplicate_id", e.to_string());
    }
}

fn parse_node(value: &JsonValue, prog: &mut Program<'_>) {
    check_keys(value, NODE_KEYS, &mut prog.diags);
    let Some(id_v) = value.get("id") else {
        prog.diags.emit(Severity::Error, "sircc.schema.missing_id", "node record missing 'id'");
        return;
    };
    let Some(id) = intern_id_field(&id_v, &mut prog.node_ids) else {
        prog.diags.emit(Severity::Error, "sircc.schema.bad_id", "node record 'id' must be int or string");
        return;
    };
    let Some(tag) = value.get("tag").and_then(JsonValue::as_str) else {
        prog.diags.emit(Severity::Error, "sircc.schema.node.missing_tag", "node record missing 'tag'");
        return;
    };
    let _g = prog.diags.push_context("node", id.get(), Some(tag.to_string()));

    let type_ref = value.get("type_ref").and_then(|v| intern_id_field(&v, &mut prog.type_ids));
    let fields = value.get("fields");

    let rec = NodeRecord { id, tag, type_ref, fields };
    if let Err(e) = prog.tables.nodes.insert(id.get(), rec) {
        prog.diags.emit(Severity::Error, "sircc.schema.duplicate_id", e.to_string());
    }
}

fn parse_opaque(kind: &str, value: &JsonValue, prog: &mut Program<'_>) {
    let _g = prog.diags.push_context("opaque", 0, Some(kind.to_string()));
    prog.tables.opaque.push(OpaqueRecord { kind, raw: *value });
}

#[cfg(test)]
mod test {
    use super::*;
    use sir_arena::Arena;

    #[test]
    fn test_blank_lines_are_skipped() {
        let arena = Arena::new();
        let prog = parse_program("\n   \n\n", &arena);
        assert!(!prog.diags.has_errors());
    }

    #[test]
    fn test_unsupported_ir_version_is_rejected() {
        let arena = Arena::new();
        let prog = parse_program("{\"ir\":\"sir-v2.0\",\"k\":\"meta\"}\n", &arena);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let arena = Arena::new();
        let prog = parse_program("{\"ir\":\"sir-v1.0\",\"k\":\"src\",\"id\":1,\"line\":1,\"bogus\":true}\n", &arena);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let arena = Arena::new();
        let prog = parse_program(
            "{\"ir\":\"sir-v1.0\",\"k\":\"src\",\"id\":1,\"line\":1}\n\
             {\"ir\":\"sir-v1.0\",\"k\":\"src\",\"id\":1,\"line\":2}\n",
            &arena,
        );
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_meta_collects_features_and_target_triple() {
        let arena = Arena::new();
        let prog = parse_program(
            "{\"ir\":\"sir-v1.0\",\"k\":\"meta\",\"ext\":{\"features\":[\"simd:v1\",\"adt:v1\"],\"target\":{\"triple\":\"x86_64-unknown-linux-gnu\"}}}\n",
            &arena,
        );
        assert!(!prog.diags.has_errors());
        assert!(prog.feature_enabled("simd:v1"));
        assert!(prog.feature_enabled("adt:v1"));
        assert_eq!(prog.target_triple.as_deref(), Some("x86_64-unknown-linux-gnu"));
    }

    #[test]
    fn test_src_partial_end_line_col_rejected() {
        let arena = Arena::new();
        let prog = parse_program("{\"ir\":\"sir-v1.0\",\"k\":\"src\",\"id\":1,\"line\":1,\"end_line\":2}\n", &arena);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_sym_rejects_invalid_identifier_name() {
        let arena = Arena::new();
        let prog = parse_program(
            "{\"ir\":\"sir-v1.0\",\"k\":\"sym\",\"id\":1,\"name\":\"9bad\",\"kind\":\"func\"}\n",
            &arena,
        );
        assert!(prog.diags.has_errors());
    }

    // spec.md §8 scenario 1: mixing an integer id and a string id across
    // two type records must resolve both without collision, and the
    // reverse lookup must recover the string form only for the string id.
    #[test]
    fn test_integer_and_string_ids_do_not_collide() {
        let arena = Arena::new();
        let prog = parse_program(
            "{\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":7,\"kind\":\"prim\",\"of\":\"i32\"}\n\
             {\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":\"main\",\"kind\":\"prim\",\"of\":\"i64\"}\n",
            &arena,
        );
        assert!(!prog.diags.has_errors());
        assert_eq!(prog.tables.types.len(), 2);
        let int_id = prog.type_ids.lookup_str("main").unwrap();
        assert_eq!(prog.type_ids.id_str_for_internal(int_id), Some("main"));
        let seven = TypeId::from_raw(7);
        assert_eq!(prog.type_ids.id_str_for_internal(seven), None);
        assert_ne!(seven.get(), int_id.get());
    }

    #[test]
    fn test_node_missing_tag_is_rejected() {
        let arena = Arena::new();
        let prog = parse_program("{\"ir\":\"sir-v1.0\",\"k\":\"node\",\"id\":1}\n", &arena);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_diag_kind_is_read_and_discarded() {
        let arena = Arena::new();
        let prog = parse_program(
            "{\"ir\":\"sir-v1.0\",\"k\":\"diag\",\"level\":\"error\",\"msg\":\"whatever\",\"code\":\"x\",\"about\":{\"k\":\"node\"}}\n",
            &arena,
        );
        assert!(!prog.diags.has_errors());
        assert_eq!(prog.tables.opaque.len(), 0);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let arena = Arena::new();
        let prog = parse_program("{\"ir\":\"sir-v1.0\",\"k\":\"bogus\"}\n", &arena);
        assert!(prog.diags.has_errors());
    }
}
