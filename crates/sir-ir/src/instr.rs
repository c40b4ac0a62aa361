//! `instr` record validation (spec §4.1): the record parser validates an
//! `instr` record's operand objects recursively, even though the
//! mnemonic's actual lowering is the (excluded) ZASM textual backend's
//! concern — only the shared operand schema is this crate's job.

use sir_arena::JsonValue;

use crate::diag::{DiagnosticSurface, Severity};

const INSTR_KEYS: &[&str] = &["ir", "k", "id", "mnemonic", "operands", "loc", "src_ref"];
const OPERAND_TAGS: &[&str] = &["sym", "lbl", "reg", "num", "str", "mem", "ref"];
const MEM_BASE_TAGS: &[&str] = &["reg", "sym"];
const MEM_SIZES: &[i64] = &[1, 2, 4, 8, 16];

fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$')
}

/// Validates an `instr` record's shape and recursively validates every
/// operand it carries. Diagnostics are emitted on `diags`; the caller is
/// expected to have already pushed a diagnostic context naming the
/// record's mnemonic.
pub fn validate_instr_record(value: &JsonValue, diags: &mut DiagnosticSurface) {
    for k in value.object_keys() {
        if !INSTR_KEYS.contains(&k) {
            diags.emit(Severity::Error, "sircc.schema.unknown_key", format!("unknown key '{k}' in instr record"));
        }
    }
    if value.get("mnemonic").and_then(JsonValue::as_str).is_none() {
        diags.emit(Severity::Error, "sircc.schema.instr.missing_mnemonic", "instr record missing 'mnemonic'");
    }
    let Some(operands) = value.get("operands").and_then(|v| v.as_array()) else {
        return;
    };
    for operand in operands {
        validate_operand(operand, diags);
    }
}

fn validate_operand(operand: &JsonValue, diags: &mut DiagnosticSurface) {
    let Some(t) = operand.get("t").and_then(JsonValue::as_str) else {
        diags.emit(Severity::Error, "sircc.schema.instr.operand.missing_t", "operand missing 't'");
        return;
    };
    if !OPERAND_TAGS.contains(&t) {
        diags.emit(
            Severity::Error,
            "sircc.schema.instr.operand.bad_t",
            format!("unknown operand tag '{t}'"),
        );
        return;
    }
    match t {
        "sym" | "lbl" => {
            if let Some(name) = operand.get("name").and_then(JsonValue::as_str) {
                if !is_valid_identifier(name) {
                    diags.emit(
                        Severity::Error,
                        "sircc.schema.instr.operand.bad_identifier",
                        format!("'{name}' is not a valid identifier"),
                    );
                }
            }
        }
        "num" => {
            if operand.get("value").and_then(JsonValue::as_i64).is_none() {
                diags.emit(Severity::Error, "sircc.schema.instr.operand.bad_num", "'num' operand missing integer 'value'");
            }
        }
        "str" => {
            if operand.get("value").and_then(JsonValue::as_str).is_none() {
                diags.emit(Severity::Error, "sircc.schema.instr.operand.bad_str", "'str' operand missing string 'value'");
            }
        }
        "mem" => {
            match operand.get("base") {
                Some(base) => {
                    let base_t = base.get("t").and_then(JsonValue::as_str);
                    match base_t {
                        Some(bt) if MEM_BASE_TAGS.contains(&bt) => validate_operand(&base, diags),
                        _ => diags.emit(
                            Severity::Error,
                            "sircc.schema.instr.operand.mem.bad_base",
                            "'mem' operand's base.t must be 'reg' or 'sym'",
                        ),
                    }
                }
                None => diags.emit(Severity::Error, "sircc.schema.instr.operand.mem.missing_base", "'mem' operand missing 'base'"),
            }
            if let Some(size) = operand.get("size").and_then(JsonValue::as_i64) {
                if !MEM_SIZES.contains(&size) {
                    diags.emit(
                        Severity::Error,
                        "sircc.schema.instr.operand.mem.bad_size",
                        format!("'mem.size' must be one of 1,2,4,8,16, got {size}"),
                    );
                }
            }
        }
        "ref" => {
            if operand.get("id").is_none() {
                diags.emit(Severity::Error, "sircc.schema.instr.operand.ref.missing_id", "'ref' operand missing 'id'");
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sir_arena::{parse_line, Arena};

    fn parse(text: &str, arena: &Arena) -> JsonValue<'_> {
        parse_line(text, arena).unwrap()
    }

    #[test]
    fn test_accepts_well_formed_instr() {
        let arena = Arena::new();
        let v = parse(
            r#"{"ir":"sir-v1.0","k":"instr","mnemonic":"mov","operands":[{"t":"reg","name":"r0"},{"t":"num","value":1}]}"#,
            &arena,
        );
        let mut diags = DiagnosticSurface::new();
        validate_instr_record(&v, &mut diags);
        assert!(!diags.has_errors());
    }

    #[test]
    fn test_rejects_bad_mem_size() {
        let arena = Arena::new();
        let v = parse(
            r#"{"ir":"sir-v1.0","k":"instr","mnemonic":"load","operands":[{"t":"mem","base":{"t":"reg","name":"r1"},"size":3}]}"#,
            &arena,
        );
        let mut diags = DiagnosticSurface::new();
        validate_instr_record(&v, &mut diags);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_rejects_bad_mem_base_tag() {
        let arena = Arena::new();
        let v = parse(
            r#"{"ir":"sir-v1.0","k":"instr","mnemonic":"load","operands":[{"t":"mem","base":{"t":"num","value":1}}]}"#,
            &arena,
        );
        let mut diags = DiagnosticSurface::new();
        validate_instr_record(&v, &mut diags);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_rejects_unknown_operand_tag() {
        let arena = Arena::new();
        let v = parse(r#"{"ir":"sir-v1.0","k":"instr","mnemonic":"x","operands":[{"t":"bogus"}]}"#, &arena);
        let mut diags = DiagnosticSurface::new();
        validate_instr_record(&v, &mut diags);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_missing_mnemonic_rejected() {
        let arena = Arena::new();
        let v = parse(r#"{"ir":"sir-v1.0","k":"instr","operands":[]}"#, &arena);
        let mut diags = DiagnosticSurface::new();
        validate_instr_record(&v, &mut diags);
        assert!(diags.has_errors());
    }
}
