use std::collections::HashSet;

use sir_ir::{feature_dependency, mnemonic_extra_feature, required_feature, DiagnosticSurface, PrimType, RecordTables, Severity, TypeKind};

const SIMD_LANE_PRIMS: &[PrimType] = &[
    PrimType::I8,
    PrimType::I16,
    PrimType::I32,
    PrimType::I64,
    PrimType::F32,
    PrimType::F64,
    PrimType::Bool,
    PrimType::I1,
];

/// Pass 1: `closure:v1 => fun:v1` and any other declared feature
/// dependency. Runs first since later passes assume a consistent
/// feature set.
pub fn feature_dependency_check(features: &HashSet<String>, diags: &mut DiagnosticSurface) {
    for feature in features {
        if let Some(dep) = feature_dependency(feature) {
            if !features.contains(dep) {
                diags.emit(
                    Severity::Error,
                    "sircc.feature.dep",
                    format!("feature '{feature}' requires '{dep}' to also be enabled"),
                );
            }
        }
    }
}

/// Pass 2: type well-formedness. `vec` lane types and lane counts,
/// non-negative array lengths, that every type reference a type record
/// resolves, and that `vec`/`fun`/`closure`/`sum` types carry their
/// corresponding feature gate (spec.md §3: "vec, fun, closure, sum:
/// reserved for their corresponding feature gates"; `compiler_validate.c
/// :366-389` gates the same four kinds at the type level, not just the
/// mnemonic level).
pub fn type_wellformedness_check(tables: &RecordTables<'_>, features: &HashSet<String>, diags: &mut DiagnosticSurface) {
    for rec in tables.types.iter() {
        let _g = diags.push_context("type", rec.id.get(), None);
        match rec.kind {
            TypeKind::Ptr { of } => check_type_ref_resolves(tables, diags, of.get(), "ptr.of"),
            TypeKind::Array { of, len } => {
                check_type_ref_resolves(tables, diags, of.get(), "array.of");
                if len < 0 {
                    diags.emit(Severity::Error, "sircc.type.array.bad_len", "array 'len' must be >= 0");
                }
            }
            TypeKind::Fn { params, ret, .. } => {
                for p in params {
                    check_type_ref_resolves(tables, diags, p.get(), "fn.params[i]");
                }
                check_type_ref_resolves(tables, diags, ret.get(), "fn.ret");
            }
            TypeKind::Vec { of, lanes } => {
                require_type_gate(features, diags, "simd:v1", "vec");
                if lanes <= 0 {
                    diags.emit(Severity::Error, "sircc.type.vec.bad_lanes", "vec 'lanes' must be > 0");
                }
                match tables.types.get(of.get()) {
                    Some(elem) => match elem.kind {
                        TypeKind::Prim(p) if SIMD_LANE_PRIMS.contains(&p) => {}
                        _ => diags.emit(
                            Severity::Error,
                            "sircc.type.vec.bad_lane_type",
                            "vec lane type must be one of i8,i16,i32,i64,f32,f64,bool,i1",
                        ),
                    },
                    None => check_type_ref_resolves(tables, diags, of.get(), "vec.of"),
                }
            }
            TypeKind::Reserved { kind: "fun", .. } => require_type_gate(features, diags, "fun:v1", "fun"),
            TypeKind::Reserved { kind: "closure", .. } => require_type_gate(features, diags, "closure:v1", "closure"),
            TypeKind::Reserved { kind: "sum", .. } => require_type_gate(features, diags, "adt:v1", "sum"),
            TypeKind::Prim(_) | TypeKind::Reserved { .. } => {}
        }
    }
}

fn require_type_gate(features: &HashSet<String>, diags: &mut DiagnosticSurface, feature: &str, type_kind: &str) {
    if !features.contains(feature) {
        diags.emit(
            Severity::Error,
            "sircc.feature.gate",
            format!("'{type_kind}' type requires feature '{feature}', which is not enabled"),
        );
    }
}

fn check_type_ref_resolves(tables: &RecordTables<'_>, diags: &mut DiagnosticSurface, id: i64, what: &str) {
    if tables.types.get(id).is_none() {
        diags.emit(
            Severity::Error,
            "sircc.type.unresolved",
            format!("{what} refers to type id {id}, which does not exist"),
        );
    }
}

/// Pass 3: node feature gates. Re-checked here (rather than trusted from
/// parse time) because `meta.ext.features` may be declared on a later
/// line than the node that needs it.
pub fn node_feature_gates_check(tables: &RecordTables<'_>, features: &HashSet<String>, diags: &mut DiagnosticSurface) {
    for rec in tables.nodes.iter() {
        let tag = rec.tag;
        let _g = diags.push_context("node", rec.id.get(), Some(tag.to_string()));
        if let Some(feature) = required_feature(tag) {
            if !features.contains(feature) {
                diags.emit(
                    Severity::Error,
                    "sircc.feature.gate",
                    format!("'{tag}' requires feature '{feature}', which is not enabled"),
                );
            }
        }
        if let Some(extra) = mnemonic_extra_feature(tag) {
            if !features.contains(extra) {
                diags.emit(
                    Severity::Error,
                    "sircc.feature.gate",
                    format!("'{tag}' additionally requires feature '{extra}', which is not enabled"),
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use sir_arena::Arena;
    use sir_ir::parse_program;

    use super::*;

    #[test]
    fn test_closure_without_fun_fails_dependency_check() {
        let arena = Arena::new();
        let text = r#"{"ir":"sir-v1.0","k":"meta","ext":{"features":["closure:v1"]}}"#;
        let mut prog = parse_program(text, &arena);
        feature_dependency_check(&prog.features, &mut prog.diags);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_vec_type_requires_numeric_lane_type() {
        let arena = Arena::new();
        let text = "{\"ir\":\"sir-v1.0\",\"k\":\"meta\",\"ext\":{\"features\":[\"simd:v1\"]}}\n\
                     {\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":1,\"kind\":\"prim\",\"of\":\"ptr\"}\n\
                     {\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":2,\"kind\":\"vec\",\"of\":1,\"lanes\":4}";
        let mut prog = parse_program(text, &arena);
        type_wellformedness_check(&prog.tables, &prog.features, &mut prog.diags);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_vec_type_without_simd_feature_is_gated() {
        let arena = Arena::new();
        let text = "{\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":1,\"kind\":\"prim\",\"of\":\"i32\"}\n\
                     {\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":2,\"kind\":\"vec\",\"of\":1,\"lanes\":4}";
        let mut prog = parse_program(text, &arena);
        type_wellformedness_check(&prog.tables, &prog.features, &mut prog.diags);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_reserved_type_kinds_require_their_feature() {
        let arena = Arena::new();
        let text = "{\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":1,\"kind\":\"sum\"}";
        let mut prog = parse_program(text, &arena);
        type_wellformedness_check(&prog.tables, &prog.features, &mut prog.diags);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_reserved_sum_type_passes_with_adt_feature_enabled() {
        let arena = Arena::new();
        let text = "{\"ir\":\"sir-v1.0\",\"k\":\"meta\",\"ext\":{\"features\":[\"adt:v1\"]}}\n\
                     {\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":1,\"kind\":\"sum\"}";
        let mut prog = parse_program(text, &arena);
        type_wellformedness_check(&prog.tables, &prog.features, &mut prog.diags);
        assert!(!prog.diags.has_errors(), "{:?}", prog.diags.diagnostics());
    }

    #[test]
    fn test_node_gate_rejects_ungated_atomic() {
        let arena = Arena::new();
        let text = r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"atomic.cas"}"#;
        let mut prog = parse_program(text, &arena);
        node_feature_gates_check(&prog.tables, &prog.features, &mut prog.diags);
        assert!(prog.diags.has_errors());
    }
}
