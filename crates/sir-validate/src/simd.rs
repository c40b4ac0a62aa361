use std::collections::HashSet;

use sir_arena::JsonValue;
use sir_ir::{DiagnosticSurface, Interner, NodeId, PrimType, RecordTables, Severity, TypeId, TypeKind};

use crate::refs::resolve_ref;

/// Pass 5: SIMD semantic checks, run only when `simd:v1` is enabled.
/// Node field names for `vec.*` operand positions (`arg`, `x`, `idx`,
/// `from`) follow the generic `fields: object` per-mnemonic convention
/// described for node records; the checks below enforce the arity and
/// type-matching invariants, not a fixed encode-only schema.
pub fn simd_semantic_checks(tables: &RecordTables<'_>, node_ids: &Interner<'_, NodeId>, features: &HashSet<String>, diags: &mut DiagnosticSurface) {
    if !features.contains("simd:v1") {
        return;
    }
    for rec in tables.nodes.iter().filter(|n| n.tag.starts_with("vec.") || n.tag == "load.vec" || n.tag == "store.vec") {
        let tag = rec.tag;
        let type_ref = rec.type_ref;
        let fields = rec.fields;
        let _g = diags.push_context("node", rec.id.get(), Some(tag.to_string()));
        match tag {
            "vec.splat" => check_splat(tables, node_ids, diags, fields, type_ref),
            "vec.replace" => check_replace(tables, node_ids, diags, fields, type_ref),
            "vec.extract" => check_extract(tables, node_ids, diags, fields, type_ref),
            "vec.shuffle" => check_shuffle(tables, diags, fields, type_ref),
            "vec.bitcast" => check_bitcast(tables, node_ids, diags, fields, type_ref),
            t if t.starts_with("vec.cmp.") => check_cmp(tables, node_ids, diags, fields, type_ref),
            _ => {}
        }
    }
}

fn lane_type_of(tables: &RecordTables<'_>, vec_type: Option<TypeId>) -> Option<TypeId> {
    let vec_type = vec_type?;
    match tables.types.get(vec_type.get())?.kind {
        TypeKind::Vec { of, .. } => Some(of),
        _ => None,
    }
}

/// Resolves a `fields` operand value (a `{t:"ref",id}` or bare id) to
/// the `type_ref` of the node it names.
fn operand_type(tables: &RecordTables<'_>, node_ids: &Interner<'_, NodeId>, v: Option<JsonValue>) -> Option<TypeId> {
    let id = resolve_ref(&v?, node_ids)?;
    tables.nodes.get(id.get())?.type_ref
}

fn is_i32(tables: &RecordTables<'_>, ty: Option<TypeId>) -> bool {
    ty.and_then(|t| tables.types.get(t.get()))
        .is_some_and(|t| matches!(t.kind, TypeKind::Prim(PrimType::I32)))
}

fn byte_size_of(tables: &RecordTables<'_>, ty: TypeId) -> Option<u32> {
    match tables.types.get(ty.get())?.kind {
        TypeKind::Prim(p) => Some(p.byte_size()),
        TypeKind::Vec { of, lanes } => {
            let elem = byte_size_of(tables, of)?;
            Some(elem * u32::try_from(lanes).ok()?)
        }
        _ => None,
    }
}

fn check_splat(
    tables: &RecordTables<'_>,
    node_ids: &Interner<'_, NodeId>,
    diags: &mut DiagnosticSurface,
    fields: Option<JsonValue>,
    result_ty: Option<TypeId>,
) {
    let Some(lane_ty) = lane_type_of(tables, result_ty) else {
        diags.emit(Severity::Error, "sircc.simd.splat.not_vec", "'vec.splat' result type must be a 'vec' type");
        return;
    };
    let arg_ty = operand_type(tables, node_ids, fields.and_then(|f| f.get("arg")));
    if arg_ty != Some(lane_ty) {
        diags.emit(Severity::Error, "sircc.simd.splat.type_mismatch", "'vec.splat' arg type must equal the vec's lane type");
    }
}

fn check_replace(
    tables: &RecordTables<'_>,
    node_ids: &Interner<'_, NodeId>,
    diags: &mut DiagnosticSurface,
    fields: Option<JsonValue>,
    result_ty: Option<TypeId>,
) {
    let Some(lane_ty) = lane_type_of(tables, result_ty) else {
        diags.emit(Severity::Error, "sircc.simd.replace.not_vec", "'vec.replace' result type must be a 'vec' type");
        return;
    };
    let idx_ty = operand_type(tables, node_ids, fields.and_then(|f| f.get("idx")));
    if !is_i32(tables, idx_ty) {
        diags.emit(Severity::Error, "sircc.simd.replace.bad_idx", "'vec.replace' idx must be i32");
    }
    let x_ty = operand_type(tables, node_ids, fields.and_then(|f| f.get("x")));
    if x_ty != Some(lane_ty) {
        diags.emit(Severity::Error, "sircc.simd.replace.bad_value", "'vec.replace' x must be lane-typed");
    }
}

fn check_extract(
    tables: &RecordTables<'_>,
    node_ids: &Interner<'_, NodeId>,
    diags: &mut DiagnosticSurface,
    fields: Option<JsonValue>,
    result_ty: Option<TypeId>,
) {
    let x_ty = operand_type(tables, node_ids, fields.and_then(|f| f.get("x")));
    let Some(x_ty) = x_ty else {
        diags.emit(Severity::Error, "sircc.simd.extract.bad_x", "'vec.extract' x does not resolve to a typed node");
        return;
    };
    let Some(lane_ty) = lane_type_of(tables, Some(x_ty)) else {
        diags.emit(Severity::Error, "sircc.simd.extract.not_vec", "'vec.extract' x type must be a 'vec' type");
        return;
    };
    let idx_ty = operand_type(tables, node_ids, fields.and_then(|f| f.get("idx")));
    if !is_i32(tables, idx_ty) {
        diags.emit(Severity::Error, "sircc.simd.extract.bad_idx", "'vec.extract' idx must be i32");
    }
    if result_ty != Some(lane_ty) {
        diags.emit(Severity::Error, "sircc.simd.extract.bad_result", "'vec.extract' result must be lane-typed");
    }
}

fn check_shuffle(tables: &RecordTables<'_>, diags: &mut DiagnosticSurface, fields: Option<JsonValue>, result_ty: Option<TypeId>) {
    let lanes = match result_ty.and_then(|t| tables.types.get(t.get())) {
        Some(t) => match t.kind {
            TypeKind::Vec { lanes, .. } => lanes,
            _ => {
                diags.emit(Severity::Error, "sircc.simd.shuffle.not_vec", "'vec.shuffle' result type must be a 'vec' type");
                return;
            }
        },
        None => return,
    };
    let idx_len = fields.and_then(|f| f.get("idx")).and_then(|v| v.as_array()).map(|a| a.len() as i64);
    match idx_len {
        Some(len) if len == lanes => {}
        Some(len) => diags.emit(
            Severity::Error,
            "sircc.simd.shuffle.bad_idx_len",
            format!("'vec.shuffle' idx has {len} entries, expected {lanes}"),
        ),
        None => diags.emit(Severity::Error, "sircc.simd.shuffle.missing_idx", "'vec.shuffle' missing 'idx' array"),
    }
}

fn check_bitcast(
    tables: &RecordTables<'_>,
    node_ids: &Interner<'_, NodeId>,
    diags: &mut DiagnosticSurface,
    fields: Option<JsonValue>,
    result_ty: Option<TypeId>,
) {
    let from_ty = operand_type(tables, node_ids, fields.and_then(|f| f.get("from")));
    let (Some(from_ty), Some(result_ty)) = (from_ty, result_ty) else {
        diags.emit(Severity::Error, "sircc.simd.bitcast.untyped", "'vec.bitcast' requires a typed 'from' operand");
        return;
    };
    match (byte_size_of(tables, from_ty), byte_size_of(tables, result_ty)) {
        (Some(a), Some(b)) if a != b => {
            diags.emit(
                Severity::Error,
                "sircc.simd.bitcast.size_mismatch",
                format!("'vec.bitcast' changes size from {a} to {b} bytes"),
            );
        }
        _ => {}
    }
}

fn vec_lanes_of(tables: &RecordTables<'_>, ty: Option<TypeId>) -> Option<i64> {
    match tables.types.get(ty?.get())?.kind {
        TypeKind::Vec { lanes, .. } => Some(lanes),
        _ => None,
    }
}

/// `vec.cmp.*` only needs a declared `vec(bool, lanes)` type when the
/// node doesn't already carry its own result `type_ref`: the lane count
/// is then derived from operand `a`'s vec type, matching the original
/// (`compiler_validate.c:315`), which runs this check exactly when
/// `type_ref` is absent rather than when it's present.
fn check_cmp(
    tables: &RecordTables<'_>,
    node_ids: &Interner<'_, NodeId>,
    diags: &mut DiagnosticSurface,
    fields: Option<JsonValue>,
    result_ty: Option<TypeId>,
) {
    if result_ty.is_some() {
        return;
    }
    let a_ty = operand_type(tables, node_ids, fields.and_then(|f| f.get("a")));
    let Some(lanes) = vec_lanes_of(tables, a_ty) else {
        return;
    };
    let has_bool_vec = tables.types.iter().any(|t| match t.kind {
        TypeKind::Vec { of, lanes: l } => {
            l == lanes && tables.types.get(of.get()).is_some_and(|elem| matches!(elem.kind, TypeKind::Prim(PrimType::Bool)))
        }
        _ => false,
    });
    if !has_bool_vec {
        diags.emit(
            Severity::Error,
            "sircc.vec.cmp.bool_ty_missing",
            format!("'vec.cmp.*' requires a declared vec(bool, {lanes}) type"),
        );
    }
}
