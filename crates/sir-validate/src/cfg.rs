use sir_arena::JsonValue;
use sir_ir::{DiagnosticSurface, Interner, NodeId, RecordTables, Severity};

use crate::refs::resolve_ref;

/// Pass 4: CFG validation for every `fn` node that declares `entry` and
/// `blocks` (the "CFG-form" shape; legacy linear-form `fn` nodes with a
/// bare `fields.body` are accepted without further checking, since they
/// carry no block graph to validate).
pub fn cfg_validation(tables: &RecordTables<'_>, node_ids: &Interner<'_, NodeId>, diags: &mut DiagnosticSurface) {
    for rec in tables.nodes.iter().filter(|n| n.tag == "fn") {
        let Some(fields) = rec.fields else { continue };
        let entry_v = fields.get("entry");
        let blocks_v = fields.get("blocks");
        let (Some(entry_v), Some(blocks_arr)) = (entry_v, blocks_v.and_then(|v| v.as_array())) else {
            continue;
        };
        let _g = diags.push_context("node", rec.id.get(), Some("fn".to_string()));
        validate_fn_cfg(tables, node_ids, diags, &entry_v, blocks_arr);
    }
}

fn validate_fn_cfg(
    tables: &RecordTables<'_>,
    node_ids: &Interner<'_, NodeId>,
    diags: &mut DiagnosticSurface,
    entry_v: &JsonValue,
    blocks_arr: &[JsonValue],
) {
    let block_ids: Vec<Option<NodeId>> = blocks_arr.iter().map(|b| resolve_ref(b, node_ids)).collect();
    for (i, b) in block_ids.iter().enumerate() {
        if b.is_none() {
            diags.emit(Severity::Error, "sircc.cfg.unresolved_block", format!("blocks[{i}] does not resolve to a node"));
        }
    }

    let Some(entry_id) = resolve_ref(entry_v, node_ids) else {
        diags.emit(Severity::Error, "sircc.cfg.unresolved_entry", "'entry' does not resolve to a node");
        return;
    };
    if !block_ids.iter().any(|b| *b == Some(entry_id)) {
        diags.emit(Severity::Error, "sircc.cfg.entry_not_in_blocks", "'entry' must be one of 'blocks'");
    }

    for block_id in block_ids.into_iter().flatten() {
        validate_block(tables, node_ids, diags, block_id);
    }
}

fn validate_block(tables: &RecordTables<'_>, node_ids: &Interner<'_, NodeId>, diags: &mut DiagnosticSurface, block_id: NodeId) {
    let Some(block_rec) = tables.nodes.get(block_id.get()) else { return };
    if block_rec.tag != "block" {
        diags.emit(
            Severity::Error,
            "sircc.cfg.not_a_block",
            format!("node {} referenced as a block has tag '{}'", block_id.get(), block_rec.tag),
        );
        return;
    }
    let Some(fields) = block_rec.fields else {
        diags.emit(Severity::Error, "sircc.cfg.block.missing_fields", "block node missing 'fields'");
        return;
    };
    let _g = diags.push_context("node", block_id.get(), Some("block".to_string()));

    let Some(stmts) = fields.get("stmts").and_then(|v| v.as_array()) else {
        diags.emit(Severity::Error, "sircc.cfg.block.missing_stmts", "block missing 'stmts'");
        return;
    };
    if stmts.is_empty() {
        diags.emit(Severity::Error, "sircc.cfg.block.empty_stmts", "block 'stmts' must be non-empty");
        return;
    }

    let stmt_ids: Vec<Option<NodeId>> = stmts.iter().map(|s| resolve_ref(s, node_ids)).collect();
    let last = stmt_ids.len() - 1;
    for (i, stmt_id) in stmt_ids.iter().enumerate() {
        let Some(stmt_id) = stmt_id else {
            diags.emit(Severity::Error, "sircc.cfg.unresolved_stmt", format!("stmts[{i}] does not resolve to a node"));
            continue;
        };
        let Some(stmt_rec) = tables.nodes.get(stmt_id.get()) else {
            diags.emit(Severity::Error, "sircc.cfg.unresolved_stmt", format!("stmts[{i}] refers to a nonexistent node"));
            continue;
        };
        let is_terminator = is_terminator_tag(stmt_rec.tag);
        if i == last && !is_terminator {
            diags.emit(Severity::Error, "sircc.cfg.missing_terminator", "block's last statement must be a terminator");
        } else if i != last && is_terminator {
            diags.emit(Severity::Error, "sircc.cfg.interior_terminator", "terminator may only appear as a block's last statement");
        }
        if i == last && is_terminator {
            validate_terminator(tables, node_ids, diags, stmt_rec.tag, stmt_rec.fields);
        }
    }
}

fn is_terminator_tag(tag: &str) -> bool {
    tag.starts_with("term.") || tag == "return"
}

fn validate_terminator(
    tables: &RecordTables<'_>,
    node_ids: &Interner<'_, NodeId>,
    diags: &mut DiagnosticSurface,
    tag: &str,
    fields: Option<JsonValue>,
) {
    let Some(fields) = fields else {
        diags.emit(Severity::Error, "sircc.cfg.terminator.missing_fields", "terminator missing 'fields'");
        return;
    };
    match tag {
        "term.br" => {
            check_branch_target(tables, node_ids, diags, fields.get("to"), fields.get("args"));
        }
        "term.cbr" => {
            if fields.get("cond").and_then(|c| resolve_ref(&c, node_ids)).is_none() {
                diags.emit(Severity::Error, "sircc.cfg.cbr.bad_cond", "'term.cbr' cond does not resolve to a node");
            }
            for branch in ["then", "else"] {
                match fields.get(branch) {
                    Some(b) => check_branch_target(tables, node_ids, diags, b.get("to"), b.get("args")),
                    None => diags.emit(Severity::Error, "sircc.cfg.cbr.missing_branch", format!("'term.cbr' missing '{branch}'")),
                }
            }
        }
        "term.switch" => {
            if fields.get("scrut").and_then(|s| resolve_ref(&s, node_ids)).is_none() {
                diags.emit(Severity::Error, "sircc.cfg.switch.bad_scrut", "'term.switch' scrut does not resolve to a node");
            }
            match fields.get("default") {
                Some(d) => check_branch_target(tables, node_ids, diags, d.get("to"), d.get("args")),
                None => diags.emit(Severity::Error, "sircc.cfg.switch.missing_default", "'term.switch' requires 'default'"),
            }
            let cases = fields.get("cases").and_then(|c| c.as_array()).unwrap_or(&[]);
            for case in cases {
                check_branch_target(tables, node_ids, diags, case.get("to"), case.get("args"));
                match case.get("lit").and_then(|l| resolve_ref(&l, node_ids)) {
                    Some(lit_id) => {
                        if let Some(lit_rec) = tables.nodes.get(lit_id.get()) {
                            if !lit_rec.tag.starts_with("const.") {
                                diags.emit(Severity::Error, "sircc.cfg.switch.bad_case_lit", "'case.lit' must reference a 'const.*' node");
                            }
                        }
                    }
                    None => diags.emit(Severity::Error, "sircc.cfg.switch.bad_case_lit", "'case.lit' does not resolve to a node"),
                }
            }
        }
        "term.ret" | "return" => {
            if let Some(v) = fields.get("value") {
                if resolve_ref(&v, node_ids).is_none() {
                    diags.emit(Severity::Error, "sircc.cfg.ret.bad_value", "terminator 'value' does not resolve to a node");
                }
            }
        }
        _ => {
            diags.emit(Severity::Error, "sircc.cfg.unknown_terminator", format!("unknown terminator tag '{tag}'"));
        }
    }
}

fn check_branch_target(
    tables: &RecordTables<'_>,
    node_ids: &Interner<'_, NodeId>,
    diags: &mut DiagnosticSurface,
    to: Option<JsonValue>,
    args: Option<JsonValue>,
) {
    let Some(to) = to else {
        diags.emit(Severity::Error, "sircc.cfg.branch.missing_to", "branch missing 'to'");
        return;
    };
    let Some(to_id) = resolve_ref(&to, node_ids) else {
        diags.emit(Severity::Error, "sircc.cfg.branch.bad_to", "branch 'to' does not resolve to a node");
        return;
    };
    let Some(to_rec) = tables.nodes.get(to_id.get()) else {
        diags.emit(Severity::Error, "sircc.cfg.branch.bad_to", "branch 'to' refers to a nonexistent node");
        return;
    };
    if to_rec.tag != "block" {
        diags.emit(Severity::Error, "sircc.cfg.branch.to_not_block", "branch 'to' must reference a 'block' node");
        return;
    }
    let want_params = to_rec
        .fields
        .and_then(|f| f.get("params"))
        .and_then(|p| p.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    let got_args = args.and_then(|a| a.as_array()).map(|a| a.len()).unwrap_or(0);
    if got_args != want_params {
        diags.emit(
            Severity::Error,
            "sircc.cfg.branch.args.count_mismatch",
            format!("branch supplies {got_args} arg(s) but target block expects {want_params}"),
        );
    }
}

#[cfg(test)]
mod test {
    use sir_arena::Arena;
    use sir_ir::parse_program;

    use super::*;

    fn lines(parts: &[&str]) -> String {
        parts.join("\n")
    }

    #[test]
    fn test_accepts_well_formed_two_block_fn() {
        let arena = Arena::new();
        let text = lines(&[
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"bparam","type_ref":null}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"term.ret","fields":{}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"block","fields":{"params":[],"stmts":[2]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"fn","fields":{"entry":3,"blocks":[3]}}"#,
        ]);
        let mut prog = parse_program(&text, &arena);
        assert!(!prog.diags.has_errors(), "parse produced errors: {:?}", prog.diags.diagnostics());
        cfg_validation(&prog.tables, &prog.node_ids, &mut prog.diags);
        assert!(!prog.diags.has_errors(), "{:?}", prog.diags.diagnostics());
    }

    #[test]
    fn test_rejects_entry_not_in_blocks() {
        let arena = Arena::new();
        let text = lines(&[
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"term.ret","fields":{}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"block","fields":{"stmts":[2]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"fn","fields":{"entry":99,"blocks":[3]}}"#,
        ]);
        let mut prog = parse_program(&text, &arena);
        cfg_validation(&prog.tables, &prog.node_ids, &mut prog.diags);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_rejects_interior_terminator() {
        let arena = Arena::new();
        let text = lines(&[
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"term.ret","fields":{}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"i32.add","fields":{}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"block","fields":{"stmts":[1,2]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"fn","fields":{"entry":3,"blocks":[3]}}"#,
        ]);
        let mut prog = parse_program(&text, &arena);
        cfg_validation(&prog.tables, &prog.node_ids, &mut prog.diags);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_rejects_branch_arity_mismatch() {
        let arena = Arena::new();
        let text = lines(&[
            r#"{"ir":"sir-v1.0","k":"node","id":10,"tag":"bparam","type_ref":null}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"term.ret","fields":{}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"block","fields":{"params":[10],"stmts":[2]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"term.br","fields":{"to":3,"args":[]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":5,"tag":"block","fields":{"stmts":[1]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"fn","fields":{"entry":5,"blocks":[3,5]}}"#,
        ]);
        let mut prog = parse_program(&text, &arena);
        cfg_validation(&prog.tables, &prog.node_ids, &mut prog.diags);
        assert!(prog.diags.has_errors());
    }

    #[test]
    fn test_legacy_linear_form_skipped() {
        let arena = Arena::new();
        let text = r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"fn","fields":{"body":2}}"#;
        let mut prog = parse_program(text, &arena);
        cfg_validation(&prog.tables, &prog.node_ids, &mut prog.diags);
        assert!(!prog.diags.has_errors());
    }
}
