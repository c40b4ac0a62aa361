use sir_ir::NodeId;

use crate::ValidatedProgram;

/// Shared contract the (excluded) LLVM, ZASM, and interpreter backends
/// realize: accept a validated program's `fn` nodes in declaration
/// order, lower each, and close out the module. `Self::Error` lets each
/// backend carry its own error type (an LLVM codegen error looks
/// nothing like a ZASM emission error) while the dispatcher stays
/// generic over the trait.
pub trait Backend {
    type Error;

    fn begin_module(&mut self, target_triple: Option<&str>) -> Result<(), Self::Error>;
    fn lower_fn(&mut self, ctx: &ValidatedProgram, fn_id: NodeId) -> Result<(), Self::Error>;
    fn finish_module(&mut self) -> Result<(), Self::Error>;
}

/// Walks every `fn` node of a validated program and drives a `Backend`
/// through it. Declare-then-lower-breadth-first ordering within a
/// function body is a backend-internal concern; this dispatcher only
/// guarantees the per-function call sequence (`begin_module`, one
/// `lower_fn` per `fn` node in ascending id order, `finish_module`).
pub struct Dispatcher<'p, 'a> {
    validated: ValidatedProgram<'p, 'a>,
}

impl<'p, 'a> Dispatcher<'p, 'a> {
    pub fn new(validated: ValidatedProgram<'p, 'a>) -> Self {
        Self { validated }
    }

    pub fn dispatch<B: Backend>(&self, backend: &mut B, target_triple: Option<&str>) -> Result<(), B::Error> {
        backend.begin_module(target_triple)?;
        for rec in self.validated.program.tables.nodes.iter().filter(|n| n.tag == "fn") {
            backend.lower_fn(&self.validated, rec.id)?;
        }
        backend.finish_module()
    }
}

/// Mnemonic prefixes a trivial recording backend is willing to "lower".
/// Not an exhaustive mnemonic table (that lives in the excluded
/// backends); just enough coverage that the dispatcher's contract tests
/// can exercise both the happy path and the "unknown mnemonic is a hard
/// error" rule without a real codegen backend.
const KNOWN_PREFIXES: &[&str] = &[
    "const.", "i1.", "i8.", "i16.", "i32.", "i64.", "f32.", "f64.", "ptr.", "call.", "term.", "vec.", "atomic.", "mem.", "cstr", "let",
];
const KNOWN_EXACT: &[&str] = &["fn", "block", "bparam", "return"];

fn is_known_mnemonic(tag: &str) -> bool {
    KNOWN_EXACT.contains(&tag) || KNOWN_PREFIXES.iter().any(|p| tag.starts_with(p))
}

#[derive(Debug, thiserror::Error)]
pub enum RecordingBackendError {
    #[error("unknown mnemonic '{0}' in fn {1}")]
    UnknownMnemonic(String, i64),
}

/// Test double standing in for the excluded LLVM/ZASM/interpreter
/// backends: records which `fn_id`s were dispatched and in what order,
/// and enforces the shared "unknown mnemonic is a hard error" rule by
/// walking each function's reachable nodes. Emits no artifacts.
#[derive(Default)]
pub struct RecordingBackend {
    pub began: bool,
    pub finished: bool,
    pub target_triple: Option<String>,
    pub lowered: Vec<NodeId>,
}

impl Backend for RecordingBackend {
    type Error = RecordingBackendError;

    fn begin_module(&mut self, target_triple: Option<&str>) -> Result<(), Self::Error> {
        self.began = true;
        self.target_triple = target_triple.map(str::to_string);
        Ok(())
    }

    fn lower_fn(&mut self, ctx: &ValidatedProgram, fn_id: NodeId) -> Result<(), Self::Error> {
        self.lowered.push(fn_id);
        let Some(fn_rec) = ctx.program.tables.nodes.get(fn_id.get()) else {
            return Ok(());
        };
        let Some(fields) = fn_rec.fields else { return Ok(()) };

        let mut reachable = Vec::new();
        if let Some(blocks) = fields.get("blocks").and_then(|v| v.as_array()) {
            for b in blocks {
                let Some(block_id) = b.as_i64() else { continue };
                let Some(block_rec) = ctx.program.tables.nodes.get(block_id) else { continue };
                if let Some(stmts) = block_rec.fields.and_then(|f| f.get("stmts")).and_then(|v| v.as_array()) {
                    for s in stmts {
                        if let Some(stmt_id) = s.as_i64() {
                            reachable.push(stmt_id);
                        }
                    }
                }
            }
        }

        for id in reachable {
            if let Some(rec) = ctx.program.tables.nodes.get(id) {
                if !is_known_mnemonic(rec.tag) {
                    return Err(RecordingBackendError::UnknownMnemonic(rec.tag.to_string(), fn_id.get()));
                }
            }
        }
        Ok(())
    }

    fn finish_module(&mut self) -> Result<(), Self::Error> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use sir_arena::Arena;
    use sir_ir::parse_program;

    use super::*;
    use crate::validate;

    fn lines(parts: &[&str]) -> String {
        parts.join("\n")
    }

    #[test]
    fn test_dispatcher_visits_every_fn_in_order_and_calls_lifecycle() {
        let arena = Arena::new();
        let text = lines(&[
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"term.ret","fields":{}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"stmts":[1]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","fields":{"entry":2,"blocks":[2]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":5,"tag":"fn","fields":{"entry":2,"blocks":[2]}}"#,
        ]);
        let mut prog = parse_program(&text, &arena);
        assert!(!prog.diags.has_errors(), "{:?}", prog.diags.diagnostics());
        let validated = validate(&mut prog);
        let dispatcher = Dispatcher::new(validated);
        let mut backend = RecordingBackend::default();
        dispatcher.dispatch(&mut backend, Some("x86_64-unknown-linux-gnu")).unwrap();
        assert!(backend.began);
        assert!(backend.finished);
        assert_eq!(backend.target_triple.as_deref(), Some("x86_64-unknown-linux-gnu"));
        assert_eq!(backend.lowered, vec![NodeId::from_raw(3), NodeId::from_raw(5)]);
    }

    #[test]
    fn test_dispatcher_rejects_unknown_mnemonic() {
        let arena = Arena::new();
        let text = lines(&[
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"sem.totally_unknown_op","fields":{}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"stmts":[1]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","fields":{"entry":2,"blocks":[2]}}"#,
        ]);
        let mut prog = parse_program(&text, &arena);
        let validated = validate(&mut prog);
        let dispatcher = Dispatcher::new(validated);
        let mut backend = RecordingBackend::default();
        let err = dispatcher.dispatch(&mut backend, None).unwrap_err();
        assert!(matches!(err, RecordingBackendError::UnknownMnemonic(_, _)));
    }
}
