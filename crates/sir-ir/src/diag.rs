use crate::ids::SrcId;
use crate::records::Loc;

/// Exit-code severity lattice. `Internal` is sticky in the sense that
/// once emitted it dominates the program's exit code for the rest of
/// the run — there is no path back down to `Error` once an invariant
/// has actually broken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok = 0,
    Error = 1,
    Internal = 2,
    Toolchain = 3,
    Usage = 4,
}

impl Severity {
    pub fn exit_code(self) -> u8 {
        self as u8
    }
}

/// Identifies the record or node a diagnostic is about.
#[derive(Clone, Debug, Default)]
pub struct About {
    pub kind: Option<&'static str>,
    pub id: Option<i64>,
    pub tag: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub level: Severity,
    pub code: String,
    pub msg: String,
    pub about: About,
    pub src_ref: Option<SrcId>,
    pub loc: Option<Loc>,
}

/// The "current position" the diagnostic surface is descended into:
/// which record kind, which id within it, and (for nodes) which tag.
/// Pushed on entry to a record or child node, popped on exit, so any
/// diagnostic emitted in between is automatically attributed.
#[derive(Clone, Debug, Default)]
struct DiagContext {
    kind: Option<&'static str>,
    rec_id: Option<i64>,
    tag: Option<String>,
    src_ref: Option<SrcId>,
    loc: Option<Loc>,
}

/// RAII guard returned by [`DiagnosticSurface::push_context`]. Dropping
/// it restores the context as it was before the push, on every exit
/// path (including `?`-propagated errors) — this is the stack-guard
/// replacement for the original's manual push/pop pair.
pub struct ContextGuard<'s> {
    surface: &'s mut DiagnosticSurface,
    saved: DiagContext,
}

impl<'s> Drop for ContextGuard<'s> {
    fn drop(&mut self) {
        self.surface.ctx = std::mem::take(&mut self.saved);
    }
}

/// Program-wide diagnostic surface: sticky error/exit-code state plus a
/// single "current context" visited during parsing and validation.
pub struct DiagnosticSurface {
    ctx: DiagContext,
    diagnostics: Vec<Diagnostic>,
    max_severity: Severity,
}

impl Default for DiagnosticSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSurface {
    pub fn new() -> Self {
        Self {
            ctx: DiagContext::default(),
            diagnostics: Vec::new(),
            max_severity: Severity::Ok,
        }
    }

    pub fn push_context(&mut self, kind: &'static str, rec_id: i64, tag: Option<String>) -> ContextGuard<'_> {
        let inherited_src_ref = self.ctx.src_ref;
        let inherited_loc = self.ctx.loc;
        let saved = std::mem::replace(
            &mut self.ctx,
            DiagContext {
                kind: Some(kind),
                rec_id: Some(rec_id),
                tag,
                src_ref: inherited_src_ref,
                loc: inherited_loc,
            },
        );
        ContextGuard { surface: self, saved }
    }

    pub fn set_src_ref(&mut self, src_ref: SrcId) {
        self.ctx.src_ref = Some(src_ref);
    }

    pub fn set_loc(&mut self, loc: Loc) {
        self.ctx.loc = Some(loc);
    }

    pub fn emit(&mut self, level: Severity, code: impl Into<String>, msg: impl Into<String>) {
        let about = About {
            kind: self.ctx.kind,
            id: self.ctx.rec_id,
            tag: self.ctx.tag.clone(),
        };
        if level > self.max_severity {
            self.max_severity = level;
        }
        self.diagnostics.push(Diagnostic {
            level,
            code: code.into(),
            msg: msg.into(),
            about,
            src_ref: self.ctx.src_ref,
            loc: self.ctx.loc,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.max_severity >= Severity::Error
    }

    pub fn exit_code(&self) -> u8 {
        self.max_severity.exit_code()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Renders a single diagnostic as text, in the `file:line:col: error:
    /// msg` family used by most line-oriented compilers. `source_lines`,
    /// if given, supplies context lines from the original JSONL file
    /// around the diagnostic's line, with `> ` marking the focus line.
    pub fn render_text(&self, diag: &Diagnostic, file: Option<&str>, source_lines: Option<&[(i64, &str)]>) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let line = diag.loc.map(|l| l.line).unwrap_or(0);
        let col = diag.loc.and_then(|l| l.col).unwrap_or(0);
        let file = file.unwrap_or("<input>");
        let level = match diag.level {
            Severity::Internal => "internal error",
            Severity::Toolchain => "toolchain error",
            Severity::Usage => "usage error",
            _ => "error",
        };
        let _ = writeln!(out, "{file}:{line}:{col}: {level}: {}", diag.msg);
        let _ = writeln!(out, "  code: {}", diag.code);
        let _ = write!(out, "  record: k={}", diag.about.kind.unwrap_or("?"));
        if let Some(id) = diag.about.id {
            let _ = write!(out, " id={id}");
        }
        if let Some(tag) = &diag.about.tag {
            let _ = write!(out, " tag={tag}");
        }
        out.push('\n');
        if let Some(lines) = source_lines {
            for (n, text) in lines {
                let marker = if *n == line { "> " } else { "  " };
                let _ = writeln!(out, "{marker}{n} | {text}");
            }
        }
        out
    }

    /// Renders a single diagnostic as the JSON shape used by scripted
    /// consumers: `{ir,k:"diag",level,code,msg,about,src_ref?,loc?}`.
    pub fn render_json(&self, diag: &Diagnostic) -> serde_json::Value {
        serde_json::json!({
            "ir": "sir-v1.0",
            "k": "diag",
            "level": match diag.level {
                Severity::Internal => "internal",
                Severity::Toolchain => "toolchain",
                Severity::Usage => "usage",
                _ => "error",
            },
            "code": diag.code,
            "msg": diag.msg,
            "about": {
                "k": diag.about.kind,
                "id": diag.about.id,
                "tag": diag.about.tag,
            },
            "src_ref": diag.src_ref.map(|s| s.get()),
            "loc": diag.loc.map(|l| serde_json::json!({
                "line": l.line,
                "col": l.col,
                "end_line": l.end_line,
                "end_col": l.end_col,
            })),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_severity_ordering_and_stickiness() {
        let mut d = DiagnosticSurface::new();
        d.emit(Severity::Error, "sircc.schema.x", "bad");
        assert_eq!(d.exit_code(), 1);
        d.emit(Severity::Internal, "sircc.internal.oom", "out of memory");
        assert_eq!(d.exit_code(), 2);
        d.emit(Severity::Error, "sircc.schema.y", "also bad");
        assert_eq!(d.exit_code(), 2, "internal must not be downgraded by a later error");
    }

    #[test]
    fn test_context_push_pop_restores_on_drop() {
        let mut d = DiagnosticSurface::new();
        {
            let _g = d.push_context("node", 5, Some("i32.add".into()));
            d.emit(Severity::Error, "sircc.cfg.x", "inner");
        }
        d.emit(Severity::Error, "sircc.schema.x", "outer");
        let diags = d.diagnostics();
        assert_eq!(diags[0].about.id, Some(5));
        assert_eq!(diags[1].about.id, None);
    }
}
