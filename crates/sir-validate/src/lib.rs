//! The program validator: feature-dependency checks, type
//! well-formedness, node feature gates, CFG discipline, and SIMD
//! semantic checks, plus the backend dispatch contract the (excluded)
//! LLVM/ZASM/interpreter backends are driven through.

mod backend;
mod cfg;
mod checks;
mod refs;
mod simd;

pub use backend::{Backend, Dispatcher, RecordingBackend};

use sir_ir::Program;

/// The validation passes, in the order the validator runs them. Exposed
/// so tests can assert on ordering directly rather than inferring it
/// from diagnostic output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidatePass {
    FeatureDependency,
    TypeWellFormedness,
    NodeFeatureGates,
    Cfg,
    Simd,
}

pub const PASS_ORDER: &[ValidatePass] = &[
    ValidatePass::FeatureDependency,
    ValidatePass::TypeWellFormedness,
    ValidatePass::NodeFeatureGates,
    ValidatePass::Cfg,
    ValidatePass::Simd,
];

/// A `Program` that has been run through every validation pass. Holding
/// this type is not proof of a clean run — the program's diagnostic
/// surface may carry errors from any pass — but it is the handle the
/// backend dispatcher accepts, since lowering needs the fully parsed
/// record tables regardless of whether earlier records were rejected.
pub struct ValidatedProgram<'p, 'a> {
    pub program: &'p Program<'a>,
}

/// Runs every validation pass over `program` in `PASS_ORDER`, recording
/// failures on `program.diags`. Always completes and returns a view
/// over the program; callers must check `program.diags.has_errors()`
/// before handing the result to a backend.
pub fn validate<'a>(program: &mut Program<'a>) -> ValidatedProgram<'_, 'a> {
    checks::feature_dependency_check(&program.features, &mut program.diags);
    checks::type_wellformedness_check(&program.tables, &program.features, &mut program.diags);
    checks::node_feature_gates_check(&program.tables, &program.features, &mut program.diags);
    cfg::cfg_validation(&program.tables, &program.node_ids, &mut program.diags);
    simd::simd_semantic_checks(&program.tables, &program.node_ids, &program.features, &mut program.diags);
    ValidatedProgram { program }
}
