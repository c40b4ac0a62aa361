//! The SIR frontend: JSONL record parsing, id interning, record tables,
//! and the diagnostic surface shared by the validator and dispatcher.

pub mod diag;
pub mod gate;
pub mod ids;
pub mod instr;
pub mod parse;
pub mod records;

pub use diag::{About, Diagnostic, DiagnosticSurface, Severity};
pub use gate::{feature_dependency, mnemonic_extra_feature, required_feature};
pub use ids::{IdNewtype, Interner, NodeId, SrcId, SymId, TypeId};
pub use parse::{parse_program, Program};
pub use records::{
    DuplicateIdError, Loc, NodeRecord, OpaqueRecord, PrimType, RecordTables, SourceRecord, SparseTable,
    SymbolRecord, TypeKind, TypeRecord,
};
