use sir_arena::JsonValue;

use crate::ids::{NodeId, SrcId, SymId, TypeId};

/// A location reference, tying a record or node back to one or more
/// `src` records. `end_line`/`end_col` are either both present or both
/// absent.
#[derive(Clone, Copy, Debug)]
pub struct Loc {
    pub line: i64,
    pub col: Option<i64>,
    pub end_line: Option<i64>,
    pub end_col: Option<i64>,
}

#[derive(Clone, Copy, Debug)]
pub struct SourceRecord<'a> {
    pub id: SrcId,
    pub file: Option<&'a str>,
    pub line: i64,
    pub col: Option<i64>,
    pub end_line: Option<i64>,
    pub end_col: Option<i64>,
    pub text: Option<&'a str>,
}

#[derive(Clone, Copy, Debug)]
pub struct SymbolRecord<'a> {
    pub id: SymId,
    pub name: &'a str,
    pub kind: &'a str,
    pub linkage: Option<&'a str>,
    pub type_ref: Option<TypeId>,
    pub attrs: Option<JsonValue<'a>>,
    pub src_ref: Option<SrcId>,
    pub loc: Option<Loc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimType {
    I1,
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
}

impl PrimType {
    pub fn from_name(s: &str) -> Option<Self> {
        Some(match s {
            "i1" => PrimType::I1,
            "bool" => PrimType::Bool,
            "i8" => PrimType::I8,
            "i16" => PrimType::I16,
            "i32" => PrimType::I32,
            "i64" => PrimType::I64,
            "f32" => PrimType::F32,
            "f64" => PrimType::F64,
            "ptr" => PrimType::Ptr,
            _ => return None,
        })
    }

    /// Byte size used by `vec.bitcast`'s size-match check and similar.
    pub fn byte_size(self) -> u32 {
        match self {
            PrimType::I1 | PrimType::Bool | PrimType::I8 => 1,
            PrimType::I16 => 2,
            PrimType::I32 | PrimType::F32 => 4,
            PrimType::I64 | PrimType::F64 | PrimType::Ptr => 8,
        }
    }
}

/// A type's shape, discriminated by its `kind` field. `Vec`, `Fun`,
/// `Closure` and `Sum` are reserved for the corresponding feature gates;
/// `Vec` is given a concrete shape since the validator's SIMD checks
/// need one, while `Fun`/`Closure`/`Sum` are kept opaque (their
/// payloads are consumed only by the excluded lowering backends).
#[derive(Clone, Copy, Debug)]
pub enum TypeKind<'a> {
    Prim(PrimType),
    Ptr { of: TypeId },
    Array { of: TypeId, len: i64 },
    Fn { params: &'a [TypeId], ret: TypeId, varargs: bool },
    Vec { of: TypeId, lanes: i64 },
    Reserved { kind: &'a str, raw: JsonValue<'a> },
}

#[derive(Clone, Copy, Debug)]
pub struct TypeRecord<'a> {
    pub id: TypeId,
    pub kind: TypeKind<'a>,
}

/// A node record. `fields` carries per-mnemonic arguments as a raw JSON
/// object; the validator and (excluded) lowering backends interpret it
/// according to `tag`, since there's no single Rust shape that fits
/// every mnemonic's argument list.
#[derive(Clone, Copy, Debug)]
pub struct NodeRecord<'a> {
    pub id: NodeId,
    pub tag: &'a str,
    pub type_ref: Option<TypeId>,
    pub fields: Option<JsonValue<'a>>,
}

/// Error returned when a record parser tries to insert a second record
/// under an id already occupied within the same table.
#[derive(Debug, thiserror::Error)]
#[error("duplicate id {id} in {table} table")]
pub struct DuplicateIdError {
    pub table: &'static str,
    pub id: i64,
}

/// A dense, `Option`-slotted table keyed by internal id (1-based); the
/// natural Rust shape for the "sparse array of record-or-tombstone"
/// design called for in place of the original's manually managed,
/// reallocated slabs.
pub struct SparseTable<T> {
    name: &'static str,
    slots: Vec<Option<T>>,
}

impl<T> SparseTable<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, slots: Vec::new() }
    }

    pub fn insert(&mut self, id: i64, value: T) -> Result<(), DuplicateIdError> {
        let idx = (id - 1) as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        if self.slots[idx].is_some() {
            return Err(DuplicateIdError { table: self.name, id });
        }
        self.slots[idx] = Some(value);
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<&T> {
        self.slots.get((id - 1) as usize)?.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every record table a parsed program owns, one per namespace plus the
/// structurally-opaque `ext`/`label`/`instr`/`dir` kinds whose consuming
/// backends are excluded from this crate's scope.
pub struct RecordTables<'a> {
    pub sources: SparseTable<SourceRecord<'a>>,
    pub symbols: SparseTable<SymbolRecord<'a>>,
    pub types: SparseTable<TypeRecord<'a>>,
    pub nodes: SparseTable<NodeRecord<'a>>,
    pub opaque: Vec<OpaqueRecord<'a>>,
}

/// An `ext` / `label` / `instr` / `dir` record, kept verbatim for the
/// (excluded) backend that ultimately consumes it; this crate validates
/// only the shared record schema, not these kinds' internal semantics.
#[derive(Clone, Copy, Debug)]
pub struct OpaqueRecord<'a> {
    pub kind: &'a str,
    pub raw: JsonValue<'a>,
}

impl<'a> Default for RecordTables<'a> {
    fn default() -> Self {
        Self {
            sources: SparseTable::new("src"),
            symbols: SparseTable::new("sym"),
            types: SparseTable::new("type"),
            nodes: SparseTable::new("node"),
            opaque: Vec::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sparse_table_rejects_duplicates() {
        let mut t: SparseTable<i64> = SparseTable::new("test");
        t.insert(3, 100).unwrap();
        assert_eq!(t.get(3), Some(&100));
        assert!(t.insert(3, 200).is_err());
    }

    #[test]
    fn test_sparse_table_sparse_growth() {
        let mut t: SparseTable<i64> = SparseTable::new("test");
        t.insert(5, 50).unwrap();
        assert_eq!(t.get(1), None);
        assert_eq!(t.get(5), Some(&50));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_prim_byte_sizes() {
        assert_eq!(PrimType::I1.byte_size(), 1);
        assert_eq!(PrimType::I64.byte_size(), 8);
        assert_eq!(PrimType::Ptr.byte_size(), 8);
    }
}
