use fxhash::FxHashMap;

/// One of the four disjoint id namespaces a program's records live in.
/// Each namespace gets its own interner instance; a `SrcId` and a `SymId`
/// with the same numeric value refer to unrelated records.
macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(i64);

        impl $name {
            pub fn from_raw(v: i64) -> Self {
                Self(v)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

newtype_id!(SrcId);
newtype_id!(SymId);
newtype_id!(TypeId);
newtype_id!(NodeId);

/// Interns record ids for a single namespace.
///
/// A record's id in the JSONL text is either a JSON integer, used
/// verbatim as the internal id, or a JSON string, hashed and assigned
/// the next unused internal id the first time it's seen. The same
/// string always maps to the same internal id within one interner;
/// repeat occurrences are idempotent. Integer ids and string ids never
/// collide: every explicit integer id permanently reserves that value,
/// and string ids are assigned by walking `next_id` forward past any
/// value already reserved that way.
///
/// Grounded on `compiler_ids.c`'s `id_pool`: an FNV-1a64 open-addressed
/// table there, growing at load factor 0.7. Rust's `FxHashMap` plays the
/// same role; the identity and disjointness guarantees are preserved
/// even though the hash function and table implementation differ.
pub struct Interner<'a, Id> {
    by_str: FxHashMap<&'a str, Id>,
    reserved_ints: std::collections::HashSet<i64>,
    reverse: Vec<Option<&'a str>>,
    next_id: i64,
    _marker: std::marker::PhantomData<Id>,
}

impl<'a, Id> Interner<'a, Id>
where
    Id: Copy,
{
    pub fn new() -> Self {
        Self {
            by_str: FxHashMap::default(),
            reserved_ints: std::collections::HashSet::default(),
            reverse: Vec::new(),
            next_id: 1,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<'a, Id> Interner<'a, Id>
where
    Id: Copy + IdNewtype,
{
    /// Reserves an explicit integer id, as seen verbatim in a record's
    /// `id` field. Bumps `next_id` past it if needed so a later string
    /// intern never reassigns the same value.
    pub fn reserve_int(&mut self, raw: i64) -> Id {
        self.reserved_ints.insert(raw);
        if raw >= self.next_id {
            self.next_id = raw + 1;
        }
        Id::from_raw(raw)
    }

    /// Interns a string id, assigning it a fresh internal id the first
    /// time it's seen and returning the same id on every later call with
    /// an equal string.
    pub fn intern_str(&mut self, s: &'a str) -> Id {
        if let Some(id) = self.by_str.get(s) {
            return *id;
        }
        let mut candidate = self.next_id;
        while self.reserved_ints.contains(&candidate) {
            candidate += 1;
        }
        self.next_id = candidate + 1;
        self.reserved_ints.insert(candidate);
        let id = Id::from_raw(candidate);
        self.by_str.insert(s, id);
        self.set_reverse(candidate, s);
        id
    }

    fn set_reverse(&mut self, raw: i64, s: &'a str) {
        let idx = (raw - 1) as usize;
        if idx >= self.reverse.len() {
            self.reverse.resize(idx + 1, None);
        }
        self.reverse[idx] = Some(s);
    }

    /// Reverse lookup: the original string an id was interned from, or
    /// `None` if the id came from a bare integer (no string ever mapped
    /// to it).
    pub fn id_str_for_internal(&self, id: Id) -> Option<&'a str> {
        let idx = (id.get() - 1) as usize;
        self.reverse.get(idx).copied().flatten()
    }

    /// Read-only counterpart to `intern_str`: looks up a string id
    /// without assigning one if absent. Used by the validator to resolve
    /// `{t:"ref", id}` fields against ids already interned at parse
    /// time, where creating a new id for an unseen string would mask a
    /// dangling reference instead of reporting it.
    pub fn lookup_str(&self, s: &str) -> Option<Id> {
        self.by_str.get(s).copied()
    }
}

pub trait IdNewtype {
    fn from_raw(v: i64) -> Self;
    fn get(self) -> i64;
}

macro_rules! impl_id_newtype {
    ($name:ident) => {
        impl IdNewtype for $name {
            fn from_raw(v: i64) -> Self {
                $name::from_raw(v)
            }
            fn get(self) -> i64 {
                $name::get(self)
            }
        }
    };
}

impl_id_newtype!(SrcId);
impl_id_newtype!(SymId);
impl_id_newtype!(TypeId);
impl_id_newtype!(NodeId);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_integer_ids_preserved_verbatim() {
        let mut it: Interner<SymId> = Interner::new();
        let id = it.reserve_int(42);
        assert_eq!(id.get(), 42);
    }

    #[test]
    fn test_string_ids_idempotent() {
        let mut it: Interner<SymId> = Interner::new();
        let a = it.intern_str("foo");
        let b = it.intern_str("foo");
        assert_eq!(a, b);
        let c = it.intern_str("bar");
        assert_ne!(a, c);
    }

    #[test]
    fn test_string_ids_do_not_collide_with_reserved_ints() {
        let mut it: Interner<SymId> = Interner::new();
        let reserved = it.reserve_int(1);
        let interned = it.intern_str("x");
        assert_ne!(reserved.get(), interned.get());
        assert_eq!(interned.get(), 2);
    }

    #[test]
    fn test_reverse_lookup() {
        let mut it: Interner<SymId> = Interner::new();
        let id = it.intern_str("hello");
        assert_eq!(it.id_str_for_internal(id), Some("hello"));

        let int_id = it.reserve_int(99);
        assert_eq!(it.id_str_for_internal(int_id), None);
    }

    #[quickcheck_macros::quickcheck]
    fn qc_interning_same_string_twice_yields_same_id(s: String) -> bool {
        if s.is_empty() {
            return true;
        }
        let leaked: &'static str = Box::leak(s.into_boxed_str());
        let mut it: Interner<SymId> = Interner::new();
        let a = it.intern_str(leaked);
        let b = it.intern_str(leaked);
        a == b
    }
}
