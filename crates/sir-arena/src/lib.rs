//! Arena allocation and the lazily-parsed JSON value tree shared by the
//! rest of the sircc workspace.
//!
//! Documents are built on the heap using a bump allocator; re-export the
//! concrete allocator type, since most clients don't care which crate
//! `Bump` comes from.
pub use bumpalo::Bump as Arena;

mod bump_str;
pub use bump_str::BumpStr;

mod bump_vec;
pub use bump_vec::BumpVec;

mod value;
pub use value::{JsonValue, ObjectEntry};

mod parser;
pub use parser::{parse_line, ParseError};

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sizes() {
        // BumpStr and BumpVec are thin 8-byte handles onto arena memory,
        // keeping JsonValue small despite the recursive Array/Object variants.
        assert_eq!(std::mem::size_of::<BumpStr>(), 8);
        assert_eq!(std::mem::size_of::<BumpVec<bool>>(), 8);
    }
}
