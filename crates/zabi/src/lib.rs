//! zABI core: the process-wide handle table, the capability registry
//! opened against it, and the guest/host memory-mapping hook that
//! capabilities use to exchange buffers with guest code.

pub mod cap;
pub mod handle;
pub mod mmap;

pub use cap::{CapabilityError, CapabilityFactory, CapabilityRegistry};
pub use handle::{global_table, HandleError, HandleFlags, HandleOps, HandleTable, PollOps, RESERVED_HANDLES, TABLE_CAPACITY};
pub use mmap::{FlatMmap, MmapError, MmapHook};
