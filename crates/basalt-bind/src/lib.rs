//! # BASALT Binding
//!
//! Program layouts, resource views and binding slot tables.
//!
//! ```text
//!   ProgramLayout ──▶ BindingSet ──set_view──▶ SlotAllocator
//!                         │                      ├── SharedSlotAllocator
//!                         │                      └── UniqueSlotAllocator
//!                         ▼
//!                      finish(list) ──▶ BindingTable ──▶ CommandList
//! ```
//!
//! The shared allocator refcounts slots and coalesces identical views.
//! The unique allocator places each bind point at the offset the layout
//! assigned it.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod binding_set;
pub mod layout;
pub mod slots;
pub mod table;
pub mod view;

pub use binding_set::{validate_view, BindingSet};
pub use layout::{BindCategory, BindPoint, BindTarget, ProgramLayout};
pub use slots::{
    SharedSlotAllocator, SlotAllocator, SlotConfig, SlotEntry, SlotTable, UniqueSlotAllocator,
    UNASSIGNED,
};
pub use table::{generate_binding_table, BindingTable};
pub use view::{BoundView, BufferView, BufferViewKind, TextureView, CONSTANT_ALIGNMENT, MAX_CONSTANT_SIZE};
