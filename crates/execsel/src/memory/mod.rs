//! Operand memory model: element types, shapes, layouts, descriptors, buffers and reorders.

mod buffer;
mod desc;
mod dtype;
mod layout;
pub mod reorder;
mod shape;

pub(crate) use buffer::required_bytes;
pub use buffer::{Memory, MemoryArgs, MemoryPtr};
pub use desc::{ArgPort, DescsDisplay, MemoryDesc, MemoryDescArgs};
pub use dtype::DType;
pub use layout::LayoutTag;
pub use reorder::{reorder, ReorderError};
pub use shape::{Dim, Shape};
