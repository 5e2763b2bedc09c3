//! Memory management.
//!
//! # Components
//!
//! - **FramePool**: bounded pool of zeroed physical frames
//! - **AddressSpace**: per-process page mappings with user permissions

mod frame;
mod page_table;

pub use frame::{Frame, FramePool};
pub use page_table::{AddressSpace, PteFlags};
