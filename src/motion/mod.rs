//! Edge-triggered motion lifecycle derived from done-move and readback updates.

pub mod event;
pub mod tracker;

pub use event::{CompletionSnapshot, Direction, MotionEvent};
pub use tracker::MotionTracker;
