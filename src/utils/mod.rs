//! Internal data structures.

pub mod ring_buffer;
