//! Filesystem adapter for flowmesh.
//!
//! Input discovery ([`fs::glob_paths`], [`fs::collect_input`]), transparent
//! compressed byte streams ([`compression`]), and the worker-partitioned
//! line reader ([`line_reader::LinePartition`]) behind ReadLines-style
//! operators.

pub mod compression;
pub mod fs;
pub mod line_reader;

pub use compression::CompressionKind;
pub use fs::{collect_input, file_size, glob_paths, open_for_read, open_for_write, InputFile};
pub use line_reader::{LinePartition, LineRange};
