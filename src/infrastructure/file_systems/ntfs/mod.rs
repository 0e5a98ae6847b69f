//! NTFS interpreter
//!
//! NTFS keeps every file in the Master File Table. Deleting a file only
//! clears the in-use flag of its record, so names and data runs survive
//! until the record is reused.

mod boot_sector;
mod mft;
mod parser;

pub use boot_sector::NtfsBootSector;
pub use mft::{DataAttribute, DataRun, FileName, MftRecord, apply_fixups, decode_data_runs};
pub use parser::NtfsInterpreter;
