//! FAT12/16/32 interpreter

mod boot_sector;
mod directory;
mod parser;

pub use boot_sector::FatBootSector;
pub use directory::{DirEntry, parse_directory, short_name_checksum};
pub use parser::FatInterpreter;
