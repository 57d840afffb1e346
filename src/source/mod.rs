pub mod reader;
pub mod scanner;

pub use reader::{source_identity, LogFileReader, RawLine, ReaderError};
pub use scanner::{scan_directory, FileKind, FilePatterns, LogFile, ScanError};
