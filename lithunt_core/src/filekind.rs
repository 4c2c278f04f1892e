//! File-kind and file-location tags for subject artefacts.

use iota::iota;
use std::path::Path;

/// Bitset of file kinds; instructions and the normaliser match on these.
pub type Kind = u32;

iota! {
    pub const LITMUS: Kind = 1 << (iota);
    , TRACE
    , C_SRC
    , C_HEADER
    , OBJ
    , BIN
    , LOG
    , OTHER
}

/// Matches any kind.
pub const ANY: Kind = LITMUS | TRACE | C_SRC | C_HEADER | OBJ | BIN | LOG | OTHER;

/// Guesses the kind of a file from its extension.
pub fn guess_from_path(path: &Path) -> Kind {
    match path.extension().and_then(|e| e.to_str()) {
        Some("litmus") => LITMUS,
        Some("trace") => TRACE,
        Some("c") => C_SRC,
        Some("h") => C_HEADER,
        Some("o") => OBJ,
        Some("log") | Some("txt") => LOG,
        Some(_) => OTHER,
        // No extension usually means a compiled binary.
        None => BIN,
    }
}

pub fn matches(kind: Kind, want: Kind) -> bool {
    kind & want != 0
}

/// Where in the subject's lifecycle a file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Location {
    OrigLitmus,
    FuzzLitmus,
    FuzzTrace,
    CompileBin,
    CompileLog,
    Harness,
}
