//! SQLite driver for the coinstore engine.
//!
//! Implements the `Connection`, `RowStream` and `Connector` traits from
//! coinstore-core over FFI to libsqlite3. File-backed and in-memory
//! databases are supported; connections are opened in serialized mode and
//! guarded by a mutex so row streams can outlive the call that created them.
//!
//! # Type mapping
//!
//! | Store value | SQLite storage |
//! |-------------|----------------|
//! | `Bool` | INTEGER (0/1) |
//! | `Char` | TEXT (one character) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text` | TEXT |
//! | `Date` | TEXT (ISO-8601) |
//! | `Bytes` | BLOB |

// FFI bindings require unsafe code and C-sized casts.
#![allow(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]

pub mod connection;
pub mod types;

pub use connection::{SqliteConfig, SqliteConnection, SqliteConnector, SqliteRowStream};

/// The linked SQLite library version.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        let ptr = libsqlite3_sys::sqlite3_libversion();
        std::ffi::CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_sqlite_3() {
        assert!(sqlite_version().starts_with('3'));
    }
}
