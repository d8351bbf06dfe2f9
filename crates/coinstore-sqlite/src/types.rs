//! Value encoding and decoding between the store's value model and
//! SQLite's five storage classes.
//!
//! Booleans are stored as INTEGER 0/1, characters as single-character
//! TEXT and dates as ISO-8601 TEXT (`YYYY-MM-DD`). Everything else maps
//! directly onto INTEGER, REAL, TEXT or BLOB.

use std::ffi::{CStr, c_int};

use coinstore_core::Value;
use coinstore_core::value::format_iso_date;
use libsqlite3_sys as ffi;

/// Bind a value to a prepared statement parameter.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub unsafe fn bind_value(stmt: *mut ffi::sqlite3_stmt, index: c_int, value: &Value) -> c_int {
    match value {
        Value::Null => unsafe { ffi::sqlite3_bind_null(stmt, index) },

        Value::Bool(b) => unsafe { ffi::sqlite3_bind_int(stmt, index, i32::from(*b)) },

        Value::Int(v) => unsafe { ffi::sqlite3_bind_int(stmt, index, *v) },

        Value::BigInt(v) => unsafe { ffi::sqlite3_bind_int64(stmt, index, *v) },

        Value::Double(v) => unsafe { ffi::sqlite3_bind_double(stmt, index, *v) },

        Value::Char(c) => {
            let mut buf = [0u8; 4];
            let s = c.encode_utf8(&mut buf);
            unsafe { bind_text(stmt, index, s) }
        }

        Value::Text(s) => unsafe { bind_text(stmt, index, s) },

        Value::Date(days) => unsafe { bind_text(stmt, index, &format_iso_date(*days)) },

        Value::Bytes(b) => unsafe {
            ffi::sqlite3_bind_blob(
                stmt,
                index,
                b.as_ptr().cast(),
                b.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            )
        },
    }
}

unsafe fn bind_text(stmt: *mut ffi::sqlite3_stmt, index: c_int, s: &str) -> c_int {
    let bytes = s.as_bytes();
    unsafe {
        ffi::sqlite3_bind_text(
            stmt,
            index,
            bytes.as_ptr().cast(),
            bytes.len() as c_int,
            ffi::SQLITE_TRANSIENT(),
        )
    }
}

/// Read a column value from a result row.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that has just returned `SQLITE_ROW`
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    let col_type = unsafe { ffi::sqlite3_column_type(stmt, index) };

    match col_type {
        ffi::SQLITE_NULL => Value::Null,

        ffi::SQLITE_INTEGER => {
            let v = unsafe { ffi::sqlite3_column_int64(stmt, index) };
            // Smallest representation that holds the value; typed reads
            // on Row widen back as needed.
            if v >= i64::from(i32::MIN) && v <= i64::from(i32::MAX) {
                Value::Int(v as i32)
            } else {
                Value::BigInt(v)
            }
        }

        ffi::SQLITE_FLOAT => {
            let v = unsafe { ffi::sqlite3_column_double(stmt, index) };
            Value::Double(v)
        }

        ffi::SQLITE_TEXT => {
            let ptr = unsafe { ffi::sqlite3_column_text(stmt, index) };
            let len = unsafe { ffi::sqlite3_column_bytes(stmt, index) };
            if ptr.is_null() {
                Value::Null
            } else {
                let slice = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize) };
                Value::Text(String::from_utf8_lossy(slice).into_owned())
            }
        }

        ffi::SQLITE_BLOB => {
            let ptr = unsafe { ffi::sqlite3_column_blob(stmt, index) };
            let len = unsafe { ffi::sqlite3_column_bytes(stmt, index) };
            if ptr.is_null() || len == 0 {
                Value::Bytes(Vec::new())
            } else {
                let slice = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len as usize) };
                Value::Bytes(slice.to_vec())
            }
        }

        _ => Value::Null,
    }
}

/// Get a result column's name.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    let ptr = unsafe { ffi::sqlite3_column_name(stmt, index) };
    if ptr.is_null() {
        None
    } else {
        unsafe { CStr::from_ptr(ptr) }
            .to_str()
            .ok()
            .map(String::from)
    }
}
