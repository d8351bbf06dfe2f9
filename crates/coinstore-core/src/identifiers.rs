//! SQL identifier quoting and sanitization utilities.

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
/// This function is safe against SQL injection for any input string.
///
/// # Examples
///
/// ```
/// use coinstore_core::quote_ident;
///
/// assert_eq!(quote_ident("finance_account"), "\"finance_account\"");
/// assert_eq!(quote_ident("select"), "\"select\""); // SQL keyword
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backtick quoting.
///
/// Embedded backticks are escaped by doubling them.
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Sanitize a SQL identifier by removing non-alphanumeric/underscore
/// characters.
///
/// Use this where quoting is not possible (PRAGMA commands). Strips
/// offending characters rather than erroring.
#[inline]
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ansi_quoting() {
        assert_eq!(quote_ident("finance_entry"), "\"finance_entry\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident(""), "\"\"");
    }

    #[test]
    fn mysql_quoting() {
        assert_eq!(quote_ident_mysql("finance_entry"), "`finance_entry`");
        assert_eq!(quote_ident_mysql("a`b"), "`a``b`");
    }

    #[test]
    fn sanitize_strips_everything_unsafe() {
        assert_eq!(sanitize_identifier("finance_account"), "finance_account");
        assert_eq!(
            sanitize_identifier("x; DROP TABLE secrets; --"),
            "xDROPTABLEsecrets"
        );
        assert_eq!(sanitize_identifier("!@#"), "");
    }
}
