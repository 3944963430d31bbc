use bytes::Bytes;

/// RESP2 reply values.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    ///
    /// Only appears nested inside arrays (e.g. per-command errors in a
    /// batch reply). A top-level error line is surfaced as `Error::Redis`.
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// *2\r\n…
    Array(Vec<RespValue>),
    /// $-1\r\n  or  *-1\r\n
    Null,
}

// ── Convenience accessors ──────────────────────────────────────────

impl RespValue {
    /// Try to interpret this value as a UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::SimpleString(s) => Some(s),
            Self::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to interpret this value as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::BulkString(b) => Some(b),
            Self::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to interpret this value as i64.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to interpret this value as an array (consumes self).
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Returns true when this value represents null / nil.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true when this is a server error line.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns the type name as a static string (useful for error messages).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple_string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk_string",
            Self::Array(_) => "array",
            Self::Null => "null",
        }
    }
}

/// Human-readable name for a reply tag byte.
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        b'+' => "status",
        b'-' => "error",
        b':' => "integer",
        b'$' => "bulk",
        b'*' => "multibulk",
        _ => "unknown",
    }
}

// ── Tests ──────────────────────────────────────────────────────────
