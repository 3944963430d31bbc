//! RESP request serializer.
//!
//! Every request goes out as a multibulk of bulk strings:
//! `*<N>\r\n$<len>\r\narg1\r\n$<len>\r\narg2\r\n…`
//! Lengths are byte counts of the encoded argument, never character counts.

use bytes::{BufMut, Bytes, BytesMut};
use itoa::Buffer;

/// Encode a request from raw argument slices.
///
/// Each argument is written as a binary-safe bulk string.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut cap = header_len();
    for arg in args {
        cap += bulk_len(arg.len());
    }

    let mut buf = Vec::with_capacity(cap);
    let mut itoa_buf = Buffer::new();

    buf.push(b'*');
    buf.extend_from_slice(itoa_buf.format(args.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");
    for arg in args {
        buf.push(b'$');
        buf.extend_from_slice(itoa_buf.format(arg.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

/// Encode a request from string arguments (UTF-8).
pub fn encode_command_str(args: &[&str]) -> Vec<u8> {
    let byte_args: Vec<&[u8]> = args.iter().map(|s| s.as_bytes()).collect();
    encode_command(&byte_args)
}

/// Append one request to `buf`.
///
/// A multi-word command name such as `OBJECT IDLETIME` is split on spaces
/// and each word becomes its own leading bulk string.
pub fn encode_into(buf: &mut BytesMut, name: &str, args: &[Bytes]) {
    let words = name.split(' ').filter(|w| !w.is_empty());
    let word_count = words.clone().count();

    let mut cap = header_len();
    for w in words.clone() {
        cap += bulk_len(w.len());
    }
    for arg in args {
        cap += bulk_len(arg.len());
    }
    buf.reserve(cap);

    let mut itoa_buf = Buffer::new();
    buf.put_u8(b'*');
    buf.put_slice(itoa_buf.format(word_count + args.len()).as_bytes());
    buf.put_slice(b"\r\n");
    for w in words {
        put_bulk(buf, &mut itoa_buf, w.as_bytes());
    }
    for arg in args {
        put_bulk(buf, &mut itoa_buf, arg);
    }
}

/// Exact number of bytes `encode_into` will append.
pub fn encoded_len(name: &str, args: &[Bytes]) -> usize {
    let mut itoa_buf = Buffer::new();
    let mut count = 0usize;
    let mut total = 0usize;
    for w in name.split(' ').filter(|w| !w.is_empty()) {
        count += 1;
        total += 1 + itoa_buf.format(w.len()).len() + 2 + w.len() + 2;
    }
    for arg in args {
        count += 1;
        total += 1 + itoa_buf.format(arg.len()).len() + 2 + arg.len() + 2;
    }
    total + 1 + itoa_buf.format(count).len() + 2
}

fn put_bulk(buf: &mut BytesMut, itoa_buf: &mut Buffer, data: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(itoa_buf.format(data.len()).as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

// '*' or '$' + max_digits(usize) + \r\n
const fn header_len() -> usize {
    1 + 20 + 2
}

const fn bulk_len(data: usize) -> usize {
    header_len() + data + 2
}

// ── Tests ──────────────────────────────────────────────────────────
