//! Python statements sent to the device.
//!
//! Statements are the wire format: the device executes exactly the text it
//! receives. Every path is embedded as an escaped single-quoted literal so a
//! filename containing quotes or backslashes cannot break out of the string.

use std::fmt;

/// A single Python statement, without line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement(String);

impl Statement {
    /// Wrap raw statement text. The caller is responsible for quoting.
    pub fn raw(text: impl Into<String>) -> Self {
        Statement(text.into())
    }

    /// `import <module>`
    pub fn import(module: &str) -> Self {
        Statement(format!("import {}", module))
    }

    /// Open `path` for text write as `f`.
    pub fn open_write_text(path: &str) -> Self {
        Statement(format!("f = open({}, 'w')", py_str(path)))
    }

    /// Open `path` for binary write as `f`.
    pub fn open_write_binary(path: &str) -> Self {
        Statement(format!("f = open({}, 'wb')", py_str(path)))
    }

    /// Open `path` for binary read as `f`.
    pub fn open_read_binary(path: &str) -> Self {
        Statement(format!("f = open({}, 'rb')", py_str(path)))
    }

    /// `f.close()`
    pub fn close() -> Self {
        Statement("f.close()".to_string())
    }

    /// Write one hex-encoded slice to `f`.
    ///
    /// `hex` must already be hex digits; nothing in it needs escaping.
    pub fn write_hex(hex: &str) -> Self {
        Statement(format!("f.write(binascii.unhexlify('{}'))", hex))
    }

    /// Read up to `n` bytes from `f` and print them hex-encoded.
    pub fn print_hex_chunk(n: usize) -> Self {
        Statement(format!("print(binascii.hexlify(f.read({})).decode())", n))
    }

    /// `os.mkdir(path)`
    pub fn mkdir(path: &str) -> Self {
        Statement(format!("os.mkdir({})", py_str(path)))
    }

    /// `os.rmdir(path)`
    pub fn rmdir(path: &str) -> Self {
        Statement(format!("os.rmdir({})", py_str(path)))
    }

    /// `os.unlink(path)`
    pub fn unlink(path: &str) -> Self {
        Statement(format!("os.unlink({})", py_str(path)))
    }

    /// `os.rename(old, new)`
    pub fn rename(old: &str, new: &str) -> Self {
        Statement(format!("os.rename({}, {})", py_str(old), py_str(new)))
    }

    /// Print the size of `path`.
    pub fn print_size(path: &str) -> Self {
        Statement(format!("print(os.stat({})[6])", py_str(path)))
    }

    /// Call the listing helper defined by [`LS_FUNCTION`].
    pub fn ls(path: &str) -> Self {
        Statement(format!("ls({})", py_str(path)))
    }

    /// Statement text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Statement text with the Normal-mode carriage return appended.
    pub fn to_line(&self) -> String {
        format!("{}\r", self.0)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Listing helper typed into the Normal-mode REPL line by line.
///
/// Prints `fullpath mode size ,` for every entry of `path`. The empty line
/// that closes the block is sent separately.
pub const LS_FUNCTION: &[&str] = &[
    "import os",
    "def ls(path:str):",
    "    for f in os.listdir(path):",
    "        full_name = path + f",
    "        s = os.stat(full_name)",
    "        print(full_name, s[0], s[6], \",\")",
];

/// Quote `s` as a single-quoted Python string literal.
pub fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c),
            c if c.is_ascii() => out.push_str(&format!("\\x{:02x}", c as u32)),
            // `\xNN` is a code point in Python 3, so wider ones need `\u`/`\U`.
            c if (c as u32) <= 0xffff => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push_str(&format!("\\U{:08x}", c as u32)),
        }
    }
    out.push('\'');
    out
}

/// Statements that write `data` into `path`, one hex slice per statement.
///
/// `rate` is the number of hex characters per slice.
pub fn write_file_statements(path: &str, data: &[u8], rate: usize) -> Vec<Statement> {
    let rate = rate.max(2);
    let hex = hex::encode(data);
    let mut statements = vec![Statement::import("binascii"), Statement::open_write_binary(path)];
    let mut start = 0;
    while start < hex.len() {
        let end = (start + rate).min(hex.len());
        statements.push(Statement::write_hex(&hex[start..end]));
        start = end;
    }
    statements.push(Statement::close());
    statements
}

/// Statements that read `size` bytes of `path` in chunks of `rate / 2` bytes.
///
/// Returns the setup statements and the per-chunk statements separately so
/// the caller can check for cancellation between chunks. Chunk statements are
/// produced on demand.
pub fn read_file_statements(path: &str, size: u64, rate: usize) -> (Vec<Statement>, ReadChunks) {
    let chunk = (rate / 2).max(1);
    let setup = vec![Statement::import("binascii"), Statement::open_read_binary(path)];
    let chunks = ReadChunks {
        remaining: size.div_ceil(chunk as u64),
        chunk,
    };
    (setup, chunks)
}

/// Per-chunk read statements, see [`read_file_statements`].
#[derive(Debug, Clone)]
pub struct ReadChunks {
    remaining: u64,
    chunk: usize,
}

impl ReadChunks {
    /// Chunks still to be read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Bytes requested per chunk.
    pub fn chunk_len(&self) -> usize {
        self.chunk
    }
}

impl Iterator for ReadChunks {
    type Item = Statement;

    fn next(&mut self) -> Option<Statement> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(Statement::print_hex_chunk(self.chunk))
    }
}

/// Group statements into raw-paste batches joined by `\r\n`.
pub fn batch_statements(statements: &[Statement], per_batch: usize) -> Vec<String> {
    statements
        .chunks(per_batch.max(1))
        .map(|group| {
            group
                .iter()
                .map(Statement::as_str)
                .collect::<Vec<_>>()
                .join("\r\n")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_py_str_escapes_quotes_and_backslashes() {
        assert_eq!(py_str("/main.py"), "'/main.py'");
        assert_eq!(py_str("it's"), r"'it\'s'");
        assert_eq!(py_str(r"a\b"), r"'a\\b'");
        assert_eq!(py_str("x\ny"), r"'x\ny'");
        assert_eq!(py_str("\x07"), r"'\x07'");
    }

    #[test]
    fn test_py_str_non_ascii_uses_code_points() {
        assert_eq!(py_str("/é.py"), r"'/\u00e9.py'");
        assert_eq!(py_str("日本"), r"'\u65e5\u672c'");
        assert_eq!(py_str("🐍"), r"'\U0001f40d'");
        assert_eq!(Statement::unlink("/é.py").as_str(), r"os.unlink('/\u00e9.py')");
    }

    #[test]
    fn test_statement_text() {
        assert_eq!(Statement::mkdir("/lib").as_str(), "os.mkdir('/lib')");
        assert_eq!(
            Statement::rename("/a.py", "/b.py").as_str(),
            "os.rename('/a.py', '/b.py')"
        );
        assert_eq!(Statement::unlink("/a.py").to_line(), "os.unlink('/a.py')\r");
        assert_eq!(
            Statement::open_write_text("/o'k").as_str(),
            r"f = open('/o\'k', 'w')"
        );
    }

    #[test]
    fn test_write_file_statements_slices() {
        let data = vec![0xABu8; 600];
        let statements = write_file_statements("/x.bin", &data, 256);
        // import + open + ceil(1200 / 256) writes + close
        assert_eq!(statements.len(), 2 + 5 + 1);
        assert_eq!(statements[0].as_str(), "import binascii");
        assert_eq!(statements[1].as_str(), "f = open('/x.bin', 'wb')");
        assert!(statements[2].as_str().starts_with("f.write(binascii.unhexlify('abab"));
        assert_eq!(statements.last().unwrap().as_str(), "f.close()");
    }

    #[test]
    fn test_write_file_statements_empty() {
        let statements = write_file_statements("/empty", &[], 256);
        assert_eq!(statements.len(), 3);
    }

    #[test]
    fn test_read_file_statements() {
        let (setup, chunks) = read_file_statements("/x.bin", 300, 256);
        assert_eq!(setup.len(), 2);
        assert_eq!(chunks.remaining(), 3);
        let chunks: Vec<Statement> = chunks.collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[0].as_str(),
            "print(binascii.hexlify(f.read(128)).decode())"
        );

        let (_, mut none) = read_file_statements("/x.bin", 0, 256);
        assert!(none.next().is_none());
    }

    #[test]
    fn test_read_file_statements_huge_size_is_lazy() {
        let (_, mut chunks) = read_file_statements("/x.bin", u64::MAX, 256);
        assert_eq!(chunks.remaining(), u64::MAX.div_ceil(128));
        assert!(chunks.next().is_some());
        assert_eq!(chunks.remaining(), u64::MAX.div_ceil(128) - 1);
    }

    #[test]
    fn test_batch_statements() {
        let statements: Vec<Statement> = (0..5).map(|i| Statement::raw(format!("s{}", i))).collect();
        let batches = batch_statements(&statements, 2);
        assert_eq!(batches, vec!["s0\r\ns1", "s2\r\ns3", "s4"]);
    }
}
