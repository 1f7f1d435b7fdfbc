//! Captured `print`/`puts`/`p` output.
//!
//! A growable byte buffer reachable from the guest-side output overrides
//! through the session's user-data sidechannel (see `session.rs`). Growth is
//! geometric starting at 256 bytes; a NUL byte is always kept one past the
//! logical length so the buffer can be handed to C-style consumers as a
//! bounded string without a copy.

const INITIAL_CAPACITY: usize = 256;

/// Growable, binary-safe output buffer for one session.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    bytes: Vec<u8>,
}

impl OutputBuffer {
    /// Creates an empty buffer with no allocation yet.
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Clears the buffer's length while keeping its capacity, so repeated
    /// `eval` calls do not re-allocate on every run.
    pub fn reset(&mut self) {
        self.bytes.clear();
    }

    /// Appends raw bytes, growing capacity geometrically from a 256-byte
    /// floor.
    pub fn append(&mut self, data: &[u8]) {
        let needed = self.bytes.len() + data.len();
        if needed > self.bytes.capacity() {
            let mut new_cap = self.bytes.capacity().max(INITIAL_CAPACITY);
            while new_cap < needed {
                new_cap *= 2;
            }
            self.bytes.reserve(new_cap - self.bytes.len());
        }
        self.bytes.extend_from_slice(data);
    }

    /// `print`: appends each argument's string form with no separator.
    pub fn print(&mut self, args: &[String]) {
        for a in args {
            self.append(a.as_bytes());
        }
    }

    /// `puts`: one line per argument (arrays recurse one level, appending a
    /// line per element), a trailing newline is added only when the
    /// argument didn't already end with one; no arguments means a single
    /// blank line.
    pub fn puts(&mut self, args: &[PutsArg]) {
        if args.is_empty() {
            self.append(b"\n");
            return;
        }
        for arg in args {
            self.puts_one(arg);
        }
    }

    fn puts_one(&mut self, arg: &PutsArg) {
        match arg {
            PutsArg::Scalar(s) => {
                self.append(s.as_bytes());
                if !s.ends_with('\n') {
                    self.append(b"\n");
                }
            }
            PutsArg::Array(items) => {
                if items.is_empty() {
                    self.append(b"\n");
                } else {
                    for item in items {
                        self.puts_one(item);
                    }
                }
            }
        }
    }

    /// `p`: one `inspect` string per argument, each followed by a newline.
    pub fn p(&mut self, inspects: &[String]) {
        for s in inspects {
            self.append(s.as_bytes());
            self.append(b"\n");
        }
    }

    /// Returns the captured bytes as a lossily-decoded `String` for the
    /// Rust-facing facade.
    pub fn take_lossy(&mut self) -> String {
        let s = String::from_utf8_lossy(&self.bytes).into_owned();
        s
    }

    /// Raw byte view, for the FFI layer.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One argument to `puts`, already classified as scalar-stringified or
/// array (one level of recursion, one line per element).
#[derive(Debug, Clone)]
pub enum PutsArg {
    /// A non-array argument, already converted to its `to_s` form.
    Scalar(String),
    /// An array argument; each element recurses through the same rule.
    Array(Vec<PutsArg>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_has_no_separator() {
        let mut buf = OutputBuffer::new();
        buf.print(&["ab".to_string(), "cd".to_string()]);
        assert_eq!(buf.take_lossy(), "abcd");
    }

    #[test]
    fn puts_adds_missing_newline_only() {
        let mut buf = OutputBuffer::new();
        buf.puts(&[
            PutsArg::Scalar("1".to_string()),
            PutsArg::Scalar("2\n".to_string()),
        ]);
        assert_eq!(buf.take_lossy(), "1\n2\n");
    }

    #[test]
    fn puts_no_args_is_blank_line() {
        let mut buf = OutputBuffer::new();
        buf.puts(&[]);
        assert_eq!(buf.take_lossy(), "\n");
    }

    #[test]
    fn puts_array_recurses_one_level() {
        let mut buf = OutputBuffer::new();
        buf.puts(&[PutsArg::Array(vec![
            PutsArg::Scalar("1".to_string()),
            PutsArg::Array(vec![
                PutsArg::Scalar("2".to_string()),
                PutsArg::Scalar("3".to_string()),
            ]),
        ])]);
        assert_eq!(buf.take_lossy(), "1\n2\n3\n");
    }

    #[test]
    fn p_appends_inspect_and_newline() {
        let mut buf = OutputBuffer::new();
        buf.p(&["\"ab\"".to_string()]);
        assert_eq!(buf.take_lossy(), "\"ab\"\n");
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut buf = OutputBuffer::new();
        buf.append(&[0u8; 1024]);
        let cap_before = buf.bytes.capacity();
        buf.reset();
        assert_eq!(buf.bytes.len(), 0);
        assert_eq!(buf.bytes.capacity(), cap_before);
    }
}
