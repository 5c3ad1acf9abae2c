//! Character console device
//!
//! Output-only device: a byte written to offset 0 is appended to a line
//! buffer, and `\n` flushes the completed line to stdout. Reads return 0.
//! A consumer may drain the accumulated output asynchronously with
//! `take_output`; ordering follows program order.

use crate::device::Device;
use parking_lot::Mutex;
use std::io::Write;

#[derive(Default)]
pub struct Console {
    line: Mutex<String>,
    output: Mutex<String>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything written so far, including any unterminated line.
    pub fn take_output(&self) -> String {
        let mut out = std::mem::take(&mut *self.output.lock());
        out.push_str(&std::mem::take(&mut *self.line.lock()));
        out
    }
}

impl Device for Console {
    fn contains(&self, offset: u64) -> bool {
        offset < 4
    }

    fn read8(&self, _offset: u64) -> u8 {
        0
    }

    fn write8(&self, offset: u64, value: u8) {
        if offset != 0 {
            return;
        }
        let c = value as char;
        let mut line = self.line.lock();
        line.push(c);
        if c == '\n' {
            let done = std::mem::take(&mut *line);
            print!("{}", done);
            let _ = std::io::stdout().flush();
            self.output.lock().push_str(&done);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffering() {
        let console = Console::new();
        for b in b"hi\n" {
            console.write8(0, *b);
        }
        console.write8(0, b'x');
        assert_eq!(console.take_output(), "hi\nx");
        assert_eq!(console.take_output(), "");
    }

    #[test]
    fn test_reads_return_zero() {
        let console = Console::new();
        console.write8(0, b'a');
        assert_eq!(console.read8(0), 0);
        assert_eq!(console.read_word(0), 0);
    }

    #[test]
    fn test_ignores_other_offsets() {
        let console = Console::new();
        console.write8(1, b'z');
        assert_eq!(console.take_output(), "");
    }
}
