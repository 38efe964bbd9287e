//! Line-number table (`co_lnotab`): maps bytecode offsets to source lines.
//!
//! The table is a sequence of `(byte_increment, line_increment)` byte pairs,
//! both unsigned. Increments wider than 255 are split across several pairs.

/// Accumulates line entries while assembling a code object.
pub struct LineTableBuilder {
    first_line: u32,
    entries: Vec<(u32, u32)>, // (offset, line)
}

impl LineTableBuilder {
    pub fn new(first_line: u32) -> Self {
        Self {
            first_line,
            entries: Vec::new(),
        }
    }

    /// Record that the instruction at `offset` starts source line `line`.
    ///
    /// Offsets and lines must be non-decreasing.
    pub fn add(&mut self, offset: u32, line: u32) {
        self.entries.push((offset, line));
    }

    /// Produce the encoded byte-pair table.
    pub fn finish(self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut prev_offset = 0u32;
        let mut prev_line = self.first_line;

        for (offset, line) in self.entries {
            let mut delta_offset = offset.saturating_sub(prev_offset);
            let mut delta_line = line.saturating_sub(prev_line);

            while delta_offset > 255 {
                buf.extend_from_slice(&[255, 0]);
                delta_offset -= 255;
            }
            while delta_line > 255 {
                buf.extend_from_slice(&[delta_offset as u8, 255]);
                delta_offset = 0;
                delta_line -= 255;
            }
            if delta_offset != 0 || delta_line != 0 {
                buf.extend_from_slice(&[delta_offset as u8, delta_line as u8]);
            }

            prev_offset = offset;
            prev_line = line;
        }

        buf
    }
}

/// Source line for the instruction at `offset`.
pub fn line_for_offset(lnotab: &[u8], first_line: u32, offset: usize) -> u32 {
    let mut line = first_line;
    let mut addr = 0usize;
    for pair in lnotab.chunks_exact(2) {
        addr += pair[0] as usize;
        if addr > offset {
            break;
        }
        line += pair[1] as u32;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_is_first_line() {
        let encoded = LineTableBuilder::new(7).finish();
        assert!(encoded.is_empty());
        assert_eq!(line_for_offset(&encoded, 7, 0), 7);
        assert_eq!(line_for_offset(&encoded, 7, 40), 7);
    }

    #[test]
    fn multiple_entries() {
        let mut builder = LineTableBuilder::new(1);
        builder.add(6, 2);
        builder.add(16, 4);
        let encoded = builder.finish();
        assert_eq!(encoded, vec![6, 1, 10, 2]);

        assert_eq!(line_for_offset(&encoded, 1, 0), 1);
        assert_eq!(line_for_offset(&encoded, 1, 5), 1);
        assert_eq!(line_for_offset(&encoded, 1, 6), 2);
        assert_eq!(line_for_offset(&encoded, 1, 15), 2);
        assert_eq!(line_for_offset(&encoded, 1, 16), 4);
        assert_eq!(line_for_offset(&encoded, 1, 100), 4);
    }

    #[test]
    fn wide_increments_are_split() {
        let mut builder = LineTableBuilder::new(1);
        builder.add(300, 600);
        let encoded = builder.finish();
        assert_eq!(encoded, vec![255, 0, 45, 255, 0, 255, 0, 89]);

        assert_eq!(line_for_offset(&encoded, 1, 299), 1);
        assert_eq!(line_for_offset(&encoded, 1, 300), 600);
    }
}
