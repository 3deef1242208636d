//! Maps flattened line numbers (after include expansion) back to the file and
//! line they came from.

#[derive(Debug, Clone, PartialEq, Eq)]
struct Interval {
    start_line: u32,
    filename: String,
    line_offset: u32,
}

#[derive(Debug, Clone, Default)]
pub struct LineNumberTable {
    intervals: Vec<Interval>,
}

impl LineNumberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// From flattened line `start_line` on, lines come from `filename`
    /// starting at its 0-based line `line_offset`.
    pub fn push(&mut self, start_line: u32, filename: &str, line_offset: u32) {
        if let Some(last) = self.intervals.last_mut() {
            if last.start_line == start_line {
                last.filename = filename.to_string();
                last.line_offset = line_offset;
                return;
            }
        }
        self.intervals.push(Interval {
            start_line,
            filename: filename.to_string(),
            line_offset,
        });
    }

    /// Original 1-based line number and file name of a flattened line.
    pub fn translate_line_number(&self, line_number: u32) -> (u32, &str) {
        self.intervals
            .iter()
            .rev()
            .find(|interval| interval.start_line <= line_number)
            .map_or((line_number + 1, ""), |interval| {
                (line_number - interval.start_line + interval.line_offset + 1, interval.filename.as_str())
            })
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}
