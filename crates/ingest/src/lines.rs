use std::io::{self, BufRead, Read};

/// Hard ceiling for a single record line.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// Longer than the ceiling; the rest of the line was discarded.
    Oversized(usize),
    InvalidUtf8,
}

/// Line iterator that never buffers more than `max_len` bytes of one line.
pub struct BoundedLines<R> {
    reader: R,
    max_len: usize,
    buf: Vec<u8>,
    line_number: usize,
    bytes_read: u64,
}

impl<R: BufRead> BoundedLines<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_LINE_BYTES)
    }

    pub fn with_limit(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            max_len,
            buf: Vec::new(),
            line_number: 0,
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn discard_rest_of_line(&mut self) -> io::Result<usize> {
        let mut discarded = 0usize;
        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                return Ok(discarded);
            }
            match available.iter().position(|byte| *byte == b'\n') {
                Some(index) => {
                    self.reader.consume(index + 1);
                    return Ok(discarded + index + 1);
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                    discarded += len;
                }
            }
        }
    }

    fn next_line(&mut self) -> io::Result<Option<(usize, Line)>> {
        self.buf.clear();
        let limit = self.max_len as u64 + 1;
        let read = (&mut self.reader).take(limit).read_until(b'\n', &mut self.buf)?;
        if read == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        self.bytes_read = self.bytes_read.saturating_add(read as u64);
        let terminated = self.buf.last() == Some(&b'\n');
        if !terminated && self.buf.len() > self.max_len {
            let rest = self.discard_rest_of_line()?;
            self.bytes_read = self.bytes_read.saturating_add(rest as u64);
            return Ok(Some((self.line_number, Line::Oversized(read + rest))));
        }
        while matches!(self.buf.last(), Some(b'\n') | Some(b'\r')) {
            self.buf.pop();
        }
        let line = match String::from_utf8(std::mem::take(&mut self.buf)) {
            Ok(text) => Line::Text(text),
            Err(_) => Line::InvalidUtf8,
        };
        Ok(Some((self.line_number, line)))
    }
}

impl<R: BufRead> Iterator for BoundedLines<R> {
    type Item = io::Result<(usize, Line)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &[u8], limit: usize) -> Vec<Line> {
        BoundedLines::with_limit(input, limit)
            .map(|item| item.expect("line").1)
            .collect()
    }

    #[test]
    fn splits_lines_and_strips_terminators() {
        let lines = collect(b"one\r\ntwo\nthree", 64);
        assert_eq!(
            lines,
            vec![
                Line::Text("one".to_string()),
                Line::Text("two".to_string()),
                Line::Text("three".to_string())
            ]
        );
    }

    #[test]
    fn oversized_line_is_skipped_without_losing_the_next() {
        let mut input = vec![b'x'; 40];
        input.extend_from_slice(b"\nok\n");
        let lines = collect(&input, 16);
        assert_eq!(lines, vec![Line::Oversized(41), Line::Text("ok".to_string())]);
    }

    #[test]
    fn line_exactly_at_limit_is_kept() {
        let lines = collect(b"abcd\nefgh", 4);
        assert_eq!(
            lines,
            vec![Line::Text("abcd".to_string()), Line::Text("efgh".to_string())]
        );
    }

    #[test]
    fn invalid_utf8_is_reported_per_line() {
        let lines = collect(b"ok\n\xff\xfe\nafter\n", 64);
        assert_eq!(
            lines,
            vec![
                Line::Text("ok".to_string()),
                Line::InvalidUtf8,
                Line::Text("after".to_string())
            ]
        );
    }

    #[test]
    fn counts_bytes_read() {
        let mut lines = BoundedLines::with_limit(&b"ab\ncd\n"[..], 64);
        while lines.next().is_some() {}
        assert_eq!(lines.bytes_read(), 6);
    }
}
