// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The [`Reader`] structure.

////////////////////////////////////////////////////////////////////////
// STRUCTURES                                                         //
////////////////////////////////////////////////////////////////////////

/// Performs low-level reading of a single line of master-file text.
///
/// The [`Reader`] splits the line into whitespace-separated fields and
/// strips any trailing comment. A backslash escapes the character
/// after it, so `\ ` does not end a field and `\;` does not start a
/// comment. Every field is returned with its byte offset, for error
/// reporting.
pub(super) struct Reader<'a> {
    line: &'a str,
    offset: usize,
    end: usize,
}

////////////////////////////////////////////////////////////////////////
// READER IMPLEMENTATION                                              //
////////////////////////////////////////////////////////////////////////

impl<'a> Reader<'a> {
    /// Constructs a new [`Reader`] over `line`.
    pub fn new(line: &'a str) -> Self {
        Self {
            line,
            offset: 0,
            end: comment_start(line),
        }
    }

    /// Returns the current byte offset into the line.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Moves past any whitespace, returning the new offset.
    fn skip_blanks(&mut self) -> usize {
        let bytes = self.line.as_bytes();
        while self.offset < self.end && bytes[self.offset].is_ascii_whitespace() {
            self.offset += 1;
        }
        self.offset
    }

    /// Returns the next field and its offset without consuming it.
    pub fn peek_field(&mut self) -> Option<(usize, &'a str)> {
        let start = self.skip_blanks();
        if start == self.end {
            return None;
        }

        let bytes = self.line.as_bytes();
        let mut end = start;
        while end < self.end && !bytes[end].is_ascii_whitespace() {
            end += if bytes[end] == b'\\' { 2 } else { 1 };
        }
        let end = end.min(self.end);

        // A backslash before a multi-byte character leaves `end` off a
        // character boundary.
        let field = self
            .line
            .get(start..end)
            .or_else(|| self.line.get(start..self.end))
            .unwrap_or_default();
        Some((start, field))
    }

    /// Returns and consumes the next field, along with its offset.
    pub fn next_field(&mut self) -> Option<(usize, &'a str)> {
        let (start, field) = self.peek_field()?;
        self.offset = start + field.len();
        Some((start, field))
    }

    /// Returns and consumes the remainder of the line, with surrounding
    /// whitespace removed. Returns [`None`] if nothing but whitespace
    /// and comments remain.
    pub fn rest(&mut self) -> Option<(usize, &'a str)> {
        let start = self.skip_blanks();
        self.offset = self.end;
        let text = self.line.get(start..self.end)?.trim_end();
        if text.is_empty() {
            None
        } else {
            Some((start, text))
        }
    }

    /// Returns whether only whitespace and comments remain.
    pub fn at_eol(&mut self) -> bool {
        self.skip_blanks() == self.end
    }
}

/// Finds the start of a comment in `line`, or the length of the line if
/// there is none. A `;` inside double quotes or escaped with a
/// backslash does not start a comment.
fn comment_start(line: &str) -> usize {
    let bytes = line.as_bytes();
    let mut in_quotes = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'"' => in_quotes = !in_quotes,
            b';' if !in_quotes => return i,
            _ => (),
        }
        i += 1;
    }
    line.len()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_splits_fields() {
        let mut reader = Reader::new("  owner\t3600  IN ; comment");
        assert_eq!(reader.next_field(), Some((2, "owner")));
        assert_eq!(reader.peek_field(), Some((8, "3600")));
        assert_eq!(reader.next_field(), Some((8, "3600")));
        assert_eq!(reader.next_field(), Some((14, "IN")));
        assert!(reader.at_eol());
        assert_eq!(reader.next_field(), None);
    }

    #[test]
    fn reader_respects_escapes() {
        let mut reader = Reader::new(r"a\ b.test. c\;d ;e");
        assert_eq!(reader.next_field(), Some((0, r"a\ b.test.")));
        assert_eq!(reader.next_field(), Some((11, r"c\;d")));
        assert_eq!(reader.next_field(), None);
    }

    #[test]
    fn reader_rest_keeps_quoted_semicolons() {
        let mut reader = Reader::new("TXT  \"a;b\" c  ; d");
        reader.next_field();
        assert_eq!(reader.rest(), Some((5, "\"a;b\" c")));
        assert!(reader.at_eol());

        let mut reader = Reader::new("TXT ;");
        reader.next_field();
        assert_eq!(reader.rest(), None);
    }
}
