use std::collections::VecDeque;
use std::io::{self, BufRead};

/// A clause or sentence cut from the reference text, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub text: String,
    pub quoted: bool,
}

/// Replace typographic quotes with their plain ASCII forms so quote pairing
/// only ever has to look for `"` and `'`.
pub fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => '\'',
            other => other,
        })
        .collect()
}

/// Split one line into speech and non-speech segments.
///
/// A quoted span is always its own segment regardless of surrounding
/// punctuation; an unterminated quote swallows the rest of the line.
pub fn quote_split(line: &str) -> Vec<TextSegment> {
    let normalized = normalize_quotes(line);
    let mut text = normalized.trim();
    let mut out = Vec::new();

    while !text.is_empty() {
        match text.find('"') {
            Some(0) => match text[1..].find('"') {
                Some(i) => {
                    let end = 1 + i + 1;
                    push_segment(&mut out, &text[..end], true);
                    text = text[end..].trim_start();
                }
                None => {
                    push_segment(&mut out, text, true);
                    break;
                }
            },
            None => {
                push_segment(&mut out, text, false);
                break;
            }
            Some(idx) => {
                push_segment(&mut out, &text[..idx], false);
                text = text[idx..].trim_start();
            }
        }
    }
    out
}

fn push_segment(out: &mut Vec<TextSegment>, text: &str, quoted: bool) {
    let text = text.trim();
    if !text.is_empty() {
        out.push(TextSegment {
            text: text.to_string(),
            quoted,
        });
    }
}

/// Lazy, forward-only segment stream over the reference text.
///
/// Lines are split independently, so a blank line always terminates the
/// current segment and paragraphs never merge.
pub struct Segmenter<R: BufRead> {
    lines: io::Lines<R>,
    queue: VecDeque<TextSegment>,
}

impl<R: BufRead> Segmenter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            queue: VecDeque::new(),
        }
    }
}

impl<R: BufRead> Iterator for Segmenter<R> {
    type Item = io::Result<TextSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(segment) = self.queue.pop_front() {
                return Some(Ok(segment));
            }
            match self.lines.next()? {
                Ok(line) => self.queue.extend(quote_split(&line)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
