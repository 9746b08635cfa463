//! Thin CoNLL-U line/field splitter (spec §6/§11).
//!
//! Deliberately not a validated parser: no dependency-graph or morphology
//! handling, just the field rules the Ingester needs. One blank-line-
//! separated block is one sentence; token lines are tab-separated.

use std::io::BufRead;

use crate::token::{RawSentence, Token};

/// Reads every sentence block from `reader`, yielding one `RawSentence`
/// per blank-line-separated block. Malformed token lines (too few fields)
/// are skipped within a block rather than failing the whole stream.
pub struct ConlluReader<R: BufRead> {
    lines: std::io::Lines<R>,
}

impl<R: BufRead> ConlluReader<R> {
    pub fn new(reader: R) -> Self {
        ConlluReader { lines: reader.lines() }
    }
}

impl<R: BufRead> Iterator for ConlluReader<R> {
    type Item = std::io::Result<RawSentence>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut tokens = Vec::new();
        let mut text = String::new();
        let mut saw_any_line = false;

        for line in self.lines.by_ref() {
            let line = match line {
                Ok(l) => l,
                Err(e) => return Some(Err(e)),
            };
            saw_any_line = true;

            if line.is_empty() {
                if tokens.is_empty() && text.is_empty() {
                    // Blank separator before any content in this block; skip it.
                    continue;
                }
                break;
            }

            if let Some(rest) = line.strip_prefix('#') {
                if let Some(value) = rest.trim_start().strip_prefix("text") {
                    if let Some(value) = value.trim_start().strip_prefix('=') {
                        text = value.trim_start().to_string();
                    }
                }
                continue;
            }

            if let Some(token) = parse_token_line(&line) {
                tokens.push(token);
            }
        }

        if !saw_any_line && tokens.is_empty() && text.is_empty() {
            return None;
        }
        if tokens.is_empty() && text.is_empty() {
            return None;
        }

        Some(Ok(RawSentence { text, tokens }))
    }
}

/// Parses one tab-separated token line, applying spec §6's field rules.
/// The lemma is lower-cased here so every downstream consumer (the
/// lexicon, the query path) sees the normalized form. Returns `None` for a
/// skipped id (`-`/`.`, multiword tokens and empty nodes) or a line with
/// too few fields.
fn parse_token_line(line: &str) -> Option<Token> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 5 {
        return None;
    }

    let id = fields[0];
    if id.contains('-') || id.contains('.') {
        return None;
    }
    let position: u32 = id.parse().ok()?;

    let surface = fields[1];
    let lemma_field = fields[2];
    let lemma = if lemma_field == "_" { surface } else { lemma_field }.to_lowercase();

    let upos = fields[3];
    let xpos = fields[4];
    let tag = if xpos != "_" { xpos } else { upos };

    Some(Token {
        surface: surface.to_string(),
        lemma,
        tag: tag.to_string(),
        position,
        byte_start: 0,
        byte_end: surface.len() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_one_sentence_block() {
        let input = "# text = The big house.\n1\tThe\tthe\tDET\tDT\t_\t_\t_\t_\t_\n\
                      2\tbig\tbig\tADJ\tJJ\t_\t_\t_\t_\t_\n\
                      3\thouse\thouse\tNOUN\tNN\t_\t_\t_\t_\t_\n\n";
        let mut reader = ConlluReader::new(Cursor::new(input));
        let sentence = reader.next().unwrap().unwrap();
        assert_eq!(sentence.text, "The big house.");
        assert_eq!(sentence.tokens.len(), 3);
        assert_eq!(sentence.tokens[1].lemma, "big");
        assert_eq!(sentence.tokens[1].tag, "JJ");
        assert!(reader.next().is_none());
    }

    #[test]
    fn underscore_lemma_falls_back_to_surface_and_is_lowercased() {
        let input = "1\tRunning\t_\tVERB\tVBG\t_\t_\t_\t_\t_\n\n";
        let mut reader = ConlluReader::new(Cursor::new(input));
        let sentence = reader.next().unwrap().unwrap();
        assert_eq!(sentence.tokens[0].lemma, "running");
    }

    #[test]
    fn lemma_field_is_lowercased_even_when_present() {
        let input = "1\tParis\tParis\tPROPN\tNNP\t_\t_\t_\t_\t_\n\n";
        let mut reader = ConlluReader::new(Cursor::new(input));
        let sentence = reader.next().unwrap().unwrap();
        assert_eq!(sentence.tokens[0].lemma, "paris");
    }

    #[test]
    fn xpos_preferred_over_upos_unless_underscore() {
        let input = "1\tdogs\tdog\tNOUN\t_\t_\t_\t_\t_\t_\n\n";
        let mut reader = ConlluReader::new(Cursor::new(input));
        let sentence = reader.next().unwrap().unwrap();
        assert_eq!(sentence.tokens[0].tag, "NOUN");
    }

    #[test]
    fn multiword_and_empty_node_ids_are_skipped() {
        let input = "1-2\tcannot\t_\t_\t_\t_\t_\t_\t_\t_\n\
                      1\tcan\tcan\tAUX\tMD\t_\t_\t_\t_\t_\n\
                      2\tnot\tnot\tPART\tRB\t_\t_\t_\t_\t_\n\
                      2.1\tnegate\tnegate\tVERB\tVB\t_\t_\t_\t_\t_\n\n";
        let mut reader = ConlluReader::new(Cursor::new(input));
        let sentence = reader.next().unwrap().unwrap();
        assert_eq!(sentence.tokens.len(), 2);
    }

    #[test]
    fn two_sentence_blocks_yield_two_sentences() {
        let input = "1\tA\ta\tDET\tDT\t_\t_\t_\t_\t_\n\n1\tB\tb\tDET\tDT\t_\t_\t_\t_\t_\n\n";
        let mut reader = ConlluReader::new(Cursor::new(input));
        assert!(reader.next().unwrap().unwrap().tokens[0].lemma == "a");
        assert!(reader.next().unwrap().unwrap().tokens[0].lemma == "b");
        assert!(reader.next().is_none());
    }
}
