//! # Line Parser
//!
//! Turns script text into [`Pipeline`]s. The grammar is deliberately small:
//!
//! - statements are separated by `;` or newlines, stages by `|`
//! - `'single'` quotes are literal, `"double"` quotes and bare words expand
//!   `${var}` and honour `\` escapes
//! - `#` at the start of a word comments out the rest of the line
//! - a word `key=value` is a kwarg, `key<op>value` an oparg (`==`, `!=`,
//!   `>=`, `<=`, `>`, `<`, `~`), as is the spaced form `key == value`
//!
//! Only unquoted characters can split a word into key and value, so
//! `name="a=b"` is the kwarg `name` with value `a=b`, and `"a=b"` is a word.

use crate::error::{NshError, Result};
use crate::query::Operator;
use once_cell::sync::Lazy;
use regex::Regex;

static KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").expect("key pattern compiles"));

const OPERATOR_CHARS: &[char] = &['=', '!', '<', '>', '~'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpArg {
    pub key: String,
    pub op: Operator,
    pub value: String,
}

/// One `|`-separated part of a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stage {
    pub words: Vec<String>,
    pub kwargs: Vec<(String, String)>,
    pub opargs: Vec<OpArg>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

/// A lexed word: each character remembers whether it was quoted.
#[derive(Debug, Default)]
struct Word {
    chars: Vec<(char, bool)>,
}

impl Word {
    fn text(&self) -> String {
        self.chars.iter().map(|(c, _)| c).collect()
    }

    fn is_bare(&self) -> bool {
        self.chars.iter().all(|(_, quoted)| !quoted)
    }
}

#[derive(Debug)]
enum Token {
    Word(Word),
    Pipe,
    End,
}

struct Lexer<'a, F> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    lookup: F,
    tokens: Vec<Token>,
    word: Option<Word>,
}

impl<'a, F: Fn(&str) -> Option<String>> Lexer<'a, F> {
    fn push_char(&mut self, c: char, quoted: bool) {
        self.word.get_or_insert_with(Word::default).chars.push((c, quoted));
    }

    /// Start a word even if it ends up empty, e.g. `''`.
    fn touch(&mut self) {
        self.word.get_or_insert_with(Word::default);
    }

    fn finish_word(&mut self) {
        if let Some(word) = self.word.take() {
            self.tokens.push(Token::Word(word));
        }
    }

    fn interpolate(&mut self) -> Result<()> {
        let mut name = String::new();
        loop {
            match self.chars.next() {
                Some('}') => break,
                Some(c) => name.push(c),
                None => return Err(NshError::Syntax("unterminated ${".to_string())),
            }
        }
        let value = (self.lookup)(name.trim())
            .ok_or_else(|| NshError::not_found(name.trim(), "variables"))?;
        self.touch();
        for c in value.chars() {
            self.push_char(c, true);
        }
        Ok(())
    }

    fn dollar(&mut self, quoted: bool) -> Result<()> {
        if self.chars.peek() == Some(&'{') {
            self.chars.next();
            self.interpolate()
        } else {
            self.push_char('$', quoted);
            Ok(())
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        while let Some(c) = self.chars.next() {
            match c {
                '\n' | ';' => {
                    self.finish_word();
                    self.tokens.push(Token::End);
                }
                '|' => {
                    self.finish_word();
                    self.tokens.push(Token::Pipe);
                }
                c if c.is_whitespace() => self.finish_word(),
                '#' if self.word.is_none() => {
                    while let Some(&next) = self.chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '\\' => match self.chars.next() {
                    Some('\n') => {}
                    Some(escaped) => self.push_char(escaped, true),
                    None => return Err(NshError::Syntax("trailing backslash".to_string())),
                },
                '\'' => {
                    self.touch();
                    loop {
                        match self.chars.next() {
                            Some('\'') => break,
                            Some(c) => self.push_char(c, true),
                            None => return Err(NshError::Syntax("unterminated quote".to_string())),
                        }
                    }
                }
                '"' => {
                    self.touch();
                    loop {
                        match self.chars.next() {
                            Some('"') => break,
                            Some('\\') => match self.chars.next() {
                                Some(escaped @ ('"' | '\\' | '$')) => self.push_char(escaped, true),
                                Some(other) => {
                                    self.push_char('\\', true);
                                    self.push_char(other, true);
                                }
                                None => {
                                    return Err(NshError::Syntax("unterminated quote".to_string()))
                                }
                            },
                            Some('$') => self.dollar(true)?,
                            Some(c) => self.push_char(c, true),
                            None => return Err(NshError::Syntax("unterminated quote".to_string())),
                        }
                    }
                }
                '$' => self.dollar(false)?,
                c => self.push_char(c, false),
            }
        }
        self.finish_word();
        self.tokens.push(Token::End);
        Ok(self.tokens)
    }
}

/// Longest operator symbol starting at `index`, if its characters are bare.
fn operator_at(word: &Word, index: usize) -> Option<(Operator, usize)> {
    Operator::SYMBOLS.iter().find_map(|(symbol, op)| {
        let len = symbol.chars().count();
        let slice = word.chars.get(index..index + len)?;
        let matches = slice
            .iter()
            .zip(symbol.chars())
            .all(|((c, quoted), s)| !quoted && *c == s);
        matches.then_some((*op, len))
    })
}

enum Part {
    Word(String),
    Kwarg(String, String),
    OpArg(OpArg),
}

fn classify(word: &Word) -> Part {
    let split = word
        .chars
        .iter()
        .position(|(c, quoted)| !quoted && OPERATOR_CHARS.contains(c));

    if let Some(index) = split {
        let key_part = &word.chars[..index];
        let key: String = key_part.iter().map(|(c, _)| c).collect();
        if key_part.iter().all(|(_, quoted)| !quoted) && KEY.is_match(&key) {
            if let Some((op, len)) = operator_at(word, index) {
                let value: String = word.chars[index + len..].iter().map(|(c, _)| c).collect();
                return keyed(key, op, value);
            }
        }
    }
    Part::Word(word.text())
}

fn keyed(key: String, op: Operator, value: String) -> Part {
    if op == Operator::Eq {
        Part::Kwarg(key, value)
    } else {
        Part::OpArg(OpArg { key, op, value })
    }
}

/// A whole bare word that is just an operator, as in `name == root`.
fn bare_operator(word: &Word) -> Option<Operator> {
    if !word.is_bare() {
        return None;
    }
    Operator::from_symbol(&word.text())
}

fn build_stage(words: Vec<Word>) -> Stage {
    let mut stage = Stage::default();
    let mut index = 0;
    while index < words.len() {
        let word = &words[index];
        let joined = match (words.get(index + 1), words.get(index + 2)) {
            (Some(op_word), Some(value)) if word.is_bare() && KEY.is_match(&word.text()) => {
                bare_operator(op_word).map(|op| keyed(word.text(), op, value.text()))
            }
            _ => None,
        };

        let part = match joined {
            Some(part) => {
                index += 3;
                part
            }
            None => {
                index += 1;
                classify(word)
            }
        };

        match part {
            Part::Word(text) => stage.words.push(text),
            Part::Kwarg(key, value) => stage.kwargs.push((key, value)),
            Part::OpArg(oparg) => stage.opargs.push(oparg),
        }
    }
    stage
}

/// Parse `text` into statements. `lookup` resolves `${var}` references.
pub fn parse_script(text: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Vec<Pipeline>> {
    let tokens = Lexer {
        chars: text.chars().peekable(),
        lookup,
        tokens: Vec::new(),
        word: None,
    }
    .run()?;

    let mut pipelines = Vec::new();
    let mut stages: Vec<Vec<Word>> = Vec::new();
    let mut current: Vec<Word> = Vec::new();
    let mut saw_pipe = false;

    for token in tokens {
        match token {
            Token::Word(word) => current.push(word),
            Token::Pipe => {
                if current.is_empty() {
                    return Err(NshError::Syntax("empty pipeline stage".to_string()));
                }
                stages.push(std::mem::take(&mut current));
                saw_pipe = true;
            }
            Token::End => {
                if current.is_empty() {
                    if saw_pipe {
                        return Err(NshError::Syntax("empty pipeline stage".to_string()));
                    }
                    continue;
                }
                stages.push(std::mem::take(&mut current));
                pipelines.push(Pipeline {
                    stages: stages.drain(..).map(build_stage).collect(),
                });
                saw_pipe = false;
            }
        }
    }
    Ok(pipelines)
}

/// Parse a single line without variables.
pub fn parse_line(text: &str) -> Result<Vec<Pipeline>> {
    parse_script(text, |_| None)
}
