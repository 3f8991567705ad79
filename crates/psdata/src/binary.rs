//! Binary token codec.
//!
//! Grammar, one tag byte followed by its payload:
//!
//! ```text
//! '$' string ... '%'     key, value, key end
//! '[' ... ']'            array
//! '{' ... '}'            object
//! 'A' u8   'F' i32   'H' i64   'I' f32   'b' bool
//! 'c' string   'd' name (lower-cased)   'a' null
//! 0x1A u32               redirect (concatenated imprints only)
//! 0x0A                   redirect end (concatenated imprints only)
//! ```
//!
//! Tags are only ever read in tag position, so payload bytes that happen to
//! equal `]` or `}` can never be taken for a closing token.

use bytes::Bytes;
use psdata_stream::{BufferInputStream, BufferOutputStream, OutputStream};
use tracing::trace;

use crate::error::{DataError, DataResult};
use crate::protocol::{DataDeserializer, DataSerializer, MAX_NESTING};
use crate::token::Token;

pub struct BinarySerializer<O: OutputStream = BufferOutputStream> {
    output: O,
    keys: Vec<String>,
}

impl BinarySerializer<BufferOutputStream> {
    pub fn new() -> Self {
        Self::with_output(BufferOutputStream::new())
    }
}

impl Default for BinarySerializer<BufferOutputStream> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: OutputStream> BinarySerializer<O> {
    pub fn with_output(output: O) -> Self {
        Self {
            output,
            keys: Vec::new(),
        }
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub(crate) fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn into_output(self) -> O {
        self.output
    }

    fn tag(&mut self, token: Token) {
        self.output.write_u8(token.byte());
    }
}

impl<O: OutputStream> DataSerializer for BinarySerializer<O> {
    fn write_key(&mut self, key: &str) -> DataResult<()> {
        self.tag(Token::KeyBegin);
        self.output.write_string(key);
        self.keys.push(key.to_string());
        Ok(())
    }

    fn write_array(&mut self) -> DataResult<()> {
        self.tag(Token::ArrayBegin);
        Ok(())
    }

    fn write_object(&mut self) -> DataResult<()> {
        self.tag(Token::ObjectBegin);
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> DataResult<()> {
        self.tag(Token::ValueU8);
        self.output.write_u8(value);
        Ok(())
    }

    fn write_i32(&mut self, value: i32) -> DataResult<()> {
        self.tag(Token::ValueI32);
        self.output.write_i32(value);
        Ok(())
    }

    fn write_i64(&mut self, value: i64) -> DataResult<()> {
        self.tag(Token::ValueI64);
        self.output.write_i64(value);
        Ok(())
    }

    fn write_f32(&mut self, value: f32) -> DataResult<()> {
        self.tag(Token::ValueF32);
        self.output.write_f32(value);
        Ok(())
    }

    fn write_bool(&mut self, value: bool) -> DataResult<()> {
        self.tag(Token::ValueBool);
        self.output.write_bool(value);
        Ok(())
    }

    fn write_string(&mut self, value: &str) -> DataResult<()> {
        self.tag(Token::ValueString);
        self.output.write_string(value);
        Ok(())
    }

    fn write_name(&mut self, value: &str) -> DataResult<()> {
        self.tag(Token::ValueName);
        self.output.write_string(&value.to_lowercase());
        Ok(())
    }

    fn write_null(&mut self) -> DataResult<()> {
        self.tag(Token::ValueNull);
        Ok(())
    }

    fn pop_key(&mut self, key: &str) -> DataResult<()> {
        match self.keys.pop() {
            Some(open) if open == key => {
                self.tag(Token::KeyEnd);
                Ok(())
            }
            open => Err(DataError::UnbalancedKey {
                expected: open,
                found: key.to_string(),
            }),
        }
    }

    fn pop_array(&mut self) -> DataResult<()> {
        self.tag(Token::ArrayEnd);
        Ok(())
    }

    fn pop_object(&mut self) -> DataResult<()> {
        self.tag(Token::ObjectEnd);
        Ok(())
    }
}

/// Source of tags for [`BinaryDeserializer`].
pub trait TokenStream {
    fn input(&mut self) -> &mut BufferInputStream;

    /// Next tag, or `None` when the input is exhausted.
    fn read_token(&mut self) -> DataResult<Option<Token>>;
}

fn read_raw_token(input: &mut BufferInputStream) -> DataResult<Option<Token>> {
    if !input.has_data() {
        return Ok(None);
    }
    let offset = input.position();
    let byte = input.read_u8()?;
    Token::from_byte(byte)
        .map(Some)
        .ok_or(DataError::UnknownToken { byte, offset })
}

/// Tags read straight from the buffer.
#[derive(Debug, Clone)]
pub struct PlainTokens {
    input: BufferInputStream,
}

impl PlainTokens {
    pub fn new(input: BufferInputStream) -> Self {
        Self { input }
    }
}

impl TokenStream for PlainTokens {
    fn input(&mut self) -> &mut BufferInputStream {
        &mut self.input
    }

    fn read_token(&mut self) -> DataResult<Option<Token>> {
        read_raw_token(&mut self.input)
    }
}

/// Tags read from a concatenated imprint buffer. Redirects are followed
/// transparently: a redirect jumps to its target and remembers where to
/// come back, a redirect end returns there.
///
/// Concatenation writes every child before its parent, so a redirect must
/// point before the start of the segment it sits in. Anything else is
/// rejected, which also rules out redirect cycles.
#[derive(Debug, Clone)]
pub struct RedirectTokens {
    input: BufferInputStream,
    return_positions: Vec<usize>,
    segment_starts: Vec<usize>,
}

impl RedirectTokens {
    pub fn new(input: BufferInputStream) -> Self {
        let start = input.position();
        Self {
            input,
            return_positions: Vec::new(),
            segment_starts: vec![start],
        }
    }

    pub fn depth(&self) -> usize {
        self.return_positions.len()
    }

    fn segment_start(&self) -> usize {
        self.segment_starts.last().copied().unwrap_or_default()
    }

    fn follow(&mut self, at: usize, target: usize) -> DataResult<()> {
        let start = self.segment_start();
        if target >= start {
            return Err(DataError::Protocol(format!(
                "redirect at offset {at} targets {target}, not before its segment at {start}"
            )));
        }
        if self.return_positions.len() >= MAX_NESTING {
            return Err(DataError::Protocol(format!(
                "redirects nested deeper than {MAX_NESTING} at offset {at}"
            )));
        }
        trace!(from = at, to = target, "follow redirect");
        self.return_positions.push(self.input.position());
        self.segment_starts.push(target);
        self.input.set_position(target)?;
        Ok(())
    }
}

impl TokenStream for RedirectTokens {
    fn input(&mut self) -> &mut BufferInputStream {
        &mut self.input
    }

    fn read_token(&mut self) -> DataResult<Option<Token>> {
        loop {
            let at = self.input.position();
            match read_raw_token(&mut self.input)? {
                Some(Token::Redirect) => {
                    let target = self.input.read_u32()? as usize;
                    self.follow(at, target)?;
                }
                Some(Token::RedirectEnd) if !self.return_positions.is_empty() => {
                    let back = self.return_positions.pop().unwrap_or_default();
                    self.segment_starts.pop();
                    self.input.set_position(back)?;
                }
                other => return Ok(other),
            }
        }
    }
}

pub struct BinaryDeserializer<T: TokenStream = PlainTokens> {
    tokens: T,
}

/// Reader over a concatenated imprint buffer.
pub type ImprintBinaryDeserializer = BinaryDeserializer<RedirectTokens>;

impl BinaryDeserializer<PlainTokens> {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_tokens(PlainTokens::new(BufferInputStream::new(data)))
    }
}

impl BinaryDeserializer<RedirectTokens> {
    /// Start reading the concatenated buffer at `offset`, usually the root
    /// offset returned by concatenation.
    pub fn imprint(data: impl Into<Bytes>, offset: usize) -> DataResult<Self> {
        let input = BufferInputStream::at(data, offset)?;
        Ok(Self::with_tokens(RedirectTokens::new(input)))
    }
}

impl<T: TokenStream> BinaryDeserializer<T> {
    pub fn with_tokens(tokens: T) -> Self {
        Self { tokens }
    }

    pub fn position(&mut self) -> usize {
        self.tokens.input().position()
    }

    pub fn has_data(&mut self) -> bool {
        self.tokens.input().has_data()
    }

    pub(crate) fn next_token(&mut self) -> DataResult<Option<Token>> {
        self.tokens.read_token()
    }

    pub(crate) fn input(&mut self) -> &mut BufferInputStream {
        self.tokens.input()
    }

    /// Consume `expected` if it is next, otherwise leave the input unchanged.
    fn check_token(&mut self, expected: Token) -> DataResult<bool> {
        match self.tokens.read_token()? {
            None => Ok(false),
            Some(token) if token == expected => Ok(true),
            Some(_) => {
                self.tokens.input().shift_back()?;
                Ok(false)
            }
        }
    }

    fn require_token(&mut self, expected: Token) -> DataResult<()> {
        if self.check_token(expected)? {
            Ok(())
        } else {
            Err(DataError::MissingToken {
                expected,
                offset: self.position(),
            })
        }
    }
}

impl<T: TokenStream> DataDeserializer for BinaryDeserializer<T> {
    fn read_key(&mut self) -> DataResult<Option<String>> {
        if self.check_token(Token::KeyBegin)? {
            Ok(Some(self.tokens.input().read_string()?))
        } else {
            Ok(None)
        }
    }

    fn read_index(&mut self) -> DataResult<bool> {
        match self.tokens.read_token()? {
            None => Err(DataError::UnexpectedEnd(self.position())),
            Some(token) => {
                self.tokens.input().shift_back()?;
                Ok(token != Token::ArrayEnd)
            }
        }
    }

    fn read_array(&mut self) -> DataResult<bool> {
        self.check_token(Token::ArrayBegin)
    }

    fn read_object(&mut self) -> DataResult<bool> {
        self.check_token(Token::ObjectBegin)
    }

    fn read_u8(&mut self) -> DataResult<Option<u8>> {
        if self.check_token(Token::ValueU8)? {
            Ok(Some(self.tokens.input().read_u8()?))
        } else {
            Ok(None)
        }
    }

    fn read_i32(&mut self) -> DataResult<Option<i32>> {
        if self.check_token(Token::ValueI32)? {
            Ok(Some(self.tokens.input().read_i32()?))
        } else {
            Ok(None)
        }
    }

    fn read_i64(&mut self) -> DataResult<Option<i64>> {
        if self.check_token(Token::ValueI64)? {
            Ok(Some(self.tokens.input().read_i64()?))
        } else {
            Ok(None)
        }
    }

    fn read_f32(&mut self) -> DataResult<Option<f32>> {
        if self.check_token(Token::ValueF32)? {
            Ok(Some(self.tokens.input().read_f32()?))
        } else {
            Ok(None)
        }
    }

    fn read_bool(&mut self) -> DataResult<Option<bool>> {
        if self.check_token(Token::ValueBool)? {
            Ok(Some(self.tokens.input().read_bool()?))
        } else {
            Ok(None)
        }
    }

    fn read_string(&mut self) -> DataResult<Option<String>> {
        if self.check_token(Token::ValueString)? {
            Ok(Some(self.tokens.input().read_string()?))
        } else {
            Ok(None)
        }
    }

    fn read_name(&mut self) -> DataResult<Option<String>> {
        if self.check_token(Token::ValueName)? {
            Ok(Some(self.tokens.input().read_string()?))
        } else {
            Ok(None)
        }
    }

    fn read_null(&mut self) -> DataResult<bool> {
        self.check_token(Token::ValueNull)
    }

    fn pop_key(&mut self, _key: &str) -> DataResult<()> {
        self.require_token(Token::KeyEnd)
    }

    fn pop_index(&mut self) -> DataResult<()> {
        Ok(())
    }

    fn pop_array(&mut self) -> DataResult<()> {
        self.require_token(Token::ArrayEnd)
    }

    fn pop_object(&mut self) -> DataResult<()> {
        self.require_token(Token::ObjectEnd)
    }

    fn skip_value(&mut self) -> DataResult<()> {
        // Open containers and keys, innermost last.
        let mut open: Vec<Token> = Vec::new();
        loop {
            let offset = self.position();
            let token = self
                .tokens
                .read_token()?
                .ok_or(DataError::UnexpectedEnd(offset))?;
            let input = self.tokens.input();
            match token {
                Token::ValueU8 | Token::ValueBool => {
                    input.read_u8()?;
                }
                Token::ValueI32 | Token::ValueF32 => {
                    input.read_u32()?;
                }
                Token::ValueI64 => {
                    input.read_u64()?;
                }
                Token::ValueString | Token::ValueName => {
                    input.read_string()?;
                }
                Token::ValueNull => {}
                Token::ArrayBegin | Token::ObjectBegin => {
                    if open.len() >= MAX_NESTING {
                        return Err(DataError::Protocol(format!(
                            "value nested deeper than {MAX_NESTING} at offset {offset}"
                        )));
                    }
                    open.push(token);
                }
                Token::KeyBegin if open.last() == Some(&Token::ObjectBegin) => {
                    input.read_string()?;
                    open.push(token);
                }
                Token::ArrayEnd if open.last() == Some(&Token::ArrayBegin) => {
                    open.pop();
                }
                Token::ObjectEnd if open.last() == Some(&Token::ObjectBegin) => {
                    open.pop();
                }
                Token::KeyEnd if open.last() == Some(&Token::KeyBegin) => {
                    open.pop();
                }
                other => {
                    return Err(DataError::Protocol(format!(
                        "cannot skip {other:?} at offset {offset}"
                    )))
                }
            }
            if open.is_empty() {
                return Ok(());
            }
        }
    }
}
