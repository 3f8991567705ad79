//! Replays a binary token stream into any serializer.

use bytes::Bytes;
use tracing::trace;

use crate::binary::{BinaryDeserializer, PlainTokens, RedirectTokens, TokenStream};
use crate::error::{DataError, DataResult};
use crate::protocol::DataSerializer;
use crate::token::Token;

/// Pumps tokens from a binary reader into a target serializer, one write
/// call per token. No schema is needed.
pub struct BinaryConvertor<T: TokenStream = PlainTokens> {
    reader: BinaryDeserializer<T>,
    keys: Vec<String>,
}

/// Convertor over a concatenated imprint buffer.
pub type ImprintBinaryConvertor = BinaryConvertor<RedirectTokens>;

impl BinaryConvertor<PlainTokens> {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self::with_reader(BinaryDeserializer::new(data))
    }
}

impl BinaryConvertor<RedirectTokens> {
    pub fn imprint(data: impl Into<Bytes>, offset: usize) -> DataResult<Self> {
        Ok(Self::with_reader(BinaryDeserializer::imprint(data, offset)?))
    }
}

impl<T: TokenStream> BinaryConvertor<T> {
    pub fn with_reader(reader: BinaryDeserializer<T>) -> Self {
        Self {
            reader,
            keys: Vec::new(),
        }
    }

    /// Replay until the input ends or, in a concatenated buffer, until the
    /// root segment's redirect end.
    pub fn convert<S: DataSerializer + ?Sized>(&mut self, target: &mut S) -> DataResult<()> {
        let mut tokens = 0usize;
        while let Some(token) = self.reader.next_token()? {
            tokens += 1;
            let input = self.reader.input();
            match token {
                Token::KeyBegin => {
                    let key = input.read_string()?;
                    target.write_key(&key)?;
                    self.keys.push(key);
                }
                Token::KeyEnd => {
                    let key = self
                        .keys
                        .pop()
                        .ok_or_else(|| DataError::Protocol("key end without an open key".into()))?;
                    target.pop_key(&key)?;
                }
                Token::ArrayBegin => target.write_array()?,
                Token::ArrayEnd => target.pop_array()?,
                Token::ObjectBegin => target.write_object()?,
                Token::ObjectEnd => target.pop_object()?,
                Token::ValueU8 => target.write_u8(input.read_u8()?)?,
                Token::ValueI32 => target.write_i32(input.read_i32()?)?,
                Token::ValueI64 => target.write_i64(input.read_i64()?)?,
                Token::ValueF32 => target.write_f32(input.read_f32()?)?,
                Token::ValueBool => target.write_bool(input.read_bool()?)?,
                Token::ValueString => target.write_string(&input.read_string()?)?,
                Token::ValueName => target.write_name(&input.read_string()?)?,
                Token::ValueNull => target.write_null()?,
                Token::RedirectEnd => break,
                Token::Redirect => {
                    return Err(DataError::Protocol(format!(
                        "redirect at offset {} outside a concatenated buffer",
                        input.position().saturating_sub(1)
                    )))
                }
            }
        }
        trace!(tokens, "converted token stream");
        match self.keys.last() {
            Some(key) => Err(DataError::Protocol(format!("key {key:?} was never closed"))),
            None => Ok(()),
        }
    }
}
