use byteorder::{LittleEndian, WriteBytesExt};
use std::{
    convert::TryFrom,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::debug;

use super::{
    json::{
        json_parser::{Parser, Span, Token, TokenType},
        REVISION_FIELD,
    },
    parts::{FieldInfo, Fields, Objects},
    types::{align, expected, hardcoded_shape, parse_prim, write_bool_pair, write_str},
    FieldIdx, Header, NameType, ObjIdx,
};
use crate::{err::FromJsonError, util::name_hash};

/// Object fields with these names are written as independent embedded files.
const EMBEDDED_FILE_NAMES: &[&str] = &["raw_data", "static_save"];

/// Options for [`encode_with`].
#[derive(Clone, Copy, Debug, Default)]
pub struct EncodeOptions<'a> {
    /// Polled before every field. Once set, encoding stops with
    /// [`FromJsonError::Cancelled`] and the partial output is dropped.
    pub cancel: Option<&'a AtomicBool>,
}

/// Encode extended JSON text to a binary file.
pub fn encode(text: &str) -> Result<Vec<u8>, FromJsonError> {
    encode_with(text, &EncodeOptions::default())
}

/// Encode extended JSON text to a binary file with the given options.
pub fn encode_with(text: &str, opts: &EncodeOptions<'_>) -> Result<Vec<u8>, FromJsonError> {
    let lex = &mut Parser::new(text);
    let tok = lex.exp_next()?;
    if tok.kind != TokenType::BeginObject {
        return Err(expected("{", &tok));
    }
    let mut w = DsonWriter::new(opts.cancel);
    w.write_fields(lex, None)?;
    lex.finish()?;
    w.finish(tok.span)
}

fn too_large(what: &'static str, span: Span) -> FromJsonError {
    FromJsonError::TooLarge {
        what,
        first: span.first,
        end: span.end,
    }
}

/// Builds the directories and the data block of one file while streaming
/// through the text, then assembles header and blocks in [`DsonWriter::finish`].
struct DsonWriter<'c> {
    data: Vec<u8>,
    o: Objects,
    f: Fields,
    // Names of the enclosing objects, root first
    names: Vec<NameType>,
    version: u32,
    cancel: Option<&'c AtomicBool>,
}

impl<'c> DsonWriter<'c> {
    fn new(cancel: Option<&'c AtomicBool>) -> Self {
        Self {
            data: vec![],
            o: Objects::default(),
            f: Fields::default(),
            names: vec![],
            version: 0,
            cancel,
        }
    }

    /// Write fields until the `}` closing the current object, whose `{` was
    /// already consumed. Returns the number of direct children.
    fn write_fields(
        &mut self,
        lex: &mut Parser<'_>,
        parent: Option<ObjIdx>,
    ) -> Result<u32, FromJsonError> {
        let mut direct = 0u32;
        loop {
            let tok = lex.exp_next()?;
            match tok.kind {
                TokenType::EndObject => return Ok(direct),
                TokenType::FieldName if parent.is_none() && tok.dat == REVISION_FIELD => {
                    let tok = lex.expect(TokenType::Number)?;
                    self.version = parse_prim(&tok, "header version")?;
                }
                TokenType::FieldName => {
                    self.write_field(&tok, lex, parent)?;
                    direct += 1;
                }
                _ => return Err(expected("field name or }", &tok)),
            }
        }
    }

    fn write_field(
        &mut self,
        name_tok: &Token<'_>,
        lex: &mut Parser<'_>,
        parent: Option<ObjIdx>,
    ) -> Result<FieldIdx, FromJsonError> {
        if self.cancel.map_or(false, |c| c.load(Ordering::Relaxed)) {
            debug!(fields = self.f.len(), "encoding cancelled");
            return Err(FromJsonError::Cancelled);
        }

        let name: &str = &name_tok.dat;
        if name.len() + 1 > FieldInfo::NAME_LEN_BITS as usize {
            return Err(FromJsonError::NameTooLong {
                name: name.to_owned(),
                first: name_tok.span.first,
                end: name_tok.span.end,
            });
        }
        let offset =
            u32::try_from(self.data.len()).map_err(|_| too_large("data block", name_tok.span))?;
        let field = self
            .f
            .create_field(name, offset)
            .ok_or_else(|| too_large("field count", name_tok.span))?;
        self.data.extend_from_slice(name.as_bytes());
        self.data.push(0);

        let tok = lex.exp_next()?;
        match tok.kind {
            TokenType::BeginObject if parent.is_some() && EMBEDDED_FILE_NAMES.contains(&name) => {
                let mut inner = DsonWriter::new(self.cancel);
                inner.write_fields(lex, None)?;
                let bytes = inner.finish(tok.span)?;
                let len =
                    u32::try_from(bytes.len()).map_err(|_| too_large("embedded file", tok.span))?;
                align(&mut self.data);
                self.data.write_u32::<LittleEndian>(len)?;
                self.data.extend_from_slice(&bytes);
            }
            TokenType::BeginObject => {
                let obj = self
                    .o
                    .create_object(field, parent)
                    .ok_or_else(|| too_large("object count", tok.span))?;
                self.f.set_object(field, obj);
                self.names.push(NameType::from(name));
                let direct = self.write_fields(lex, Some(obj))?;
                self.names.pop();
                self.o[obj].num_direct_childs = direct;
                self.o[obj].num_all_childs = (self.f.len() - 1 - field.numeric() as usize) as u32;
            }
            _ if parent.is_none() => return Err(expected("{", &tok)),
            _ => self.write_leaf(name, &tok, lex)?,
        }
        Ok(field)
    }

    fn write_leaf(
        &mut self,
        name: &str,
        tok: &Token<'_>,
        lex: &mut Parser<'_>,
    ) -> Result<(), FromJsonError> {
        if let Some(shape) = hardcoded_shape(&self.names, name) {
            if shape.encode_json(tok, lex, &mut self.data)? {
                return Ok(());
            }
        }

        match tok.kind {
            TokenType::Number => {
                align(&mut self.data);
                let i = parse_prim::<i32>(tok, "integer")?;
                self.data.write_i32::<LittleEndian>(i)?;
            }
            TokenType::String if tok.dat.starts_with("###") => {
                align(&mut self.data);
                self.data.write_i32::<LittleEndian>(name_hash(&tok.dat[3..]))?;
            }
            TokenType::String => {
                align(&mut self.data);
                write_str(&mut self.data, tok)?;
            }
            TokenType::BeginArray => {
                align(&mut self.data);
                write_bool_pair(&mut self.data, lex)?;
            }
            TokenType::BoolTrue => self.data.push(1),
            TokenType::BoolFalse => self.data.push(0),
            _ => {
                return Err(FromJsonError::Unidentified {
                    name: name.to_owned(),
                    first: tok.span.first,
                    end: tok.span.end,
                })
            }
        }
        Ok(())
    }

    fn finish(self, span: Span) -> Result<Vec<u8>, FromJsonError> {
        let mut h = Header::for_layout(self.o.len(), self.f.len(), self.data.len())
            .ok_or_else(|| too_large("file", span))?;
        h.version = self.version;
        let mut out = Vec::with_capacity(h.total_size());
        h.write_to_bin(&mut out)?;
        self.o.write_to_bin(&mut out)?;
        self.f.write_to_bin(&mut out)?;
        out.extend_from_slice(&self.data);
        debug!(
            objects = h.objects_num,
            fields = h.fields_num,
            data_len = h.data_size,
            "encoded file"
        );
        Ok(out)
    }
}
