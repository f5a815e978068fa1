use std::{collections::HashSet, io::Write};

use tracing::warn;

use super::{Field, FieldIdx, FieldType, File, UnhashPolicy};
use crate::util::{escape, hex};

pub(crate) mod json_parser;

const INDENT: &[u8] = b"    ";

/// Reserved top-level key holding a non-zero header version word.
pub const REVISION_FIELD: &str = "__revision_dont_touch";

impl File {
    /// Write this [`File`] as extended JSON.
    ///
    /// With `debug`, every field is preceded by a `//` comment with its raw
    /// field info, the inferred type, hashed integers and the raw bytes of
    /// payloads that could not be typed. The comments are skipped when the
    /// text is encoded again.
    pub fn write_to_json<W: Write>(&self, mut writer: W, debug: bool) -> std::io::Result<()> {
        self.write_file(writer.by_ref(), &mut vec![], debug)
    }

    /// Render this [`File`] to a string. See [`File::write_to_json`].
    pub fn to_json_string(&self, debug: bool) -> String {
        let mut out = vec![];
        // Writing into a Vec does not fail
        let _ = self.write_to_json(&mut out, debug);
        String::from_utf8_lossy(&out).into_owned()
    }

    fn write_file<W: Write>(
        &self,
        writer: &'_ mut W,
        indent: &mut Vec<u8>,
        debug: bool,
    ) -> std::io::Result<()> {
        self.write_object(&self.roots, self.h.version, writer, indent, debug)
    }

    /// Write an object. A non-zero `revision` is written as the first key.
    fn write_object<W: Write>(
        &self,
        fields: &[FieldIdx],
        revision: u32,
        writer: &'_ mut W,
        indent: &mut Vec<u8>,
        debug: bool,
    ) -> std::io::Result<()> {
        let mut seen = HashSet::new();
        let unique = fields
            .iter()
            .copied()
            .filter(|&idx| {
                let name = self.dat[idx].name();
                let first = seen.insert(name);
                if !first {
                    warn!(path = ?self.name_path(idx), "dropping duplicate field");
                }
                first
            })
            .collect::<Vec<_>>();

        if unique.is_empty() && revision == 0 {
            return writer.write_all(b"{ }");
        }

        writer.write_all(b"{\n")?;
        indent.extend_from_slice(INDENT);
        if revision != 0 {
            writer.write_all(indent)?;
            write_quoted(writer, REVISION_FIELD)?;
            writer.write_all(b" : ")?;
            writer.write_all(itoa::Buffer::new().format(revision).as_bytes())?;
            if !unique.is_empty() {
                writer.write_all(b",\n")?;
            }
        }
        for (n, &idx) in unique.iter().enumerate() {
            if n > 0 {
                writer.write_all(b",\n")?;
            }
            self.write_field(idx, writer, indent, debug)?;
        }
        indent.truncate(indent.len() - INDENT.len());
        writer.write_all(b"\n")?;
        writer.write_all(indent)?;
        writer.write_all(b"}")
    }

    fn write_debug_line<W: Write>(
        &self,
        idx: FieldIdx,
        writer: &'_ mut W,
        indent: &[u8],
    ) -> std::io::Result<()> {
        let field = &self.dat[idx];
        writer.write_all(indent)?;
        write!(
            writer,
            "// field_info: 0x{:08X}, type: {}",
            self.f[idx].field_info,
            field.tipe.kind_name()
        )?;
        match &field.tipe {
            FieldType::Int(i) if field.unhashed(0).is_some() => write!(writer, ", hashed: {}", i)?,
            FieldType::IntVector(v) if !field.unhashed.is_empty() => {
                write!(writer, ", hashed: {:?}", v)?
            }
            FieldType::Unknown(raw) => write!(writer, ", raw: {}", hex(raw))?,
            _ => {}
        }
        writer.write_all(b"\n")
    }

    fn write_field<W: Write>(
        &self,
        idx: FieldIdx,
        writer: &'_ mut W,
        indent: &mut Vec<u8>,
        debug: bool,
    ) -> std::io::Result<()> {
        use FieldType::*;

        if debug {
            self.write_debug_line(idx, writer, indent)?;
        }

        let field = &self.dat[idx];
        writer.write_all(indent)?;
        write_quoted(writer, field.name())?;
        writer.write_all(b" : ")?;
        match &field.tipe {
            Bool(b) => write_bool(writer, *b)?,
            TwoBool(b1, b2) => {
                writer.write_all(b"[")?;
                write_bool(writer, *b1)?;
                writer.write_all(b", ")?;
                write_bool(writer, *b2)?;
                writer.write_all(b"]")?;
            }
            Int(i) => self.write_int(writer, field, 0, *i)?,
            Float(f) => write_float(writer, &mut dtoa::Buffer::new(), *f)?,
            Char(c) => {
                let mut buf = [0u8; 4];
                write_quoted(writer, c.encode_utf8(&mut buf))?;
            }
            String(s) => write_quoted(writer, s)?,
            IntVector(v) => {
                writer.write_all(b"[")?;
                for (n, i) in v.iter().enumerate() {
                    if n > 0 {
                        writer.write_all(b", ")?;
                    }
                    self.write_int(writer, field, n, *i)?;
                }
                writer.write_all(b"]")?;
            }
            StringVector(v) => {
                writer.write_all(b"[")?;
                for (n, s) in v.iter().enumerate() {
                    if n > 0 {
                        writer.write_all(b", ")?;
                    }
                    write_quoted(writer, s)?;
                }
                writer.write_all(b"]")?;
            }
            FloatArray(v) => {
                let mut buf = dtoa::Buffer::new();
                writer.write_all(b"[")?;
                for (n, f) in v.iter().enumerate() {
                    if n > 0 {
                        writer.write_all(b", ")?;
                    }
                    write_float(writer, &mut buf, *f)?;
                }
                writer.write_all(b"]")?;
            }
            TwoInt(i1, i2) => {
                let mut buf = itoa::Buffer::new();
                writer.write_all(b"[")?;
                writer.write_all(buf.format(*i1).as_bytes())?;
                writer.write_all(b", ")?;
                writer.write_all(buf.format(*i2).as_bytes())?;
                writer.write_all(b"]")?;
            }
            File(inner) => inner.write_file(writer, indent, debug)?,
            Object(children) => self.write_object(children, 0, writer, indent, debug)?,
            Unknown(_) => writer.write_all(b"null")?,
        }
        Ok(())
    }

    fn write_int<W: Write>(
        &self,
        writer: &'_ mut W,
        field: &Field,
        n: usize,
        i: i32,
    ) -> std::io::Result<()> {
        match (self.unhash, field.unhashed(n)) {
            (UnhashPolicy::PoundUnhash, Some(name)) => {
                writer.write_all(b"\"###")?;
                writer.write_all(escape(name).as_bytes())?;
                writer.write_all(b"\"")
            }
            (UnhashPolicy::Unhash, Some(name)) => write_quoted(writer, name),
            _ => writer.write_all(itoa::Buffer::new().format(i).as_bytes()),
        }
    }
}

fn write_bool<W: Write>(writer: &'_ mut W, b: bool) -> std::io::Result<()> {
    writer.write_all(if b { b"true" } else { b"false" })
}

// NaN and the infinities have no number literal, their bits are written instead
fn write_float<W: Write>(writer: &'_ mut W, buf: &mut dtoa::Buffer, f: f32) -> std::io::Result<()> {
    if f.is_finite() {
        writer.write_all(buf.format(f).as_bytes())
    } else {
        write!(writer, "\"0x{:08X}\"", f.to_bits())
    }
}

fn write_quoted<W: Write>(writer: &'_ mut W, s: &str) -> std::io::Result<()> {
    writer.write_all(b"\"")?;
    writer.write_all(escape(s).as_bytes())?;
    writer.write_all(b"\"")
}
