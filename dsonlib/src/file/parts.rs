use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::{
    convert::TryFrom,
    io::Write,
    ops::{Index, IndexMut},
};

use super::{FieldIdx, ObjIdx};
use crate::{err::FromBinError, util::name_hash};

#[inline]
fn u32_at(buf: &[u8], at: usize) -> u32 {
    LittleEndian::read_u32(&buf[at..at + 4])
}

#[inline]
fn i32_at(buf: &[u8], at: usize) -> i32 {
    LittleEndian::read_i32(&buf[at..at + 4])
}

/// The fixed-size file header.
///
/// Reserved zero fields are ignored on read and written as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Word following the magic number. Carried through the text form as
    /// [`REVISION_FIELD`](crate::REVISION_FIELD) when non-zero.
    pub version: u32,
    pub header_len: u32,
    pub objects_size: u32,
    pub objects_num: u32,
    pub objects_offset: u32,
    pub fields_num: u32,
    pub fields_offset: u32,
    pub data_size: u32,
    pub data_offset: u32,
}

impl Header {
    pub const BIN_SIZE: usize = 64;
    pub const MAGIC_NUMBER: [u8; 4] = [0x01, 0xB1, 0x00, 0x00];

    pub fn try_from_bin(buf: &[u8]) -> Result<Self, FromBinError> {
        if buf.len() < 4 || buf[0..4] != Self::MAGIC_NUMBER {
            return Err(FromBinError::NotBinFile);
        }
        if buf.len() < Self::BIN_SIZE {
            return Err(FromBinError::UnexpectedEof {
                at: buf.len(),
                need: Self::BIN_SIZE - buf.len(),
            });
        }

        let h = Header {
            version: u32_at(buf, 4),
            header_len: u32_at(buf, 8),
            objects_size: u32_at(buf, 16),
            objects_num: u32_at(buf, 20),
            objects_offset: u32_at(buf, 24),
            fields_num: u32_at(buf, 44),
            fields_offset: u32_at(buf, 48),
            data_size: u32_at(buf, 56),
            data_offset: u32_at(buf, 60),
        };

        if h.header_len as usize != Self::BIN_SIZE {
            return Err(FromBinError::OffsetMismatch {
                at: 8,
                what: "header length",
                exp: Self::BIN_SIZE as u64,
                is: h.header_len.into(),
            });
        }
        if h.objects_offset != h.header_len {
            return Err(FromBinError::OffsetMismatch {
                at: 24,
                what: "meta1 offset",
                exp: h.header_len.into(),
                is: h.objects_offset.into(),
            });
        }
        if h.fields_offset < h.objects_offset {
            return Err(FromBinError::OffsetMismatch {
                at: 48,
                what: "meta2 offset",
                exp: h.objects_offset.into(),
                is: h.fields_offset.into(),
            });
        }
        if h.objects_size != h.fields_offset - h.objects_offset {
            return Err(FromBinError::OffsetMismatch {
                at: 16,
                what: "meta1 size",
                exp: (h.fields_offset - h.objects_offset).into(),
                is: h.objects_size.into(),
            });
        }
        if h.data_offset < h.fields_offset {
            return Err(FromBinError::OffsetMismatch {
                at: 60,
                what: "data offset",
                exp: h.fields_offset.into(),
                is: h.data_offset.into(),
            });
        }
        Ok(h)
    }

    /// Header for a freshly written file with the given block entry counts and data length.
    pub fn for_layout(objects_num: usize, fields_num: usize, data_size: usize) -> Option<Self> {
        let objects_size = u32::try_from(objects_num.checked_mul(ObjectInfo::BIN_SIZE)?).ok()?;
        let fields_size = u32::try_from(fields_num.checked_mul(FieldInfo::BIN_SIZE)?).ok()?;
        let header_len = Self::BIN_SIZE as u32;
        let fields_offset = header_len.checked_add(objects_size)?;
        let data_offset = fields_offset.checked_add(fields_size)?;
        let data_size = u32::try_from(data_size).ok()?;
        data_offset.checked_add(data_size)?;
        Some(Header {
            version: 0,
            header_len,
            objects_size,
            objects_num: u32::try_from(objects_num).ok()?,
            objects_offset: header_len,
            fields_num: u32::try_from(fields_num).ok()?,
            fields_offset,
            data_size,
            data_offset,
        })
    }

    /// Split `buf` into the meta1, meta2 and data blocks this header describes.
    pub fn blocks<'a>(&self, buf: &'a [u8]) -> Result<(&'a [u8], &'a [u8], &'a [u8]), FromBinError> {
        let meta1_start = self.objects_offset as usize;
        let meta2_start = self.fields_offset as usize;
        let data_start = self.data_offset as usize;
        let data_end = data_start
            .checked_add(self.data_size as usize)
            .ok_or_else(|| FromBinError::OffsetMismatch {
                at: 56,
                what: "data length",
                exp: u64::from(u32::MAX - self.data_offset),
                is: self.data_size.into(),
            })?;

        if buf.len() < data_end {
            return Err(FromBinError::UnexpectedEof {
                at: buf.len(),
                need: data_end - buf.len(),
            });
        }
        if buf.len() > data_end {
            return Err(FromBinError::TrailingData {
                at: data_end,
                remaining: buf.len() - data_end,
            });
        }

        let meta1 = &buf[meta1_start..meta2_start];
        check_block(meta1, meta1_start, "meta1", ObjectInfo::BIN_SIZE, self.objects_num)?;
        let meta2 = &buf[meta2_start..data_start];
        check_block(meta2, meta2_start, "meta2", FieldInfo::BIN_SIZE, self.fields_num)?;
        Ok((meta1, meta2, &buf[data_start..data_end]))
    }

    pub fn write_to_bin<W: Write>(&self, writer: &'_ mut W) -> std::io::Result<()> {
        writer.write_all(&Self::MAGIC_NUMBER)?;
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.header_len)?;
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(self.objects_size)?;
        writer.write_u32::<LittleEndian>(self.objects_num)?;
        writer.write_u32::<LittleEndian>(self.objects_offset)?;
        writer.write_u64::<LittleEndian>(0)?;
        writer.write_u64::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(self.fields_num)?;
        writer.write_u32::<LittleEndian>(self.fields_offset)?;
        writer.write_u32::<LittleEndian>(0)?;
        writer.write_u32::<LittleEndian>(self.data_size)?;
        writer.write_u32::<LittleEndian>(self.data_offset)?;
        Ok(())
    }

    pub fn total_size(&self) -> usize {
        self.data_offset as usize + self.data_size as usize
    }
}

fn check_block(
    block: &[u8],
    at: usize,
    name: &'static str,
    entry: usize,
    declared: u32,
) -> Result<(), FromBinError> {
    if block.len() % entry != 0 {
        return Err(FromBinError::BlockSize {
            at,
            block: name,
            size: block.len(),
            entry,
        });
    }
    if block.len() / entry != declared as usize {
        return Err(FromBinError::EntryCount {
            at,
            block: name,
            exp: declared as usize,
            is: block.len() / entry,
        });
    }
    Ok(())
}

/// One meta1 entry, describing an object field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Meta1 index of the enclosing object, -1 at top level.
    pub parent: i32,
    pub field: u32,
    pub num_direct_childs: u32,
    pub num_all_childs: u32,
}

impl ObjectInfo {
    pub const BIN_SIZE: usize = 16;
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Objects {
    objs: Vec<ObjectInfo>,
}

impl Objects {
    /// Decode an already size-checked meta1 block.
    pub fn from_bin(block: &[u8]) -> Self {
        let objs = block
            .chunks_exact(ObjectInfo::BIN_SIZE)
            .map(|c| ObjectInfo {
                parent: i32_at(c, 0),
                field: u32_at(c, 4),
                num_direct_childs: u32_at(c, 8),
                num_all_childs: u32_at(c, 12),
            })
            .collect();
        Objects { objs }
    }

    pub fn write_to_bin<W: Write>(&self, writer: &'_ mut W) -> std::io::Result<()> {
        for o in &self.objs {
            writer.write_i32::<LittleEndian>(o.parent)?;
            writer.write_u32::<LittleEndian>(o.field)?;
            writer.write_u32::<LittleEndian>(o.num_direct_childs)?;
            writer.write_u32::<LittleEndian>(o.num_all_childs)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn get(&self, idx: ObjIdx) -> Option<&ObjectInfo> {
        self.objs.get(idx.numeric() as usize)
    }

    /// Append a new entry with zero child counts, returning `None` once the
    /// 20-bit object index space in the field info word is exhausted.
    pub fn create_object(&mut self, field: FieldIdx, parent: Option<ObjIdx>) -> Option<ObjIdx> {
        let idx = u32::try_from(self.objs.len()).ok()?;
        if idx > FieldInfo::OBJ_IDX_BITS {
            return None;
        }
        self.objs.push(ObjectInfo {
            parent: parent.map(|p| p.numeric() as i32).unwrap_or(-1),
            field: field.numeric(),
            num_direct_childs: 0,
            num_all_childs: 0,
        });
        Some(ObjIdx(idx))
    }
}

impl Index<ObjIdx> for Objects {
    type Output = ObjectInfo;
    #[inline]
    fn index(&self, index: ObjIdx) -> &Self::Output {
        &self.objs[index.numeric() as usize]
    }
}

impl IndexMut<ObjIdx> for Objects {
    #[inline]
    fn index_mut(&mut self, index: ObjIdx) -> &mut Self::Output {
        &mut self.objs[index.numeric() as usize]
    }
}

/// One meta2 entry, present for every field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldInfo {
    pub name_hash: i32,
    pub offset: u32,
    /// Raw field info word as stored, including the ignored top bit.
    pub field_info: u32,
}

impl FieldInfo {
    pub const BIN_SIZE: usize = 12;
    pub const NAME_LEN_BITS: u32 = 0b1_1111_1111;
    pub const OBJ_IDX_BITS: u32 = 0b1111_1111_1111_1111_1111;

    pub fn is_object(&self) -> bool {
        (self.field_info & 0b1) == 1
    }

    /// Name length including the terminator.
    pub fn name_length(&self) -> u32 {
        (self.field_info >> 2) & Self::NAME_LEN_BITS
    }

    pub fn object_index(&self) -> Option<ObjIdx> {
        if self.is_object() {
            Some(ObjIdx((self.field_info >> 11) & Self::OBJ_IDX_BITS))
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fields {
    fields: Vec<FieldInfo>,
}

impl Fields {
    /// Decode an already size-checked meta2 block.
    pub fn from_bin(block: &[u8]) -> Self {
        let fields = block
            .chunks_exact(FieldInfo::BIN_SIZE)
            .map(|c| FieldInfo {
                name_hash: i32_at(c, 0),
                offset: u32_at(c, 4),
                field_info: u32_at(c, 8),
            })
            .collect();
        Fields { fields }
    }

    pub fn write_to_bin<W: Write>(&self, writer: &'_ mut W) -> std::io::Result<()> {
        for f in &self.fields {
            writer.write_i32::<LittleEndian>(f.name_hash)?;
            writer.write_u32::<LittleEndian>(f.offset)?;
            writer.write_u32::<LittleEndian>(f.field_info)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldIdx, &FieldInfo)> {
        self.fields
            .iter()
            .enumerate()
            .map(|(f, a)| (FieldIdx(f as u32), a))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Append an entry for a leaf field whose name starts at `offset` in the data block.
    ///
    /// Returns `None` if the name does not fit the 9-bit length or the index space is full.
    pub fn create_field(&mut self, name: &str, offset: u32) -> Option<FieldIdx> {
        let idx = u32::try_from(self.fields.len()).ok()?;
        let len = u32::try_from(name.len() + 1).ok()?;
        if len > FieldInfo::NAME_LEN_BITS {
            return None;
        }
        self.fields.push(FieldInfo {
            name_hash: name_hash(name),
            offset,
            field_info: len << 2,
        });
        Some(FieldIdx(idx))
    }

    /// Mark a field as an object stored at meta1 index `obj`.
    pub fn set_object(&mut self, field: FieldIdx, obj: ObjIdx) {
        self[field].field_info |= 0b1 | ((obj.numeric() & FieldInfo::OBJ_IDX_BITS) << 11);
    }
}

impl Index<FieldIdx> for Fields {
    type Output = FieldInfo;
    #[inline]
    fn index(&self, index: FieldIdx) -> &Self::Output {
        &self.fields[index.numeric() as usize]
    }
}

impl IndexMut<FieldIdx> for Fields {
    #[inline]
    fn index_mut(&mut self, index: FieldIdx) -> &mut Self::Output {
        &mut self.fields[index.numeric() as usize]
    }
}
