use tracing::{debug, trace, warn};

use super::{
    parts::{FieldInfo, Fields, ObjectInfo, Objects},
    types::infer,
    Data, FieldIdx, FieldType, File, Header, NameType, UnhashPolicy, Unhasher,
};
use crate::{
    err::FromBinError,
    util::{align_skip, name_hash},
};

impl File {
    /// Attempt to create a save [`File`] from a binary encoded buffer.
    ///
    /// Integers matching a name offered to `names` are resolved according to
    /// `policy`. The buffer must hold exactly one file, trailing bytes are an error.
    pub fn try_from_bin<T: AsRef<str>>(
        buf: &[u8],
        names: &Unhasher<T>,
        policy: UnhashPolicy,
    ) -> Result<Self, FromBinError> {
        let h = Header::try_from_bin(buf)?;
        let (meta1, meta2, data) = h.blocks(buf)?;
        debug!(
            objects = h.objects_num,
            fields = h.fields_num,
            data_len = h.data_size,
            data_offset = h.data_offset,
            "decoding layout"
        );
        let o = Objects::from_bin(meta1);
        let f = Fields::from_bin(meta2);
        let (dat, roots) = decode_fields(data, &f, &o, &h, names, policy)?;
        Ok(File {
            h,
            f,
            dat,
            roots,
            unhash: policy,
        })
    }
}

/// An object whose children are still being attached.
struct Frame {
    field: FieldIdx,
    /// Running object counter at the time the object was opened.
    obj: i32,
    /// Position of the meta1 entry, for error reporting.
    entry_at: usize,
    num_direct_childs: u32,
    num_all_childs: u32,
    attached: u32,
}

fn read_name<'a>(
    data: &'a [u8],
    field: &FieldInfo,
    data_offset: usize,
) -> Result<&'a str, FromBinError> {
    let off = field.offset as usize;
    let len = field.name_length() as usize;
    let at = data_offset + off;
    if len == 0 {
        return Err(FromBinError::NameFormat { at });
    }
    let end = off + len;
    let bytes = data.get(off..end).ok_or_else(|| FromBinError::UnexpectedEof {
        at: data_offset + data.len(),
        need: end.saturating_sub(data.len()),
    })?;
    match bytes.split_last() {
        Some((0, s)) if !s.contains(&0) => {
            std::str::from_utf8(s).map_err(|_| FromBinError::NameFormat { at })
        }
        _ => Err(FromBinError::NameFormat { at }),
    }
}

fn decode_fields<T: AsRef<str>>(
    data: &[u8],
    f: &Fields,
    o: &Objects,
    h: &Header,
    names: &Unhasher<T>,
    policy: UnhashPolicy,
) -> Result<(Data, Vec<FieldIdx>), FromBinError> {
    let data_offset = h.data_offset as usize;
    let fields_offset = h.fields_offset as usize;
    let objects_offset = h.objects_offset as usize;

    let mut offsets = f.iter().map(|(_, i)| i.offset as usize).collect::<Vec<_>>();
    offsets.sort_unstable();
    offsets.dedup();

    let mut dat = Data::default();
    let mut roots = vec![];
    let mut stack: Vec<Frame> = vec![];
    let mut path: Vec<NameType> = vec![];
    let mut counter: i32 = -1;

    for (idx, field) in f.iter() {
        let entry_at = fields_offset + idx.numeric() as usize * FieldInfo::BIN_SIZE;
        let name = read_name(data, field, data_offset)?;
        let hash = name_hash(name);
        if hash != field.name_hash {
            return Err(FromBinError::HashMismatch {
                at: entry_at,
                name: name.to_owned(),
                exp: field.name_hash,
                is: hash,
            });
        }

        let parent = stack.last().map(|fr| fr.field);
        if parent.is_none() && !field.is_object() {
            return Err(FromBinError::MissingRoot {
                at: data_offset + field.offset as usize,
            });
        }

        let (created, new_frame) = if let Some(obj_idx) = field.object_index() {
            let info: &ObjectInfo = o.get(obj_idx).ok_or_else(|| FromBinError::ObjectIndex {
                at: entry_at + 8,
                idx: obj_idx.numeric() as usize,
            })?;
            let obj_at = objects_offset + obj_idx.numeric() as usize * ObjectInfo::BIN_SIZE;
            let top = stack.last().map(|fr| fr.obj).unwrap_or(-1);
            if info.parent != top {
                return Err(FromBinError::ParentMismatch {
                    at: obj_at,
                    exp: top,
                    is: info.parent,
                });
            }
            counter += 1;
            let created = dat.create_data(
                NameType::from(name),
                parent,
                FieldType::Object(vec![]),
                Box::default(),
            );
            let frame = Frame {
                field: created,
                obj: counter,
                entry_at: obj_at,
                num_direct_childs: info.num_direct_childs,
                num_all_childs: info.num_all_childs,
                attached: 0,
            };
            (created, Some(frame))
        } else {
            let payload_start = field.offset as usize + field.name_length() as usize;
            let pos = offsets.partition_point(|&x| x <= field.offset as usize);
            let payload_end = offsets.get(pos).copied().unwrap_or(data.len());
            let payload = data.get(payload_start..payload_end).ok_or_else(|| {
                FromBinError::OffsetMismatch {
                    at: entry_at + 4,
                    what: "field payload",
                    exp: payload_start as u64,
                    is: payload_end as u64,
                }
            })?;
            let inferred = infer(
                payload,
                align_skip(payload_start),
                &path,
                name,
                names,
                policy,
                data_offset + payload_start,
            )?;
            trace!(field = name, kind = inferred.tipe.kind_name(), len = payload.len());
            if let FieldType::Unknown(_) = inferred.tipe {
                warn!(
                    field = name,
                    parents = ?path,
                    at = data_offset + payload_start,
                    len = payload.len(),
                    "payload matched no known type"
                );
            }
            let created =
                dat.create_data(NameType::from(name), parent, inferred.tipe, inferred.unhashed);
            (created, None)
        };

        match stack.last_mut() {
            Some(top) => {
                dat.push_child(top.field, created);
                top.attached += 1;
            }
            None => roots.push(created),
        }

        if let Some(frame) = new_frame {
            path.push(NameType::from(name));
            stack.push(frame);
        }

        while let Some(top) = stack.last() {
            if top.attached < top.num_direct_childs {
                break;
            }
            let all = created.numeric() - top.field.numeric();
            if all != top.num_all_childs {
                return Err(FromBinError::ChildCount {
                    at: top.entry_at,
                    exp: top.num_all_childs as usize,
                    is: all as usize,
                });
            }
            stack.pop();
            path.pop();
        }
    }

    if !stack.is_empty() {
        return Err(FromBinError::Unterminated {
            at: data_offset + data.len(),
            open: stack.len(),
        });
    }
    let found = (counter + 1) as usize;
    if found != h.objects_num as usize {
        return Err(FromBinError::ObjectCount {
            at: 20,
            exp: h.objects_num as usize,
            is: found,
        });
    }
    debug!(fields = dat.len(), roots = roots.len(), "decoded hierarchy");
    Ok((dat, roots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::writer::encode;

    // {"base_root" : {"v" : 42}}
    #[rustfmt::skip]
    const BASE_ROOT: [u8; 120] = [
        0x01, 0xB1, 0x00, 0x00, 0, 0, 0, 0, 64, 0, 0, 0, 0, 0, 0, 0,
        16, 0, 0, 0, 1, 0, 0, 0, 64, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0,
        80, 0, 0, 0, 0, 0, 0, 0, 16, 0, 0, 0, 104, 0, 0, 0,
        // meta1
        0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0,
        // meta2
        0xE2, 0x49, 0x90, 0x46, 0, 0, 0, 0, 41, 0, 0, 0,
        118, 0, 0, 0, 10, 0, 0, 0, 8, 0, 0, 0,
        // data
        b'b', b'a', b's', b'e', b'_', b'r', b'o', b'o', b't', 0,
        b'v', 0, 42, 0, 0, 0,
    ];

    fn decode(buf: &[u8]) -> Result<File, FromBinError> {
        File::try_from_bin(buf, &Unhasher::empty(), UnhashPolicy::None)
    }

    #[test]
    fn base_root_fixture_hash() {
        let stored = i32::from_le_bytes([0xE2, 0x49, 0x90, 0x46]);
        assert_eq!(name_hash("base_root"), stored);
    }

    #[test]
    fn decodes_hierarchy() {
        let file = decode(&BASE_ROOT).unwrap();
        assert_eq!(file.root_fields().len(), 1);
        let root = &file[file.root_fields()[0]];
        assert_eq!(root.name(), "base_root");
        assert_eq!(root.parent(), None);
        assert_eq!(root.children().len(), 1);

        let v_idx = root.children()[0];
        let v = &file[v_idx];
        assert_eq!(v.field_type(), &FieldType::Int(42));
        assert_eq!(v.parent(), Some(file.root_fields()[0]));
        assert_eq!(file.name_path(v_idx), vec!["base_root", "v"]);
        assert!(file.field_info(v_idx).offset == 10);
        assert!(!file.has_duplicate_fields());
    }

    #[test]
    fn rejects_hash_mismatch() {
        let mut buf = BASE_ROOT;
        buf[80] ^= 1;
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FromBinError::HashMismatch { at: 80, .. }), "{:?}", err);
    }

    #[test]
    fn rejects_bad_name() {
        let mut buf = BASE_ROOT;
        // Terminator of "base_root"
        buf[113] = b'!';
        assert!(matches!(
            decode(&buf),
            Err(FromBinError::NameFormat { at: 104 })
        ));
    }

    #[test]
    fn rejects_parent_mismatch() {
        let mut buf = BASE_ROOT;
        buf[64..68].copy_from_slice(&0i32.to_le_bytes());
        let err = decode(&buf).unwrap_err();
        assert!(
            matches!(err, FromBinError::ParentMismatch { at: 64, exp: -1, is: 0 }),
            "{:?}",
            err
        );
    }

    #[test]
    fn rejects_child_counts() {
        let mut buf = BASE_ROOT;
        // num_all_childs
        buf[76] = 2;
        let err = decode(&buf).unwrap_err();
        assert!(matches!(err, FromBinError::ChildCount { at: 64, exp: 2, is: 1 }), "{:?}", err);

        let mut buf = BASE_ROOT;
        // num_direct_childs
        buf[72] = 2;
        let err = decode(&buf).unwrap_err();
        assert!(
            matches!(err, FromBinError::Unterminated { at: 120, open: 1 }),
            "{:?}",
            err
        );
    }

    #[test]
    fn rejects_leaf_at_top_level() {
        let mut buf = BASE_ROOT;
        // Clear the object bit of "base_root"
        buf[88] = 40;
        assert!(matches!(
            decode(&buf),
            Err(FromBinError::MissingRoot { at: 104 })
        ));
    }

    #[test]
    fn rejects_object_index_out_of_range() {
        let mut buf = BASE_ROOT;
        buf[88..92].copy_from_slice(&(41u32 | (5 << 11)).to_le_bytes());
        assert!(matches!(
            decode(&buf),
            Err(FromBinError::ObjectIndex { at: 88, idx: 5 })
        ));
    }

    #[test]
    fn empty_objects_pop_immediately() {
        let bin = encode(
            "{\n    \"a\" : {\n        \"e\" : { },\n        \"x\" : 1\n    },\n    \"b\" : { }\n}",
        )
        .unwrap();
        let file = decode(&bin).unwrap();
        let roots = file.root_fields();
        assert_eq!(roots.len(), 2);
        let a = &file[roots[0]];
        assert_eq!(a.children().len(), 2);
        assert_eq!(file[a.children()[0]].field_type(), &FieldType::Object(vec![]));
        assert_eq!(file[a.children()[1]].field_type(), &FieldType::Int(1));
        assert!(file[roots[1]].children().is_empty());
    }

    #[test]
    fn embedded_errors_carry_absolute_offsets() {
        let bin = encode("{\n    \"o\" : {\n        \"raw_data\" : {\n            \"i\" : { }\n        }\n    }\n}")
            .unwrap();
        let file = decode(&bin).unwrap();
        let o = &file[file.root_fields()[0]];
        let raw = &file[o.children()[0]];
        let inner = match raw.field_type() {
            FieldType::File(inner) => inner,
            other => panic!("expected embedded file, got {:?}", other),
        };
        assert_eq!(inner[inner.root_fields()[0]].name(), "i");

        // Break the stored hash of the embedded root
        let start = bin
            .windows(4)
            .skip(4)
            .position(|w| w == Header::MAGIC_NUMBER)
            .unwrap()
            + 4;
        let mut broken = bin.clone();
        broken[start + 80] ^= 1;
        let err = decode(&broken).unwrap_err();
        assert!(matches!(err, FromBinError::Embedded { .. }), "{:?}", err);
        assert_eq!(err.offset(), start + 80);
    }

    #[test]
    fn rejects_object_count() {
        let h = Header::for_layout(2, 1, 2).unwrap();
        let mut buf = vec![];
        h.write_to_bin(&mut buf).unwrap();
        // Two meta1 entries, only one referenced
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        buf.extend_from_slice(&[0; 12]);
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        buf.extend_from_slice(&[0; 12]);
        buf.extend_from_slice(&name_hash("a").to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(1u32 | (2 << 2)).to_le_bytes());
        buf.extend_from_slice(b"a\0");
        let err = decode(&buf).unwrap_err();
        assert!(
            matches!(err, FromBinError::ObjectCount { at: 20, exp: 2, is: 1 }),
            "{:?}",
            err
        );
    }

    #[test]
    fn truncated_name_reports_missing_bytes() {
        let mut buf = BASE_ROOT;
        // "v" claims a ten byte name, ending four bytes past the data block
        buf[100..104].copy_from_slice(&(10u32 << 2).to_le_bytes());
        let err = decode(&buf).unwrap_err();
        assert!(
            matches!(err, FromBinError::UnexpectedEof { at: 120, need: 4 }),
            "{:?}",
            err
        );
    }

    #[test]
    fn payloads_follow_data_order() {
        // Directory order r, a, b; data order r, b, a
        let h = Header::for_layout(1, 3, 16).unwrap();
        let mut buf = vec![];
        h.write_to_bin(&mut buf).unwrap();
        for v in &[-1i32, 0, 2, 2] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for (name, offset, info) in &[("r", 0u32, 1u32 | (2 << 2)), ("a", 8, 2 << 2), ("b", 2, 2 << 2)] {
            buf.extend_from_slice(&name_hash(name).to_le_bytes());
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&info.to_le_bytes());
        }
        buf.extend_from_slice(b"r\0b\0");
        buf.extend_from_slice(&9i32.to_le_bytes());
        buf.extend_from_slice(b"a\0\0\0");
        buf.extend_from_slice(&7i32.to_le_bytes());
        assert_eq!(buf.len(), h.total_size());

        let file = decode(&buf).unwrap();
        let r = &file[file.root_fields()[0]];
        let a = &file[r.children()[0]];
        let b = &file[r.children()[1]];
        assert_eq!((a.name(), a.field_type()), ("a", &FieldType::Int(7)));
        assert_eq!((b.name(), b.field_type()), ("b", &FieldType::Int(9)));
        assert_eq!(
            file.to_json_string(false),
            "{\n    \"r\" : {\n        \"a\" : 7,\n        \"b\" : 9\n    }\n}"
        );
    }
}
