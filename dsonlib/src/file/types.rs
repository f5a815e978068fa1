use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::{collections::HashMap, convert::TryFrom};

use super::{
    json::json_parser::{Parser, Token, TokenType},
    FieldType, File, Header, UnhashPolicy, Unhasher,
};
use crate::{
    err::{FromBinError, FromJsonError},
    util::{align_skip, name_hash},
};

/// On-disk shapes that cannot be told apart from generic types by structure alone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    /// Aligned 4-byte float.
    Float,
    /// Aligned run of 4-byte floats filling the whole payload.
    FloatArray,
    /// Aligned count, then that many 4-byte integers.
    IntVector,
    /// Aligned count, then that many length-prefixed strings, each aligned.
    StringVector,
    /// Aligned pair of 4-byte integers.
    TwoInt,
    /// Aligned pair of 4-byte booleans.
    TwoBool,
    /// Single printable byte.
    Char,
}

macro_rules! overrides {
    ($table:ident, $([$e:ident, $($i:literal),+]), + $(,)*) => {
        const $table: &[(Shape, &[&str])] = &[$((Shape::$e, &[$($i,)+]),)+];
    };
}

// Paths are written root to leaf. Earlier entries win.
#[rustfmt::skip]
overrides!(OVERRIDES,
    [FloatArray, "map", "bounds"],
    [FloatArray, "areas", "*", "bounds"],
    [FloatArray, "areas", "*", "tiles", "*", "mappos"],
    [FloatArray, "areas", "*", "tiles", "*", "sidepos"],

    [IntVector, "read_page_indexes"],
    [IntVector, "raid_read_page_indexes"],
    [IntVector, "raid_unread_page_indexes"],
    [IntVector, "dungeons_unlocked"],
    [IntVector, "played_video_list"],
    [IntVector, "trinket_retention_ids"],
    [IntVector, "last_party_guids"],
    [IntVector, "dungeon_history"],
    [IntVector, "buff_group_guids"],
    [IntVector, "result_event_history"],
    [IntVector, "dead_hero_entries"],
    [IntVector, "additional_mash_disabled_infestation_monster_class_ids"],
    [IntVector, "mash", "valid_additional_mash_entry_indexes"],
    [IntVector, "party", "heroes"],
    [IntVector, "skill_cooldown_keys"],
    [IntVector, "skill_cooldown_values"],
    [IntVector, "bufferedSpawningSlotsAvailable"],
    [IntVector, "curioGroups", "*", "curios"],
    [IntVector, "curioGroups", "*", "curio_table_entries"],
    [IntVector, "raid_finish_quirk_monster_class_ids"],
    [IntVector, "narration_audio_event_queue_tags"],
    [IntVector, "dispatched_events"],
    [IntVector, "backer_heroes", "*", "combat_skills"],
    [IntVector, "backer_heroes", "*", "camping_skills"],
    [IntVector, "backer_heroes", "*", "quirks"],

    [StringVector, "goal_ids"],
    [StringVector, "roaming_dungeon_2_ids", "*", "s"],
    [StringVector, "quirk_group"],
    [StringVector, "backgroundNames"],
    [StringVector, "backgroundGroups", "*", "backgrounds"],
    [StringVector, "backgroundGroups", "*", "background_table_entries"],

    [Float, "current_hp"],
    [Float, "m_Stress"],
    [Float, "actor", "buff_group", "*", "amount"],
    [Float, "chapters", "*", "*", "percent"],
    [Float, "non_rolled_additional_chances", "*", "chance"],
    [Float, "rarity_table", "*", "chance"],
    [Float, "chance_of_loot"],
    [Float, "shard_consume_percent"],
    [Float, "chances", "*"],
    [Float, "chance_sum"],

    [TwoInt, "killRange"],

    [TwoBool, "profile_options", "values", "quest_select_warnings"],
    [TwoBool, "profile_options", "values", "provision_warnings"],
    [TwoBool, "profile_options", "values", "deck_based_stage_coach"],
    [TwoBool, "profile_options", "values", "curio_tracker"],
    [TwoBool, "profile_options", "values", "dd_mode"],
    [TwoBool, "profile_options", "values", "corpses"],
    [TwoBool, "profile_options", "values", "stall_penalty"],
    [TwoBool, "profile_options", "values", "deaths_door_recovery_debuffs"],
    [TwoBool, "profile_options", "values", "retreats_can_fail"],
    [TwoBool, "profile_options", "values", "multiplied_enemy_crits"],

    [Char, "requirement_code"],
);

type Candidates = Vec<(usize, &'static [&'static str], Shape)>;

struct OverrideMap {
    by_leaf: HashMap<&'static str, Candidates>,
    // Patterns whose leaf segment is `*`
    wildcard: Candidates,
}

fn override_map() -> &'static OverrideMap {
    use once_cell::sync::OnceCell;
    static MAP: OnceCell<OverrideMap> = OnceCell::new();
    MAP.get_or_init(|| {
        let mut map = OverrideMap {
            by_leaf: HashMap::new(),
            wildcard: Vec::new(),
        };
        for (order, (shape, path)) in OVERRIDES.iter().enumerate() {
            if let Some((leaf, parents)) = path.split_last() {
                let entry = (order, parents, *shape);
                if *leaf == "*" {
                    map.wildcard.push(entry);
                } else {
                    map.by_leaf.entry(*leaf).or_insert_with(Vec::new).push(entry);
                }
            }
        }
        map
    })
}

/// Look up the override for a field given its enclosing object names (root first).
pub fn hardcoded_shape(parents: &'_ [impl AsRef<str>], name: &str) -> Option<Shape> {
    let map = override_map();
    map.by_leaf
        .get(name)
        .into_iter()
        .flatten()
        .chain(map.wildcard.iter())
        .filter(|(_, path, _)| {
            parents.len() >= path.len()
                && path
                    .iter()
                    .rev()
                    .zip(parents.iter().rev())
                    .all(|(&tst, frag)| tst == "*" || tst == frag.as_ref())
        })
        .min_by_key(|(order, _, _)| *order)
        .map(|(_, _, shape)| *shape)
}

fn read_str(bytes: &[u8]) -> Option<&str> {
    match bytes.split_last() {
        Some((0, s)) => std::str::from_utf8(s).ok(),
        _ => None,
    }
}

impl Shape {
    /// Decode a payload of this shape, returning `None` if the bytes do not fit it.
    ///
    /// `skip` is the alignment padding in front of aligned payloads.
    pub fn decode(self, payload: &[u8], skip: usize) -> Option<FieldType> {
        if self == Shape::Char {
            return match *payload {
                [c @ 0x20..=0x7E] => Some(FieldType::Char(char::from(c))),
                _ => None,
            };
        }

        let body = payload.get(skip..)?;
        match self {
            Shape::Float if body.len() == 4 => Some(FieldType::Float(LittleEndian::read_f32(body))),
            Shape::TwoInt if body.len() == 8 => Some(FieldType::TwoInt(
                LittleEndian::read_i32(&body[0..4]),
                LittleEndian::read_i32(&body[4..8]),
            )),
            Shape::TwoBool if body.len() == 8 => Some(FieldType::TwoBool(
                LittleEndian::read_u32(&body[0..4]) != 0,
                LittleEndian::read_u32(&body[4..8]) != 0,
            )),
            Shape::FloatArray if body.len() % 4 == 0 => Some(FieldType::FloatArray(
                body.chunks_exact(4).map(LittleEndian::read_f32).collect(),
            )),
            Shape::IntVector if body.len() >= 4 => {
                let num = LittleEndian::read_u32(&body[0..4]) as usize;
                if num.checked_add(1)?.checked_mul(4)? != body.len() {
                    return None;
                }
                Some(FieldType::IntVector(
                    body[4..].chunks_exact(4).map(LittleEndian::read_i32).collect(),
                ))
            }
            Shape::StringVector if body.len() >= 4 => {
                let num = LittleEndian::read_u32(&body[0..4]) as usize;
                let mut pos = 4;
                let mut v = Vec::new();
                for i in 0..num {
                    if i > 0 {
                        pos += align_skip(pos);
                    }
                    let len = LittleEndian::read_u32(body.get(pos..pos + 4)?) as usize;
                    pos += 4;
                    let s = read_str(body.get(pos..pos.checked_add(len)?)?)?;
                    v.push(s.into());
                    pos += len;
                }
                if pos != body.len() {
                    return None;
                }
                Some(FieldType::StringVector(v.into_boxed_slice()))
            }
            _ => None,
        }
    }

    /// Write the value whose first token is `tok` in this shape.
    ///
    /// Returns `Ok(false)` without consuming anything if `tok` cannot start a value of this shape.
    pub(crate) fn encode_json(
        self,
        tok: &Token<'_>,
        lex: &mut Parser<'_>,
        data: &mut Vec<u8>,
    ) -> Result<bool, FromJsonError> {
        match (self, tok.kind) {
            (Shape::Char, TokenType::String) if tok.dat.len() == 1 => {
                data.push(tok.dat.as_bytes()[0]);
            }
            (Shape::Float, TokenType::Number) => {
                align(data);
                data.write_f32::<LittleEndian>(parse_prim(tok, "float")?)?;
            }
            (Shape::Float, TokenType::String) => match float_bits(&tok.dat) {
                Some(bits) => {
                    align(data);
                    data.write_u32::<LittleEndian>(bits)?;
                }
                None => return Ok(false),
            },
            (Shape::FloatArray, TokenType::BeginArray) => {
                align(data);
                loop {
                    let tok = lex.exp_next()?;
                    match tok.kind {
                        TokenType::EndArray => break,
                        TokenType::Number => {
                            data.write_f32::<LittleEndian>(parse_prim(&tok, "float")?)?
                        }
                        TokenType::String => match float_bits(&tok.dat) {
                            Some(bits) => data.write_u32::<LittleEndian>(bits)?,
                            None => return Err(expected("float or float bits", &tok)),
                        },
                        _ => return Err(expected("number or ]", &tok)),
                    }
                }
            }
            (Shape::IntVector, TokenType::BeginArray) => {
                align(data);
                let mut vals: Vec<i32> = vec![];
                loop {
                    let tok = lex.exp_next()?;
                    match tok.kind {
                        TokenType::EndArray => break,
                        TokenType::Number => vals.push(parse_prim(&tok, "integer")?),
                        TokenType::String if tok.dat.starts_with("###") => {
                            vals.push(name_hash(&tok.dat[3..]))
                        }
                        _ => return Err(expected("integer, hashed string or ]", &tok)),
                    }
                }
                data.write_u32::<LittleEndian>(count(vals.len(), tok)?)?;
                for v in vals {
                    data.write_i32::<LittleEndian>(v)?;
                }
            }
            (Shape::StringVector, TokenType::BeginArray) => {
                align(data);
                let mut vals = vec![];
                loop {
                    let tok = lex.exp_next()?;
                    match tok.kind {
                        TokenType::EndArray => break,
                        TokenType::String => vals.push(tok),
                        _ => return Err(expected("string or ]", &tok)),
                    }
                }
                data.write_u32::<LittleEndian>(count(vals.len(), tok)?)?;
                for s in vals {
                    align(data);
                    write_str(data, &s)?;
                }
            }
            (Shape::TwoInt, TokenType::BeginArray) => {
                align(data);
                for _ in 0..2 {
                    let tok = lex.expect(TokenType::Number)?;
                    data.write_i32::<LittleEndian>(parse_prim(&tok, "integer")?)?;
                }
                lex.expect(TokenType::EndArray)?;
            }
            (Shape::TwoBool, TokenType::BeginArray) => {
                align(data);
                write_bool_pair(data, lex)?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Bit pattern of a float written as `"0x7FC00000"`, the text form of
/// NaN and the infinities.
pub(crate) fn float_bits(s: &str) -> Option<u32> {
    let hex = s.strip_prefix("0x")?;
    if hex.len() != 8 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

/// Pad the data block to the next 4-byte boundary.
pub(crate) fn align(data: &mut Vec<u8>) {
    let len = data.len() + align_skip(data.len());
    data.resize(len, 0);
}

pub(crate) fn parse_prim<T: std::str::FromStr>(
    tok: &Token<'_>,
    what: &str,
) -> Result<T, FromJsonError> {
    tok.dat.parse::<T>().map_err(|_| FromJsonError::LiteralFormat {
        what: what.to_owned(),
        first: tok.span.first,
        end: tok.span.end,
    })
}

pub(crate) fn expected(what: &str, tok: &Token<'_>) -> FromJsonError {
    FromJsonError::Expected {
        what: what.to_owned(),
        first: tok.span.first,
        end: tok.span.end,
    }
}

fn count(len: usize, tok: &Token<'_>) -> Result<u32, FromJsonError> {
    u32::try_from(len).map_err(|_| FromJsonError::TooLarge {
        what: "array",
        first: tok.span.first,
        end: tok.span.end,
    })
}

/// Length-prefixed, zero-terminated string.
pub(crate) fn write_str(data: &mut Vec<u8>, tok: &Token<'_>) -> Result<(), FromJsonError> {
    let len = u32::try_from(tok.dat.len() + 1).map_err(|_| FromJsonError::TooLarge {
        what: "string",
        first: tok.span.first,
        end: tok.span.end,
    })?;
    data.write_u32::<LittleEndian>(len)?;
    data.extend_from_slice(tok.dat.as_bytes());
    data.push(0);
    Ok(())
}

/// Remaining `bool, bool]` of a two-bool array whose `[` was already consumed.
pub(crate) fn write_bool_pair(data: &mut Vec<u8>, lex: &mut Parser<'_>) -> Result<(), FromJsonError> {
    for _ in 0..2 {
        let tok = lex.exp_next()?;
        let b = match tok.kind {
            TokenType::BoolTrue => 1,
            TokenType::BoolFalse => 0,
            _ => return Err(expected("true or false", &tok)),
        };
        data.write_u32::<LittleEndian>(b)?;
    }
    lex.expect(TokenType::EndArray)?;
    Ok(())
}

/// A leaf after type inference, with hash resolutions for its integers.
pub(crate) struct Inferred {
    pub tipe: FieldType,
    pub unhashed: Box<[Option<Box<str>>]>,
}

fn resolve<T: AsRef<str>>(
    ints: &[i32],
    names: &Unhasher<T>,
    policy: UnhashPolicy,
) -> Box<[Option<Box<str>>]> {
    if policy == UnhashPolicy::None || !ints.iter().any(|&i| names.unhash(i).is_some()) {
        return Box::new([]);
    }
    ints.iter().map(|&i| names.unhash(i).map(Box::from)).collect()
}

/// Determine the type of a leaf payload.
///
/// `at` is the offset of the payload within the buffer being decoded and is
/// only used to position errors of embedded files.
pub(crate) fn infer<T: AsRef<str>>(
    payload: &[u8],
    skip: usize,
    parents: &'_ [impl AsRef<str>],
    name: &str,
    names: &Unhasher<T>,
    policy: UnhashPolicy,
    at: usize,
) -> Result<Inferred, FromBinError> {
    let tipe = infer_type(payload, skip, parents, name, names, policy, at)?;
    let unhashed = match &tipe {
        FieldType::Int(i) => resolve(std::slice::from_ref(i), names, policy),
        FieldType::IntVector(v) => resolve(v, names, policy),
        _ => Box::new([]),
    };
    Ok(Inferred { tipe, unhashed })
}

fn infer_type<T: AsRef<str>>(
    payload: &[u8],
    skip: usize,
    parents: &'_ [impl AsRef<str>],
    name: &str,
    names: &Unhasher<T>,
    policy: UnhashPolicy,
    at: usize,
) -> Result<FieldType, FromBinError> {
    if let Some(tipe) = hardcoded_shape(parents, name).and_then(|s| s.decode(payload, skip)) {
        return Ok(tipe);
    }

    if let [b] = *payload {
        return Ok(match b {
            0x20..=0x7E => FieldType::Char(char::from(b)),
            _ => FieldType::Bool(b != 0),
        });
    }

    if let Some(body) = payload.get(skip..) {
        if body.len() == 8 {
            let (b1, b2) = (
                LittleEndian::read_u32(&body[0..4]),
                LittleEndian::read_u32(&body[4..8]),
            );
            if b1 <= 1 && b2 <= 1 {
                return Ok(FieldType::TwoBool(b1 == 1, b2 == 1));
            }
        }
        if body.len() == 4 {
            return Ok(FieldType::Int(LittleEndian::read_i32(body)));
        }
        if body.len() > 4 && LittleEndian::read_u32(&body[0..4]) as usize == body.len() - 4 {
            let content = &body[4..];
            if content.starts_with(&Header::MAGIC_NUMBER) {
                let inner = File::try_from_bin(content, names, policy).map_err(|e| {
                    FromBinError::Embedded {
                        at: at + skip + 4,
                        source: Box::new(e),
                    }
                })?;
                return Ok(FieldType::File(Box::new(inner)));
            }
            if let Some(s) = read_str(content) {
                return Ok(FieldType::String(s.into()));
            }
        }
    }

    Ok(FieldType::Unknown(payload.into()))
}
