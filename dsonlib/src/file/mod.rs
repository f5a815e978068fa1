use std::{
    collections::{HashMap, HashSet},
    convert::AsRef,
    ops::Index,
    str::FromStr,
};

use crate::{err::UnknownPolicy, util::name_hash};

mod bin;
pub(crate) mod json;
mod parts;
mod types;
pub(crate) mod writer;

pub use parts::{FieldInfo, Header};

#[cfg(feature = "string_cache")]
pub type NameType = string_cache::Atom<string_cache::EmptyStaticAtomSet>;
#[cfg(not(feature = "string_cache"))]
pub type NameType = Box<str>;

/// A map from name hash -> name to make the JSON format more legible.
///
/// User-provided in [`File::try_from_bin`]. Offering a name whose hash is
/// already present replaces the earlier name.
#[derive(Debug, Default)]
pub struct Unhasher<T: AsRef<str>> {
    map: HashMap<i32, T>,
}

impl<T: AsRef<str>> Unhasher<T> {
    /// Create a new empty [`Unhasher`].
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Offer a single name that could potentially appear in a save file in hashed form.
    pub fn offer_name(&mut self, name: T) {
        self.map.insert(name_hash(name.as_ref()), name);
    }

    /// Offer names that could potentially appear in a save file in hashed form.
    pub fn offer_names<I: IntoIterator<Item = T>>(&mut self, names: I) {
        for name in names {
            self.offer_name(name);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn unhash(&self, i: i32) -> Option<&str> {
        self.map.get(&i).map(|s| s.as_ref())
    }
}

impl Unhasher<&str> {
    /// Create an empty [`Unhasher`]. Shorthand for `Unhasher::<&str>::new()`.
    pub fn empty() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

/// How integers that match an offered name are rendered.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnhashPolicy {
    /// Always render the integer.
    None,
    /// Render the bare name. Readable, but the name re-encodes as a string.
    Unhash,
    /// Render `"###name"`, which re-encodes to the same integer.
    PoundUnhash,
}

impl Default for UnhashPolicy {
    fn default() -> Self {
        UnhashPolicy::PoundUnhash
    }
}

impl FromStr for UnhashPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(UnhashPolicy::None),
            "unhash" => Ok(UnhashPolicy::Unhash),
            "pound-unhash" | "pound_unhash" => Ok(UnhashPolicy::PoundUnhash),
            _ => Err(UnknownPolicy(s.to_owned())),
        }
    }
}

/// A decoded DSON file.
///
/// Fields live in a flat arena in directory order; objects refer to their
/// children and children to their parent by [`FieldIdx`].
///
/// # A note on binary file identity
///
/// Decoding and re-encoding a file that contains the same field name twice
/// within one object does not reproduce it: only the first occurrence is
/// rendered. Use [`File::has_duplicate_fields`] to detect such files.
#[derive(Clone, Debug, PartialEq)]
pub struct File {
    h: Header,
    f: parts::Fields,
    dat: Data,
    roots: Vec<FieldIdx>,
    unhash: UnhashPolicy,
}

/// Represents the meta1 object index. Always less than `2^20`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ObjIdx(pub(crate) u32);

impl ObjIdx {
    /// Returns the numeric value of this object index
    pub fn numeric(self) -> u32 {
        self.0
    }
}

/// Index of a field within its [`File`], equal to its meta2 entry index.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FieldIdx(pub(crate) u32);

impl FieldIdx {
    /// Returns the numeric value of this field index
    pub fn numeric(self) -> u32 {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    name: NameType,
    parent: Option<FieldIdx>,
    tipe: FieldType,
    // Names resolved for `Int`/`IntVector` values, empty if nothing resolved
    unhashed: Box<[Option<Box<str>>]>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> &FieldType {
        &self.tipe
    }

    pub fn parent(&self) -> Option<FieldIdx> {
        self.parent
    }

    /// Children of an object field in file order; empty for every other type.
    pub fn children(&self) -> &[FieldIdx] {
        match &self.tipe {
            FieldType::Object(c) => c,
            _ => &[],
        }
    }

    /// The name resolved for the `n`th integer of this field, if any.
    pub fn unhashed(&self, n: usize) -> Option<&str> {
        self.unhashed.get(n).and_then(|s| s.as_deref())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Data {
    dat: Vec<Field>,
}

impl Index<FieldIdx> for Data {
    type Output = Field;
    #[inline]
    fn index(&self, index: FieldIdx) -> &Self::Output {
        &self.dat[index.0 as usize]
    }
}

impl Data {
    fn iter(&self) -> impl Iterator<Item = (FieldIdx, &Field)> {
        self.dat
            .iter()
            .enumerate()
            .map(|(i, f)| (FieldIdx(i as u32), f))
    }

    fn len(&self) -> usize {
        self.dat.len()
    }

    fn create_data(
        &mut self,
        name: NameType,
        parent: Option<FieldIdx>,
        tipe: FieldType,
        unhashed: Box<[Option<Box<str>>]>,
    ) -> FieldIdx {
        let idx = FieldIdx(self.dat.len() as u32);
        self.dat.push(Field {
            name,
            parent,
            tipe,
            unhashed,
        });
        idx
    }

    fn push_child(&mut self, parent: FieldIdx, child: FieldIdx) {
        if let FieldType::Object(ref mut v) = self.dat[parent.0 as usize].tipe {
            v.push(child);
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldType {
    Bool(bool),
    TwoBool(bool, bool),
    Int(i32),
    Float(f32),
    Char(char),
    String(Box<str>),
    IntVector(Box<[i32]>),
    StringVector(Box<[Box<str>]>),
    FloatArray(Box<[f32]>),
    TwoInt(i32, i32),
    File(Box<File>),
    Object(Vec<FieldIdx>),
    /// Payload that matched no rule, kept verbatim.
    Unknown(Box<[u8]>),
}

impl FieldType {
    /// Short type name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        use FieldType::*;
        match self {
            Bool(_) => "bool",
            TwoBool(_, _) => "two_bool",
            Int(_) => "int",
            Float(_) => "float",
            Char(_) => "char",
            String(_) => "string",
            IntVector(_) => "int_vector",
            StringVector(_) => "string_vector",
            FloatArray(_) => "float_array",
            TwoInt(_, _) => "two_int",
            File(_) => "file",
            Object(_) => "object",
            Unknown(_) => "unknown",
        }
    }
}

impl File {
    pub fn header(&self) -> &Header {
        &self.h
    }

    /// Policy the file was decoded with.
    pub fn unhash_policy(&self) -> UnhashPolicy {
        self.unhash
    }

    /// Top-level fields in file order.
    pub fn root_fields(&self) -> &[FieldIdx] {
        &self.roots
    }

    pub fn field(&self, idx: FieldIdx) -> Option<&Field> {
        self.dat.dat.get(idx.0 as usize)
    }

    /// All fields in directory order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldIdx, &Field)> {
        self.dat.iter()
    }

    /// The raw meta2 entry of a field.
    pub fn field_info(&self, idx: FieldIdx) -> &FieldInfo {
        &self.f[idx]
    }

    /// Names from the top-level field down to `idx`.
    pub fn name_path(&self, idx: FieldIdx) -> Vec<&str> {
        let mut path = vec![];
        let mut cur = Some(idx);
        while let Some(i) = cur {
            let field = &self.dat[i];
            path.push(field.name());
            cur = field.parent;
        }
        path.reverse();
        path
    }

    /// Whether some object (or the top level) contains the same field name
    /// twice. Such files lose the later fields when rendered, so they will not
    /// re-encode to the same size.
    pub fn has_duplicate_fields(&self) -> bool {
        self.has_duplicates_in(&self.roots)
    }

    fn has_duplicates_in(&self, fields: &[FieldIdx]) -> bool {
        let mut seen = HashSet::new();
        for &idx in fields {
            let field = &self.dat[idx];
            if !seen.insert(field.name()) {
                return true;
            }
            let nested = match &field.tipe {
                FieldType::Object(c) => self.has_duplicates_in(c),
                FieldType::File(f) => f.has_duplicate_fields(),
                _ => false,
            };
            if nested {
                return true;
            }
        }
        false
    }
}

impl Index<FieldIdx> for File {
    type Output = Field;
    #[inline]
    fn index(&self, index: FieldIdx) -> &Self::Output {
        &self.dat[index]
    }
}
