//! Reading and writing DSON, the binary save format of Darkest Dungeon, and
//! its editable extended-JSON text form.
//!
//! ```
//! use dsonlib::{encode, File, UnhashPolicy, Unhasher};
//!
//! let bin = encode("{\"base_root\" : {\"v\" : 42}}").unwrap();
//! let file = File::try_from_bin(&bin, &Unhasher::empty(), UnhashPolicy::default()).unwrap();
//! assert_eq!(
//!     file.to_json_string(false),
//!     "{\n    \"base_root\" : {\n        \"v\" : 42\n    }\n}"
//! );
//! assert_eq!(encode(&file.to_json_string(false)).unwrap(), bin);
//! ```

pub mod err;
mod file;
mod util;

pub use file::{
    json::REVISION_FIELD,
    writer::{encode, encode_with, EncodeOptions},
    Field, FieldIdx, FieldInfo, FieldType, File, Header, NameType, ObjIdx, UnhashPolicy,
    Unhasher,
};
pub use util::name_hash;
