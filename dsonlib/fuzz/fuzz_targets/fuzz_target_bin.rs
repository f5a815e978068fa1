#![no_main]
use dsonlib::{encode, File, UnhashPolicy, Unhasher};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(file) = File::try_from_bin(data, &Unhasher::empty(), UnhashPolicy::None) {
        let text = file.to_json_string(true);
        // Unknown payloads render as null, which does not encode
        if let Ok(bin) = encode(&text) {
            File::try_from_bin(&bin, &Unhasher::empty(), UnhashPolicy::None)
                .expect("re-encoded file decodes");
        }
    }
});
