#![no_main]
use dsonlib::{encode, File, UnhashPolicy, Unhasher};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(bin) = encode(text) {
            File::try_from_bin(&bin, &Unhasher::empty(), UnhashPolicy::None)
                .expect("encoded text decodes");
        }
    }
});
