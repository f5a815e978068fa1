use dsonlib::{encode, File, UnhashPolicy, Unhasher};

const ROSTER: &str = r####"{
    "base_root" : {
        "version" : 1,
        "name" : "Hamlet",
        "requirement_code" : "b",
        "flag" : true,
        "options" : [true, false],
        "dungeons_unlocked" : [1, 2, "###jester"],
        "goal_ids" : ["first", "second goal", ""],
        "killRange" : [-3, 40],
        "map" : {
            "bounds" : [0.0, 1.5, -2.25, 64.0]
        },
        "heroes" : {
            "0" : {
                "class" : "###jester",
                "m_Stress" : 32.5,
                "current_hp" : 17.0,
                "quirks" : { }
            },
            "1" : {
                "class" : "###vestal",
                "m_Stress" : 0.0,
                "current_hp" : 24.0,
                "quirks" : {
                    "slot" : "kleptomaniac"
                }
            }
        },
        "profile_options" : {
            "values" : {
                "dd_mode" : [false, true]
            }
        },
        "raw_data" : {
            "embedded_root" : {
                "static_save" : {
                    "deepest" : {
                        "x" : 9
                    }
                },
                "escaped" : "tab\tquote\"back\\slash"
            }
        }
    }
}"####;

fn names() -> Unhasher<String> {
    let mut u = Unhasher::new();
    u.offer_names(vec!["jester".to_owned(), "vestal".to_owned()]);
    u
}

#[test]
fn test_loading() {
    let names = names();
    let bin = encode(ROSTER).unwrap();

    for &policy in &[UnhashPolicy::None, UnhashPolicy::PoundUnhash] {
        for &debug in &[false, true] {
            let file = File::try_from_bin(&bin, &names, policy).unwrap();
            assert!(!file.has_duplicate_fields());
            let x = file.to_json_string(debug);

            let bin2 = encode(&x).unwrap();
            // Size stability, and with only lossless policies identity
            assert_eq!(bin2, bin);

            let file2 = File::try_from_bin(&bin2, &names, policy).unwrap();
            assert_eq!(file, file2);
            assert_eq!(file2.to_json_string(debug), x);
        }
    }

    let text = File::try_from_bin(&bin, &names, UnhashPolicy::PoundUnhash)
        .unwrap()
        .to_json_string(false);
    assert_eq!(text, ROSTER);
}

#[test]
fn duplicates_are_not_size_stable() {
    let text = "{\"base_root\" : {\"a\" : 1, \"nested\" : {\"b\" : 2, \"b\" : 3}}}";
    let bin = encode(text).unwrap();
    let file = File::try_from_bin(&bin, &Unhasher::empty(), UnhashPolicy::None).unwrap();
    assert!(file.has_duplicate_fields());

    let rendered = file.to_json_string(false);
    assert!(rendered.contains("\"b\" : 2"));
    assert!(!rendered.contains("\"b\" : 3"));
    let bin2 = encode(&rendered).unwrap();
    assert!(bin2.len() < bin.len());

    // The shortened file is stable from here on
    let file2 = File::try_from_bin(&bin2, &Unhasher::empty(), UnhashPolicy::None).unwrap();
    assert!(!file2.has_duplicate_fields());
    assert_eq!(encode(&file2.to_json_string(false)).unwrap(), bin2);
}

#[test]
fn duplicates_in_embedded_files_are_found() {
    let text = "{\"r\" : {\"raw_data\" : {\"i\" : {\"x\" : 1, \"x\" : 1}}}}";
    let bin = encode(text).unwrap();
    let file = File::try_from_bin(&bin, &Unhasher::empty(), UnhashPolicy::None).unwrap();
    assert!(file.has_duplicate_fields());
}
