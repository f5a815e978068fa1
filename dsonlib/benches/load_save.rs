use criterion::{criterion_group, criterion_main, Criterion};
use dsonlib::{encode, File, UnhashPolicy, Unhasher};
use std::fmt::Write;

const CLASSES: &[&str] = &["jester", "vestal", "crusader", "highwayman", "plague_doctor"];

/// A roster-shaped save with every generic and overridden type.
fn synthetic_save(heroes: usize) -> String {
    let mut s = String::from("{\"base_root\" : {\"heroes\" : {");
    for i in 0..heroes {
        if i > 0 {
            s.push_str(", ");
        }
        let class = CLASSES[i % CLASSES.len()];
        write!(
            s,
            "\"{i}\" : {{\"id\" : {i}, \"name\" : \"hero {i}\", \"class\" : \"###{class}\", \
             \"m_Stress\" : {stress}.5, \"current_hp\" : 17.0, \"alive\" : true, \
             \"options\" : [true, false], \"skill_cooldown_keys\" : [1, 2, 3, \"###{class}\"], \
             \"quirk_group\" : [\"a\", \"bc\", \"def\"], \"killRange\" : [{i}, 40], \
             \"raw_data\" : {{\"inner\" : {{\"tag\" : \"x\"}}}}}}",
            i = i,
            class = class,
            stress = i % 200,
        )
        .unwrap();
    }
    s.push_str("}}}");
    s
}

fn names() -> Unhasher<&'static str> {
    let mut u = Unhasher::empty();
    u.offer_names(CLASSES.iter().copied());
    u
}

fn test_from_bin(c: &mut Criterion) {
    let bin = encode(&synthetic_save(500)).unwrap();
    let names = names();
    c.bench_function("from_bin: 500 heroes", |b| {
        b.iter(|| File::try_from_bin(&bin, &names, UnhashPolicy::PoundUnhash).unwrap())
    });
}

fn test_to_json(c: &mut Criterion) {
    let bin = encode(&synthetic_save(500)).unwrap();
    let f = File::try_from_bin(&bin, &names(), UnhashPolicy::PoundUnhash).unwrap();
    c.bench_function("to_json: 500 heroes", |b| {
        b.iter(|| {
            let mut x = Vec::new();
            f.write_to_json(&mut x, false).unwrap();
        })
    });
}

fn test_from_json(c: &mut Criterion) {
    let bin = encode(&synthetic_save(500)).unwrap();
    let text = File::try_from_bin(&bin, &names(), UnhashPolicy::PoundUnhash)
        .unwrap()
        .to_json_string(false);
    c.bench_function("from_json: 500 heroes", |b| b.iter(|| encode(&text).unwrap()));
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = test_from_bin, test_from_json, test_to_json
}
criterion_main!(benches);
