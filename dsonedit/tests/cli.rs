use assert_cmd::Command;
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ROSTER: &str = "{\n    \"base_root\" : {\n        \"v\" : 42,\n        \"class\" : \"###jester\"\n    }\n}";

fn dsonedit() -> Result<Command, Box<dyn Error>> {
    Ok(Command::cargo_bin("dsonedit")?)
}

fn arg(p: &Path) -> &str {
    p.to_str().unwrap()
}

fn write_bin(dir: &TempDir, name: &str, text: &str) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.path().join(name);
    fs::write(&path, dsonlib::encode(text)?)?;
    Ok(path)
}

#[test]
fn encode_then_decode_roundtrips() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let text_path = dir.path().join("roster.txt");
    let bin_path = dir.path().join("roster.bin");
    fs::write(&text_path, ROSTER)?;

    dsonedit()?
        .args(["encode", arg(&text_path), "-o", arg(&bin_path)])
        .assert()
        .success();
    assert_eq!(fs::read(&bin_path)?, dsonlib::encode(ROSTER)?);

    // Without names the hash cannot be resolved
    let hash = dsonlib::name_hash("jester");
    dsonedit()?
        .args(["decode", arg(&bin_path)])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("\"class\" : {}", hash)));
    Ok(())
}

#[test]
fn decode_resolves_offered_names() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let bin = write_bin(&dir, "roster.bin", ROSTER)?;
    let names = dir.path().join("names.txt");
    fs::write(&names, "vestal\n\n  jester  \n")?;

    dsonedit()?
        .args(["decode", "-n", arg(&names), arg(&bin)])
        .assert()
        .success()
        .stdout(format!("{}\n", ROSTER));

    dsonedit()?
        .args(["decode", "--names", arg(&names), "--unhash", "unhash", arg(&bin)])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"class\" : \"jester\""));

    dsonedit()?
        .args(["decode", "-n", arg(&names), "--unhash", "none", "--debug", arg(&bin)])
        .assert()
        .success()
        .stdout(predicate::str::contains("// field_info: 0x"))
        .stdout(predicate::str::contains("###").not());
    Ok(())
}

#[test]
fn decode_writes_one_file_per_input() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let a = write_bin(&dir, "a.bin", "{\"r\" : {\"x\" : 1}}")?;
    let b = write_bin(&dir, "b.bin", "{\"r\" : {\"x\" : 2}}")?;

    dsonedit()?
        .args(["decode", arg(&a), arg(&b)])
        .assert()
        .success();
    assert!(fs::read_to_string(dir.path().join("a.bin.json"))?.contains("\"x\" : 1"));
    assert!(fs::read_to_string(dir.path().join("b.bin.json"))?.contains("\"x\" : 2"));

    let out = dir.path().join("out");
    dsonedit()?
        .args(["decode", "-o", arg(&out), arg(&a), arg(&b)])
        .assert()
        .success();
    let text = fs::read_to_string(out.join("b.bin.json"))?;
    assert_eq!(dsonlib::encode(&text)?, fs::read(&b)?);
    Ok(())
}

#[test]
fn decode_reports_corrupt_input() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let bad = dir.path().join("bad.bin");
    fs::write(&bad, b"definitely not a save file")?;

    dsonedit()?
        .args(["decode", arg(&bad)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a DSON file"));
    Ok(())
}

#[test]
fn encode_reports_text_errors() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let text = dir.path().join("bad.txt");
    fs::write(&text, "{\"r\" : {\"a\" : null}}")?;

    dsonedit()?
        .args(["encode", arg(&text)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot determine the binary type"));
    Ok(())
}

#[test]
fn check_flags_duplicates_and_failures() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let good = write_bin(&dir, "good.bin", ROSTER)?;
    let dup = write_bin(&dir, "dup.bin", "{\"r\" : {\"a\" : 1, \"a\" : 2}}")?;

    dsonedit()?
        .args(["check", arg(&good), arg(&dup)])
        .assert()
        .success()
        .stdout(predicate::str::contains("good.bin: ok\n"))
        .stdout(predicate::str::contains("dup.bin: ok, duplicate field names dropped"));

    let bad = dir.path().join("bad.bin");
    fs::write(&bad, [0u8; 10])?;
    dsonedit()?
        .args(["check", arg(&good), arg(&bad)])
        .assert()
        .failure()
        .stdout(predicate::str::contains("bad.bin: error:"));
    Ok(())
}
