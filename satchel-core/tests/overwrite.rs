use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use satchel_core::stream::decode::{Choice, OverwriteDecider, TreeWriter};
use satchel_core::stream::encode::{EncodeOptions, TreeStream};
use satchel_core::stream::tree::ScanOptions;

struct Script {
    answers: Vec<Choice>,
    asked: usize,
}

impl OverwriteDecider for Script {
    fn confirm(&mut self, _path: &Path) -> Choice {
        let c = self.answers[self.asked.min(self.answers.len() - 1)];
        self.asked += 1;
        c
    }
}

fn encode_root(root: &Path) -> Vec<u8> {
    let mut stream = TreeStream::from_roots(
        &[root.to_path_buf()],
        &ScanOptions::default(),
        EncodeOptions::default(),
    )
    .unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn always_no_latches_across_files() {
    let src = tempfile::tempdir().unwrap();
    for name in ["one.txt", "two.txt", "three.txt"] {
        fs::write(src.path().join(name), b"new").unwrap();
    }
    let encoded = encode_root(src.path());
    let base = src.path().file_name().unwrap().to_string_lossy().to_string();

    let dest = tempfile::tempdir().unwrap();
    let mut first = TreeWriter::without_confirmation(dest.path());
    first.write_all(&encoded).unwrap();
    first.finish().unwrap();

    // make every target pre-existing with sentinel contents
    for name in ["one.txt", "two.txt", "three.txt"] {
        fs::write(dest.path().join(&base).join(name), b"OLD").unwrap();
    }

    let mut script = Script {
        answers: vec![Choice::AlwaysNo],
        asked: 0,
    };
    let mut w = TreeWriter::new(dest.path(), Box::new(&mut script));
    w.write_all(&encoded).unwrap();
    w.finish().unwrap();
    let stats = w.stats();
    drop(w);

    // one question, three skips, nothing modified
    assert_eq!(script.asked, 1);
    assert_eq!(stats.files_skipped, 3);
    assert_eq!(stats.files_written, 0);
    for name in ["one.txt", "two.txt", "three.txt"] {
        assert_eq!(fs::read(dest.path().join(&base).join(name)).unwrap(), b"OLD");
    }
}

#[test]
fn always_yes_stops_further_questions() {
    let src = tempfile::tempdir().unwrap();
    for name in ["one.txt", "two.txt"] {
        fs::write(src.path().join(name), b"new").unwrap();
    }
    let encoded = encode_root(src.path());
    let base = src.path().file_name().unwrap().to_string_lossy().to_string();

    let dest = tempfile::tempdir().unwrap();
    let mut first = TreeWriter::without_confirmation(dest.path());
    first.write_all(&encoded).unwrap();
    first.finish().unwrap();
    for name in ["one.txt", "two.txt"] {
        fs::write(dest.path().join(&base).join(name), b"OLD").unwrap();
    }

    let mut script = Script {
        answers: vec![Choice::AlwaysYes],
        asked: 0,
    };
    let mut w = TreeWriter::new(dest.path(), Box::new(&mut script));
    w.write_all(&encoded).unwrap();
    w.finish().unwrap();
    let stats = w.stats();
    drop(w);

    assert_eq!(script.asked, 1);
    assert_eq!(stats.files_written, 2);
    for name in ["one.txt", "two.txt"] {
        assert_eq!(fs::read(dest.path().join(&base).join(name)).unwrap(), b"new");
    }
}

#[test]
fn yes_no_mix_is_per_file() {
    let src = tempfile::tempdir().unwrap();
    for name in ["a.txt", "b.txt"] {
        fs::write(src.path().join(name), b"new").unwrap();
    }
    let encoded = encode_root(src.path());
    let base = src.path().file_name().unwrap().to_string_lossy().to_string();

    let dest = tempfile::tempdir().unwrap();
    let mut first = TreeWriter::without_confirmation(dest.path());
    first.write_all(&encoded).unwrap();
    first.finish().unwrap();
    for name in ["a.txt", "b.txt"] {
        fs::write(dest.path().join(&base).join(name), b"OLD").unwrap();
    }

    let mut script = Script {
        answers: vec![Choice::Yes, Choice::No],
        asked: 0,
    };
    let mut w = TreeWriter::new(dest.path(), Box::new(&mut script));
    w.write_all(&encoded).unwrap();
    w.finish().unwrap();
    drop(w);

    assert_eq!(script.asked, 2);
    // walkdir sorts by file name: a.txt answered Yes, b.txt answered No
    assert_eq!(fs::read(dest.path().join(&base).join("a.txt")).unwrap(), b"new");
    assert_eq!(fs::read(dest.path().join(&base).join("b.txt")).unwrap(), b"OLD");
}
