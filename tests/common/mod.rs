use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::fixture::ChildPath;
use assert_fs::prelude::*;
use std::fs;
use std::path::Path;

pub fn omtriage() -> Command {
    Command::cargo_bin("omtriage").unwrap()
}

/// A fake camera card with one RAW+JPEG pair, one video and one stray file.
pub fn setup_card(temp_dir: &TempDir) -> ChildPath {
    let card = temp_dir.child("card");
    let dcim = card.child("DCIM/100OLYMP");
    dcim.child("P1150001.ORF").write_binary(b"raw sensor data").unwrap();
    dcim.child("P1150001.JPG").write_binary(b"jpeg preview").unwrap();
    dcim.child("P1150002.MOV").write_binary(b"video stream").unwrap();
    card.child("MISC/README.TXT").write_str("camera notes").unwrap();
    card
}

/// Names of the session folders under an archive root.
pub fn session_dirs(output: &Path) -> Vec<String> {
    let mut dirs: Vec<String> = fs::read_dir(output)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| !name.starts_with('.'))
                .collect()
        })
        .unwrap_or_default();
    dirs.sort();
    dirs
}
