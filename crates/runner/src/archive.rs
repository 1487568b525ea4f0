//! Uncompressed ustar archives for moving files into a container.

use std::time::{SystemTime, UNIX_EPOCH};

use box_common::SourceBundle;

const FILE_MODE: u32 = 0o644;

/// Archive every source and test file under its literal relative name.
pub fn tar_sources(bundle: &SourceBundle) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mtime = now();
    for file in bundle.files() {
        append(&mut builder, &file.filename, file.source.as_bytes(), mtime)?;
    }
    builder.into_inner()
}

/// Archive one compiled artifact as `name`. The supervisor adds the
/// execute bits when it stages the program.
pub fn tar_binary(name: &str, bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    append(&mut builder, name, bytes, now())?;
    builder.into_inner()
}

fn append(
    builder: &mut tar::Builder<Vec<u8>>,
    name: &str,
    data: &[u8],
    mtime: u64,
) -> std::io::Result<()> {
    let mut header = tar::Header::new_ustar();
    header.set_size(data.len() as u64);
    header.set_mode(FILE_MODE);
    header.set_mtime(mtime);
    header.set_entry_type(tar::EntryType::Regular);
    builder.append_data(&mut header, name, data)
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use box_common::SourceFile;

    use super::*;

    fn entries(archive: &[u8]) -> Vec<(String, u32, Vec<u8>)> {
        let mut ar = tar::Archive::new(archive);
        ar.entries()
            .unwrap()
            .map(|e| {
                let mut e = e.unwrap();
                let path = e.path().unwrap().display().to_string();
                let mode = e.header().mode().unwrap();
                let mut data = Vec::new();
                e.read_to_end(&mut data).unwrap();
                (path, mode, data)
            })
            .collect()
    }

    #[test]
    fn single_source_extracts_byte_identical() {
        let bundle = SourceBundle {
            src: vec![SourceFile::new("main.py", "print(1)")],
            src_test: Vec::new(),
        };
        let archive = tar_sources(&bundle).unwrap();

        let dir = tempfile::tempdir().unwrap();
        tar::Archive::new(archive.as_slice()).unpack(dir.path()).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, ["main.py"]);
        assert_eq!(std::fs::read(dir.path().join("main.py")).unwrap(), b"print(1)");
    }

    #[test]
    fn headers_are_ustar_0644_with_current_mtime() {
        let before = now();
        let archive = tar_binary("box", b"\x7fELF").unwrap();
        let mut ar = tar::Archive::new(archive.as_slice());
        let entry = ar.entries().unwrap().next().unwrap().unwrap();
        let header = entry.header();
        assert!(header.as_ustar().is_some());
        assert_eq!(header.mode().unwrap(), 0o644);
        assert!(header.mtime().unwrap() >= before);
        assert_eq!(header.size().unwrap(), 4);
    }

    #[test]
    fn sources_then_tests_with_nested_names() {
        let bundle = SourceBundle {
            src: vec![SourceFile::new("pkg/lib.py", "x = 1")],
            src_test: vec![SourceFile::new("tests/test_lib.py", "assert x")],
        };
        let got = entries(&tar_sources(&bundle).unwrap());
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, "pkg/lib.py");
        assert_eq!(got[1].0, "tests/test_lib.py");
        assert_eq!(got[1].1, 0o644);
        assert_eq!(got[1].2, b"assert x");
    }
}
