//!
//! This module provides a mechanism to inventory the segment
//! files in a station's segment directory.  The inventory calls a
//! closure for each file that is named like a segment and a second
//! closure for anything else.  Segments are visited in record
//! order, whatever the case of their hex names.
//!
use super::error::{StoreError, StoreResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Width of a segment file name: the 64 bit record counter in hex.
pub const SEGMENT_NAME_LEN: usize = 16;

///
/// The file name of the segment whose first record has the
/// unwrapped record counter `counter`.
///
pub fn segment_name(counter: u64) -> String {
    format!("{:016X}", counter)
}
///
/// Recover the record counter from a segment file name.
///
pub fn parse_segment_name(name: &str) -> Option<u64> {
    if name.len() != SEGMENT_NAME_LEN {
        return None;
    }
    u64::from_str_radix(name, 16).ok()
}
///
/// Inventory the segments in a directory.  Files whose names parse
/// as segment names call `is_segment` with the path and the record
/// counter; all other entries call `not_segment`.
///
pub fn inventory_segments(
    dir_name: &Path,
    is_segment: &mut dyn FnMut(&Path, u64) -> StoreResult<()>,
    not_segment: &mut dyn FnMut(&Path),
) -> StoreResult<()> {
    let iteration = fs::read_dir(dir_name).map_err(|e| StoreError::CannotOpenDir {
        path: dir_name.to_path_buf(),
        source: e,
    })?;
    let mut segments: Vec<(u64, PathBuf)> = Vec::new();
    let mut others: Vec<PathBuf> = Vec::new();
    for file in iteration {
        let file = file.map_err(|e| StoreError::CannotOpenDir {
            path: dir_name.to_path_buf(),
            source: e,
        })?;
        let path = file.path();
        let counter = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_segment_name);
        match counter {
            Some(counter) => segments.push((counter, path)),
            None => others.push(path),
        }
    }
    segments.sort();
    others.sort();
    for (counter, path) in segments {
        is_segment(&path, counter)?;
    }
    for path in others {
        not_segment(&path);
    }
    Ok(())
}

#[cfg(test)]
mod inv_test {
    use super::*;
    use std::fs::File;

    // closures that are useful to tests:

    fn collect_names(name: &Path, collection: &mut Vec<String>) {
        collection.push(name.file_name().unwrap().to_string_lossy().to_string());
    }
    #[test]
    fn names() {
        assert_eq!("00000000000001F4", segment_name(500));
        assert_eq!(Some(500), parse_segment_name("00000000000001F4"));
        assert_eq!(Some(500), parse_segment_name("00000000000001f4"));
        assert_eq!(None, parse_segment_name("1F4"));
        assert_eq!(None, parse_segment_name("buffer.xml"));
    }
    #[test]
    fn inv_1() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join(segment_name(200))).unwrap();
        File::create(dir.path().join(segment_name(100))).unwrap();
        File::create(dir.path().join("junk")).unwrap();
        let mut segments = Vec::<u64>::new();
        let mut not_segments = Vec::<String>::new();
        inventory_segments(
            dir.path(),
            &mut |_, counter| {
                segments.push(counter);
                Ok(())
            },
            &mut |name| collect_names(name, &mut not_segments),
        )
        .unwrap();
        assert_eq!(vec![100, 200], segments);
        assert_eq!(vec!["junk".to_string()], not_segments);
    }
    #[test]
    fn mixed_case_names_in_record_order() {
        let dir = tempfile::tempdir().unwrap();
        // "00000000000000a0" sorts after "00000000000000B0" as text
        File::create(dir.path().join("00000000000000a0")).unwrap();
        File::create(dir.path().join(segment_name(0xB0))).unwrap();
        File::create(dir.path().join(segment_name(0x90))).unwrap();
        let mut segments = Vec::<u64>::new();
        inventory_segments(
            dir.path(),
            &mut |_, counter| {
                segments.push(counter);
                Ok(())
            },
            &mut |_| {},
        )
        .unwrap();
        assert_eq!(vec![0x90, 0xA0, 0xB0], segments);
    }
    #[test]
    fn missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let r = inventory_segments(&dir.path().join("nope"), &mut |_, _| Ok(()), &mut |_| {});
        assert!(matches!(r, Err(StoreError::CannotOpenDir { .. })));
    }
}
