use super::error::{StoreError, StoreResult};
use super::inventory::{inventory_segments, segment_name};
use crate::sequence::Sequence;
use log::{debug, warn};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

///
/// One segment file.  Its id is the unwrapped 64 bit counter of its
/// first record, which is also its file name in hex.
///
#[derive(Debug)]
pub struct Segment {
    id: u64,
    path: PathBuf,
    count: usize,
    writer: Option<File>,
}

impl Segment {
    pub fn id(&self) -> u64 {
        self.id
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// Sequence number of the first record.
    pub fn sequence(&self) -> Sequence {
        Sequence::from_counter(self.id)
    }
    pub fn records(&self) -> usize {
        self.count
    }
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
    ///
    /// Does this segment hold the record with sequence `seq`?  If so
    /// the record's index in the file is returned.
    ///
    pub fn index_of(&self, seq: Sequence) -> Option<usize> {
        let offset = seq.distance_from(self.sequence()) as usize;
        if offset < self.count {
            Some(offset)
        } else {
            None
        }
    }
}

///
/// Receives notice that the oldest segment is about to be deleted.
/// `next` is the segment that becomes the oldest.
///
pub trait SegmentObserver {
    fn segment_evicted(&mut self, evicted: &Segment, next: Option<&Segment>);
}

pub struct NullSegmentObserver;

impl SegmentObserver for NullSegmentObserver {
    fn segment_evicted(&mut self, _evicted: &Segment, _next: Option<&Segment>) {}
}

///
/// The on-disk tier of a station's buffer: an ordered list of
/// segment files holding fixed size frames.  A store with a limit
/// of zero files is disabled and never touches the disk.
///
#[derive(Debug)]
pub struct SegmentStore {
    dir: PathBuf,
    frame_size: usize,
    max_files: usize,
    segments: VecDeque<Segment>,
}

impl SegmentStore {
    pub fn new(dir: &Path, frame_size: usize, max_files: usize) -> SegmentStore {
        SegmentStore {
            dir: dir.to_path_buf(),
            frame_size,
            max_files,
            segments: VecDeque::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.max_files > 0
    }
    pub fn directory(&self) -> &Path {
        &self.dir
    }
    pub fn n_files(&self) -> usize {
        self.segments.len()
    }
    pub fn n_records(&self) -> usize {
        self.segments.iter().map(|s| s.count).sum()
    }
    pub fn first(&self) -> Option<&Segment> {
        self.segments.front()
    }
    pub fn last(&self) -> Option<&Segment> {
        self.segments.back()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }
    pub fn segment(&self, id: u64) -> Option<&Segment> {
        self.position(id).map(|p| &self.segments[p])
    }
    ///
    /// The segment following `id`, if both still exist.
    ///
    pub fn next(&self, id: u64) -> Option<&Segment> {
        self.position(id).and_then(|p| self.segments.get(p + 1))
    }
    ///
    /// Find the segment holding `seq`.  Returns its id and the byte
    /// offset of the record.
    ///
    pub fn find(&self, seq: Sequence) -> Option<(u64, u64)> {
        self.segments.iter().find_map(|s| {
            s.index_of(seq)
                .map(|i| (s.id, (i * self.frame_size) as u64))
        })
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.segments.iter().position(|s| s.id == id)
    }
    ///
    /// Start a new segment whose first record will have counter
    /// `counter`.  If that makes too many files the oldest is
    /// announced to `observer` and deleted.  Returns the new
    /// segment's id or None when the store is disabled.
    ///
    pub fn get_file(
        &mut self,
        counter: u64,
        observer: &mut dyn SegmentObserver,
    ) -> StoreResult<Option<u64>> {
        if !self.enabled() {
            return Ok(None);
        }
        let path = self.dir.join(segment_name(counter));
        let writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| StoreError::CannotCreateFile {
                path: path.clone(),
                source: e,
            })?;
        debug!("new segment {}", path.display());
        self.segments.push_back(Segment {
            id: counter,
            path,
            count: 0,
            writer: Some(writer),
        });
        self.trim(observer)?;
        Ok(Some(counter))
    }

    fn trim(&mut self, observer: &mut dyn SegmentObserver) -> StoreResult<()> {
        while self.segments.len() > self.max_files {
            if let Some(oldest) = self.segments.pop_front() {
                observer.segment_evicted(&oldest, self.segments.front());
                match fs::remove_file(&oldest.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        warn!("segment {} already gone", oldest.path.display());
                    }
                    Err(e) => {
                        return Err(StoreError::CannotDeleteFile {
                            path: oldest.path,
                            source: e,
                        })
                    }
                }
            }
        }
        Ok(())
    }
    ///
    /// Append a frame to segment `id`.
    ///
    pub fn store(&mut self, id: u64, data: &[u8]) -> StoreResult<()> {
        let frame_size = self.frame_size;
        let position = self.position(id);
        let segment = match position {
            Some(p) => &mut self.segments[p],
            None => return Ok(()),
        };
        let path = segment.path.clone();
        let writer = segment.writer.as_mut().ok_or_else(|| StoreError::CannotWriteFile {
            path: path.clone(),
            source: std::io::Error::new(ErrorKind::Other, "segment is closed"),
        })?;
        let mut frame = data.to_vec();
        frame.resize(frame_size, 0);
        writer
            .write_all(&frame)
            .map_err(|e| StoreError::CannotWriteFile { path, source: e })?;
        segment.count += 1;
        Ok(())
    }
    ///
    /// Close the writer of segment `id`; readers are unaffected.
    ///
    pub fn release_file(&mut self, id: u64) {
        if let Some(p) = self.position(id) {
            self.segments[p].writer = None;
        }
    }

    pub fn open_reader(&self, id: u64) -> StoreResult<File> {
        let path = match self.segment(id) {
            Some(s) => s.path.clone(),
            None => self.dir.join(segment_name(id)),
        };
        File::open(&path).map_err(|e| StoreError::CannotOpenFile { path, source: e })
    }
    ///
    /// Read the frames of segment `id` starting at record `skip`,
    /// passing each to `f`.
    ///
    pub fn read_records(
        &self,
        id: u64,
        skip: usize,
        f: &mut dyn FnMut(&[u8]),
    ) -> StoreResult<()> {
        let file = self.open_reader(id)?;
        let path = self.dir.join(segment_name(id));
        let mut reader = BufReader::new(file);
        let mut frame = vec![0u8; self.frame_size];
        let mut index = 0usize;
        loop {
            match reader.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(StoreError::CannotReadFile { path, source: e }),
            }
            if index >= skip {
                f(&frame);
            }
            index += 1;
        }
        Ok(())
    }
    ///
    /// Rebuild the segment list from the directory at startup.  The
    /// newest segment is reopened for appending.  Returns the record
    /// counter the next frame should get (0 for an empty store).
    ///
    pub fn restore_state(&mut self, observer: &mut dyn SegmentObserver) -> StoreResult<u64> {
        if !self.enabled() {
            return Ok(0);
        }
        let frame_size = self.frame_size as u64;
        let mut found: Vec<Segment> = Vec::new();
        inventory_segments(
            &self.dir,
            &mut |path, counter| {
                let meta = fs::metadata(path).map_err(|e| StoreError::CannotStatFile {
                    path: path.to_path_buf(),
                    source: e,
                })?;
                if meta.len() % frame_size != 0 {
                    return Err(StoreError::BadFileFormat {
                        path: path.to_path_buf(),
                    });
                }
                found.push(Segment {
                    id: counter,
                    path: path.to_path_buf(),
                    count: (meta.len() / frame_size) as usize,
                    writer: None,
                });
                Ok(())
            },
            &mut |path| warn!("ignoring {} in segment directory", path.display()),
        )?;

        self.segments.clear();
        let mut counter = 0u64;
        for segment in found {
            counter = segment.id + segment.count as u64;
            self.segments.push_back(segment);
            self.trim(observer)?;
        }
        if let Some(last) = self.segments.back_mut() {
            let writer = OpenOptions::new()
                .append(true)
                .open(&last.path)
                .map_err(|e| StoreError::CannotOpenFile {
                    path: last.path.clone(),
                    source: e,
                })?;
            last.writer = Some(writer);
        }
        Ok(counter)
    }
}
