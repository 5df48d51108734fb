//! Worker-Partitioned Line Input
//!
//! A set of input files is treated as one virtual byte concatenation of
//! `N` bytes; worker `r` of `W` gets the byte range
//! `[N/W * r, N/W * (r+1))` (the last worker runs to `N`). A line belongs
//! to the worker whose range contains its **first** byte, so every line is
//! read by exactly one worker and no line is split:
//!
//! ```text
//! file A: one\ntwo\nthr|ee\nfour\n        | = range boundary
//!                      ^ "three" starts left of the boundary -> worker 0
//! ```
//!
//! A worker opens the file covering its range start, skips to the first
//! line head at or after it, and keeps reading lines (across files) until a
//! line starts at or past its range end. Empty lines count like any other.
//!
//! Compressed files cannot be seeked into, so the moment the input set
//! contains one, partitioning degrades to whole files dealt round-robin by
//! worker rank.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};

use tracing::debug;

use flowmesh_core::{Error, Result};

use crate::fs::{open_for_read, InputFile};

/// The byte range of the virtual concatenation owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u64,
    pub end: u64,
}

impl LineRange {
    pub fn for_worker(total_bytes: u64, rank: usize, num_workers: usize) -> Self {
        assert!(rank < num_workers, "rank outside worker set");
        let per_worker = total_bytes / num_workers as u64;
        let start = per_worker * rank as u64;
        let end = if rank + 1 == num_workers {
            total_bytes
        } else {
            per_worker * (rank as u64 + 1)
        };
        Self { start, end }
    }
}

/// Iterator over the lines a worker owns. Yields `Result<String>` with
/// line terminators stripped.
pub struct LinePartition {
    plan: Plan,
}

enum Plan {
    ByteRange(ByteRangePlan),
    WholeFiles(WholeFilePlan),
}

impl LinePartition {
    /// Partition `files` for `rank` of `num_workers`.
    pub fn new(files: Vec<InputFile>, rank: usize, num_workers: usize) -> Result<Self> {
        if num_workers == 0 || rank >= num_workers {
            return Err(Error::InvalidArgument(format!(
                "rank {rank} outside {num_workers} workers"
            )));
        }

        let plan = if files.iter().any(|file| file.compression.is_compressed()) {
            debug!(rank, "compressed input: whole-file partitioning");
            Plan::WholeFiles(WholeFilePlan::new(files, rank, num_workers))
        } else {
            let total: u64 = files.iter().map(|file| file.size).sum();
            let range = LineRange::for_worker(total, rank, num_workers);
            debug!(rank, start = range.start, end = range.end, "byte-range partitioning");
            Plan::ByteRange(ByteRangePlan::new(files, range)?)
        };
        Ok(Self { plan })
    }
}

impl Iterator for LinePartition {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.plan {
            Plan::ByteRange(plan) => plan.next_line(),
            Plan::WholeFiles(plan) => plan.next_line(),
        }
    }
}

/// Seekable path: plain files, byte-range ownership.
struct ByteRangePlan {
    files: Vec<InputFile>,
    range: LineRange,
    /// Index of the next file to open.
    next_file: usize,
    /// Global offset of the current file's first byte.
    file_base: u64,
    /// Bytes of the current file already consumed.
    in_file_pos: u64,
    reader: Option<BufReader<File>>,
    done: bool,
}

impl ByteRangePlan {
    fn new(files: Vec<InputFile>, range: LineRange) -> Result<Self> {
        let mut plan = Self {
            files,
            range,
            next_file: 0,
            file_base: 0,
            in_file_pos: 0,
            reader: None,
            done: range.start >= range.end,
        };
        if !plan.done {
            plan.seek_to_range_start()?;
        }
        Ok(plan)
    }

    /// Open the file covering `range.start` and move past any line begun in
    /// the previous worker's range.
    fn seek_to_range_start(&mut self) -> Result<()> {
        while self.next_file < self.files.len()
            && self.file_base + self.files[self.next_file].size <= self.range.start
        {
            self.file_base += self.files[self.next_file].size;
            self.next_file += 1;
        }
        let Some(input) = self.files.get(self.next_file) else {
            self.done = true;
            return Ok(());
        };

        let mut file = File::open(&input.path)?;
        let local_start = self.range.start - self.file_base;
        self.next_file += 1;

        if local_start == 0 {
            // a file boundary is always a line boundary
            self.in_file_pos = 0;
            self.reader = Some(BufReader::new(file));
            return Ok(());
        }

        // look at the byte before the range: unless it ends a line, the
        // line under the cursor belongs to the previous worker
        file.seek(SeekFrom::Start(local_start - 1))?;
        let mut reader = BufReader::new(file);
        self.in_file_pos = local_start - 1;

        let mut previous = [0u8; 1];
        reader.read_exact(&mut previous)?;
        self.in_file_pos += 1;

        if previous[0] != b'\n' {
            let mut skipped = Vec::new();
            let n = reader.read_until(b'\n', &mut skipped)?;
            self.in_file_pos += n as u64;
        }
        self.reader = Some(reader);
        Ok(())
    }

    fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            if self.done {
                return None;
            }

            if self.reader.is_none() {
                // advance to the next file, if its first line is ours
                let Some(input) = self.files.get(self.next_file) else {
                    self.done = true;
                    return None;
                };
                if self.file_base >= self.range.end {
                    self.done = true;
                    return None;
                }
                let file = match File::open(&input.path) {
                    Ok(file) => file,
                    Err(error) => {
                        self.done = true;
                        return Some(Err(error.into()));
                    }
                };
                self.next_file += 1;
                self.in_file_pos = 0;
                self.reader = Some(BufReader::new(file));
            }
            let reader = self.reader.as_mut().expect("reader just installed");

            let line_start = self.file_base + self.in_file_pos;
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => {
                    // file exhausted; roll the base forward and move on
                    self.file_base += self.in_file_pos;
                    self.in_file_pos = 0;
                    self.reader = None;
                }
                Ok(n) => {
                    self.in_file_pos += n as u64;
                    if line_start >= self.range.end {
                        self.done = true;
                        return None;
                    }
                    return Some(Ok(strip_terminator(line)));
                }
                Err(error) => {
                    self.done = true;
                    return Some(Err(error.into()));
                }
            }
        }
    }
}

/// Non-seekable path: every worker takes whole files, dealt by rank.
struct WholeFilePlan {
    files: Vec<InputFile>,
    next_file: usize,
    reader: Option<BufReader<Box<dyn Read + Send>>>,
}

impl WholeFilePlan {
    fn new(files: Vec<InputFile>, rank: usize, num_workers: usize) -> Self {
        let mine = files
            .into_iter()
            .enumerate()
            .filter(|(index, _)| index % num_workers == rank)
            .map(|(_, file)| file)
            .collect();
        Self {
            files: mine,
            next_file: 0,
            reader: None,
        }
    }

    fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            if self.reader.is_none() {
                let input = self.files.get(self.next_file)?;
                let stream = match open_for_read(&input.path) {
                    Ok(stream) => stream,
                    Err(error) => return Some(Err(error)),
                };
                self.next_file += 1;
                self.reader = Some(BufReader::new(stream));
            }
            let reader = self.reader.as_mut().expect("reader just installed");

            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => self.reader = None,
                Ok(_) => return Some(Ok(strip_terminator(line))),
                Err(error) => return Some(Err(error.into())),
            }
        }
    }
}

fn strip_terminator(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionKind;
    use crate::fs::collect_input;
    use std::io::Write;
    use std::path::Path;

    fn write_file(path: &Path, contents: &str) {
        std::fs::write(path, contents).unwrap();
    }

    fn inputs_from(dir: &Path) -> Vec<InputFile> {
        collect_input(&format!("{}/*", dir.display())).unwrap()
    }

    fn lines_of_worker(files: &[InputFile], rank: usize, workers: usize) -> Vec<String> {
        LinePartition::new(files.to_vec(), rank, workers)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_ranges_cover_the_concatenation() {
        let first = LineRange::for_worker(100, 0, 3);
        let second = LineRange::for_worker(100, 1, 3);
        let third = LineRange::for_worker(100, 2, 3);
        assert_eq!((first.start, first.end), (0, 33));
        assert_eq!((second.start, second.end), (33, 66));
        assert_eq!((third.start, third.end), (66, 100));
    }

    #[test]
    fn test_every_line_read_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let expected: Vec<String> = (0..100).map(|i| format!("line number {i}")).collect();
        write_file(
            &dir.path().join("a.txt"),
            &(expected[..60].join("\n") + "\n"),
        );
        write_file(
            &dir.path().join("b.txt"),
            &(expected[60..].join("\n") + "\n"),
        );
        let files = inputs_from(dir.path());

        for workers in [1usize, 2, 3, 7] {
            let mut seen = Vec::new();
            for rank in 0..workers {
                seen.extend(lines_of_worker(&files, rank, workers));
            }
            assert_eq!(seen, expected, "workers={workers}");
        }
    }

    #[test]
    fn test_empty_lines_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.txt"), "first\n\n\nfourth\n");
        let files = inputs_from(dir.path());

        let mut seen = Vec::new();
        for rank in 0..2 {
            seen.extend(lines_of_worker(&files, rank, 2));
        }
        assert_eq!(seen, vec!["first", "", "", "fourth"]);
    }

    #[test]
    fn test_missing_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.txt"), "alpha\nbeta\ngamma");
        let files = inputs_from(dir.path());

        let mut seen = Vec::new();
        for rank in 0..3 {
            seen.extend(lines_of_worker(&files, rank, 3));
        }
        assert_eq!(seen, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_more_workers_than_bytes() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.txt"), "x\n");
        let files = inputs_from(dir.path());

        let mut seen = Vec::new();
        for rank in 0..8 {
            seen.extend(lines_of_worker(&files, rank, 8));
        }
        assert_eq!(seen, vec!["x"]);
    }

    #[test]
    fn test_compressed_inputs_use_file_granularity() {
        let dir = tempfile::tempdir().unwrap();
        for (name, lines) in [("a.txt.gz", 40usize), ("b.txt.gz", 25), ("c.txt.gz", 10)] {
            let path = dir.path().join(name);
            let mut writer = crate::fs::open_for_write(&path).unwrap();
            for i in 0..lines {
                writeln!(writer, "{name}:{i}").unwrap();
            }
            writer.flush().unwrap();
        }
        let files = inputs_from(dir.path());
        assert!(files
            .iter()
            .all(|file| file.compression == CompressionKind::Gzip));

        let worker0 = lines_of_worker(&files, 0, 2);
        let worker1 = lines_of_worker(&files, 1, 2);
        // round-robin by file: worker 0 gets a + c, worker 1 gets b
        assert_eq!(worker0.len(), 50);
        assert_eq!(worker1.len(), 25);
        assert!(worker0.iter().all(|l| !l.starts_with("b.txt.gz")));
        assert!(worker1.iter().all(|l| l.starts_with("b.txt.gz")));
    }
}
