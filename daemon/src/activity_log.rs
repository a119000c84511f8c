//! Append-only operator log: `YYYY-MM-DD HH:MM:SS - <message>`, one line per
//! transition, flushed after every line.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct ActivityLog {
    path: PathBuf,
    file: File,
}

impl ActivityLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, message: &str) -> io::Result<()> {
        let line = format_line(&timestamp(), message);
        self.file.write_all(line.as_bytes())?;
        self.file.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}

/// Current local time in the log's timestamp format.
pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn format_line(timestamp: &str, message: &str) -> String {
    format!("{} - {}\n", timestamp, message)
}

/// Last `lines` lines of the log. A missing file reads as empty.
pub fn tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut last = VecDeque::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line?;
        if lines == 0 {
            continue;
        }
        if last.len() == lines {
            last.pop_front();
        }
        last.push_back(line);
    }
    Ok(last.into())
}
