use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{RecordInput, RecordReader, is_blank};
use crate::error::{RecordError, RecordResult};
use crate::io::{RecordLine, RecordLines};

struct LineSource {
    lines: RecordLines,
    /// 読み取りエラー後は終端扱い
    failed: bool,
}

/// ファイルから非空行を 1 行ずつ返す Reader
///
/// `.gz` は透過的に展開し、`-` は stdin を読む。
/// UTF-8 として読めない行はログに出して読み飛ばし、[`RecordReader::skipped`] に数える。
pub struct FileReader {
    source: Mutex<LineSource>,
    skipped: AtomicUsize,
}

impl FileReader {
    pub fn open<P: AsRef<Path>>(path: P) -> RecordResult<Self> {
        let path = path.as_ref();
        let lines = RecordLines::open(path).map_err(|source| RecordError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            source: Mutex::new(LineSource {
                lines,
                failed: false,
            }),
            skipped: AtomicUsize::new(0),
        })
    }
}

impl RecordReader for FileReader {
    fn read(&self) -> Option<String> {
        let mut src = self.source.lock().unwrap_or_else(|e| e.into_inner());
        if src.failed {
            return None;
        }
        loop {
            match src.lines.next_line() {
                Ok(None) => return None,
                Ok(Some(RecordLine::Text(line))) => {
                    if !is_blank(&line) {
                        return Some(line);
                    }
                }
                Ok(Some(RecordLine::Undecodable { line_no, lossy })) => {
                    log::error!(
                        "Skipping line {line_no} of {}: not valid UTF-8\n{lossy}",
                        src.lines.path().display()
                    );
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    log::warn!(
                        "Read error in {} after line {}, treating as end of input: {e}",
                        src.lines.path().display(),
                        src.lines.line_no()
                    );
                    src.failed = true;
                    return None;
                }
            }
        }
    }

    fn reached_end(&self) -> bool {
        let mut src = self.source.lock().unwrap_or_else(|e| e.into_inner());
        if src.failed {
            return true;
        }
        // 読み取りエラーはここでは拾わず、次の read に任せる
        src.lines.at_eof().unwrap_or(false)
    }

    fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// 呼ばれるたびにファイルを開き直す Input
pub struct FileInput {
    path: PathBuf,
}

impl FileInput {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordInput for FileInput {
    fn create_reader(&mut self) -> RecordResult<Box<dyn RecordReader>> {
        Ok(Box::new(FileReader::open(&self.path)?))
    }
}
