//! ファイルI/Oユーティリティ（gzip対応）
//!
//! レコードファイル・モデルファイル・メトリクスログの読み書きで共通に使う。
//! パス `-` は stdin / stdout を表す。

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const READER_BUF_CAP: usize = 128 * 1024; // 128 KiB

fn is_gzip(p: &Path) -> bool {
    p.extension().and_then(|e| e.to_str()).unwrap_or_default().eq_ignore_ascii_case("gz")
}

/// 行単位で読むためのバッファ付き Reader を開く。
///
/// Reader はワーカースレッド間で共有されるため `Send` を要求する。
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead + Send>> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, io::stdin())));
    }
    let f = File::open(p)?;
    if is_gzip(p) {
        let dec = flate2::read::GzDecoder::new(f);
        return Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, dec)));
    }
    Ok(Box::new(BufReader::with_capacity(READER_BUF_CAP, f)))
}

/// [`RecordLines::next_line`] が返す 1 行
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLine {
    /// 改行を除いた行
    Text(String),
    /// UTF-8 として読めない行。`lossy` は置換文字入りの表示用
    Undecodable { line_no: usize, lossy: String },
}

/// レコードファイルを 1 行ずつ読む
///
/// 行はバイト列として読んでから UTF-8 に変換するので、壊れた行があっても
/// その行だけを [`RecordLine::Undecodable`] として返し、後続の行は読み続けられる。
pub struct RecordLines {
    path: PathBuf,
    src: Box<dyn BufRead + Send>,
    buf: Vec<u8>,
    line_no: usize,
}

impl RecordLines {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let src = open_reader(&path)?;
        Ok(Self {
            path,
            src,
            buf: Vec::new(),
            line_no: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 直前に返した行の行番号（1 始まり）
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    /// 次の行。EOF なら `None`
    pub fn next_line(&mut self) -> io::Result<Option<RecordLine>> {
        self.buf.clear();
        if self.src.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        let bytes = std::mem::take(&mut self.buf);
        Ok(Some(match String::from_utf8(bytes) {
            Ok(text) => RecordLine::Text(text),
            Err(e) => {
                let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
                self.buf = e.into_bytes();
                RecordLine::Undecodable {
                    line_no: self.line_no,
                    lossy,
                }
            }
        }))
    }

    /// バッファを覗いて EOF か調べる
    pub fn at_eof(&mut self) -> io::Result<bool> {
        Ok(self.src.fill_buf()?.is_empty())
    }
}

/// Writer wrapper to propagate finish/close errors for compressed outputs.
#[must_use = "call .close() to propagate compression/IO errors"]
pub enum Writer {
    Plain(BufWriter<File>),
    Stdout(std::io::Stdout),
    Gz(flate2::write::GzEncoder<File>),
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Writer::Plain(f) => f.write(buf),
            Writer::Stdout(s) => s.write(buf),
            Writer::Gz(e) => e.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => f.flush(),
            Writer::Stdout(s) => s.flush(),
            Writer::Gz(e) => e.flush(),
        }
    }
}

impl Writer {
    /// Finalize the stream and flush underlying file/stdout.
    pub fn close(self) -> io::Result<()> {
        match self {
            Writer::Plain(f) => {
                let mut file = f.into_inner().map_err(|e| e.into_error())?;
                file.flush()
            }
            Writer::Stdout(mut s) => s.flush(),
            Writer::Gz(e) => {
                let mut f = e.finish()?;
                f.flush()
            }
        }
    }
}

pub fn open_writer<P: AsRef<Path>>(path: P) -> io::Result<Writer> {
    let p = path.as_ref();
    if p.to_string_lossy() == "-" {
        return Ok(Writer::Stdout(std::io::stdout()));
    }
    if is_gzip(p) {
        let f = File::create(p)?;
        let enc = flate2::write::GzEncoder::new(f, flate2::Compression::default());
        return Ok(Writer::Gz(enc));
    }
    let f = File::create(p)?;
    Ok(Writer::Plain(BufWriter::new(f)))
}
