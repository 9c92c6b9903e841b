//! レコード入力
//!
//! レコードは JSON 1 行（空行は無視）。Reader は 1 レコードずつ返す逐次ソースで、
//! 複数ワーカーから同時に呼ばれても各レコードはちょうど 1 回だけ配られる。
//! Input は Reader を作るファクトリで、パスごとに新しい Reader を作る。
//!
//! Reader / Input はデコレータとして重ねて使う:
//!
//! ```text
//! ShuffledCacheInput(CrossValidationInput(FileInput))
//! ```
//!
//! ラッパーは包んだ Reader / Input の所有権を受け取る。

mod cache;
mod file;
mod fold;

pub use cache::{CachingReader, ReplayReader, ShuffledCacheInput};
pub use file::{FileInput, FileReader};
pub use fold::{CrossValidationInput, CrossValidationReader, FoldSpec, FoldSubset};

use crate::error::RecordResult;

/// 逐次的なレコードソース。
///
/// `read` が `None` を返したらそのワーカーは終了してよい。`reached_end` は
/// 呼び出し時点の状態を返すヒントで、`false` の直後の `read` が `None` になることはある。
pub trait RecordReader: Send + Sync {
    /// 次の非空レコード。入力が尽きていれば `None`
    fn read(&self) -> Option<String>;

    /// 入力が尽きたか
    fn reached_end(&self) -> bool;

    /// レコードとして返せずに読み捨てた行数（UTF-8 として読めない行など）
    fn skipped(&self) -> usize {
        0
    }
}

/// Reader のファクトリ
pub trait RecordInput: Send {
    fn create_reader(&mut self) -> RecordResult<Box<dyn RecordReader>>;
}

impl<R: RecordReader + ?Sized> RecordReader for Box<R> {
    fn read(&self) -> Option<String> {
        (**self).read()
    }

    fn reached_end(&self) -> bool {
        (**self).reached_end()
    }

    fn skipped(&self) -> usize {
        (**self).skipped()
    }
}

impl<I: RecordInput + ?Sized> RecordInput for Box<I> {
    fn create_reader(&mut self) -> RecordResult<Box<dyn RecordReader>> {
        (**self).create_reader()
    }
}

/// 空白のみの行は空行とみなす
pub(crate) fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}
