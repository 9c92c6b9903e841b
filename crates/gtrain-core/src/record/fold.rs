use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{RecordInput, RecordReader};
use crate::error::{RecordError, RecordResult};

/// 交差検証の分割（`num_folds` 個中の `fold_id` 番目）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldSpec {
    fold_id: usize,
    num_folds: usize,
}

impl FoldSpec {
    pub fn new(fold_id: usize, num_folds: usize) -> RecordResult<Self> {
        if num_folds < 2 || fold_id >= num_folds {
            return Err(RecordError::InvalidFold { fold_id, num_folds });
        }
        Ok(Self { fold_id, num_folds })
    }

    pub fn fold_id(&self) -> usize {
        self.fold_id
    }

    pub fn num_folds(&self) -> usize {
        self.num_folds
    }

    /// 0 始まりの行番号 `row` がこの fold の検証側に入るか
    #[inline]
    pub fn is_held_out(&self, row: usize) -> bool {
        row % self.num_folds == self.fold_id
    }
}

/// どちらの部分集合を取り出すか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FoldSubset {
    /// `row % num_folds != fold_id` の行
    Training,
    /// `row % num_folds == fold_id` の行
    HeldOut,
}

impl FoldSubset {
    #[inline]
    pub fn selects(self, fold: FoldSpec, row: usize) -> bool {
        match self {
            FoldSubset::Training => !fold.is_held_out(row),
            FoldSubset::HeldOut => fold.is_held_out(row),
        }
    }
}

/// 包んだ Reader のレコードに行番号を振り、選ばれた部分集合だけを返す Reader。
///
/// 捨てたレコードも行番号を進める。行番号はこの Reader インスタンスに閉じる。
pub struct CrossValidationReader {
    inner: Box<dyn RecordReader>,
    fold: FoldSpec,
    subset: FoldSubset,
    next_row: Mutex<usize>,
}

impl CrossValidationReader {
    pub fn new(inner: Box<dyn RecordReader>, fold: FoldSpec, subset: FoldSubset) -> Self {
        Self {
            inner,
            fold,
            subset,
            next_row: Mutex::new(0),
        }
    }
}

impl RecordReader for CrossValidationReader {
    fn read(&self) -> Option<String> {
        let mut row = self.next_row.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let record = self.inner.read()?;
            let current = *row;
            *row += 1;
            if self.subset.selects(self.fold, current) {
                return Some(record);
            }
        }
    }

    fn reached_end(&self) -> bool {
        let _row = self.next_row.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.reached_end()
    }

    fn skipped(&self) -> usize {
        self.inner.skipped()
    }
}

/// 包んだ Input の Reader を [`CrossValidationReader`] で包む Input
pub struct CrossValidationInput {
    inner: Box<dyn RecordInput>,
    fold: FoldSpec,
    subset: FoldSubset,
}

impl CrossValidationInput {
    pub fn new(inner: Box<dyn RecordInput>, fold: FoldSpec, subset: FoldSubset) -> Self {
        Self {
            inner,
            fold,
            subset,
        }
    }
}

impl RecordInput for CrossValidationInput {
    fn create_reader(&mut self) -> RecordResult<Box<dyn RecordReader>> {
        let inner = self.inner.create_reader()?;
        Ok(Box::new(CrossValidationReader::new(inner, self.fold, self.subset)))
    }
}
