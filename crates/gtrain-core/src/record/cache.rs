use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::{RecordInput, RecordReader};
use crate::error::{RecordError, RecordResult};

/// 初回パスで読んだレコードの記録先
#[derive(Default)]
struct Recording {
    records: Mutex<Vec<String>>,
    /// 包んだ Reader が終端に達したか
    complete: AtomicBool,
}

/// 包んだ Reader が返したレコードを記録しながら中継する Reader
pub struct CachingReader {
    inner: Box<dyn RecordReader>,
    recording: Arc<Recording>,
}

impl CachingReader {
    fn new(inner: Box<dyn RecordReader>, recording: Arc<Recording>) -> Self {
        Self { inner, recording }
    }
}

impl RecordReader for CachingReader {
    fn read(&self) -> Option<String> {
        match self.inner.read() {
            Some(record) => {
                let mut records = self.recording.records.lock().unwrap_or_else(|e| e.into_inner());
                records.push(record.clone());
                Some(record)
            }
            None => {
                self.recording.complete.store(true, Ordering::Release);
                None
            }
        }
    }

    fn reached_end(&self) -> bool {
        let end = self.inner.reached_end();
        if end {
            self.recording.complete.store(true, Ordering::Release);
        }
        end
    }

    fn skipped(&self) -> usize {
        self.inner.skipped()
    }
}

/// 記録済みレコードを先頭から順に返す Reader
pub struct ReplayReader {
    records: Arc<Vec<String>>,
    cursor: AtomicUsize,
}

impl ReplayReader {
    pub fn new(records: Arc<Vec<String>>) -> Self {
        Self {
            records,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl RecordReader for ReplayReader {
    fn read(&self) -> Option<String> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.records.get(i).cloned()
    }

    fn reached_end(&self) -> bool {
        self.cursor.load(Ordering::Relaxed) >= self.records.len()
    }
}

enum CacheState {
    Uncached,
    Recording(Arc<Recording>),
    Cached(Arc<Vec<String>>),
}

/// 初回の Reader は包んだ Input をそのまま読みつつ RAM に記録し、
/// 2 回目以降の Reader は記録をシャッフルして再生する Input。
///
/// 1 つの Reader は複数スレッドから読めるが、同時に生きている Reader は 1 つだけ。
/// 前の Reader が破棄される前に `create_reader` を呼ぶと
/// [`RecordError::PassInFlight`] になる。
pub struct ShuffledCacheInput {
    inner: Box<dyn RecordInput>,
    state: CacheState,
    rng: Xoshiro256PlusPlus,
}

impl ShuffledCacheInput {
    /// `seed` を省略した場合は毎回異なる順序になる
    pub fn new(inner: Box<dyn RecordInput>, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        Self {
            inner,
            state: CacheState::Uncached,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    /// 記録が完了しているか
    pub fn is_cached(&self) -> bool {
        matches!(self.state, CacheState::Cached(_))
    }

    /// 記録済みレコード数（記録完了前は `None`）
    pub fn cached_len(&self) -> Option<usize> {
        match &self.state {
            CacheState::Cached(records) => Some(records.len()),
            _ => None,
        }
    }

    fn start_recording(&mut self) -> RecordResult<Box<dyn RecordReader>> {
        let recording = Arc::new(Recording::default());
        let reader = CachingReader::new(self.inner.create_reader()?, Arc::clone(&recording));
        self.state = CacheState::Recording(recording);
        Ok(Box::new(reader))
    }
}

impl RecordInput for ShuffledCacheInput {
    fn create_reader(&mut self) -> RecordResult<Box<dyn RecordReader>> {
        if let CacheState::Recording(recording) = &self.state {
            if Arc::strong_count(recording) > 1 {
                return Err(RecordError::PassInFlight);
            }
            let complete = recording.complete.load(Ordering::Acquire);
            let records = {
                let mut guard = recording.records.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *guard)
            };
            if complete {
                log::debug!("Cached {} records", records.len());
                self.state = CacheState::Cached(Arc::new(records));
            } else {
                log::warn!(
                    "Recording pass stopped after {} records before end of input; recording again",
                    records.len()
                );
                self.state = CacheState::Uncached;
            }
        }

        if let CacheState::Cached(records) = &mut self.state {
            // 前のパスの ReplayReader が生きていれば排他参照が取れない
            let Some(list) = Arc::get_mut(records) else {
                return Err(RecordError::PassInFlight);
            };
            list.shuffle(&mut self.rng);
            return Ok(Box::new(ReplayReader::new(Arc::clone(records))));
        }
        self.start_recording()
    }
}
