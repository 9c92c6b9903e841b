//! レコードを `(query, assign)` に分解してハンドラへ配るドライバ
//!
//! 逐次モードはファイル順に 1 スレッドで処理する。Hogwild モードは 1 つの Reader を
//! 固定数のワーカーで共有し、全ワーカーの join を待ってから戻る。
//! どちらのモードでも、正しい JSON のレコード 1 件につきハンドラはちょうど 1 回呼ばれる。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::Value;

use crate::config::ParallelConfig;
use crate::error::{ModelResult, TrainError, TrainResult};
use crate::record::{RecordInput, RecordReader};

/// 1 パスの処理件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// ハンドラに渡したレコード数
    pub records: usize,
    /// JSON として読めずに飛ばしたレコード数（UTF-8 として読めない行を含む）
    pub malformed: usize,
}

#[derive(Default)]
struct PassCounters {
    records: AtomicUsize,
    malformed: AtomicUsize,
    /// いずれかのワーカーでモデル層のエラーが出た
    abort: AtomicBool,
}

impl PassCounters {
    fn summary(&self) -> PassSummary {
        PassSummary {
            records: self.records.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// 1 ワーカー分の読み取り・パース・ディスパッチのループ
fn process_records<F>(
    reader: &dyn RecordReader,
    handler: &F,
    counters: &PassCounters,
) -> ModelResult<()>
where
    F: Fn(&Value, &Value) -> ModelResult<()> + Sync,
{
    while !reader.reached_end() && !counters.abort.load(Ordering::Relaxed) {
        let Some(line) = reader.read() else {
            break;
        };
        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                log::error!("Could not parse input: {e}\n{line}");
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        // 欠けたフィールドは Null として渡す
        if let Err(e) = handler(&value["query"], &value["assign"]) {
            counters.abort.store(true, Ordering::Relaxed);
            return Err(e);
        }
        counters.records.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}

fn finish(reader: &dyn RecordReader, counters: &PassCounters) -> PassSummary {
    let mut summary = counters.summary();
    summary.malformed += reader.skipped();
    if summary.malformed > 0 {
        log::warn!("Skipped {} malformed records", summary.malformed);
    }
    summary
}

/// 単一スレッド・ファイル順で全レコードを処理する
pub fn foreach_record<F>(input: &mut dyn RecordInput, handler: F) -> TrainResult<PassSummary>
where
    F: Fn(&Value, &Value) -> ModelResult<()> + Sync,
{
    let reader = input.create_reader()?;
    let counters = PassCounters::default();
    process_records(reader.as_ref(), &handler, &counters)?;
    Ok(finish(reader.as_ref(), &counters))
}

/// `parallel.hogwild` なら `num_threads` 個のワーカーで 1 つの Reader を共有して処理する。
///
/// ハンドラは複数スレッドから同時に呼ばれ、呼び出し順は保証しない。
/// ハンドラがエラーを返すと他のワーカーも次のレコード境界で止まり、
/// join 後に最初に観測したエラーを返す。
pub fn parallel_foreach_record<F>(
    input: &mut dyn RecordInput,
    parallel: &ParallelConfig,
    handler: F,
) -> TrainResult<PassSummary>
where
    F: Fn(&Value, &Value) -> ModelResult<()> + Sync,
{
    if !parallel.hogwild {
        return foreach_record(input, handler);
    }

    let reader = input.create_reader()?;
    let counters = PassCounters::default();
    let num_threads = parallel.num_threads.max(1);

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..num_threads)
            .map(|_| s.spawn(|| process_records(reader.as_ref(), &handler, &counters)))
            .collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let mut first_error = None;
    for (worker, result) in results.into_iter().enumerate() {
        let error = match result {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => TrainError::Model(e),
            Err(_) => TrainError::WorkerPanicked(worker),
        };
        first_error.get_or_insert(error);
    }
    if let Some(e) = first_error {
        return Err(e);
    }
    Ok(finish(reader.as_ref(), &counters))
}
