//! Hogwild 学習用の重みベクトル
//!
//! `f64` をビット列として `AtomicU64` に格納し、CAS ループで加算・縮小する。
//! 複数ワーカーからの更新は互いに多少古い値を見ることがあるが、失われはしない。

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Weights(Vec<AtomicU64>);

impl Weights {
    pub fn from_vec(values: Vec<f64>) -> Self {
        Self(values.into_iter().map(|w| AtomicU64::new(w.to_bits())).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 新しい重みを末尾に追加し、その添字を返す（モデル構築時のみ）
    pub fn push(&mut self, value: f64) -> usize {
        self.0.push(AtomicU64::new(value.to_bits()));
        self.0.len() - 1
    }

    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        f64::from_bits(self.0[index].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn add(&self, index: usize, delta: f64) {
        self.update(index, |w| w + delta);
    }

    #[inline]
    pub fn scale(&self, index: usize, factor: f64) {
        self.update(index, |w| w * factor);
    }

    fn update(&self, index: usize, f: impl Fn(f64) -> f64) {
        let cell = &self.0[index];
        let mut current = cell.load(Ordering::Relaxed);
        loop {
            let next = f(f64::from_bits(current)).to_bits();
            match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }
}

impl Clone for Weights {
    fn clone(&self) -> Self {
        Self::from_vec(self.to_vec())
    }
}
