//! Authored time samples for one attribute in one layer.

use crate::util::Value;

/// Time-ordered `(time, value)` samples. A sample value may be a value
/// block, which blanks that sample only.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TimeSamples {
    samples: Vec<(f64, Value)>,
}

impl TimeSamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from unordered pairs; later duplicates win.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, Value)>) -> Self {
        let mut samples = Self::new();
        for (time, value) in pairs {
            samples.set(time, value);
        }
        samples
    }

    /// Set the sample at `time`.
    pub fn set(&mut self, time: f64, value: Value) {
        match self.search(time) {
            Ok(i) => self.samples[i].1 = value,
            Err(i) => self.samples.insert(i, (time, value)),
        }
    }

    /// Remove the sample at `time`.
    pub fn remove(&mut self, time: f64) -> Option<Value> {
        self.search(time).ok().map(|i| self.samples.remove(i).1)
    }

    /// Sample authored exactly at `time`.
    pub fn get(&self, time: f64) -> Option<&Value> {
        self.search(time).ok().map(|i| &self.samples[i].1)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|(t, _)| *t).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &Value)> {
        self.samples.iter().map(|(t, v)| (*t, v))
    }

    /// Sample at index.
    pub fn at(&self, index: usize) -> Option<(f64, &Value)> {
        self.samples.get(index).map(|(t, v)| (*t, v))
    }

    /// Times bracketing `time`: equal when `time` is a sample time or lies
    /// outside the sampled range.
    pub fn bracketing(&self, time: f64) -> Option<(f64, f64)> {
        let first = self.samples.first()?.0;
        let last = self.samples.last()?.0;
        if time <= first {
            return Some((first, first));
        }
        if time >= last {
            return Some((last, last));
        }
        match self.search(time) {
            Ok(i) => Some((self.samples[i].0, self.samples[i].0)),
            Err(i) => Some((self.samples[i - 1].0, self.samples[i].0)),
        }
    }

    /// Index of the last sample at or before `time` (strictly before when
    /// `strict`), if any.
    pub fn floor_index(&self, time: f64, strict: bool) -> Option<usize> {
        let count = self
            .samples
            .partition_point(|(t, _)| if strict { *t < time } else { *t <= time });
        count.checked_sub(1)
    }

    /// Samples with times in `[start, end]`.
    pub fn times_in_interval(&self, start: f64, end: f64) -> Vec<f64> {
        self.samples
            .iter()
            .map(|(t, _)| *t)
            .filter(|t| *t >= start && *t <= end)
            .collect()
    }

    fn search(&self, time: f64) -> Result<usize, usize> {
        self.samples.binary_search_by(|(t, _)| t.total_cmp(&time))
    }
}
