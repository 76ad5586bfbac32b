// src/value.rs

//! The (sum, count) pair every counter in the crate accumulates.

/// A cumulative observation: the sum of all values added and how many
/// additions produced it. Plain value type; operations return fresh values
/// rather than mutating in place.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CounterValue {
    pub sum: f64,
    pub count: i64,
}

impl CounterValue {
    pub const ZERO: CounterValue = CounterValue { sum: 0.0, count: 0 };

    pub fn new(sum: f64, count: i64) -> Self {
        Self { sum, count }
    }

    /// Component-wise addition.
    pub fn add(self, other: CounterValue) -> Self {
        Self {
            sum: self.sum + other.sum,
            count: self.count + other.count,
        }
    }

    /// Component-wise subtraction.
    pub fn sub(self, other: CounterValue) -> Self {
        Self {
            sum: self.sum - other.sum,
            count: self.count - other.count,
        }
    }

    /// Exponential blend: `self * ratio + other * (1 - ratio)`, applied to
    /// sum and count independently. Count is truncated toward zero.
    pub fn decline(self, other: CounterValue, ratio: f64) -> Self {
        Self {
            sum: self.sum * ratio + other.sum * (1.0 - ratio),
            count: (self.count as f64 * ratio + other.count as f64 * (1.0 - ratio)) as i64,
        }
    }
}
