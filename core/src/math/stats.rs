use super::fixed::FixedShort;

/// NaN-skipping sum and sample count of one column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnTotal {
    pub sum: i64,
    pub count: u32,
}

impl ColumnTotal {
    pub fn add(&mut self, value: FixedShort) {
        if !value.is_nan() {
            self.sum += i64::from(value.raw());
            self.count += 1;
        }
    }

    pub fn merge(self, other: ColumnTotal) -> ColumnTotal {
        ColumnTotal {
            sum: self.sum + other.sum,
            count: self.count + other.count,
        }
    }

    /// Sample-weighted mean, rounded to the nearest fixed step; NaN when empty.
    pub fn mean(self) -> FixedShort {
        if self.count == 0 {
            return FixedShort::NAN;
        }
        let mean = (self.sum as f64 / f64::from(self.count)).round();
        FixedShort::from_raw(mean as i16)
    }
}

pub struct StatsHelper;

impl StatsHelper {
    pub fn nan_min<I: IntoIterator<Item = FixedShort>>(values: I) -> FixedShort {
        values
            .into_iter()
            .filter(|v| !v.is_nan())
            .map(FixedShort::raw)
            .min()
            .map_or(FixedShort::NAN, FixedShort::from_raw)
    }

    pub fn nan_max<I: IntoIterator<Item = FixedShort>>(values: I) -> FixedShort {
        values
            .into_iter()
            .filter(|v| !v.is_nan())
            .map(FixedShort::raw)
            .max()
            .map_or(FixedShort::NAN, FixedShort::from_raw)
    }

    pub fn nan_total<I: IntoIterator<Item = FixedShort>>(values: I) -> ColumnTotal {
        let mut total = ColumnTotal::default();
        for value in values {
            total.add(value);
        }
        total
    }

    pub fn nan_mean<I: IntoIterator<Item = FixedShort>>(values: I) -> FixedShort {
        Self::nan_total(values).mean()
    }
}
