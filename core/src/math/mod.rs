pub mod block;
pub mod fft;
pub mod fixed;
pub mod stats;
pub mod tiling;

pub use block::{FixedShortBlock, Reducer};
pub use fft::FftHelper;
pub use fixed::FixedShort;
pub use stats::{ColumnTotal, StatsHelper};
pub use tiling::FixedShortBlockMatrix;
