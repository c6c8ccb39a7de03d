//! GNSS/INS fusion filter.

mod eskf;

pub use eskf::{Eskf, EskfOptions, PredictOutcome};
