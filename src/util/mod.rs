//! Utility functions

mod numeric;

pub use numeric::{
    format_decimal, mean_base_quality, phred_scale, phred_to_probability, truncate_decimals,
};
