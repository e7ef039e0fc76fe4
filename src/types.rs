use std::ops::Range;
use std::sync::Arc;

use crate::backends::Factorization;

/// Type alias for the contiguous design matrix columns owned by one parameter.
pub type ColumnRange = Range<usize>;

/// Type alias for one resolved equation row.
///
/// Each entry is a `(column, coefficient)` pair; columns are unique within a row and appear
/// in the order the parameters appear in the equation string.
pub type Row = Vec<(usize, f64)>;

/// Type alias for a cached factorization shared between solve calls.
///
/// This represents a factorization that:
/// - Maps a block of right-hand sides (equations × instances) to solutions (columns × instances)
/// - Is both Send and Sync so instance chunks can be solved in parallel
pub type SharedFactorization = Arc<dyn Factorization>;
