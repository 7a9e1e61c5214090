//! External sort: in-memory when the input fits the buffer, otherwise sorted
//! spill chunks merged back together.

pub mod external;
pub mod run;

pub use external::{sorted, SortOptions, SortView};
pub use run::{sort_rows, RunGenerator};
