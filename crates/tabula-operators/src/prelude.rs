//! Everything needed to build and run pipelines.

pub use crate::aggregate::{
    funcs, Aggregate, AggregateBuilder, Fold, RangeAggregate, RangeCounts, RangeRowReduce,
    RowReduce,
};
pub use crate::cat::Cat;
pub use crate::dedup::{merge, Conflicts, Distinct, Duplicates, MergeDuplicates, Unique};
pub use crate::ext::{from_rows, TableExt};
pub use crate::group::{group_by, GroupedRows};
pub use crate::join::{
    diff, Complement, CrossJoin, HashComplement, HashIntersection, HashJoin, HashJoinKind,
    Intersection, Join, JoinKind,
};
pub use crate::merge::{merge_sorted, MergeTables};
pub use crate::reshape::{
    flatten, values_table, Melt, Pivot, Recast, Transpose, Unflatten, UnseenPolicy,
};
pub use crate::sort::{sorted, SortOptions, SortView};
pub use crate::source::{IterTable, MemTable};
pub use crate::traits::{materialize, OpError, Result, RowStream, Scan, Table, TableRef};
