pub mod clause;
pub mod spec;

pub use clause::{Clause, ColumnRef, col};
pub use spec::{
    CounterSpec, DeleteSpec, ExecutionContext, MutationSpec, ReadCardinality, ReadSpec, WriteSpec,
};
