pub mod accumulate;
pub mod memory;
pub mod neptune;

pub use accumulate::{encode_descriptions, merge_descriptions, order_pair, parse_description_field};
pub use memory::{ConflictInjector, MemoryGraph};
pub use neptune::NeptuneGraph;
