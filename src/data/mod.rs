pub mod field;
pub mod sample;
pub mod value;

pub use field::{common_unit, find_field, merge_meta, validate_fields, CustomMeta, FieldDescriptor};
pub use sample::{seconds_between, Row, Sample};
pub use value::{CastFn, DataType, Value};
