pub mod headers;
pub mod live;
pub mod transform;

pub use live::{handle_live, LiveQuery};
pub use transform::{handle_transform, INPUT_PATH_HEADER, OUTPUT_PATH_HEADER, PAGE_DATA_HEADER};
