pub use sealdup_types::error::{Result, SealdupError};
