//! Shared primitives for the transfer engine. No network or filesystem I/O
//! lives here; this crate is the vocabulary `backends` and `engine` share.

pub mod cancel;
pub mod chunked_bytes;
pub mod error;
pub mod path;
pub mod progress;
pub mod retry;
pub mod task;

pub use cancel::CancelSignal;
pub use chunked_bytes::SteppedBytes;
pub use error::{BackendError, BackendResult, ErrorKind, Outcome};
pub use path::{norm_path, split_parent};
pub use progress::{NullProgressSink, ProgressSink, TaskProgress};
pub use retry::{retry, retry_with_mockable_sleep, RetryParams, Retryable};
pub use task::{AttemptCounter, ByteStream, Chunk, DataResult, Task};
