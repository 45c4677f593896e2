pub mod channel;
pub mod driver;
pub mod error;
pub mod memory;
pub mod pagination;
pub mod request;
pub mod sink;
pub mod task;
pub mod testutil;
pub mod traits;

pub use channel::{Channel, Delivery};
pub use driver::{DriveReporter, DriveSummary, TracingDriveReporter, drive};
pub use error::AppError;
pub use memory::MemoryChannel;
pub use pagination::{CursorToken, Pagination, SinglePage, Step, TimeWindow};
pub use request::{CursorRequest, PageRequest, SinglePageRequest, WindowedRequest};
pub use sink::FileSink;
pub use task::{CursorTask, PagedTask, ScrapeTask, SinglePageTask, TimeWindowTask};
pub use traits::{NullSink, PageFetcher, PageSink};
