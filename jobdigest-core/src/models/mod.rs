pub mod listing;
pub mod message;
pub mod report;
pub mod summary;

pub use listing::{ListingContent, ListingLink};
pub use message::{Checkpoint, RawMessage};
pub use report::{CycleReport, RenderedReport};
pub use summary::{FailureReason, SummaryRecord, SummaryStatus};
