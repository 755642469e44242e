pub mod context;
pub mod fetcher;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod summarizer;
