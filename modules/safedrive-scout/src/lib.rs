pub mod classifier;
pub mod crawler;
pub mod dedup;
pub mod lexicon;
pub mod progress;
pub mod similarity;
pub mod sources;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
