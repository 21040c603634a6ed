// Skyhose: watch the Bluesky firehose for posts and likes
//
// This is the library root. Each module corresponds to one stage of the
// stream pipeline, from wire frames down to the emitted JSON.

pub mod at_uri;
pub mod bluesky;
pub mod config;
pub mod firehose;
pub mod output;
pub mod pipeline;
pub mod records;
pub mod repo;
pub mod stats;
