// Event processing pipeline: filter, like resolution, dispatch, workers.

pub mod dispatch;
pub mod filter;
pub mod likes;
pub mod workers;
