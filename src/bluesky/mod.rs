// Bluesky API layer: XRPC client, session, profile lookups, repo snapshots.
//
// Every remote call the pipeline makes goes through one `XrpcClient` type.
// Each submodule handles one area of the API surface.

pub mod client;
pub mod profiles;
pub mod rate_limit;
pub mod repos;
pub mod session;
