// Firehose: the relay's `subscribeRepos` event stream.
//
// `frames` decodes the wire format; `stream` owns the websocket and feeds
// commits to the pipeline's worker pool.

pub mod frames;
pub mod stream;

/// Default relay endpoint.
pub const DEFAULT_RELAY_URL: &str = "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos";
