// Output records: the JSON document emitted per matching event.

use serde::Serialize;

use crate::at_uri::rkey_of;
use crate::bluesky::profiles::ActorProfile;

/// Default host for post permalinks.
pub const DEFAULT_WEB_HOST: &str = "bsky.app";

/// One emitted event. Field order here is the order in the rendered JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub post: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<ActorProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_user_profile: Option<ActorProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liking_user_profile: Option<ActorProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
}

impl OutputRecord {
    /// Pretty JSON with two-space indentation.
    pub fn render(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Assemble the output record for one post.
///
/// Profiles and the permalink are attached only when `filter_passed`; the
/// permalink also needs the author's handle. `path_hint` is any path whose
/// last segment is the post's record key.
pub fn format(
    post: &str,
    author: Option<ActorProfile>,
    reply_author: Option<ActorProfile>,
    liking: Option<ActorProfile>,
    path_hint: &str,
    filter_passed: bool,
    web_host: &str,
) -> OutputRecord {
    if !filter_passed {
        return OutputRecord {
            post: post.to_string(),
            user_profile: None,
            reply_user_profile: None,
            liking_user_profile: None,
            post_url: None,
        };
    }

    let post_url = author
        .as_ref()
        .map(|a| post_url(web_host, &a.handle, path_hint));

    OutputRecord {
        post: post.to_string(),
        user_profile: author,
        reply_user_profile: reply_author,
        liking_user_profile: liking,
        post_url,
    }
}

/// `https://<web_host>/profile/<handle>/post/<rkey>`
pub fn post_url(web_host: &str, handle: &str, path_hint: &str) -> String {
    format!(
        "https://{web_host}/profile/{handle}/post/{}",
        rkey_of(path_hint)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ActorProfile {
        ActorProfile::new("did:plc:alice", "alice.bsky.social", Some(1200))
    }

    #[test]
    fn failed_filter_keeps_only_the_text() {
        let record = format(
            "hello",
            Some(alice()),
            None,
            None,
            "app.bsky.feed.post/3k1",
            false,
            DEFAULT_WEB_HOST,
        );
        assert_eq!(record.render().unwrap(), "{\n  \"post\": \"hello\"\n}");
    }

    #[test]
    fn passed_filter_adds_profile_and_url() {
        let record = format(
            "hello",
            Some(alice()),
            None,
            None,
            "app.bsky.feed.post/3k1",
            true,
            DEFAULT_WEB_HOST,
        );
        assert_eq!(
            record.post_url.as_deref(),
            Some("https://bsky.app/profile/alice.bsky.social/post/3k1")
        );
        let json: serde_json::Value = serde_json::from_str(&record.render().unwrap()).unwrap();
        assert_eq!(json["userProfile"]["followersCount"], 1200);
        assert!(json.get("replyUserProfile").is_none());
        assert!(json.get("likingUserProfile").is_none());
    }

    #[test]
    fn key_order_is_fixed() {
        let bob = ActorProfile::new("did:plc:bob", "bob.test", Some(3));
        let rendered = format(
            "hi",
            Some(alice()),
            Some(bob.clone()),
            Some(bob),
            "3k1",
            true,
            "example.social",
        )
        .render()
        .unwrap();
        let positions: Vec<usize> = [
            "\"post\"",
            "\"userProfile\"",
            "\"replyUserProfile\"",
            "\"likingUserProfile\"",
            "\"postUrl\"",
        ]
        .iter()
        .map(|k| rendered.find(k).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(rendered.contains("https://example.social/profile/alice.bsky.social/post/3k1"));
    }
}
