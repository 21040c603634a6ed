// Interest filter: follower-count threshold over an event's profiles.

use crate::bluesky::profiles::ActorProfile;

/// True iff at least one present profile has `followers_count >= threshold`.
///
/// A profile without a follower count fails its check. Raising the threshold
/// can only turn a pass into a fail, never the reverse.
pub fn passes(
    threshold: i64,
    primary: Option<&ActorProfile>,
    secondary: Option<&ActorProfile>,
) -> bool {
    [primary, secondary]
        .into_iter()
        .flatten()
        .any(|p| p.followers_count.is_some_and(|n| n >= threshold))
}
