//! Name-fragment matching against the user roster.

use crate::users::User;

/// Returns the first candidate whose name contains `fragment`,
/// case-insensitively.
///
/// Candidates must already exclude the acting user and keep store order
/// (ascending id), so ambiguous fragments resolve deterministically to the
/// earliest registration.
pub(crate) fn resolve<'a>(fragment: &str, candidates: &'a [User]) -> Option<&'a User> {
    let needle = fragment.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    candidates
        .iter()
        .find(|user| user.name.to_lowercase().contains(&needle))
}
