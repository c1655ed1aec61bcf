//! Subscription identity derivation.

use crate::types::{EventFilter, Predicate, SubscriptionId};

/// Derive the identity of a `(resource, event, predicate)` triple.
///
/// Predicate pairs are sorted and deduplicated before joining, so the same
/// conditions given in any order yield the same identity. Keys and values
/// have `\`, `,`, `=` and `:` backslash-escaped, which keeps distinct
/// predicates apart. Format:
///
/// - `messages:*` with no predicate
/// - `messages:INSERT:conversation_id=c1`
/// - `rsvps:UPDATE:club_id=7,event_id=3` with several pairs
pub fn canonical_identity(
    resource: &str,
    event: EventFilter,
    predicate: &Predicate,
) -> SubscriptionId {
    let mut id = format!("{}:{}", resource, event.as_str());

    for (i, (key, value)) in predicate.canonical_pairs().into_iter().enumerate() {
        id.push(if i == 0 { ':' } else { ',' });
        push_escaped(&mut id, key);
        id.push('=');
        push_escaped(&mut id, value);
    }

    SubscriptionId(id)
}

fn push_escaped(out: &mut String, part: &str) {
    for c in part.chars() {
        if matches!(c, '\\' | ',' | '=' | ':') {
            out.push('\\');
        }
        out.push(c);
    }
}
