//! Composite-key encoding for the store's `queue:id` member grammar.
//!
//! Queue names and job ids are user-supplied strings. Raw `%` and `:` are
//! percent-escaped before composing members so arbitrary input cannot
//! collide with the `:`-delimited grammar. Decoding reverses the escapes in
//! the opposite order.

/// Escape `%` and `:` so the value can participate in a `queue:id` member.
pub fn encode_key(decoded: &str) -> String {
    decoded.replace('%', "%25").replace(':', "%3A")
}

/// Reverse [`encode_key`].
pub fn decode_key(encoded: &str) -> String {
    encoded.replace("%3A", ":").replace("%25", "%")
}

/// Compose the index member for a job.
pub fn job_member(queue: &str, id: &str) -> String {
    format!("{}:{}", encode_key(queue), encode_key(id))
}

/// Split an index member back into `(queue, id)`.
///
/// Members are always produced by [`job_member`], so a missing delimiter
/// means corrupted state; `None` lets the caller decide how loudly to fail.
pub fn parse_member(member: &str) -> Option<(String, String)> {
    let (queue, id) = member.split_once(':')?;
    Some((decode_key(queue), decode_key(id)))
}

/// Match a queue name against a `*`-wildcard pattern.
///
/// Used by pattern scans; `*` matches any run of characters, every other
/// character matches literally.
pub fn queue_matches(pattern: &str, queue: &str) -> bool {
    fn matches(p: &[u8], q: &[u8]) -> bool {
        match (p.first(), q.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], q) || (!q.is_empty() && matches(p, &q[1..]))
            }
            (Some(pc), Some(qc)) if pc == qc => matches(&p[1..], &q[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), queue.as_bytes())
}
