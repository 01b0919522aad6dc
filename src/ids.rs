// src/ids.rs

use std::sync::atomic::{AtomicI64, Ordering};

use crate::db::unix_ms;

static LAST_SESSION_MS: AtomicI64 = AtomicI64::new(0);

fn random_suffix() -> u128 {
    uuid::Uuid::new_v4().as_u128() % 10_000
}

/// `sess_<ms>`; never repeats within a process even when called twice in one millisecond.
pub fn generate_session_id() -> String {
    format!("sess_{}", next_session_ms(unix_ms()))
}

/// Compatible-mode imports need a run of consecutive ids starting at `base_ms`.
pub fn session_id_at(base_ms: i64) -> String {
    format!("sess_{}", next_session_ms(base_ms))
}

fn next_session_ms(candidate: i64) -> i64 {
    let mut prev = LAST_SESSION_MS.load(Ordering::SeqCst);
    loop {
        let next = candidate.max(prev + 1);
        match LAST_SESSION_MS.compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next,
            Err(actual) => prev = actual,
        }
    }
}

pub fn generate_message_id() -> String {
    format!("msg_{}_{}", unix_ms(), random_suffix())
}

pub fn generate_image_id() -> String {
    format!("img_{}_{}", unix_ms(), uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn session_ids_are_distinct_and_increasing() {
        let ids: Vec<String> = (0..50).map(|_| generate_session_id()).collect();
        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        let stamps: Vec<i64> = ids
            .iter()
            .map(|id| id.trim_start_matches("sess_").parse().unwrap())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn message_ids_have_expected_shape() {
        let id = generate_message_id();
        assert!(id.starts_with("msg_"));
        assert_eq!(id.split('_').count(), 3);
    }
}
