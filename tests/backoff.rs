use std::time::Duration;

use fetchkit::clock::backoff;

#[test]
fn backoff_matches_two_times_two_to_the_n() {
    for retries in 0..6u32 {
        let expected = Duration::from_secs(2 * 2u64.pow(retries) as u64);
        assert_eq!(backoff(retries), expected);
    }
}
