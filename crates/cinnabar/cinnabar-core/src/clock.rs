use galena_msg::Ttl;

/// Current wall clock as (seconds, microseconds) since the epoch.
#[inline(always)]
pub fn wall_now() -> (u64, u64) {
    let mut tv = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    unsafe { libc::gettimeofday(&mut tv, std::ptr::null_mut()) };
    (tv.tv_sec as u64, tv.tv_usec as u64)
}

/// Turns a relative TTL into the absolute wall-clock expiry used by the
/// outbound slots and the sent journal.
#[inline]
pub fn expiry_after(ttl: Ttl) -> Ttl {
    let (now_s, now_us) = wall_now();
    let mut secs = now_s + ttl.secs;
    let mut usecs = now_us + ttl.usecs;
    if usecs >= 1_000_000 {
        usecs -= 1_000_000;
        secs += 1;
    }
    Ttl { secs, usecs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_in_the_future_and_normalized() {
        let (now_s, _) = wall_now();
        let e = expiry_after(Ttl {
            secs: 10,
            usecs: 999_999,
        });
        assert!(e.secs >= now_s + 10);
        assert!(e.usecs < 1_000_000);
    }
}
