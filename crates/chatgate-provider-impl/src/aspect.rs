//! Aspect-ratio derivation for image generation.

/// Reduce a `WxH` size string to its aspect ratio (`1920x1080` → `16:9`).
pub fn aspect_ratio(size: &str) -> Option<String> {
    let (w, h) = size.split_once(['x', 'X'])?;
    let w: u64 = w.trim().parse().ok()?;
    let h: u64 = h.trim().parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    let divisor = gcd(w, h);
    Some(format!("{}:{}", w / divisor, h / divisor))
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_sizes_reduce() {
        assert_eq!(aspect_ratio("1920x1080").as_deref(), Some("16:9"));
        assert_eq!(aspect_ratio("1024x1024").as_deref(), Some("1:1"));
        assert_eq!(aspect_ratio("1280x720").as_deref(), Some("16:9"));
        assert_eq!(aspect_ratio("768x1024").as_deref(), Some("3:4"));
    }

    #[test]
    fn reduction_is_idempotent() {
        // reduce(reduce(w,h)) == reduce(w,h)
        for size in ["1920x1080", "640x480", "997x991"] {
            let once = aspect_ratio(size).unwrap();
            let again = aspect_ratio(&once.replace(':', "x")).unwrap();
            assert_eq!(once, again);
        }
    }

    #[test]
    fn junk_is_rejected() {
        assert_eq!(aspect_ratio("banana"), None);
        assert_eq!(aspect_ratio("0x100"), None);
        assert_eq!(aspect_ratio("1024"), None);
    }
}
