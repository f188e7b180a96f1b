//! H.264 profile 3.1 resolution: maps a requested size to one of the three
//! sizes the baseline/3.1 encoder pipeline is configured to accept.

const CANDIDATES: [(u32, u32); 3] = [(1280, 720), (720, 576), (720, 480)];

/// Resolve `(width, height)` to the nearest candidate in the profile 3.1 set.
pub fn resolve(width: u32, height: u32) -> (u32, u32) {
    if let Some(exact) = CANDIDATES.iter().find(|&&(cw, ch)| cw == width && ch == height) {
        return *exact;
    }

    for &(cw, ch) in &CANDIDATES {
        if cw < width && ch < height {
            let scale_diff = (width as f64 / cw as f64 - height as f64 / ch as f64).abs();
            if scale_diff < 1e-4 {
                return (cw, ch);
            }
        }
    }

    CANDIDATES
        .iter()
        .copied()
        .min_by(|&(aw, ah), &(bw, bh)| {
            let a_diff = (width as f64 / aw as f64 - height as f64 / ah as f64).abs();
            let b_diff = (width as f64 / bw as f64 - height as f64 / bh as f64).abs();
            a_diff
                .partial_cmp(&b_diff)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("candidate set is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert_eq!(resolve(1280, 720), (1280, 720));
    }

    #[test]
    fn downscale_matching_aspect() {
        assert_eq!(resolve(1920, 1080), (1280, 720));
    }

    #[test]
    fn non_matching_aspect_picks_minimum_diff() {
        assert_eq!(resolve(800, 700), (720, 576));
    }

    #[test]
    fn other_exact_candidates() {
        assert_eq!(resolve(720, 576), (720, 576));
        assert_eq!(resolve(720, 480), (720, 480));
    }
}
