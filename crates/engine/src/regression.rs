//! Regression comparison against stored baselines
//!
//! Screenshots and captured output are compared to a baseline at a
//! configured path. A missing baseline is saved and passes; a measured
//! variation above `maxVariation` is a warning, not a failure.

use image::GenericImageView;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

use doccheck_common::model::OverwriteMode;
use doccheck_common::{Outcome, Result};

/// Result of one baseline comparison.
#[derive(Debug, Clone)]
pub struct RegressionOutcome {
    pub outcome: Outcome,

    /// Measured variation as a fraction (0.0 - 1.0)
    pub variation: f64,

    pub description: String,
}

/// Compare captured text output to the baseline at `path`.
pub fn compare_text(
    path: &Path,
    new_text: &str,
    max_variation: f64,
    overwrite: OverwriteMode,
) -> Result<RegressionOutcome> {
    if !path.exists() {
        write_baseline(path, new_text.as_bytes())?;
        return Ok(RegressionOutcome {
            outcome: Outcome::Pass,
            variation: 0.0,
            description: format!("baseline created at {}", path.display()),
        });
    }

    let baseline = std::fs::read_to_string(path)?;
    let variation = text_difference(&baseline, new_text);
    score(path, new_text.as_bytes(), variation, max_variation, overwrite)
}

/// Compare a captured screenshot to the baseline at `path`.
pub fn compare_image(
    path: &Path,
    new_bytes: &[u8],
    max_variation: f64,
    overwrite: OverwriteMode,
) -> Result<RegressionOutcome> {
    if !path.exists() {
        write_baseline(path, new_bytes)?;
        return Ok(RegressionOutcome {
            outcome: Outcome::Pass,
            variation: 0.0,
            description: format!("baseline created at {}", path.display()),
        });
    }

    let baseline_bytes = std::fs::read(path)?;
    if hash_bytes(&baseline_bytes) == hash_bytes(new_bytes) {
        debug!("screenshot matches baseline exactly (same hash)");
        return Ok(RegressionOutcome {
            outcome: Outcome::Pass,
            variation: 0.0,
            description: "screenshot matches baseline".to_string(),
        });
    }

    let baseline_img = image::load_from_memory(&baseline_bytes)?;
    let new_img = image::load_from_memory(new_bytes)?;
    let variation = image_difference(&baseline_img, &new_img);
    score(path, new_bytes, variation, max_variation, overwrite)
}

/// Shared threshold scoring and baseline overwrite handling.
fn score(
    path: &Path,
    new_bytes: &[u8],
    variation: f64,
    max_variation: f64,
    overwrite: OverwriteMode,
) -> Result<RegressionOutcome> {
    let above = variation > max_variation;

    let replace = match overwrite {
        OverwriteMode::Always => true,
        OverwriteMode::AboveVariation => above,
        OverwriteMode::Never => false,
    };
    if replace {
        write_baseline(path, new_bytes)?;
        info!("replaced baseline at {}", path.display());
    }

    if above {
        warn!(
            "output differs from baseline {} by {:.2}% (threshold {:.2}%)",
            path.display(),
            variation * 100.0,
            max_variation * 100.0
        );
        Ok(RegressionOutcome {
            outcome: Outcome::Warning,
            variation,
            description: format!(
                "variation {:.4} exceeds maxVariation {:.4}",
                variation, max_variation
            ),
        })
    } else {
        Ok(RegressionOutcome {
            outcome: Outcome::Pass,
            variation,
            description: format!("variation {:.4} within maxVariation {:.4}", variation, max_variation),
        })
    }
}

fn write_baseline(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Text difference as a fraction of the longer input: edit distance over
/// characters, falling back to a line-based ratio for large inputs.
fn text_difference(a: &str, b: &str) -> f64 {
    if a == b {
        return 0.0;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let longest = a_chars.len().max(b_chars.len());
    if longest == 0 {
        return 0.0;
    }

    // Quadratic edit distance is fine for step output; large captures fall
    // back to a per-line comparison.
    if a_chars.len().saturating_mul(b_chars.len()) > 4_000_000 {
        return line_difference(a, b);
    }

    levenshtein(&a_chars, &b_chars) as f64 / longest as f64
}

fn line_difference(a: &str, b: &str) -> f64 {
    let a_lines: Vec<&str> = a.lines().collect();
    let b_lines: Vec<&str> = b.lines().collect();
    let longest = a_lines.len().max(b_lines.len());
    if longest == 0 {
        return 0.0;
    }
    let mut differing = 0usize;
    for i in 0..longest {
        if a_lines.get(i) != b_lines.get(i) {
            differing += 1;
        }
    }
    differing as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Pixel difference as a fraction of the larger image, with a small
/// per-channel tolerance for anti-aliasing and compression artifacts.
fn image_difference(baseline: &image::DynamicImage, new: &image::DynamicImage) -> f64 {
    const TOLERANCE: i32 = 5;

    let (bw, bh) = baseline.dimensions();
    let (nw, nh) = new.dimensions();
    let baseline_rgba = baseline.to_rgba8();
    let new_rgba = new.to_rgba8();

    let overlap_w = bw.min(nw);
    let overlap_h = bh.min(nh);
    let total = (bw.max(nw) as u64) * (bh.max(nh) as u64);
    if total == 0 {
        return 0.0;
    }

    let mut differing = total - (overlap_w as u64) * (overlap_h as u64);
    for y in 0..overlap_h {
        for x in 0..overlap_w {
            let a = baseline_rgba.get_pixel(x, y).0;
            let b = new_rgba.get_pixel(x, y).0;
            let differs = (0..4).any(|i| (a[i] as i32 - b[i] as i32).abs() > TOLERANCE);
            if differs {
                differing += 1;
            }
        }
    }

    differing as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_baseline_is_created_and_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/output.txt");

        let result = compare_text(&path, "hello\n", 0.05, OverwriteMode::Never).unwrap();
        assert_eq!(result.outcome, Outcome::Pass);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn identical_text_passes_with_zero_variation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "same").unwrap();

        let result = compare_text(&path, "same", 0.0, OverwriteMode::Never).unwrap();
        assert_eq!(result.outcome, Outcome::Pass);
        assert_eq!(result.variation, 0.0);
    }

    #[test]
    fn variation_above_threshold_warns_and_keeps_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "aaaaaaaaaa").unwrap();

        let result = compare_text(&path, "bbbbbbbbbb", 0.5, OverwriteMode::Never).unwrap();
        assert_eq!(result.outcome, Outcome::Warning);
        assert!(result.variation > 0.5);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "aaaaaaaaaa");
    }

    #[test]
    fn above_variation_overwrite_replaces_baseline_on_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "aaaaaaaaaa").unwrap();

        let result =
            compare_text(&path, "bbbbbbbbbb", 0.5, OverwriteMode::AboveVariation).unwrap();
        assert_eq!(result.outcome, Outcome::Warning);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "bbbbbbbbbb");
    }

    #[test]
    fn within_threshold_passes_and_leaves_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "hello world").unwrap();

        let result = compare_text(&path, "hello worle", 0.5, OverwriteMode::Never).unwrap();
        assert_eq!(result.outcome, Outcome::Pass);
        assert!(result.variation > 0.0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello world");
    }

    #[test]
    fn always_overwrite_replaces_even_within_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        std::fs::write(&path, "hello world").unwrap();

        let result = compare_text(&path, "hello worle", 0.5, OverwriteMode::Always).unwrap();
        assert_eq!(result.outcome, Outcome::Pass);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello worle");
    }

    #[test]
    fn identical_images_pass_via_hash_fast_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");

        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
            .unwrap();

        let first = compare_image(&path, &bytes, 0.0, OverwriteMode::Never).unwrap();
        assert_eq!(first.outcome, Outcome::Pass);

        let second = compare_image(&path, &bytes, 0.0, OverwriteMode::Never).unwrap();
        assert_eq!(second.outcome, Outcome::Pass);
        assert_eq!(second.variation, 0.0);
    }

    #[test]
    fn differing_images_warn_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");

        let baseline = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 0, 0, 255]));
        let mut baseline_bytes = Vec::new();
        baseline
            .write_to(&mut std::io::Cursor::new(&mut baseline_bytes), image::ImageOutputFormat::Png)
            .unwrap();
        std::fs::write(&path, &baseline_bytes).unwrap();

        let changed = image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 255, 255, 255]));
        let mut changed_bytes = Vec::new();
        changed
            .write_to(&mut std::io::Cursor::new(&mut changed_bytes), image::ImageOutputFormat::Png)
            .unwrap();

        let result = compare_image(&path, &changed_bytes, 0.5, OverwriteMode::Never).unwrap();
        assert_eq!(result.outcome, Outcome::Warning);
        assert!(result.variation > 0.99);
    }

    #[test]
    fn text_difference_is_symmetric_fraction() {
        assert_eq!(text_difference("abc", "abc"), 0.0);
        assert_eq!(text_difference("", ""), 0.0);
        let d = text_difference("abcd", "abce");
        assert!((d - 0.25).abs() < f64::EPSILON);
    }
}
