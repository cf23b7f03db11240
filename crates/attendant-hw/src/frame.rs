//! Frame type and pixel conversion: YUYV/GREY to RGB24, dark detection.

/// A captured camera frame in packed RGB24.
#[derive(Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("is_dark", &self.is_dark)
            .finish_non_exhaustive()
    }
}

/// Convert packed YUYV (4:2:2) to RGB24 using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
/// Also returns the luma plane, used for dark-frame detection.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<(Vec<u8>, Vec<u8>), FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected || pixels % 2 != 0 {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut luma = Vec::with_capacity(pixels);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        for y in [y0, y1] {
            rgb.extend_from_slice(&ycbcr_to_rgb(y, u, v));
            luma.push(y);
        }
    }
    Ok((rgb, luma))
}

/// Replicate 8-bit grayscale into three channels.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    if gray.len() < pixels {
        return Err(FrameError::InvalidLength {
            expected: pixels,
            actual: gray.len(),
        });
    }
    Ok(gray[..pixels].iter().flat_map(|&g| [g, g, g]).collect())
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of luma samples fall in the
/// darkest eighth of the range (0–31). A covered lens reads as dark.
pub fn is_dark_frame(luma: &[u8], threshold_pct: f32) -> bool {
    if luma.is_empty() {
        return true;
    }
    let dark_count = luma.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / luma.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_neutral_chroma_is_gray() {
        // 2x1 image, U=V=128: pure luma.
        let yuyv = vec![16, 128, 235, 128];
        let (rgb, luma) = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
        assert_eq!(luma, vec![16, 235]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_dominant() {
        // High V pushes toward red.
        let yuyv = vec![81, 90, 81, 240];
        let (rgb, _) = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 200, "red channel: {}", rgb[0]);
        assert!(rgb[1] < 60, "green channel: {}", rgb[1]);
    }

    #[test]
    fn test_yuyv_output_length() {
        let yuyv: Vec<u8> = (0..16).collect();
        let (rgb, luma) = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
        assert_eq!(luma, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[10, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![10, 10, 10, 200, 200, 200]);
        assert!(grey_to_rgb(&[10], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&vec![0u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&vec![128u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_dark_frame_borderline() {
        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, 0.95));

        let mut mostly_bright = vec![10u8; 940];
        mostly_bright.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&mostly_bright, 0.95));
    }
}
