//! Common functionality for anchor-based object detection.

pub mod ssd;

use crate::{
    image::Resolution,
    nn::tensor::Tensor,
    num::{sigmoid, TotalF32},
    rect::Rect,
};

use self::ssd::{Anchor, Anchors};

/// An axis-aligned box around a detected object, plus the detection confidence.
///
/// The coordinate system depends on the producer: [`BoxDecoder`] outputs boxes in network input
/// coordinates, [`crate::hand::detection::HandDetector`] in source frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    rect: Rect,
    confidence: f32,
}

impl BoundingBox {
    pub fn new(rect: Rect, confidence: f32) -> Self {
        Self { rect, confidence }
    }

    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    /// Returns the detection confidence, between 0.0 and 1.0.
    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Maps the box's corners through `f`, keeping the confidence.
    pub fn map_rect(&self, f: impl FnOnce(&Rect) -> Rect) -> Self {
        Self {
            rect: f(&self.rect),
            confidence: self.confidence,
        }
    }
}

/// Divisors applied to the raw box regression outputs before decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeScales {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl DecodeScales {
    /// Scales for a network that regresses offsets in input pixels.
    pub fn for_input(input_res: Resolution) -> Self {
        let (w, h) = (input_res.width() as f32, input_res.height() as f32);
        Self { x: w, y: h, w, h }
    }
}

/// Decodes per-anchor box regression outputs against the anchor priors.
#[derive(Debug, Clone)]
pub struct BoxDecoder {
    anchors: Anchors,
    input_res: Resolution,
    scales: DecodeScales,
}

impl BoxDecoder {
    pub fn new(anchors: Anchors, input_res: Resolution) -> Self {
        Self {
            anchors,
            input_res,
            scales: DecodeScales::for_input(input_res),
        }
    }

    pub fn with_scales(mut self, scales: DecodeScales) -> Self {
        self.scales = scales;
        self
    }

    pub fn anchors(&self) -> &Anchors {
        &self.anchors
    }

    /// Decodes the raw regression values `raw` (at least 4) of `anchor` into a box in network
    /// input coordinates.
    ///
    /// The center offsets are divided by the scale and added to the anchor center. The extents are
    /// `exp(raw / scale)` times the anchor extent.
    pub fn decode(&self, anchor: &Anchor, raw: &[f32]) -> Rect {
        let s = &self.scales;
        let xc = raw[0] / s.x + anchor.x_center();
        let yc = raw[1] / s.y + anchor.y_center();
        let w = (raw[2] / s.w).exp() * anchor.width();
        let h = (raw[3] / s.h).exp() * anchor.height();

        let (input_w, input_h) = (self.input_res.width() as f32, self.input_res.height() as f32);
        Rect::from_center(xc * input_w, yc * input_h, w * input_w, h * input_h)
    }

    /// Finds the highest-scoring detection whose confidence exceeds `threshold`.
    ///
    /// `boxes` must have shape `[1, N, C]` with `C >= 4`, `scores` either `[1, N, 1]` or `[1, N]`,
    /// where `N` is the number of anchors. Scores are raw logits.
    ///
    /// Returns an error if the shapes don't match the anchors, and `Ok(None)` if nothing was
    /// detected.
    pub fn best_detection(
        &self,
        boxes: &Tensor,
        scores: &Tensor,
        threshold: f32,
    ) -> anyhow::Result<Option<BoundingBox>> {
        let num_anchors = self.anchors.anchor_count();
        match boxes.shape() {
            [1, n, c] if *n == num_anchors && *c >= 4 => {}
            shape => anyhow::bail!(
                "box output has shape {shape:?}, expected [1, {num_anchors}, >=4]"
            ),
        }
        match scores.shape() {
            [1, n, 1] | [1, n] if *n == num_anchors => {}
            shape => anyhow::bail!(
                "score output has shape {shape:?}, expected [1, {num_anchors}, 1]"
            ),
        }

        // Both layouts store one score per anchor.
        let best = scores
            .as_raw_data()
            .iter()
            .map(|&logit| sigmoid(logit))
            .enumerate()
            .filter(|&(_, conf)| conf > threshold)
            .max_by_key(|&(_, conf)| TotalF32(conf));

        let Some((index, confidence)) = best else {
            return Ok(None);
        };

        let raw = boxes.index([0, index]);
        let rect = self.decode(&self.anchors[index], raw.as_slice());
        if !rect.is_valid() {
            log::trace!("discarding degenerate box {rect:?} of anchor {index}");
            return Ok(None);
        }
        Ok(Some(BoundingBox::new(rect, confidence)))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn decoder(anchors: Vec<Anchor>) -> BoxDecoder {
        BoxDecoder::new(anchors.into_iter().collect(), Resolution::new(256, 256))
    }

    fn outputs(raw: &[[f32; 4]], logits: &[f32]) -> (Tensor, Tensor) {
        let boxes = Tensor::from_iter(&[1, raw.len(), 4], raw.iter().flatten().copied());
        let scores = Tensor::from_iter(&[1, logits.len(), 1], logits.iter().copied());
        (boxes, scores)
    }

    #[test]
    fn zero_regression_reproduces_anchor() {
        let dec = decoder(vec![Anchor::new(0.5, 0.5, 0.2, 0.2)]);
        let rect = dec.decode(&dec.anchors()[0], &[0.0; 18]);
        let (xc, yc) = rect.center();
        assert_relative_eq!(xc, 128.0);
        assert_relative_eq!(yc, 128.0);
        assert_relative_eq!(rect.width(), 51.2, epsilon = 1e-4);
        assert_relative_eq!(rect.height(), 51.2, epsilon = 1e-4);
    }

    #[test]
    fn offsets_are_scaled() {
        let dec = decoder(vec![Anchor::new(0.5, 0.5, 0.2, 0.2)]);
        // 25.6 input pixels is a tenth of the input; log(2) * 256 doubles the extent.
        let rect = dec.decode(
            &dec.anchors()[0],
            &[25.6, -25.6, 2f32.ln() * 256.0, 0.0],
        );
        let (xc, yc) = rect.center();
        assert_relative_eq!(xc, 153.6, epsilon = 1e-3);
        assert_relative_eq!(yc, 102.4, epsilon = 1e-3);
        assert_relative_eq!(rect.width(), 102.4, epsilon = 1e-3);
        assert_relative_eq!(rect.height(), 51.2, epsilon = 1e-3);
    }

    #[test]
    fn picks_top_scoring_anchor() {
        let dec = decoder(vec![
            Anchor::new(0.25, 0.25, 0.1, 0.1),
            Anchor::new(0.5, 0.5, 0.1, 0.1),
            Anchor::new(0.75, 0.75, 0.1, 0.1),
        ]);
        let (boxes, scores) = outputs(&[[0.0; 4]; 3], &[3.0, 5.0, 4.0]);
        let det = dec.best_detection(&boxes, &scores, 0.9).unwrap().unwrap();
        assert_relative_eq!(det.rect().center().0, 128.0);
        assert_relative_eq!(det.confidence(), sigmoid(5.0));
    }

    #[test]
    fn threshold_is_exclusive() {
        let dec = decoder(vec![Anchor::new(0.5, 0.5, 0.1, 0.1)]);
        // sigmoid(0) = 0.5
        let (boxes, scores) = outputs(&[[0.0; 4]], &[0.0]);
        assert!(dec.best_detection(&boxes, &scores, 0.5).unwrap().is_none());
        assert!(dec.best_detection(&boxes, &scores, 0.4).unwrap().is_some());
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let dec = decoder(vec![Anchor::new(0.5, 0.5, 0.1, 0.1); 2]);
        let (boxes, scores) = outputs(&[[0.0; 4]; 3], &[9.0; 3]);
        assert!(dec.best_detection(&boxes, &scores, 0.9).is_err());

        let (boxes, _) = outputs(&[[0.0; 4]; 2], &[9.0; 2]);
        let flat_scores = Tensor::from_iter(&[1, 2], [9.0, 9.0]);
        assert!(dec.best_detection(&boxes, &flat_scores, 0.9).unwrap().is_some());
        let wrong_scores = Tensor::from_iter(&[2, 1], [9.0, 9.0]);
        assert!(dec.best_detection(&boxes, &wrong_scores, 0.9).is_err());
    }

    #[test]
    fn nan_scores_are_ignored() {
        let dec = decoder(vec![Anchor::new(0.5, 0.5, 0.1, 0.1); 2]);
        let (boxes, scores) = outputs(&[[0.0; 4]; 2], &[f32::NAN, 10.0]);
        let det = dec.best_detection(&boxes, &scores, 0.9).unwrap().unwrap();
        assert_relative_eq!(det.confidence(), sigmoid(10.0));
    }
}
