// THEORY:
// The `RegionConsolidator` is the spatial grouping layer. It turns the noisy, cleaned
// foreground mask of one frame into a small, stable set of rectangles that the
// display and the operator can actually read.
//
// Key architectural principles & algorithm steps:
// 1.  **Blob Extraction**: Maximal 8-connected groups of foreground pixels are found
//     with a two-pass connected-component labelling. Each blob is summarised by its
//     tight axis-aligned bounding rectangle and its true pixel count.
// 2.  **Area Gate**: A blob whose pixel count (not its rectangle area) is below
//     `min_motion_area` is noise and never becomes a region.
// 3.  **One-Sided Greedy Suppression**: Boxes are processed largest first. Each
//     picked box removes every remaining box that it covers by more than
//     `overlap_threshold` of *that remaining box's own area*. This is not IoU: a
//     small box nested in a large one has an overlap of 1.0 no matter how large the
//     outer box is, so the outer box always wins.
// 4.  **Pure Suppression**: Boxes are only ever kept or dropped. Two boxes are never
//     fused into a new, larger rectangle.
// 5.  **Stateless Utility**: Like the other spatial helpers, nothing is remembered
//     between frames. The same mask always yields the same `RegionSet`, in the same
//     order.

use std::cmp::Reverse;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::config::MotionConfig;
use crate::core_modules::bounding_box::{BoundingBox, RegionSet};
use crate::core_modules::foreground::BACKGROUND;

pub mod region_consolidator {
    use super::*; // Make the geometry types from the parent module available.

    /// Running extent of one labelled component.
    #[derive(Debug, Clone, Copy)]
    struct Extent {
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        pixels: u32,
    }

    impl Extent {
        fn at(x: u32, y: u32) -> Self {
            Self {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                pixels: 1,
            }
        }

        fn include(&mut self, x: u32, y: u32) {
            self.min_x = self.min_x.min(x);
            self.min_y = self.min_y.min(y);
            self.max_x = self.max_x.max(x);
            self.max_y = self.max_y.max(y);
            self.pixels += 1;
        }
    }

    /// Finds every 8-connected foreground blob of at least `min_area` pixels and
    /// returns its bounding rectangle. Regions come out in label order, which is the
    /// raster order of each blob's first pixel.
    pub fn find_regions(mask: &GrayImage, min_area: u32) -> Vec<BoundingBox> {
        let labels = connected_components(mask, Connectivity::Eight, Luma([BACKGROUND]));

        // Labels are dense and start at 1; slot `label - 1` holds that blob.
        let mut extents: Vec<Option<Extent>> = Vec::new();
        for (x, y, pixel) in labels.enumerate_pixels() {
            let label = pixel.0[0] as usize;
            if label == 0 {
                continue;
            }
            if extents.len() < label {
                extents.resize(label, None);
            }
            match &mut extents[label - 1] {
                Some(extent) => extent.include(x, y),
                slot @ None => *slot = Some(Extent::at(x, y)),
            }
        }

        extents
            .into_iter()
            .flatten()
            .filter(|extent| extent.pixels >= min_area)
            .map(|e| BoundingBox::from_inclusive_corners(e.min_x, e.min_y, e.max_x, e.max_y))
            .collect()
    }

    /// Greedy one-sided suppression. The largest remaining box is picked; every other
    /// remaining box covered by the pick for more than `overlap_threshold` of its own
    /// area is dropped. Among equal areas the box that came first in `boxes` is picked
    /// first. The result is in pick order: largest first.
    pub fn merge_boxes(boxes: &[BoundingBox], overlap_threshold: f64) -> RegionSet {
        let mut remaining: Vec<(usize, BoundingBox)> = boxes.iter().copied().enumerate().collect();
        // Ascending, so `pop` yields the largest; equal areas pop in input order.
        remaining.sort_by_key(|(index, b)| (b.area(), Reverse(*index)));

        let mut picked = RegionSet::with_capacity(remaining.len());
        while let Some((_, pick)) = remaining.pop() {
            picked.push(pick);
            remaining.retain(|(_, candidate)| candidate.overlap_ratio(&pick) <= overlap_threshold);
        }
        picked
    }
}

/// Mask-to-regions stage of the motion pipeline, configured once per session.
#[derive(Debug, Clone)]
pub struct RegionConsolidator {
    min_area: u32,
    overlap_threshold: f64,
}

impl RegionConsolidator {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            min_area: config.min_motion_area,
            overlap_threshold: config.overlap_suppression_threshold,
        }
    }

    /// Blob extraction followed by suppression.
    pub fn consolidate(&self, mask: &GrayImage) -> RegionSet {
        let blobs = region_consolidator::find_regions(mask, self.min_area);
        let regions = region_consolidator::merge_boxes(&blobs, self.overlap_threshold);
        if blobs.len() != regions.len() {
            tracing::trace!(blobs = blobs.len(), regions = regions.len(), "suppressed overlapping regions");
        }
        regions
    }

    pub fn min_area(&self) -> u32 {
        self.min_area
    }

    pub fn overlap_threshold(&self) -> f64 {
        self.overlap_threshold
    }
}
