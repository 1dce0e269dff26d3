// Display-side annotation: motion regions drawn as hollow outlines on a copy of the
// frame. Red while alerting, green otherwise.

use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::core_modules::bounding_box::BoundingBox;
use crate::core_modules::frame::Frame;

pub const ALERT_COLOR: [u8; 3] = [255, 0, 0];
pub const CALM_COLOR: [u8; 3] = [0, 255, 0];

/// Outline thickness in pixels.
const THICKNESS: u32 = 2;

/// Returns a copy of `frame` with every region outlined. The source frame is never
/// modified.
pub fn draw_motion_regions(frame: &Frame, regions: &[BoundingBox], is_violence: bool) -> Frame {
    let rgb = if is_violence { ALERT_COLOR } else { CALM_COLOR };
    let color = Rgb(frame.order.encode(rgb));

    let mut canvas = frame.image().clone();
    for region in regions {
        // Each ring sits one pixel inside the previous one.
        for inset in 0..THICKNESS {
            if region.width() <= 2 * inset || region.height() <= 2 * inset {
                break;
            }
            let rect = Rect::at((region.x() + inset) as i32, (region.y() + inset) as i32)
                .of_size(region.width() - 2 * inset, region.height() - 2 * inset);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }
    frame.with_image(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::frame::PixelOrder;
    use image::RgbImage;

    fn blank(order: PixelOrder) -> Frame {
        Frame::new(7, RgbImage::new(20, 20), order)
    }

    #[test]
    fn outline_is_two_pixels_thick_and_hollow() {
        let frame = blank(PixelOrder::Rgb);
        let region = BoundingBox::new(2, 2, 10, 10).unwrap();
        let out = draw_motion_regions(&frame, &[region], false);

        let green = Rgb(CALM_COLOR);
        assert_eq!(*out.image().get_pixel(2, 6), green);
        assert_eq!(*out.image().get_pixel(3, 6), green);
        assert_eq!(*out.image().get_pixel(4, 6), Rgb([0, 0, 0]));
        assert_eq!(*out.image().get_pixel(11, 11), green);
        assert_eq!(*out.image().get_pixel(7, 7), Rgb([0, 0, 0]));
        assert_eq!(out.id, 7);
    }

    #[test]
    fn alert_color_respects_channel_order() {
        let region = BoundingBox::new(0, 0, 5, 5).unwrap();
        let rgb = draw_motion_regions(&blank(PixelOrder::Rgb), &[region], true);
        let bgr = draw_motion_regions(&blank(PixelOrder::Bgr), &[region], true);
        assert_eq!(*rgb.image().get_pixel(0, 0), Rgb([255, 0, 0]));
        assert_eq!(*bgr.image().get_pixel(0, 0), Rgb([0, 0, 255]));
    }

    #[test]
    fn source_frame_is_left_untouched() {
        let frame = blank(PixelOrder::Rgb);
        let region = BoundingBox::new(0, 0, 5, 5).unwrap();
        let _ = draw_motion_regions(&frame, &[region], true);
        assert!(frame.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn regions_reaching_the_border_are_clipped() {
        let frame = blank(PixelOrder::Rgb);
        let region = BoundingBox::new(15, 15, 10, 10).unwrap();
        let out = draw_motion_regions(&frame, &[region], false);
        assert_eq!(*out.image().get_pixel(15, 19), Rgb(CALM_COLOR));
    }
}
