//! graphics.rs — boot splash rendering.
//!
//! Decodes the embedded `.splash` BMP and blits it centered on the current
//! graphics mode. Splash is pure cosmetics: every failure in here is
//! swallowed by the caller and boot continues on the text console.

use alloc::vec::Vec;

use uefi::proto::console::gop::{BltOp, BltPixel, BltRegion, GraphicsOutput};
use uefi::prelude::*;
use uefi::table::boot::BootServices;
use zerocopy::byteorder::{LittleEndian, I32, U16, U32};
use zerocopy::{FromBytes, LayoutVerified, Unaligned};

#[derive(FromBytes, Unaligned, Clone, Copy)]
#[repr(C)]
struct BmpFileHeader {
    magic: [u8; 2],
    file_size: U32<LittleEndian>,
    reserved: U32<LittleEndian>,
    pixel_offset: U32<LittleEndian>,
}

#[derive(FromBytes, Unaligned, Clone, Copy)]
#[repr(C)]
struct BmpInfoHeader {
    header_size: U32<LittleEndian>,
    width: I32<LittleEndian>,
    height: I32<LittleEndian>,
    planes: U16<LittleEndian>,
    bits_per_pixel: U16<LittleEndian>,
    compression: U32<LittleEndian>,
    image_size: U32<LittleEndian>,
    x_ppm: I32<LittleEndian>,
    y_ppm: I32<LittleEndian>,
    colors_used: U32<LittleEndian>,
    colors_important: U32<LittleEndian>,
}

/// A decoded image: rows top-down, one RGB triple per pixel.
pub struct Splash {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<(u8, u8, u8)>,
}

/// Decode an uncompressed 24- or 32-bit BMP. Anything else is politely
/// declined — the build system controls the splash asset, so there is no
/// need to carry the long tail of the format here.
pub fn decode_bmp(data: &[u8]) -> Option<Splash> {
    let (file_header, rest) =
        LayoutVerified::<&[u8], BmpFileHeader>::new_unaligned_from_prefix(data)?;
    if &file_header.magic != b"BM" {
        return None;
    }
    let (info, _) = LayoutVerified::<&[u8], BmpInfoHeader>::new_unaligned_from_prefix(rest)?;

    let bpp = info.bits_per_pixel.get() as usize;
    if info.compression.get() != 0 || (bpp != 24 && bpp != 32) || info.planes.get() != 1 {
        return None;
    }

    let width = usize::try_from(info.width.get()).ok()?;
    let raw_height = info.height.get();
    // Positive height means rows are stored bottom-up.
    let bottom_up = raw_height > 0;
    let height = usize::try_from(raw_height.unsigned_abs()).ok()?;
    if width == 0 || height == 0 {
        return None;
    }

    let stride = (width.checked_mul(bpp / 8)? + 3) & !3;
    let pixel_offset = file_header.pixel_offset.get() as usize;
    let needed = pixel_offset.checked_add(stride.checked_mul(height)?)?;
    if needed > data.len() {
        return None;
    }

    let mut pixels = Vec::with_capacity(width.checked_mul(height)?);
    for y in 0..height {
        let src_row = if bottom_up { height - 1 - y } else { y };
        let row = &data[pixel_offset + src_row * stride..];
        for x in 0..width {
            let px = &row[x * (bpp / 8)..];
            // BMP stores BGR(A).
            pixels.push((px[2], px[1], px[0]));
        }
    }

    Some(Splash { width, height, pixels })
}

/// Render the splash section, centered. Errors out (non-fatally, at the
/// caller) when there is no graphics output or the image does not fit the
/// current mode.
pub fn splash(bs: &BootServices, bmp: &[u8]) -> uefi::Result<()> {
    let image = decode_bmp(bmp).ok_or(Status::UNSUPPORTED)?;

    let handle = bs.get_handle_for_protocol::<GraphicsOutput>()?;
    let mut gop = bs.open_protocol_exclusive::<GraphicsOutput>(handle)?;

    let (screen_w, screen_h) = gop.current_mode_info().resolution();
    if image.width > screen_w || image.height > screen_h {
        return Err(Status::UNSUPPORTED.into());
    }
    let dest = ((screen_w - image.width) / 2, (screen_h - image.height) / 2);

    let buffer: Vec<BltPixel> = image
        .pixels
        .iter()
        .map(|&(r, g, b)| BltPixel::new(r, g, b))
        .collect();

    gop.blt(BltOp::BufferToVideo {
        buffer: &buffer,
        src: BltRegion::Full,
        dest,
        dims: (image.width, image.height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    /// Hand-build a 2x2 24bpp bottom-up BMP:
    ///   stored rows: [blue, green] then [red, white]
    ///   displayed:   [red, white] over [blue, green]
    fn tiny_bmp() -> Vec<u8> {
        let mut bmp = vec![0u8; 14 + 40 + 16];
        bmp[0] = b'B';
        bmp[1] = b'M';
        bmp[10..14].copy_from_slice(&54u32.to_le_bytes()); // pixel offset
        bmp[14..18].copy_from_slice(&40u32.to_le_bytes()); // info header size
        bmp[18..22].copy_from_slice(&2i32.to_le_bytes()); // width
        bmp[22..26].copy_from_slice(&2i32.to_le_bytes()); // height (bottom-up)
        bmp[26..28].copy_from_slice(&1u16.to_le_bytes()); // planes
        bmp[28..30].copy_from_slice(&24u16.to_le_bytes()); // bpp

        // Row stride for 2 px * 3 B = 6, padded to 8.
        let rows = [
            [(255u8, 0u8, 0u8), (0, 255, 0)], // bottom row in file: blue, green (BGR)
            [(0, 0, 255), (255, 255, 255)],   // top row in file: red, white
        ];
        for (i, row) in rows.iter().enumerate() {
            let at = 54 + i * 8;
            for (j, &(b, g, r)) in row.iter().enumerate() {
                bmp[at + j * 3] = b;
                bmp[at + j * 3 + 1] = g;
                bmp[at + j * 3 + 2] = r;
            }
        }
        bmp
    }

    #[test]
    fn decodes_bottom_up_rows_into_display_order() {
        let splash = decode_bmp(&tiny_bmp()).unwrap();
        assert_eq!((splash.width, splash.height), (2, 2));
        assert_eq!(
            splash.pixels,
            vec![
                (255, 0, 0),     // red
                (255, 255, 255), // white
                (0, 0, 255),     // blue
                (0, 255, 0),     // green
            ]
        );
    }

    #[test]
    fn rejects_non_bmp_and_truncated_data() {
        assert!(decode_bmp(b"not a bitmap").is_none());
        let mut truncated = tiny_bmp();
        truncated.truncate(40);
        assert!(decode_bmp(&truncated).is_none());
    }

    #[test]
    fn rejects_compressed_or_paletted_images() {
        let mut bmp = tiny_bmp();
        bmp[30..34].copy_from_slice(&1u32.to_le_bytes()); // RLE8
        assert!(decode_bmp(&bmp).is_none());

        let mut bmp = tiny_bmp();
        bmp[28..30].copy_from_slice(&8u16.to_le_bytes()); // 8bpp palette
        assert!(decode_bmp(&bmp).is_none());
    }
}
