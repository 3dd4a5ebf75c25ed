use crate::channel::{Channel, palette};
use crate::foundation::core::PixelType;
use crate::foundation::error::{ExrLayersError, ExrLayersResult};
use crate::rows::kernels;

use super::Document;

/// One layer as four planar float planes, R, G, B and A, ready for a host.
///
/// One colour channel is shown as grey and missing planes come from the document's constant
/// channels. A UINT layer is shown through the ID palette.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerPixels {
    pub width: usize,
    pub height: usize,
    pub planes: [Vec<f32>; 4],
}

impl LayerPixels {
    /// Copy layer `idx` out of `doc`. Every member must be loaded. With `unmult`, colour
    /// planes are divided by the alpha plane.
    pub fn from_layer(doc: &mut Document, idx: usize, unmult: bool) -> ExrLayersResult<Self> {
        let layer = doc
            .layers
            .get(idx)
            .ok_or_else(|| ExrLayersError::logic(format!("no layer at index {idx}")))?;
        let chans = &doc.channels;
        if !layer.loaded(chans) {
            return Err(ExrLayersError::logic(format!(
                "layer '{}' is not loaded",
                layer.name(chans)
            )));
        }
        let color = layer.non_alpha_channels(chans);
        let alpha = layer.alpha_channel(chans);
        let is_id_layer = color
            .first()
            .is_some_and(|id| chans[id.0].pixel_type() == PixelType::Uint);

        let [r, g, b] = if is_id_layer {
            id_planes(&chans[color[0].0])?
        } else {
            let mut planes = color
                .iter()
                .take(3)
                .map(|id| floats_of(&chans[id.0]))
                .collect::<ExrLayersResult<Vec<_>>>()?;
            if planes.len() == 1 {
                planes.push(planes[0].clone());
                planes.push(planes[0].clone());
            }
            while planes.len() < 3 {
                planes.push(floats_of(doc.black()?)?);
            }
            let mut planes = planes.into_iter();
            let mut next = || planes.next().unwrap_or_default();
            [next(), next(), next()]
        };
        let a = match alpha {
            Some(id) => floats_of(&doc.channels[id.0])?,
            None => floats_of(doc.white()?)?,
        };

        let mut pixels = Self {
            width: doc.width(),
            height: doc.height(),
            planes: [r, g, b, a],
        };
        if unmult && alpha.is_some() {
            let [r, g, b, a] = &mut pixels.planes;
            for plane in [r, g, b] {
                doc.engine().map_rows_with(
                    plane.as_mut_slice(),
                    a.as_slice(),
                    pixels.width,
                    kernels::unmult_row,
                )?;
            }
        }
        Ok(pixels)
    }

    /// Interleave into an RGBA float image.
    pub fn to_rgba32f_image(&self) -> ExrLayersResult<image::Rgba32FImage> {
        let len = self.width * self.height;
        let mut data = Vec::with_capacity(len * 4);
        for i in 0..len {
            data.extend(self.planes.iter().map(|p| p[i]));
        }
        let width = u32::try_from(self.width)
            .map_err(|_| ExrLayersError::logic("image width exceeds u32"))?;
        let height = u32::try_from(self.height)
            .map_err(|_| ExrLayersError::logic("image height exceeds u32"))?;
        image::Rgba32FImage::from_raw(width, height, data)
            .ok_or_else(|| ExrLayersError::logic("plane sizes do not match the image size"))
    }
}

fn floats_of(chan: &Channel) -> ExrLayersResult<Vec<f32>> {
    chan.floats()
        .map(<[f32]>::to_vec)
        .ok_or_else(|| ExrLayersError::logic(format!("channel '{}' has no float samples", chan.name())))
}

fn id_planes(chan: &Channel) -> ExrLayersResult<[Vec<f32>; 3]> {
    let ids = chan
        .uints()
        .ok_or_else(|| ExrLayersError::logic(format!("channel '{}' has no UINT samples", chan.name())))?;
    let mut planes = [
        Vec::with_capacity(ids.len()),
        Vec::with_capacity(ids.len()),
        Vec::with_capacity(ids.len()),
    ];
    for &id in ids {
        let rgb = palette::id_color(id);
        for (plane, v) in planes.iter_mut().zip(rgb) {
            plane.push(v);
        }
    }
    Ok(planes)
}
