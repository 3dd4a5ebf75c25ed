use std::collections::BTreeMap;
use std::fmt;

use super::{ChannelInfo, ExrInput, FrameBuffer, FrameBufferEntry, Header, RgbaBuffer};
use crate::channel::classify::increment_name;
use crate::foundation::core::Box2i;
use crate::foundation::error::{ExrLayersError, ExrLayersResult};

/// Prefix given to fill-only channels routed to the first part of a multi-part file, so the
/// part never matches them against a real channel.
const NEVER_LOADED_PREFIX: &str = "zzNOLOADzz";

/// Default rows per read block for single-part scanline files.
pub const DEFAULT_BLOCK_ROWS: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
struct PartChannel {
    part: usize,
    name: String,
}

/// All parts of a file presented as one channel namespace over one merged window.
///
/// Channels of a named part other than the first are prefixed `partname.`; the first part
/// is prefixed as well when `rename_first_part` is set. Deep parts are skipped.
pub struct HybridInputFile {
    input: Box<dyn ExrInput + Send>,
    data_window: Box2i,
    display_window: Box2i,
    channels: Vec<ChannelInfo>,
    map: BTreeMap<String, PartChannel>,
    prefixes: Vec<String>,
    fill_part: usize,
}

impl HybridInputFile {
    pub fn new(input: Box<dyn ExrInput + Send>, rename_first_part: bool) -> ExrLayersResult<Self> {
        let parts = input.parts();
        let mut data_window = Box2i::empty();
        let mut display_window = Box2i::empty();
        let mut map = BTreeMap::new();
        let mut channels: Vec<ChannelInfo> = Vec::new();
        let mut prefixes = Vec::with_capacity(parts);
        let mut fill_part = None;

        for n in 0..parts {
            let head = input
                .header(n)
                .ok_or_else(|| ExrLayersError::logic(format!("part {n} has no header")))?;
            let rename = parts > 1 && (n > 0 || rename_first_part) && head.name.is_some();
            let prefix = match (&head.name, rename) {
                (Some(name), true) => format!("{name}."),
                _ => String::new(),
            };
            prefixes.push(prefix.clone());
            if head.deep {
                tracing::debug!(part = n, "skipping deep part");
                continue;
            }
            fill_part.get_or_insert(n);
            data_window = data_window.extend_by(head.data_window);
            display_window = display_window.extend_by(head.display_window);

            for chan in head.channels() {
                let mut hybrid_name = format!("{prefix}{}", chan.name);
                if map.contains_key(&hybrid_name) {
                    let original = hybrid_name.clone();
                    while map.contains_key(&hybrid_name) {
                        hybrid_name = increment_name(&hybrid_name);
                    }
                    tracing::warn!(
                        part = n,
                        channel = %original,
                        renamed = %hybrid_name,
                        "channel name collides with an earlier part"
                    );
                }
                map.insert(
                    hybrid_name.clone(),
                    PartChannel {
                        part: n,
                        name: chan.name.clone(),
                    },
                );
                channels.push(ChannelInfo {
                    name: hybrid_name,
                    pixel_type: chan.pixel_type,
                });
            }
        }

        let Some(fill_part) = fill_part else {
            return Err(ExrLayersError::unsupported("deep images are not supported"));
        };
        if channels.is_empty() {
            return Err(ExrLayersError::unsupported("file has no readable channels"));
        }
        channels.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            input,
            data_window,
            display_window,
            channels,
            map,
            prefixes,
            fill_part,
        })
    }

    pub fn parts(&self) -> usize {
        self.input.parts()
    }

    pub fn header(&self, part: usize) -> Option<&Header> {
        self.input.header(part)
    }

    /// Prefix prepended to the channel names of `part` (empty when not renamed).
    pub fn part_prefix(&self, part: usize) -> &str {
        self.prefixes.get(part).map_or("", String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        (0..self.parts()).all(|n| self.input.part_complete(n))
    }

    /// Unified channel list, sorted by name.
    pub fn channels(&self) -> &[ChannelInfo] {
        &self.channels
    }

    pub fn data_window(&self) -> Box2i {
        self.data_window
    }

    pub fn display_window(&self) -> Box2i {
        self.display_window
    }

    /// Rows per read block: the whole image for multi-part files, the tile height for tiled
    /// files (doubled when the data window is offset from the display window) and
    /// [`DEFAULT_BLOCK_ROWS`] otherwise.
    pub fn scanline_block_size(&self) -> usize {
        if self.parts() > 1 {
            return self.data_window.height().max(1);
        }
        match self.header(0).and_then(|h| h.tiles) {
            Some(tiles) => {
                let rows = tiles.y_size.max(1) as usize;
                if self.data_window != self.display_window {
                    rows * 2
                } else {
                    rows
                }
            }
            None => DEFAULT_BLOCK_ROWS,
        }
    }

    /// Read scanlines `y0..=y1` of every part into the unified frame buffer.
    ///
    /// Each part only sees the slices of its own channels, under their in-part names, for
    /// the rows its data window covers.
    pub fn read_pixels(
        &mut self,
        frame_buffer: &mut FrameBuffer<'_>,
        y0: i32,
        y1: i32,
    ) -> ExrLayersResult<()> {
        let entries = std::mem::take(frame_buffer).into_entries();
        let mut slots: Vec<Option<FrameBufferEntry<'_>>> = entries.into_iter().map(Some).collect();
        let multi = self.parts() > 1;
        let mut result = Ok(());

        for n in 0..self.parts() {
            let Some(dw) = self.header(n).filter(|h| !h.deep).map(|h| h.data_window) else {
                continue;
            };
            let mut taken = Vec::new();
            let mut part_entries = Vec::new();
            for (idx, slot) in slots.iter_mut().enumerate() {
                let Some(entry) = slot else { continue };
                let in_part = match self.map.get(&entry.name) {
                    Some(pc) if pc.part == n => pc.name.clone(),
                    Some(_) => continue,
                    None if n == self.fill_part => {
                        if multi {
                            format!("{NEVER_LOADED_PREFIX}{}", entry.name)
                        } else {
                            entry.name.clone()
                        }
                    }
                    None => continue,
                };
                if let Some(mut entry) = slot.take() {
                    taken.push((idx, std::mem::replace(&mut entry.name, in_part)));
                    part_entries.push(entry);
                }
            }
            if part_entries.is_empty() {
                continue;
            }

            let start = y0.max(dw.min_y);
            let end = y1.min(dw.max_y);
            let mut part_fb = FrameBuffer::from_entries(part_entries);
            if end >= start && result.is_ok() {
                result = self.input.read_part_pixels(n, &mut part_fb, start, end);
            }
            for ((idx, name), mut entry) in taken.into_iter().zip(part_fb.into_entries()) {
                entry.name = name;
                slots[idx] = Some(entry);
            }
        }

        *frame_buffer = FrameBuffer::from_entries(slots.into_iter().flatten().collect());
        result
    }

    /// Half-precision RGBA read of the first part; the Y/RY/BY reconstruction path.
    pub fn read_rgba(&mut self, y0: i32, y1: i32, out: &mut RgbaBuffer) -> ExrLayersResult<()> {
        self.input.read_rgba(y0, y1, out)
    }
}

impl fmt::Debug for HybridInputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridInputFile")
            .field("parts", &self.parts())
            .field("data_window", &self.data_window)
            .field("display_window", &self.display_window)
            .field("channels", &self.channels.len())
            .finish()
    }
}
