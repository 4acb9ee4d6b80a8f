use ash::vk;
use thiserror::Error;
use crate::replayer::contexts::resource_ctx::resource::AllocationDesc;
use crate::replayer::workload::tokens::{self, BlockInfo};

/// Placement of one subresource inside a staging buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubresourceFootprint {
    pub offset: u64,
    pub mip_level: u32,
    pub array_layer: u32,
    /// Texel extents of the subresource.
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Bytes per row of blocks.
    pub row_pitch: u64,
    pub block_rows: u32,
}

impl SubresourceFootprint {
    pub fn slice_pitch(&self) -> u64 {
        self.row_pitch * self.block_rows as u64
    }

    pub fn size(&self) -> u64 {
        self.slice_pitch() * self.depth as u64
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
    #[error("mip {mip} needs {needed} bytes but only {available} were provided")]
    ShortData {
        mip: u32,
        needed: usize,
        available: usize,
    },
}

/// Tightly packed layout of every subresource of a resource, in subresource index order
/// (`mip + layer * mip_levels`).
#[derive(Clone, Debug)]
pub struct StagingLayout {
    pub format: vk::Format,
    pub block: BlockInfo,
    pub footprints: Vec<SubresourceFootprint>,
    pub size: u64,
}

impl StagingLayout {
    pub fn for_buffer(size: u64) -> Self {
        Self {
            format: vk::Format::UNDEFINED,
            block: BlockInfo { width: 1, height: 1, bytes: 1 },
            footprints: Vec::new(),
            size,
        }
    }

    /// Returns `None` when the staging format has no packed block layout.
    pub fn for_texture(desc: &AllocationDesc) -> Option<Self> {
        let format = tokens::staging_format(desc.format);
        let block = tokens::block_info(format)?;
        let alignment = lcm(block.bytes as u64, 4);
        let width = desc.width as u32;

        let mut footprints = Vec::with_capacity((desc.mip_levels * desc.array_layers()) as usize);
        let mut offset = 0u64;
        for array_layer in 0..desc.array_layers() {
            for mip_level in 0..desc.mip_levels {
                let mip_width = (width >> mip_level).max(1);
                let mip_height = (desc.height >> mip_level).max(1);
                let mip_depth = (desc.depth() >> mip_level).max(1);
                let blocks_x = mip_width.div_ceil(block.width);
                let block_rows = mip_height.div_ceil(block.height);

                offset = offset.next_multiple_of(alignment);
                let footprint = SubresourceFootprint {
                    offset,
                    mip_level,
                    array_layer,
                    width: mip_width,
                    height: mip_height,
                    depth: mip_depth,
                    row_pitch: blocks_x as u64 * block.bytes as u64,
                    block_rows,
                };
                offset += footprint.size();
                footprints.push(footprint);
            }
        }

        Some(Self {
            format,
            block,
            footprints,
            size: offset.max(1),
        })
    }

    /// Copies the declared contents of one mip (every array layer, in order) into the
    /// packed staging image. `pixel_size` is the byte size of one block in `data`.
    /// Returns how many bytes of `data` were consumed.
    pub fn pack_mip(
        &self,
        mip: u32,
        data: &[u8],
        pixel_size: u32,
        staged: &mut [u8],
    ) -> Result<usize, PackError> {
        let footprints = self
            .footprints
            .iter()
            .filter(|fp| fp.mip_level == mip)
            .collect::<Vec<_>>();

        let needed = footprints
            .iter()
            .map(|fp| self.source_slice_pitch(fp, pixel_size) * fp.depth as usize)
            .sum::<usize>();
        if needed > data.len() {
            return Err(PackError::ShortData {
                mip,
                needed,
                available: data.len(),
            });
        }

        let mut src_offset = 0usize;
        for fp in footprints {
            let src_row_pitch = fp.width.div_ceil(self.block.width) as usize * pixel_size as usize;
            let row_bytes = src_row_pitch.min(fp.row_pitch as usize);
            for z in 0..fp.depth as u64 {
                for row in 0..fp.block_rows as u64 {
                    let dst = (fp.offset + z * fp.slice_pitch() + row * fp.row_pitch) as usize;
                    staged[dst..dst + row_bytes]
                        .copy_from_slice(&data[src_offset..src_offset + row_bytes]);
                    src_offset += src_row_pitch;
                }
            }
        }

        Ok(src_offset)
    }

    fn source_slice_pitch(&self, fp: &SubresourceFootprint, pixel_size: u32) -> usize {
        fp.width.div_ceil(self.block.width) as usize
            * pixel_size as usize
            * fp.block_rows as usize
    }
}

/// Keeps the first `output_size` bytes of every `input_size`-byte pixel, e.g. to pull the
/// depth plane out of interleaved depth/stencil data. A trailing partial pixel is dropped.
pub fn slice_pixels(data: &[u8], output_size: usize, input_size: usize) -> Vec<u8> {
    data.chunks_exact(input_size)
        .flat_map(|pixel| &pixel[..output_size])
        .copied()
        .collect()
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}
