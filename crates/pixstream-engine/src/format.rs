//! Pixel layout shared by producers, consumers and the device backends.
//!
//! Frames are 4 bytes per pixel in BGRA byte order. Rows may be padded: the
//! row stride is the unpadded row length rounded up to the device's copy
//! alignment. This layout is the wire format between both ends of a stream.

use bytemuck::{Pod, Zeroable};

use crate::error::{Result, StreamError};

pub const BYTES_PER_PIXEL: u32 = 4;

/// One BGRA8 pixel.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Pod, Zeroable)]
pub struct Bgra8 {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

impl Bgra8 {
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);
    pub const BLACK: Self = Self::new(0, 0, 0, 255);

    /// Creates a pixel from components given in RGBA order.
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { b, g, r, a }
    }

    #[inline]
    pub const fn to_bytes(self) -> [u8; 4] {
        [self.b, self.g, self.r, self.a]
    }
}

/// Width and height in pixels.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const ZERO: Self = Self::new(0, 0);

    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Either side is zero. Streams treat this as "nothing to do".
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Memory layout of one frame in a transfer buffer.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct FrameLayout {
    pub extent: Extent,
    /// Row length in bytes, `>= width * BYTES_PER_PIXEL`.
    pub stride: u32,
}

impl FrameLayout {
    pub const EMPTY: Self = Self {
        extent: Extent::ZERO,
        stride: 0,
    };

    /// Computes the layout for `extent`, padding rows to `row_alignment` bytes.
    ///
    /// Fails when the padded frame does not fit the addressable range.
    pub fn new(extent: Extent, row_alignment: u32) -> Result<Self> {
        let invalid = |reason| StreamError::InvalidDimensions {
            width: extent.width,
            height: extent.height,
            reason,
        };

        let row = extent
            .width
            .checked_mul(BYTES_PER_PIXEL)
            .ok_or_else(|| invalid("row length overflows"))?;
        let stride = align_up(row, row_alignment.max(1)).ok_or_else(|| invalid("row stride overflows"))?;

        let layout = Self { extent, stride };
        usize::try_from(layout.size()).map_err(|_| invalid("frame exceeds address space"))?;
        Ok(layout)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.extent.is_empty()
    }

    /// Unpadded row length in bytes.
    #[inline]
    pub fn row_bytes(&self) -> usize {
        (self.extent.width * BYTES_PER_PIXEL) as usize
    }

    /// Total byte size of one frame.
    #[inline]
    pub fn size(&self) -> u64 {
        u64::from(self.stride) * u64::from(self.extent.height)
    }

    /// Byte size as a host length. Valid for layouts built through [`FrameLayout::new`].
    #[inline]
    pub fn len(&self) -> usize {
        self.size() as usize
    }

    /// Returns row `y` of `bytes` as pixels, excluding padding.
    pub fn row<'a>(&self, bytes: &'a [u8], y: u32) -> &'a [Bgra8] {
        let start = y as usize * self.stride as usize;
        bytemuck::cast_slice(&bytes[start..start + self.row_bytes()])
    }

    /// Mutable counterpart of [`FrameLayout::row`].
    pub fn row_mut<'a>(&self, bytes: &'a mut [u8], y: u32) -> &'a mut [Bgra8] {
        let start = y as usize * self.stride as usize;
        let len = self.row_bytes();
        bytemuck::cast_slice_mut(&mut bytes[start..start + len])
    }

    /// Iterates the rows of a frame as pixel slices.
    pub fn rows<'a>(&self, bytes: &'a [u8]) -> impl Iterator<Item = &'a [Bgra8]> + 'a {
        let layout = *self;
        (0..layout.extent.height).map(move |y| layout.row(bytes, y))
    }

    /// Writes `pixel` to every visible pixel of `bytes`; padding is untouched.
    pub fn fill(&self, bytes: &mut [u8], pixel: Bgra8) {
        for y in 0..self.extent.height {
            self.row_mut(bytes, y).fill(pixel);
        }
    }
}

#[inline]
fn align_up(value: u32, alignment: u32) -> Option<u32> {
    value.checked_next_multiple_of(alignment)
}
