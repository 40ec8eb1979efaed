//! Backend-agnostic vertex layout definitions
//!
//! A [`VertexLayout`] describes one vertex buffer: how far apart consecutive
//! vertices are and where each attribute sits inside a vertex. Backends
//! translate it into `glVertexAttribPointer` calls or Vulkan vertex input
//! descriptions.

use crate::render::{RenderError, RenderResult};

/// Data format of a single vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    /// One 32-bit float
    Float,
    /// Two 32-bit floats
    Vec2,
    /// Three 32-bit floats
    Vec3,
    /// Four 32-bit floats
    Vec4,
    /// Four unsigned bytes normalized to `[0, 1]`
    UByte4Norm,
    /// One 32-bit unsigned integer
    UInt,
}

impl AttributeFormat {
    /// Number of components
    pub const fn component_count(self) -> u32 {
        match self {
            Self::Float | Self::UInt => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 | Self::UByte4Norm => 4,
        }
    }

    /// Size of the attribute in bytes
    pub const fn size_bytes(self) -> u32 {
        match self {
            Self::Float | Self::UInt | Self::UByte4Norm => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
        }
    }
}

/// How often the buffer advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputRate {
    /// Once per vertex
    #[default]
    Vertex,
    /// Once per instance
    Instance,
}

/// One attribute inside a vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Data format
    pub format: AttributeFormat,
    /// Byte offset from the start of the vertex
    pub offset: u32,
}

/// Memory layout of one vertex buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    stride: u32,
    rate: InputRate,
    attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Layout with `stride` bytes per vertex and no attributes yet
    pub const fn new(stride: u32) -> Self {
        Self {
            stride,
            rate: InputRate::Vertex,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, location: u32, format: AttributeFormat, offset: u32) -> Self {
        self.attributes.push(VertexAttribute { location, format, offset });
        self
    }

    /// Advance once per instance instead of once per vertex
    pub fn per_instance(mut self) -> Self {
        self.rate = InputRate::Instance;
        self
    }

    /// Tightly packed layout of `formats` at consecutive locations from 0
    pub fn packed(formats: &[AttributeFormat]) -> Self {
        let mut offset = 0;
        let mut attributes = Vec::with_capacity(formats.len());
        for (location, format) in (0u32..).zip(formats) {
            attributes.push(VertexAttribute {
                location,
                format: *format,
                offset,
            });
            offset += format.size_bytes();
        }
        Self {
            stride: offset,
            rate: InputRate::Vertex,
            attributes,
        }
    }

    /// Bytes per vertex
    pub const fn stride(&self) -> u32 {
        self.stride
    }

    /// Step rate
    pub const fn rate(&self) -> InputRate {
        self.rate
    }

    /// Attributes in declaration order
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Check that every attribute fits inside the stride and locations are unique
    pub fn validate(&self) -> RenderResult<()> {
        if self.stride == 0 {
            return Err(RenderError::InvalidVertexData("vertex stride cannot be zero".to_string()));
        }

        for (i, attribute) in self.attributes.iter().enumerate() {
            let end = u64::from(attribute.offset) + u64::from(attribute.format.size_bytes());
            if end > u64::from(self.stride) {
                return Err(RenderError::InvalidVertexData(format!(
                    "attribute at location {} ends at byte {} past the {}-byte stride",
                    attribute.location, end, self.stride
                )));
            }

            if self.attributes[..i].iter().any(|a| a.location == attribute.location) {
                return Err(RenderError::InvalidVertexData(format!(
                    "location {} is declared twice",
                    attribute.location
                )));
            }
        }

        Ok(())
    }

    /// Number of whole vertices in `size_bytes` bytes of vertex data
    pub fn vertex_count(&self, size_bytes: usize) -> RenderResult<usize> {
        self.validate()?;
        let stride = self.stride as usize;
        if size_bytes % stride != 0 {
            return Err(RenderError::InvalidVertexData(format!(
                "{size_bytes} bytes is not a whole number of {stride}-byte vertices"
            )));
        }
        Ok(size_bytes / stride)
    }
}

/// First binding where `provided` does not supply the layout `expected` names
///
/// Extra trailing bindings in `provided` are compatible; a missing or
/// different one is not.
pub fn first_layout_mismatch(expected: &[VertexLayout], provided: &[VertexLayout]) -> Option<usize> {
    expected
        .iter()
        .enumerate()
        .find(|(binding, layout)| provided.get(*binding) != Some(*layout))
        .map(|(binding, _)| binding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_layout_computes_offsets() {
        let layout = VertexLayout::packed(&[AttributeFormat::Vec3, AttributeFormat::Vec2, AttributeFormat::Vec3]);
        assert_eq!(layout.stride(), 32);
        let offsets: Vec<_> = layout.attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20]);
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn attribute_past_stride_is_invalid() {
        let layout = VertexLayout::new(12).with_attribute(0, AttributeFormat::Vec4, 0);
        assert!(matches!(layout.validate(), Err(RenderError::InvalidVertexData(_))));
    }

    #[test]
    fn duplicate_location_is_invalid() {
        let layout = VertexLayout::new(32)
            .with_attribute(0, AttributeFormat::Vec3, 0)
            .with_attribute(0, AttributeFormat::Vec3, 12);
        assert!(layout.validate().is_err());
    }

    #[test]
    fn vertex_count_requires_whole_vertices() {
        let layout = VertexLayout::packed(&[AttributeFormat::Vec3]);
        assert_eq!(layout.vertex_count(36).unwrap(), 3);
        assert!(layout.vertex_count(40).is_err());
        assert!(VertexLayout::new(0).vertex_count(0).is_err());
    }

    #[test]
    fn offset_near_u32_max_is_out_of_stride() {
        let layout = VertexLayout::new(16).with_attribute(0, AttributeFormat::Vec4, u32::MAX - 2);
        assert!(matches!(layout.validate(), Err(RenderError::InvalidVertexData(_))));
        assert!(matches!(layout.vertex_count(32), Err(RenderError::InvalidVertexData(_))));
    }

    #[test]
    fn layouts_must_cover_every_expected_binding() {
        let position = VertexLayout::packed(&[AttributeFormat::Vec3]);
        let colour = VertexLayout::packed(&[AttributeFormat::UByte4Norm]);
        let expected = [position.clone(), colour.clone()];

        assert_eq!(first_layout_mismatch(&expected, &[position.clone(), colour.clone()]), None);
        assert_eq!(
            first_layout_mismatch(&expected, &[position.clone(), colour.clone(), position.clone()]),
            None
        );
        assert_eq!(first_layout_mismatch(&expected, &[position.clone()]), Some(1));
        assert_eq!(first_layout_mismatch(&expected, &[colour, position]), Some(0));
        assert_eq!(first_layout_mismatch(&[], &[]), None);
    }
}
