//! In-memory backend that records commands instead of executing them
//!
//! Lets device-level behaviour be checked without a GPU: every bind, draw and
//! clear lands in the frame's encoder as a [`Call`].

use std::cell::RefCell;

use crate::render::api::{Attachments, Backend, ClearColor, DrawIndexedIndirect, Frame, GpuObject, ShaderProgram};
use crate::render::handles::{BufferHandle, HandleTable};
use crate::render::layout::{AttributeFormat, VertexLayout};
use crate::render::shader::ProgramStatus;
use crate::render::{RenderError, RenderResult};

/// A command observed by the recording backend
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetRenderTarget,
    Clear(ClearColor),
    BindProgram,
    BindObject,
    Draw { handle: BufferHandle, index_count: u32 },
    MultiDraw { handle: BufferHandle, ranges: Vec<(u32, u32)> },
}

/// Recording backend marker
pub struct Recording;

impl Backend for Recording {
    const NAME: &'static str = "recording";

    type Encoder = RefCell<Vec<Call>>;
    type Frame = RecordingFrame;
    type Program = RecordingProgram;
    type Object = RecordingObject;
}

pub struct RecordingFrame {
    complete: bool,
    encoder: RefCell<Vec<Call>>,
}

impl RecordingFrame {
    pub fn new(complete: bool) -> Self {
        Self {
            complete,
            encoder: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.encoder.borrow().clone()
    }
}

impl Frame<Recording> for RecordingFrame {
    fn is_complete(&self) -> bool {
        self.complete
    }

    fn dimensions(&self) -> (u32, u32) {
        if self.complete {
            (64, 64)
        } else {
            (0, 0)
        }
    }

    fn attachments(&self) -> Attachments {
        if self.complete {
            Attachments::COLOR | Attachments::DEPTH
        } else {
            Attachments::empty()
        }
    }

    fn set_as_render_target(&self) -> RenderResult<()> {
        self.encoder.borrow_mut().push(Call::SetRenderTarget);
        Ok(())
    }

    fn clear(&self, color: ClearColor) -> RenderResult<()> {
        self.encoder.borrow_mut().push(Call::Clear(color));
        Ok(())
    }

    fn encoder(&self) -> &RefCell<Vec<Call>> {
        &self.encoder
    }
}

pub struct RecordingProgram {
    status: ProgramStatus,
    layouts: Option<Vec<VertexLayout>>,
}

impl RecordingProgram {
    pub fn new(usable: bool) -> Self {
        if usable {
            Self::with_status(ProgramStatus::Linked)
        } else {
            Self::with_status(ProgramStatus::compile_failed(
                crate::render::shader::ShaderStage::Vertex,
                "syntax error",
            ))
        }
    }

    pub fn with_status(status: ProgramStatus) -> Self {
        Self { status, layouts: None }
    }

    /// Linked program built for exactly `layouts`
    pub fn expecting(layouts: Vec<VertexLayout>) -> Self {
        Self {
            status: ProgramStatus::Linked,
            layouts: Some(layouts),
        }
    }
}

impl ShaderProgram<Recording> for RecordingProgram {
    fn status(&self) -> &ProgramStatus {
        &self.status
    }

    fn vertex_layouts(&self) -> Option<&[VertexLayout]> {
        self.layouts.as_deref()
    }

    fn bind(&self, encoder: &RefCell<Vec<Call>>) -> RenderResult<()> {
        encoder.borrow_mut().push(Call::BindProgram);
        Ok(())
    }
}

pub struct RecordingObject {
    layouts: Vec<VertexLayout>,
    index_buffers: HandleTable<u32>,
}

impl RecordingObject {
    pub fn new() -> Self {
        Self {
            layouts: vec![VertexLayout::packed(&[AttributeFormat::Vec3])],
            index_buffers: HandleTable::new(),
        }
    }

    pub fn add_index_buffer(&mut self, indices: &[u32]) -> BufferHandle {
        let count = u32::try_from(indices.len()).unwrap();
        self.index_buffers.insert(count)
    }
}

impl GpuObject<Recording> for RecordingObject {
    fn vertex_buffer_count(&self) -> usize {
        self.layouts.len()
    }

    fn vertex_layouts(&self) -> &[VertexLayout] {
        &self.layouts
    }

    fn index_buffer_count(&self) -> usize {
        self.index_buffers.len()
    }

    fn index_count(&self, handle: BufferHandle) -> Option<u32> {
        self.index_buffers.get(handle).copied()
    }

    fn bind(&self, encoder: &RefCell<Vec<Call>>) -> RenderResult<()> {
        encoder.borrow_mut().push(Call::BindObject);
        Ok(())
    }

    fn draw(&self, encoder: &RefCell<Vec<Call>>, handle: BufferHandle) -> RenderResult<()> {
        let index_count = self.index_count(handle).ok_or(RenderError::InvalidHandle(handle))?;
        encoder.borrow_mut().push(Call::Draw { handle, index_count });
        Ok(())
    }

    fn multi_draw(
        &self,
        encoder: &RefCell<Vec<Call>>,
        handle: BufferHandle,
        commands: &[DrawIndexedIndirect],
    ) -> RenderResult<()> {
        self.index_count(handle).ok_or(RenderError::InvalidHandle(handle))?;
        let ranges = commands.iter().map(|c| (c.first_index, c.index_count)).collect();
        encoder.borrow_mut().push(Call::MultiDraw { handle, ranges });
        Ok(())
    }
}
