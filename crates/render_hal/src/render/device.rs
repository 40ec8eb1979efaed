//! Render device: the conditions of a render invocation
//!
//! A [`RenderDevice`] ties together a frame to draw into, a program to draw
//! with and an object to draw from. It borrows all three; none of them is
//! owned, so the same program or object can serve several devices.
//!
//! # Render state machine
//!
//! 1. A device starts with no index-buffer handle. `render()` in this state is
//!    a no-op and reports [`RenderOutcome::Skipped`].
//! 2. [`set_handle`](RenderDevice::set_handle) selects an index buffer of the
//!    object. `render()` now draws the whole buffer with one indexed draw.
//! 3. [`set_indices`](RenderDevice::set_indices) attaches index snippets.
//!    A non-empty list switches `render()` to one multi-draw-indirect batch.
//!
//! Before anything reaches the GPU the device must be [`ready`](RenderDevice::ready)
//! and every snippet must pass the sanity check. A failed check refuses or
//! rejects the whole invocation and leaves GPU state untouched.
//!
//! There is no "null device" value: a slot that may hold no device is an
//! `Option<RenderDevice>`.

use std::fmt;

use crate::render::api::{Backend, ClearColor, Frame, GpuObject, ShaderProgram};
use crate::render::handles::BufferHandle;
use crate::render::layout::first_layout_mismatch;
use crate::render::snippet::{IndexSnippetList, SnippetError};
use crate::render::{RenderError, RenderResult};

/// Why a device refused to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// The frame is missing attachments or has invalid dimensions
    FrameIncomplete,
    /// The program failed to compile or link
    ProgramUnusable,
    /// The device references no object
    NoObject,
    /// The object does not supply the vertex layout the program expects at `binding`
    LayoutMismatch {
        /// First binding whose layout is missing or different
        binding: usize,
    },
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameIncomplete => f.write_str("frame is not complete"),
            Self::ProgramUnusable => f.write_str("shader program is not usable"),
            Self::NoObject => f.write_str("no GPU object is attached"),
            Self::LayoutMismatch { binding } => {
                write!(f, "object vertex layout at binding {binding} does not match the program")
            }
        }
    }
}

/// Result of one `render()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// No handle was set; nothing happened
    Skipped,
    /// The device was not ready; nothing happened
    Refused(Refusal),
    /// A snippet failed the sanity check; the whole batch was dropped
    Rejected(SnippetError),
    /// Draw commands were issued
    Drawn {
        /// Number of draws issued, one per snippet in batched mode
        draws: usize,
    },
}

impl RenderOutcome {
    /// True when draw commands were issued
    pub const fn is_drawn(&self) -> bool {
        matches!(self, Self::Drawn { .. })
    }
}

/// Conditions under which render invocations take place
///
/// Besides [`ready`](Self::ready), `render()` refuses when the program was
/// built for vertex layouts the object does not supply.
pub struct RenderDevice<'a, B: Backend> {
    frame: &'a B::Frame,
    program: &'a B::Program,
    object: Option<&'a B::Object>,
    handle: Option<BufferHandle>,
    snippets: IndexSnippetList,
    clear_color: ClearColor,
}

impl<'a, B: Backend> RenderDevice<'a, B> {
    /// Create a device drawing `object` into `frame` with `program`
    pub fn new(frame: &'a B::Frame, program: &'a B::Program, object: Option<&'a B::Object>) -> Self {
        Self {
            frame,
            program,
            object,
            handle: None,
            snippets: IndexSnippetList::new(),
            clear_color: ClearColor::default(),
        }
    }

    /// Frame this device renders into
    pub fn frame(&self) -> &'a B::Frame {
        self.frame
    }

    /// Program this device renders with
    pub fn program(&self) -> &'a B::Program {
        self.program
    }

    /// Object this device draws from
    pub fn object(&self) -> Option<&'a B::Object> {
        self.object
    }

    /// Currently selected index buffer
    pub const fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    /// Select the index buffer used by subsequent render invocations
    pub fn set_handle(&mut self, handle: BufferHandle) -> RenderResult<()> {
        let object = self.object.ok_or(RenderError::NoObject)?;
        if object.index_count(handle).is_none() {
            return Err(RenderError::InvalidHandle(handle));
        }
        log::trace!("[DEVICE] Selected index buffer {}", handle);
        self.handle = Some(handle);
        Ok(())
    }

    /// Attach index snippets; a non-empty list switches to multi-draw
    pub fn set_indices(&mut self, snippets: IndexSnippetList) {
        self.snippets = snippets;
    }

    /// Drop any attached snippets and return to single-draw mode
    pub fn clear_indices(&mut self) {
        self.snippets = IndexSnippetList::new();
    }

    /// Attached snippets
    pub const fn indices(&self) -> &IndexSnippetList {
        &self.snippets
    }

    /// True when `render()` will issue a multi-draw batch
    pub fn is_batched(&self) -> bool {
        !self.snippets.is_empty()
    }

    /// Colour used by [`clear`](Self::clear)
    pub fn set_clear_color(&mut self, color: ClearColor) {
        self.clear_color = color;
    }

    /// Colour used by [`clear`](Self::clear)
    pub const fn clear_color(&self) -> ClearColor {
        self.clear_color
    }

    /// True when the frame is complete, the program usable and an object attached
    pub fn ready(&self) -> bool {
        self.readiness().is_ok()
    }

    fn readiness(&self) -> Result<&'a B::Object, Refusal> {
        if !self.frame.is_complete() {
            return Err(Refusal::FrameIncomplete);
        }
        if !self.program.usable() {
            return Err(Refusal::ProgramUnusable);
        }
        self.object.ok_or(Refusal::NoObject)
    }

    /// Issue one render invocation
    ///
    /// Configuration problems come back as a non-drawn [`RenderOutcome`] and
    /// touch no GPU state. Errors are reserved for native API failures.
    pub fn render(&self) -> RenderResult<RenderOutcome> {
        let Some(handle) = self.handle else {
            log::debug!("[DEVICE] render() called before an index buffer was selected, skipping");
            return Ok(RenderOutcome::Skipped);
        };

        let object = match self.readiness() {
            Ok(object) => object,
            Err(reason) => {
                log::warn!("[DEVICE] Refusing to render on {}: {}", B::NAME, reason);
                return Ok(RenderOutcome::Refused(reason));
            }
        };

        if let Some(expected) = self.program.vertex_layouts() {
            if let Some(binding) = first_layout_mismatch(expected, object.vertex_layouts()) {
                let reason = Refusal::LayoutMismatch { binding };
                log::warn!("[DEVICE] Refusing to render on {}: {}", B::NAME, reason);
                return Ok(RenderOutcome::Refused(reason));
            }
        }

        // set_handle checked the handle against this object, which cannot change while borrowed
        let index_count = object.index_count(handle).ok_or(RenderError::InvalidHandle(handle))?;

        let commands = if self.snippets.is_empty() {
            None
        } else {
            if let Err(error) = self.snippets.sanity_check(index_count) {
                log::warn!("[DEVICE] Rejecting batch of {} snippets: {}", self.snippets.len(), error);
                return Ok(RenderOutcome::Rejected(error));
            }
            Some(self.snippets.to_indirect_commands())
        };

        self.frame.set_as_render_target()?;
        let encoder = self.frame.encoder();
        self.program.bind(encoder)?;
        object.bind(encoder)?;

        match commands {
            None => {
                object.draw(encoder, handle)?;
                Ok(RenderOutcome::Drawn { draws: 1 })
            }
            Some(commands) => {
                object.multi_draw(encoder, handle, &commands)?;
                Ok(RenderOutcome::Drawn { draws: commands.len() })
            }
        }
    }

    /// Force the frame to clear its target with the device clear colour
    pub fn clear(&self) -> RenderResult<()> {
        self.frame.clear(self.clear_color)
    }
}

impl<B: Backend> PartialEq for RenderDevice<'_, B> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.frame, other.frame)
            && std::ptr::eq(self.program, other.program)
            && match (self.object, other.object) {
                (Some(a), Some(b)) => std::ptr::eq(a, b),
                (None, None) => true,
                _ => false,
            }
            && self.handle == other.handle
            && self.snippets == other.snippets
    }
}

impl<B: Backend> fmt::Debug for RenderDevice<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderDevice")
            .field("backend", &B::NAME)
            .field("has_object", &self.object.is_some())
            .field("handle", &self.handle)
            .field("snippets", &self.snippets)
            .field("clear_color", &self.clear_color)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::layout::{AttributeFormat, VertexLayout};
    use crate::render::shader::ProgramStatus;
    use crate::render::snippet::IndexSnippetList;
    use crate::testing::{Call, Recording, RecordingFrame, RecordingObject, RecordingProgram};

    type TestDevice<'a> = RenderDevice<'a, Recording>;

    fn twelve_index_object() -> (RecordingObject, BufferHandle) {
        let mut object = RecordingObject::new();
        let handle = object.add_index_buffer(&(0..12).collect::<Vec<u32>>());
        (object, handle)
    }

    #[test]
    fn ready_requires_all_three_conditions() {
        let (object, _) = twelve_index_object();
        for frame_complete in [false, true] {
            for program_usable in [false, true] {
                for has_object in [false, true] {
                    let frame = RecordingFrame::new(frame_complete);
                    let program = RecordingProgram::new(program_usable);
                    let device = TestDevice::new(&frame, &program, has_object.then_some(&object));

                    assert_eq!(
                        device.ready(),
                        frame_complete && program_usable && has_object,
                        "frame={frame_complete} program={program_usable} object={has_object}"
                    );
                }
            }
        }
    }

    #[test]
    fn render_without_handle_touches_nothing() {
        let (object, _) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::new(true);
        let device = TestDevice::new(&frame, &program, Some(&object));

        assert_eq!(device.render().unwrap(), RenderOutcome::Skipped);
        assert!(frame.calls().is_empty());
    }

    #[test]
    fn render_without_handle_is_skipped_even_when_not_ready() {
        let frame = RecordingFrame::new(false);
        let program = RecordingProgram::new(false);
        let device = TestDevice::new(&frame, &program, None);

        assert_eq!(device.render().unwrap(), RenderOutcome::Skipped);
        assert!(frame.calls().is_empty());
    }

    #[test]
    fn not_ready_device_refuses_without_gpu_calls() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::with_status(ProgramStatus::link_failed("undefined symbol"));
        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();

        assert_eq!(device.render().unwrap(), RenderOutcome::Refused(Refusal::ProgramUnusable));
        assert!(frame.calls().is_empty());
    }

    #[test]
    fn incomplete_frame_is_refused() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(false);
        let program = RecordingProgram::new(true);
        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();

        assert_eq!(device.render().unwrap(), RenderOutcome::Refused(Refusal::FrameIncomplete));
        assert!(frame.calls().is_empty());
    }

    #[test]
    fn set_handle_rejects_unknown_buffers() {
        let (object, _) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::new(true);

        let mut device = TestDevice::new(&frame, &program, Some(&object));
        let missing = BufferHandle::new(3);
        assert!(matches!(device.set_handle(missing), Err(RenderError::InvalidHandle(h)) if h == missing));
        assert_eq!(device.handle(), None);

        let mut empty = TestDevice::new(&frame, &program, None);
        assert!(matches!(empty.set_handle(BufferHandle::new(0)), Err(RenderError::NoObject)));
    }

    #[test]
    fn single_draw_covers_whole_buffer() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::new(true);
        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();

        assert_eq!(device.render().unwrap(), RenderOutcome::Drawn { draws: 1 });
        assert_eq!(
            frame.calls(),
            vec![
                Call::SetRenderTarget,
                Call::BindProgram,
                Call::BindObject,
                Call::Draw { handle, index_count: 12 },
            ]
        );
    }

    #[test]
    fn snippet_batch_is_issued_in_list_order() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::new(true);
        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();
        device.set_indices(IndexSnippetList::from(vec![(0, 3), (3, 3), (6, 6)]));

        assert!(device.is_batched());
        assert_eq!(device.render().unwrap(), RenderOutcome::Drawn { draws: 3 });
        assert_eq!(
            frame.calls(),
            vec![
                Call::SetRenderTarget,
                Call::BindProgram,
                Call::BindObject,
                Call::MultiDraw {
                    handle,
                    ranges: vec![(0, 3), (3, 3), (6, 6)],
                },
            ]
        );
    }

    #[test]
    fn out_of_bounds_snippet_rejects_entire_batch() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::new(true);
        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();
        device.set_indices(IndexSnippetList::from(vec![(0, 3), (3, 3), (6, 7)]));

        let outcome = device.render().unwrap();
        assert!(matches!(
            outcome,
            RenderOutcome::Rejected(SnippetError::OutOfBounds { position: 2, end: 13, index_count: 12, .. })
        ));
        assert!(!outcome.is_drawn());
        assert!(frame.calls().is_empty());
    }

    #[test]
    fn clearing_indices_returns_to_single_draw() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::new(true);
        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();
        device.set_indices(IndexSnippetList::from(vec![(0, 3)]));
        device.clear_indices();

        assert!(!device.is_batched());
        assert_eq!(device.render().unwrap(), RenderOutcome::Drawn { draws: 1 });
    }

    #[test]
    fn clear_uses_device_colour_and_ignores_readiness() {
        let frame = RecordingFrame::new(false);
        let program = RecordingProgram::new(false);
        let mut device = TestDevice::new(&frame, &program, None);
        device.set_clear_color(ClearColor::WHITE);

        device.clear().unwrap();
        assert_eq!(frame.calls(), vec![Call::Clear(ClearColor::WHITE)]);
    }

    #[test]
    fn calls_keep_program_order_across_invocations() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::new(true);
        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();

        device.clear().unwrap();
        device.render().unwrap();

        let calls = frame.calls();
        assert_eq!(calls.first(), Some(&Call::Clear(ClearColor::BLACK)));
        assert_eq!(calls.last(), Some(&Call::Draw { handle, index_count: 12 }));
    }

    #[test]
    fn equality_is_deep() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::new(true);

        let mut a = TestDevice::new(&frame, &program, Some(&object));
        let mut b = TestDevice::new(&frame, &program, Some(&object));
        assert_eq!(a, b);

        a.set_handle(handle).unwrap();
        assert_ne!(a, b);
        b.set_handle(handle).unwrap();
        assert_eq!(a, b);

        let other_frame = RecordingFrame::new(true);
        let c = TestDevice::new(&other_frame, &program, Some(&object));
        assert_ne!(TestDevice::new(&frame, &program, Some(&object)), c);
    }

    fn render_slot(slot: &Option<TestDevice<'_>>) -> RenderResult<Option<RenderOutcome>> {
        slot.as_ref().map(|device| device.render()).transpose()
    }

    #[test]
    fn empty_slot_renders_nothing() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::new(true);

        let mut slot: Option<TestDevice<'_>> = None;
        assert_eq!(render_slot(&slot).unwrap(), None);
        assert!(frame.calls().is_empty());

        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();
        slot = Some(device);
        assert_eq!(render_slot(&slot).unwrap(), Some(RenderOutcome::Drawn { draws: 1 }));
    }

    #[test]
    fn layout_mismatch_is_refused_before_any_gpu_call() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let mut expected = object.vertex_layouts().to_vec();
        expected.push(VertexLayout::packed(&[AttributeFormat::Vec2]));
        let program = RecordingProgram::expecting(expected);

        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();

        assert!(device.ready());
        assert_eq!(
            device.render().unwrap(),
            RenderOutcome::Refused(Refusal::LayoutMismatch { binding: 1 })
        );
        assert!(frame.calls().is_empty());
    }

    #[test]
    fn matching_layouts_are_drawn() {
        let (object, handle) = twelve_index_object();
        let frame = RecordingFrame::new(true);
        let program = RecordingProgram::expecting(object.vertex_layouts().to_vec());

        let mut device = TestDevice::new(&frame, &program, Some(&object));
        device.set_handle(handle).unwrap();
        assert_eq!(device.render().unwrap(), RenderOutcome::Drawn { draws: 1 });
    }
}
