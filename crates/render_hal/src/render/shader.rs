//! Shader sources and program build status
//!
//! [`ShaderBuilder`] accumulates one source per pipeline stage. Backends turn
//! a builder into a program by compiling every stage on its own and then
//! linking; the result of that process is a [`ProgramStatus`] that the
//! program carries for its whole life.
//!
//! Sources are stored as bytes because the two backends consume different
//! things: OpenGL wants GLSL text, Vulkan wants a SPIR-V binary.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::render::{RenderError, RenderResult};

/// A programmable pipeline stage
///
/// Variants are declared in pipeline order, which is also their sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Tessellation control stage
    TessellationControl,
    /// Tessellation evaluation stage
    TessellationEvaluation,
    /// Geometry stage
    Geometry,
    /// Fragment stage
    Fragment,
}

impl ShaderStage {
    /// Every stage, in pipeline order
    pub const ALL: [Self; 5] = [
        Self::Vertex,
        Self::TessellationControl,
        Self::TessellationEvaluation,
        Self::Geometry,
        Self::Fragment,
    ];

    /// Lower-case stage name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::TessellationControl => "tessellation control",
            Self::TessellationEvaluation => "tessellation evaluation",
            Self::Geometry => "geometry",
            Self::Fragment => "fragment",
        }
    }

    /// True for the stages every graphics program needs
    pub const fn is_required(self) -> bool {
        matches!(self, Self::Vertex | Self::Fragment)
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-stage shader sources awaiting compilation
#[derive(Debug, Clone, Default)]
pub struct ShaderBuilder {
    sources: BTreeMap<ShaderStage, Vec<u8>>,
}

impl ShaderBuilder {
    /// Create a builder with no stages
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source for `stage`, replacing any earlier source
    pub fn set_shader_source(&mut self, stage: ShaderStage, source: impl AsRef<[u8]>) -> &mut Self {
        self.sources.insert(stage, source.as_ref().to_vec());
        self
    }

    /// Read the source for `stage` from `path`, replacing any earlier source
    pub fn set_shader_file(&mut self, stage: ShaderStage, path: impl AsRef<Path>) -> RenderResult<&mut Self> {
        let path = path.as_ref();
        log::debug!("[SHADER] Loading {} stage from: {:?}", stage, path);

        let source = std::fs::read(path).map_err(|source| {
            log::error!("[SHADER] Failed to read shader file {:?}: {}", path, source);
            RenderError::ShaderFile {
                path: path.to_path_buf(),
                source,
            }
        })?;

        log::debug!("[SHADER] Read {} bytes from {:?}", source.len(), path);
        self.sources.insert(stage, source);
        Ok(self)
    }

    /// Source currently stored for `stage`
    pub fn get_shader_source(&self, stage: ShaderStage) -> Option<&[u8]> {
        self.sources.get(&stage).map(Vec::as_slice)
    }

    /// True when `stage` has a source
    pub fn has_shader(&self, stage: ShaderStage) -> bool {
        self.sources.contains_key(&stage)
    }

    /// Stages with a source, in pipeline order
    pub fn stages(&self) -> impl Iterator<Item = (ShaderStage, &[u8])> {
        self.sources.iter().map(|(stage, source)| (*stage, source.as_slice()))
    }

    /// Fail with a compile status when a required stage has no source
    pub fn require_graphics_stages(&self) -> Result<(), ProgramStatus> {
        match ShaderStage::ALL
            .into_iter()
            .find(|stage| stage.is_required() && !self.has_shader(*stage))
        {
            Some(stage) => Err(ProgramStatus::CompileFailed {
                stage,
                log: format!("no source was provided for the {stage} stage"),
            }),
            None => Ok(()),
        }
    }
}

/// Outcome of building a shader program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramStatus {
    /// Every stage compiled and the program linked
    Linked,
    /// A stage failed to compile; linking never ran
    CompileFailed {
        /// Stage that failed
        stage: ShaderStage,
        /// Compiler diagnostic
        log: String,
    },
    /// Every stage compiled but linking failed
    LinkFailed {
        /// Linker diagnostic
        log: String,
    },
}

impl ProgramStatus {
    /// True when the program can be bound
    pub const fn is_linked(&self) -> bool {
        matches!(self, Self::Linked)
    }

    /// Diagnostic text for failed builds
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Linked => None,
            Self::CompileFailed { log, .. } | Self::LinkFailed { log } => Some(log),
        }
    }

    /// Compile failure with a diagnostic that is never empty
    pub(crate) fn compile_failed(stage: ShaderStage, log: impl Into<String>) -> Self {
        Self::CompileFailed {
            stage,
            log: non_empty(log.into(), "compilation failed without a diagnostic"),
        }
    }

    /// Link failure with a diagnostic that is never empty
    pub(crate) fn link_failed(log: impl Into<String>) -> Self {
        Self::LinkFailed {
            log: non_empty(log.into(), "linking failed without a diagnostic"),
        }
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linked => f.write_str("linked"),
            Self::CompileFailed { stage, log } => write!(f, "{stage} stage failed to compile: {log}"),
            Self::LinkFailed { log } => write!(f, "link failed: {log}"),
        }
    }
}

fn non_empty(log: String, fallback: &str) -> String {
    if log.trim().is_empty() {
        fallback.to_string()
    } else {
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_per_stage_wins() {
        let mut builder = ShaderBuilder::new();
        builder
            .set_shader_source(ShaderStage::Vertex, "first")
            .set_shader_source(ShaderStage::Vertex, "second");

        assert_eq!(builder.get_shader_source(ShaderStage::Vertex), Some(&b"second"[..]));
        assert!(builder.has_shader(ShaderStage::Vertex));
        assert!(!builder.has_shader(ShaderStage::Fragment));
    }

    #[test]
    fn stages_iterate_in_pipeline_order() {
        let mut builder = ShaderBuilder::new();
        builder
            .set_shader_source(ShaderStage::Fragment, "f")
            .set_shader_source(ShaderStage::Geometry, "g")
            .set_shader_source(ShaderStage::Vertex, "v");

        let order: Vec<_> = builder.stages().map(|(stage, _)| stage).collect();
        assert_eq!(order, vec![ShaderStage::Vertex, ShaderStage::Geometry, ShaderStage::Fragment]);
    }

    #[test]
    fn missing_fragment_stage_is_a_compile_failure() {
        let mut builder = ShaderBuilder::new();
        builder.set_shader_source(ShaderStage::Vertex, "void main() {}");

        let status = builder.require_graphics_stages().unwrap_err();
        assert!(matches!(status, ProgramStatus::CompileFailed { stage: ShaderStage::Fragment, .. }));
        assert!(!status.is_linked());
        assert!(status.diagnostic().is_some_and(|log| !log.is_empty()));
    }

    #[test]
    fn shader_file_is_read_into_stage() {
        let path = std::env::temp_dir().join(format!("render_hal_shader_{}.frag", std::process::id()));
        std::fs::write(&path, "void main() {}").unwrap();

        let mut builder = ShaderBuilder::new();
        builder.set_shader_file(ShaderStage::Fragment, &path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(builder.get_shader_source(ShaderStage::Fragment), Some(&b"void main() {}"[..]));
    }

    #[test]
    fn missing_shader_file_is_an_error() {
        let mut builder = ShaderBuilder::new();
        let result = builder.set_shader_file(ShaderStage::Vertex, "/nonexistent/shader.vert");
        assert!(matches!(result, Err(RenderError::ShaderFile { .. })));
        assert!(!builder.has_shader(ShaderStage::Vertex));
    }

    #[test]
    fn empty_diagnostics_are_replaced() {
        let status = ProgramStatus::link_failed("  ");
        assert_eq!(status.diagnostic(), Some("linking failed without a diagnostic"));
        assert_eq!(ProgramStatus::Linked.diagnostic(), None);
    }
}
