//! GLSL program compilation and uniform binding points

use std::rc::Rc;

use glow::HasContext;

use super::{check_error, creation_failed, OpenGl};
use crate::render::api::ShaderProgram;
use crate::render::shader::{ProgramStatus, ShaderBuilder, ShaderStage};
use crate::render::{RenderError, RenderResult};

/// Native program object
pub type GlProgram = <glow::Context as HasContext>::Program;
/// Native shader object
pub type GlShader = <glow::Context as HasContext>::Shader;
/// Location of a uniform inside a linked program
pub type GlUniformLocation = <glow::Context as HasContext>::UniformLocation;

/// GL shader type for a pipeline stage
pub const fn shader_type(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => glow::VERTEX_SHADER,
        ShaderStage::TessellationControl => glow::TESS_CONTROL_SHADER,
        ShaderStage::TessellationEvaluation => glow::TESS_EVALUATION_SHADER,
        ShaderStage::Geometry => glow::GEOMETRY_SHADER,
        ShaderStage::Fragment => glow::FRAGMENT_SHADER,
    }
}

/// Value written to a uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// `float`
    Float(f32),
    /// `vec2`
    Vec2([f32; 2]),
    /// `vec3`
    Vec3([f32; 3]),
    /// `vec4`
    Vec4([f32; 4]),
    /// `int` or sampler unit
    Int(i32),
    /// `uint`
    UInt(u32),
    /// Column-major `mat4`
    Mat4([f32; 16]),
}

/// GLSL program built from a [`ShaderBuilder`]
pub struct GlShaderProgram {
    gl: Rc<glow::Context>,
    program: Option<GlProgram>,
    status: ProgramStatus,
}

impl GlShaderProgram {
    /// Compile every stage of `builder` and link them
    ///
    /// Compile and link failures are reported through
    /// [`status`](ShaderProgram::status) with the driver's info log. Errors are
    /// returned only when the driver cannot create the shader objects at all.
    pub fn new(gl: Rc<glow::Context>, builder: &ShaderBuilder) -> RenderResult<Self> {
        if let Err(status) = builder.require_graphics_stages() {
            return Ok(Self::failed(gl, status));
        }

        let mut shaders = Vec::new();
        for (stage, source) in builder.stages() {
            match Self::compile_stage(&gl, stage, source) {
                Ok(Ok(shader)) => shaders.push(shader),
                Ok(Err(status)) => {
                    Self::delete_shaders(&gl, None, &shaders);
                    return Ok(Self::failed(gl, status));
                }
                Err(e) => {
                    Self::delete_shaders(&gl, None, &shaders);
                    return Err(e);
                }
            }
        }

        let program = match unsafe { gl.create_program() } {
            Ok(program) => program,
            Err(e) => {
                Self::delete_shaders(&gl, None, &shaders);
                return Err(creation_failed("program")(e));
            }
        };

        let linked = unsafe {
            for shader in &shaders {
                gl.attach_shader(program, *shader);
            }
            gl.link_program(program);
            gl.get_program_link_status(program)
        };
        Self::delete_shaders(&gl, Some(program), &shaders);

        if !linked {
            let log = unsafe { gl.get_program_info_log(program) };
            unsafe { gl.delete_program(program) };
            return Ok(Self::failed(gl, ProgramStatus::link_failed(log)));
        }

        log::debug!("[SHADER] Linked program {:?} from {} stages", program, shaders.len());
        Ok(Self {
            gl,
            program: Some(program),
            status: ProgramStatus::Linked,
        })
    }

    fn compile_stage(gl: &glow::Context, stage: ShaderStage, source: &[u8]) -> RenderResult<Result<GlShader, ProgramStatus>> {
        let Ok(text) = std::str::from_utf8(source) else {
            return Ok(Err(ProgramStatus::compile_failed(stage, "GLSL source is not valid UTF-8")));
        };

        unsafe {
            let shader = gl
                .create_shader(shader_type(stage))
                .map_err(creation_failed("shader"))?;
            gl.shader_source(shader, text);
            gl.compile_shader(shader);

            if gl.get_shader_compile_status(shader) {
                log::trace!("[SHADER] Compiled {} stage", stage);
                Ok(Ok(shader))
            } else {
                let log = gl.get_shader_info_log(shader);
                gl.delete_shader(shader);
                Ok(Err(ProgramStatus::compile_failed(stage, log)))
            }
        }
    }

    fn delete_shaders(gl: &glow::Context, program: Option<GlProgram>, shaders: &[GlShader]) {
        unsafe {
            for shader in shaders {
                if let Some(program) = program {
                    gl.detach_shader(program, *shader);
                }
                gl.delete_shader(*shader);
            }
        }
    }

    fn failed(gl: Rc<glow::Context>, status: ProgramStatus) -> Self {
        log::error!("[SHADER] Program build failed: {}", status);
        Self {
            gl,
            program: None,
            status,
        }
    }

    /// Location of the uniform `name`, if the linked program uses it
    pub fn uniform_location(&self, name: &str) -> Option<GlUniformLocation> {
        let program = self.program?;
        unsafe { self.gl.get_uniform_location(program, name) }
    }

    /// Make the program current and write `value` to `location`
    pub fn set_uniform(&self, location: &GlUniformLocation, value: UniformValue) -> RenderResult<()> {
        let program = self
            .program
            .ok_or_else(|| RenderError::BackendError(format!("program is not usable: {}", self.status)))?;
        let gl = &self.gl;
        let location = Some(location);

        unsafe {
            gl.use_program(Some(program));
            match value {
                UniformValue::Float(v) => gl.uniform_1_f32(location, v),
                UniformValue::Vec2([x, y]) => gl.uniform_2_f32(location, x, y),
                UniformValue::Vec3([x, y, z]) => gl.uniform_3_f32(location, x, y, z),
                UniformValue::Vec4([x, y, z, w]) => gl.uniform_4_f32(location, x, y, z, w),
                UniformValue::Int(v) => gl.uniform_1_i32(location, v),
                UniformValue::UInt(v) => gl.uniform_1_u32(location, v),
                UniformValue::Mat4(m) => gl.uniform_matrix_4_f32_slice(location, false, &m),
            }
        }
        check_error(gl, "uniform upload")
    }
}

impl ShaderProgram<OpenGl> for GlShaderProgram {
    fn status(&self) -> &ProgramStatus {
        &self.status
    }

    fn bind(&self, encoder: &glow::Context) -> RenderResult<()> {
        let program = self
            .program
            .ok_or_else(|| RenderError::BackendError(format!("program is not usable: {}", self.status)))?;
        unsafe { encoder.use_program(Some(program)) };
        Ok(())
    }
}

impl Drop for GlShaderProgram {
    fn drop(&mut self) {
        if let Some(program) = self.program.take() {
            log::debug!("[SHADER] Deleting program {:?}", program);
            unsafe { self.gl.delete_program(program) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_has_a_gl_shader_type() {
        let types: Vec<_> = ShaderStage::ALL.into_iter().map(shader_type).collect();
        assert_eq!(
            types,
            vec![
                glow::VERTEX_SHADER,
                glow::TESS_CONTROL_SHADER,
                glow::TESS_EVALUATION_SHADER,
                glow::GEOMETRY_SHADER,
                glow::FRAGMENT_SHADER,
            ]
        );
    }
}
