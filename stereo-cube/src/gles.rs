//! OpenGL ES 2.0 entry points, resolved at runtime
//!
//! Every function is optional. A function that failed to load turns into a
//! no-op returning zero, so a broken driver shows up as a blank frame plus a
//! warning at load time instead of a crash.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};

use anyhow::{anyhow, Result};
use stereo_kms::ffi::Library;
use tracing::warn;

// GL constants
pub const DEPTH_BUFFER_BIT: u32 = 0x0000_0100;
pub const STENCIL_BUFFER_BIT: u32 = 0x0000_0400;
pub const COLOR_BUFFER_BIT: u32 = 0x0000_4000;
pub const FALSE: u8 = 0;
pub const TRUE: u8 = 1;
pub const TRIANGLE_STRIP: u32 = 0x0005;
pub const ALWAYS: u32 = 0x0207;
pub const GREATER: u32 = 0x0204;
pub const DEPTH_TEST: u32 = 0x0B71;
pub const SCISSOR_TEST: u32 = 0x0C11;
pub const UNPACK_ALIGNMENT: u32 = 0x0CF5;
pub const TEXTURE_2D: u32 = 0x0DE1;
pub const UNSIGNED_BYTE: u32 = 0x1401;
pub const FLOAT: u32 = 0x1406;
pub const RGB: u32 = 0x1907;
pub const RGBA: u32 = 0x1908;
pub const EXTENSIONS: u32 = 0x1F03;
pub const LINEAR: i32 = 0x2601;
pub const LINEAR_MIPMAP_NEAREST: i32 = 0x2701;
pub const TEXTURE_MAG_FILTER: u32 = 0x2800;
pub const TEXTURE_MIN_FILTER: u32 = 0x2801;
pub const TEXTURE_WRAP_S: u32 = 0x2802;
pub const TEXTURE_WRAP_T: u32 = 0x2803;
pub const CLAMP_TO_EDGE: i32 = 0x812F;
pub const TEXTURE0: u32 = 0x84C0;
pub const FRAGMENT_SHADER: u32 = 0x8B30;
pub const VERTEX_SHADER: u32 = 0x8B31;
pub const COMPILE_STATUS: u32 = 0x8B81;
pub const LINK_STATUS: u32 = 0x8B82;
pub const INFO_LOG_LENGTH: u32 = 0x8B84;
/// GL_EXT_multiview_draw_buffers
pub const MULTIVIEW_EXT: u32 = 0x90F1;

/// Value handed back by a function that never loaded
trait Missing {
    fn missing() -> Self;
}

impl Missing for () {
    fn missing() -> Self {}
}

impl Missing for u32 {
    fn missing() -> Self {
        0
    }
}

impl Missing for i32 {
    fn missing() -> Self {
        -1
    }
}

impl Missing for *const u8 {
    fn missing() -> Self {
        std::ptr::null()
    }
}

unsafe fn load_fn<T>(ptr: *const c_void) -> Option<T> {
    if ptr.is_null() {
        None
    } else {
        Some(std::mem::transmute_copy(&ptr))
    }
}

macro_rules! gl_functions {
    (
        safe {
            $( $s_name:ident : $s_sym:literal ( $( $s_arg:ident : $s_ty:ty ),* ) $( -> $s_ret:ty )? ; )*
        }
        raw {
            $( $r_name:ident : $r_sym:literal ( $( $r_arg:ident : $r_ty:ty ),* ) $( -> $r_ret:ty )? ; )*
        }
    ) => {
        /// Loaded GLES function table
        pub struct Gles {
            $( $s_name: Option<unsafe extern "C" fn($($s_ty),*) $(-> $s_ret)?>, )*
            $( $r_name: Option<unsafe extern "C" fn($($r_ty),*) $(-> $r_ret)?>, )*
            _library: Option<Library>,
        }

        impl Gles {
            /// Resolve every entry point through `loader`
            pub fn load_with<F: FnMut(&str) -> *const c_void>(mut loader: F) -> Self {
                let gl = unsafe {
                    Self {
                        $( $s_name: load_fn(loader($s_sym)), )*
                        $( $r_name: load_fn(loader($r_sym)), )*
                        _library: None,
                    }
                };
                let missing: Vec<&str> = [
                    $( ($s_sym, gl.$s_name.is_none()), )*
                    $( ($r_sym, gl.$r_name.is_none()), )*
                ]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(name, _)| name)
                .collect();
                if !missing.is_empty() {
                    warn!("GLES functions not found: {}", missing.join(", "));
                }
                gl
            }

            /// Table with nothing loaded, every call is a no-op
            #[cfg(test)]
            pub fn unloaded() -> Self {
                Self {
                    $( $s_name: None, )*
                    $( $r_name: None, )*
                    _library: None,
                }
            }

            $(
                pub fn $s_name(&self, $( $s_arg: $s_ty ),*) $( -> $s_ret )? {
                    match self.$s_name {
                        Some(f) => unsafe { f($( $s_arg ),*) },
                        None => Missing::missing(),
                    }
                }
            )*

            $(
                /// # Safety
                /// Pointer arguments must be valid for the GL call.
                pub unsafe fn $r_name(&self, $( $r_arg: $r_ty ),*) $( -> $r_ret )? {
                    match self.$r_name {
                        Some(f) => f($( $r_arg ),*),
                        None => Missing::missing(),
                    }
                }
            )*
        }
    };
}

gl_functions! {
    safe {
        clear_color: "glClearColor" (r: f32, g: f32, b: f32, a: f32);
        clear: "glClear" (mask: u32);
        viewport: "glViewport" (x: i32, y: i32, width: i32, height: i32);
        scissor: "glScissor" (x: i32, y: i32, width: i32, height: i32);
        enable: "glEnable" (cap: u32);
        disable: "glDisable" (cap: u32);
        depth_func: "glDepthFunc" (func: u32);
        depth_mask: "glDepthMask" (flag: u8);
        color_mask: "glColorMask" (r: u8, g: u8, b: u8, a: u8);
        create_shader: "glCreateShader" (kind: u32) -> u32;
        compile_shader: "glCompileShader" (shader: u32);
        delete_shader: "glDeleteShader" (shader: u32);
        create_program: "glCreateProgram" () -> u32;
        attach_shader: "glAttachShader" (program: u32, shader: u32);
        link_program: "glLinkProgram" (program: u32);
        use_program: "glUseProgram" (program: u32);
        delete_program: "glDeleteProgram" (program: u32);
        uniform1i: "glUniform1i" (location: i32, value: i32);
        uniform4f: "glUniform4f" (location: i32, x: f32, y: f32, z: f32, w: f32);
        enable_vertex_attrib_array: "glEnableVertexAttribArray" (index: u32);
        disable_vertex_attrib_array: "glDisableVertexAttribArray" (index: u32);
        draw_arrays: "glDrawArrays" (mode: u32, first: i32, count: i32);
        bind_texture: "glBindTexture" (target: u32, texture: u32);
        tex_parameteri: "glTexParameteri" (target: u32, pname: u32, param: i32);
        generate_mipmap: "glGenerateMipmap" (target: u32);
        active_texture: "glActiveTexture" (texture: u32);
        pixel_storei: "glPixelStorei" (pname: u32, param: i32);
    }
    raw {
        get_string: "glGetString" (name: u32) -> *const u8;
        shader_source: "glShaderSource" (shader: u32, count: i32, sources: *const *const c_char, lengths: *const i32);
        get_shaderiv: "glGetShaderiv" (shader: u32, pname: u32, params: *mut i32);
        get_shader_info_log: "glGetShaderInfoLog" (shader: u32, size: i32, length: *mut i32, log: *mut c_char);
        get_programiv: "glGetProgramiv" (program: u32, pname: u32, params: *mut i32);
        get_program_info_log: "glGetProgramInfoLog" (program: u32, size: i32, length: *mut i32, log: *mut c_char);
        bind_attrib_location: "glBindAttribLocation" (program: u32, index: u32, name: *const c_char);
        get_uniform_location: "glGetUniformLocation" (program: u32, name: *const c_char) -> i32;
        vertex_attrib_pointer: "glVertexAttribPointer" (index: u32, size: i32, kind: u32, normalized: u8, stride: i32, pointer: *const c_void);
        gen_textures: "glGenTextures" (n: i32, textures: *mut u32);
        delete_textures: "glDeleteTextures" (n: i32, textures: *const u32);
        tex_image_2d: "glTexImage2D" (target: u32, level: i32, internal: i32, width: i32, height: i32, border: i32, format: u32, kind: u32, pixels: *const c_void);
        draw_buffers_indexed_ext: "glDrawBuffersIndexedEXT" (n: i32, locations: *const u32, indices: *const i32);
    }
}

impl Gles {
    /// Load from libGLESv2, falling back to `fallback` (usually `eglGetProcAddress`)
    pub fn load<F: FnMut(&str) -> *const c_void>(mut fallback: F) -> Self {
        let library = match Library::open(&["libGLESv2.so.2", "libGLESv2.so"]) {
            Ok(lib) => Some(lib),
            Err(e) => {
                warn!("{}, resolving GLES through EGL only", e);
                None
            }
        };

        let mut gl = Self::load_with(|name| {
            let direct = library
                .as_ref()
                .and_then(|lib| unsafe { lib.sym::<*const c_void>(name) });
            direct.unwrap_or_else(|| fallback(name))
        });
        gl._library = library;
        gl
    }

    pub fn has_draw_buffers_indexed(&self) -> bool {
        self.draw_buffers_indexed_ext.is_some()
    }

    /// The `GL_EXTENSIONS` string of the current context
    pub fn extensions(&self) -> String {
        let ptr = unsafe { self.get_string(EXTENSIONS) };
        if ptr.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(ptr as *const c_char) }
            .to_string_lossy()
            .into_owned()
    }

    pub fn has_extension(&self, name: &str) -> bool {
        extension_in_list(name, &self.extensions())
    }

    /// Location of a uniform, -1 when absent
    pub fn uniform_location(&self, program: u32, name: &str) -> i32 {
        match CString::new(name) {
            Ok(name) => unsafe { self.get_uniform_location(program, name.as_ptr()) },
            Err(_) => -1,
        }
    }

    /// Draw a strip of 2D or 3D vertices from client memory through attribute 0
    pub fn draw_strip(&self, components: i32, vertices: &[f32]) {
        let count = vertices.len() as i32 / components;
        unsafe {
            self.vertex_attrib_pointer(
                0,
                components,
                FLOAT,
                FALSE,
                components * std::mem::size_of::<f32>() as i32,
                vertices.as_ptr() as *const c_void,
            );
        }
        self.enable_vertex_attrib_array(0);
        self.draw_arrays(TRIANGLE_STRIP, 0, count);
        self.disable_vertex_attrib_array(0);
    }
}

/// Whether `name` is one of the space separated entries of `list`
pub fn extension_in_list(name: &str, list: &str) -> bool {
    !name.is_empty() && list.split_ascii_whitespace().any(|ext| ext == name)
}

fn compile_shader(gl: &Gles, kind: u32, source: &str) -> Result<u32> {
    let source = CString::new(source)?;
    let shader = gl.create_shader(kind);
    if shader == 0 {
        return Err(anyhow!("glCreateShader failed"));
    }

    let mut status = 0;
    unsafe {
        gl.shader_source(shader, 1, &source.as_ptr(), std::ptr::null());
        gl.compile_shader(shader);
        gl.get_shaderiv(shader, COMPILE_STATUS, &mut status);
    }

    if status == 0 {
        let log = shader_log(gl, shader);
        gl.delete_shader(shader);
        return Err(anyhow!("Shader compilation failed: {}", log));
    }

    Ok(shader)
}

fn shader_log(gl: &Gles, shader: u32) -> String {
    let mut buf = vec![0u8; 512];
    let mut len = 0;
    unsafe {
        gl.get_shader_info_log(shader, buf.len() as i32 - 1, &mut len, buf.as_mut_ptr() as *mut c_char);
    }
    buf.truncate(len.max(0) as usize);
    String::from_utf8_lossy(&buf).into_owned()
}

fn program_log(gl: &Gles, program: u32) -> String {
    let mut len = 0;
    unsafe { gl.get_programiv(program, INFO_LOG_LENGTH, &mut len) };
    let mut buf = vec![0u8; len.max(1) as usize];
    let mut written = 0;
    unsafe {
        gl.get_program_info_log(program, buf.len() as i32, &mut written, buf.as_mut_ptr() as *mut c_char);
    }
    buf.truncate(written.max(0) as usize);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Compile and link a program, binding `attributes` to locations 0, 1, ...
pub fn create_program(gl: &Gles, vertex: &str, fragment: &str, attributes: &[&str]) -> Result<u32> {
    let vs = compile_shader(gl, VERTEX_SHADER, vertex)?;
    let fs = match compile_shader(gl, FRAGMENT_SHADER, fragment) {
        Ok(fs) => fs,
        Err(e) => {
            gl.delete_shader(vs);
            return Err(e);
        }
    };

    let program = gl.create_program();
    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    gl.delete_shader(vs);
    gl.delete_shader(fs);

    for (index, name) in attributes.iter().enumerate() {
        let name = CString::new(*name)?;
        unsafe { gl.bind_attrib_location(program, index as u32, name.as_ptr()) };
    }

    gl.link_program(program);

    let mut status = 0;
    unsafe { gl.get_programiv(program, LINK_STATUS, &mut status) };
    if status == 0 {
        let log = program_log(gl, program);
        gl.delete_program(program);
        return Err(anyhow!("Program link failed: {}", log));
    }

    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "GL_OES_depth24 GL_EXT_multiview_draw_buffers GL_OES_texture_npot";

    #[test]
    fn test_extension_in_list() {
        assert!(extension_in_list("GL_EXT_multiview_draw_buffers", LIST));
        assert!(extension_in_list("GL_OES_depth24", LIST));
        assert!(extension_in_list("GL_OES_texture_npot", LIST));
    }

    #[test]
    fn test_extension_prefix_is_not_a_match() {
        assert!(!extension_in_list("GL_EXT_multiview", LIST));
        assert!(!extension_in_list("GL_OES_depth", LIST));
        assert!(!extension_in_list("draw_buffers", LIST));
        assert!(!extension_in_list("", LIST));
        assert!(!extension_in_list("GL_OES_depth24", ""));
    }

    #[test]
    fn test_unloaded_table_is_inert() {
        let gl = Gles::unloaded();
        gl.clear(COLOR_BUFFER_BIT);
        assert_eq!(gl.create_program(), 0);
        assert_eq!(gl.uniform_location(1, "color"), -1);
        assert_eq!(gl.extensions(), "");
        assert!(!gl.has_extension("GL_EXT_multiview_draw_buffers"));
        assert!(!gl.has_draw_buffers_indexed());
    }

    #[test]
    fn test_create_program_fails_without_gl() {
        let gl = Gles::unloaded();
        assert!(create_program(&gl, "void main() {}", "void main() {}", &["pos"]).is_err());
    }

    #[test]
    fn test_loader_sees_every_symbol() {
        let mut names = Vec::new();
        let gl = Gles::load_with(|name| {
            names.push(name.to_string());
            std::ptr::null()
        });
        assert!(names.iter().any(|n| n == "glDrawBuffersIndexedEXT"));
        assert!(names.iter().any(|n| n == "glClear"));
        assert!(!gl.has_draw_buffers_indexed());
    }
}
