// Assets - Typed lookup of fonts, textures and shaders
//
// Loading from disk is the game's business; this module only stores what it
// is given and hands out cheap shared handles. Looking up a key that was
// never registered is an error carrying the key, never a default.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("{kind} '{key}' was never registered")]
    Missing { kind: &'static str, key: String },

    #[error("{kind} '{key}' needs a capability this driver does not have")]
    Unsupported { kind: &'static str, key: String },

    #[error("shader '{key}' is not valid SPIR-V: {reason}")]
    InvalidShader { key: String, reason: String },

    #[error("texture '{key}' has {got} bytes, expected {expected} for {width}x{height} RGBA8")]
    TextureSize {
        key: String,
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
}

// =============================================================================
// KEYS & HANDLES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FontId(pub &'static str);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub &'static str);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub &'static str);

#[derive(Debug, Clone)]
pub struct FontHandle {
    pub data: Arc<[u8]>,
}

/// RGBA8 pixels, row-major
#[derive(Debug, Clone)]
pub struct TextureHandle {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone)]
pub struct ShaderHandle {
    pub stage: ShaderStage,
    /// SPIR-V words in host byte order
    pub code: Arc<[u32]>,
}

/// Ties a key type to its handle type and its table in `Assets`.
pub trait AssetKey: Copy + Eq + Hash + fmt::Debug {
    type Handle: Clone;
    const KIND: &'static str;

    fn name(&self) -> &'static str;
    fn table(assets: &Assets) -> &HashMap<Self, Self::Handle>;
}

impl AssetKey for FontId {
    type Handle = FontHandle;
    const KIND: &'static str = "font";

    fn name(&self) -> &'static str {
        self.0
    }

    fn table(assets: &Assets) -> &HashMap<Self, Self::Handle> {
        &assets.fonts
    }
}

impl AssetKey for TextureId {
    type Handle = TextureHandle;
    const KIND: &'static str = "texture";

    fn name(&self) -> &'static str {
        self.0
    }

    fn table(assets: &Assets) -> &HashMap<Self, Self::Handle> {
        &assets.textures
    }
}

impl AssetKey for ShaderId {
    type Handle = ShaderHandle;
    const KIND: &'static str = "shader";

    fn name(&self) -> &'static str {
        self.0
    }

    fn table(assets: &Assets) -> &HashMap<Self, Self::Handle> {
        &assets.shaders
    }
}

// =============================================================================
// STORE
// =============================================================================

#[derive(Debug)]
pub struct Assets {
    fonts: HashMap<FontId, FontHandle>,
    textures: HashMap<TextureId, TextureHandle>,
    shaders: HashMap<ShaderId, ShaderHandle>,
    shaders_supported: bool,
}

impl Assets {
    pub fn new() -> Self {
        Self {
            fonts: HashMap::new(),
            textures: HashMap::new(),
            shaders: HashMap::new(),
            shaders_supported: true,
        }
    }

    /// Whether the driver can run shaders at all
    pub fn with_shader_support(mut self, supported: bool) -> Self {
        self.shaders_supported = supported;
        self
    }

    pub fn get<K: AssetKey>(&self, key: K) -> Result<K::Handle, AssetError> {
        K::table(self).get(&key).cloned().ok_or_else(|| AssetError::Missing {
            kind: K::KIND,
            key: key.name().to_string(),
        })
    }

    pub fn contains<K: AssetKey>(&self, key: K) -> bool {
        K::table(self).contains_key(&key)
    }

    pub fn add_font(&mut self, id: FontId, data: impl Into<Arc<[u8]>>) {
        log::debug!("Registered font '{}'", id.0);
        self.fonts.insert(id, FontHandle { data: data.into() });
    }

    pub fn add_texture(&mut self, id: TextureId, width: u32, height: u32, pixels: Vec<u8>) -> Result<(), AssetError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(AssetError::TextureSize {
                key: id.0.to_string(),
                width,
                height,
                expected,
                got: pixels.len(),
            });
        }
        log::debug!("Registered texture '{}' {}x{}", id.0, width, height);
        self.textures.insert(
            id,
            TextureHandle {
                width,
                height,
                pixels: pixels.into(),
            },
        );
        Ok(())
    }

    /// Register a SPIR-V module. Fails with `Unsupported` when the driver has
    /// no shader support.
    pub fn add_shader(&mut self, id: ShaderId, stage: ShaderStage, spirv: &[u8]) -> Result<(), AssetError> {
        if !self.shaders_supported {
            return Err(AssetError::Unsupported {
                kind: ShaderId::KIND,
                key: id.0.to_string(),
            });
        }

        let invalid = |reason: String| AssetError::InvalidShader {
            key: id.0.to_string(),
            reason,
        };

        // Handles word alignment and byte order
        let words = ash::util::read_spv(&mut Cursor::new(spirv)).map_err(|e| invalid(e.to_string()))?;
        match words.first() {
            Some(&SPIRV_MAGIC) => {}
            Some(&word) => return Err(invalid(format!("bad magic number {:#010x}", word))),
            None => return Err(invalid("empty module".to_string())),
        }

        log::debug!("Registered {:?} shader '{}' ({} words)", stage, id.0, words.len());
        self.shaders.insert(
            id,
            ShaderHandle {
                stage,
                code: words.into(),
            },
        );
        Ok(())
    }
}

impl Default for Assets {
    fn default() -> Self {
        Self::new()
    }
}
