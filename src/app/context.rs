// Context - What handlers and nodes can reach
//
// Built once per run after the window exists and shared by both loops.

use super::window::OpenFlag;
use crate::assets::Assets;
use crate::config::SharedConfig;
use crate::scene::{Scene, Stage};
use std::sync::Arc;

pub struct Context {
    name: String,
    settings: SharedConfig,
    assets: Assets,
    stage: Stage,
    open: OpenFlag,
}

impl Context {
    pub fn new(name: impl Into<String>, settings: SharedConfig, assets: Assets, open: OpenFlag) -> Self {
        Self {
            name: name.into(),
            settings,
            assets,
            stage: Stage::new(),
            open,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &SharedConfig {
        &self.settings
    }

    pub fn assets(&self) -> &Assets {
        &self.assets
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Switch the scene both loops drive
    pub fn present(&self, scene: Arc<Scene>) {
        self.stage.present(scene);
    }

    pub fn current_scene(&self) -> Option<Arc<Scene>> {
        self.stage.current()
    }

    pub fn is_open(&self) -> bool {
        self.open.is_open()
    }

    pub fn open_flag(&self) -> OpenFlag {
        self.open.clone()
    }

    /// Close the window; both loops drain at the end of their cycle
    pub fn request_close(&self) {
        log::info!("Close requested by '{}'", self.name);
        self.open.close();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("scene", &self.stage.current().map(|s| s.name().to_string()))
            .finish()
    }
}
