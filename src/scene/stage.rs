// Stage - The scene currently on screen
//
// Read by both loops every cycle, written only when a handler switches
// screens.

use super::Scene;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

#[derive(Debug)]
pub struct Stage {
    current: RwLock<Option<Arc<Scene>>>,
    window_size: Mutex<Option<(u32, u32)>>,
}

impl Stage {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            window_size: Mutex::new(None),
        }
    }

    /// Replace the presented scene.
    ///
    /// The outgoing scene's `on_scene_change` fires first, then the incoming
    /// scene's `on_present`; only then do the loops see the new scene.
    pub fn present(&self, scene: Arc<Scene>) {
        let mut current = self.current.write();

        if let Some(old) = current.as_ref() {
            if Arc::ptr_eq(old, &scene) {
                log::debug!("Scene '{}' already presented", scene.name());
                return;
            }
            old.on_scene_change();
        }

        if let Some((width, height)) = *self.window_size.lock() {
            scene.on_window_resize(width, height);
        }
        scene.on_present();
        *current = Some(scene);
    }

    pub fn current(&self) -> Option<Arc<Scene>> {
        self.current.read().clone()
    }

    /// Forward a window resize to the presented scene and remember it for
    /// scenes presented later.
    pub fn resize(&self, width: u32, height: u32) {
        if height == 0 {
            return;
        }
        *self.window_size.lock() = Some((width, height));
        if let Some(scene) = self.current() {
            scene.on_window_resize(width, height);
        }
    }

    /// Tear down the presented scene, leaving the stage empty.
    pub fn clear(&self) {
        let old = self.current.write().take();
        if let Some(scene) = old {
            scene.on_scene_change();
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneHooks;

    struct Journal {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl SceneHooks for Journal {
        fn on_present(&self, _scene: &Scene) {
            self.log.lock().push(format!("present {}", self.name));
        }
        fn on_scene_change(&self, _scene: &Scene) {
            self.log.lock().push(format!("change {}", self.name));
        }
    }

    fn scene(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Scene> {
        Arc::new(Scene::new(name).with_hooks(Journal {
            name,
            log: Arc::clone(log),
        }))
    }

    #[test]
    fn test_switch_fires_change_before_present() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stage = Stage::new();

        stage.present(scene("menu", &log));
        stage.present(scene("level", &log));
        stage.clear();

        assert_eq!(
            *log.lock(),
            vec!["present menu", "change menu", "present level", "change level"]
        );
        assert!(stage.current().is_none());
    }

    #[test]
    fn test_presenting_same_scene_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stage = Stage::new();
        let menu = scene("menu", &log);

        stage.present(Arc::clone(&menu));
        stage.present(Arc::clone(&menu));

        assert_eq!(*log.lock(), vec!["present menu"]);
        assert!(Arc::ptr_eq(&stage.current().unwrap(), &menu));
    }

    #[test]
    fn test_new_scene_gets_last_window_size() {
        let stage = Stage::new();
        stage.resize(1000, 500);

        let late = Arc::new(Scene::new("late"));
        stage.present(Arc::clone(&late));
        assert_eq!(late.viewport().x, 2160.0);
    }

    #[test]
    fn test_clear_on_empty_stage() {
        let stage = Stage::new();
        stage.clear();
        assert!(stage.current().is_none());
    }
}
