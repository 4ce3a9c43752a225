use tracing::{debug, warn};

use crate::backend::{NavigationFlags, SceneBackend};

/// 拖拽期间冻结相机交互。获取时保存当前开关并全部关闭，释放时原样恢复。
///
/// 嵌套获取按后进先出释放即可恢复最初状态。
#[derive(Debug)]
#[must_use = "相机锁必须通过 release 归还"]
pub struct CameraLock {
    saved: NavigationFlags,
    released: bool,
}

impl CameraLock {
    pub fn acquire<B: SceneBackend + ?Sized>(backend: &mut B) -> Self {
        let saved = backend.navigation();
        backend.set_navigation(NavigationFlags::DISABLED);
        debug!(?saved, "相机交互已冻结");
        Self {
            saved,
            released: false,
        }
    }

    #[inline]
    pub fn saved(&self) -> NavigationFlags {
        self.saved
    }

    pub fn release<B: SceneBackend + ?Sized>(mut self, backend: &mut B) {
        backend.set_navigation(self.saved);
        self.released = true;
        debug!(restored = ?self.saved, "相机交互已恢复");
    }
}

impl Drop for CameraLock {
    fn drop(&mut self) {
        if !self.released {
            warn!(saved = ?self.saved, "相机锁未释放即被丢弃，相机交互可能保持冻结");
        }
    }
}
