use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ModuleError;

// ============================================================================
// 模块生命周期 (Module lifecycle)
// ============================================================================

/// 模块状态
/// Module lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ModuleState {
    /// 未加载
    /// Not loaded
    #[default]
    Unloaded,
    /// 首次加载中
    /// First load in progress
    Loading,
    /// 已加载
    /// Loaded and ready
    Loaded,
    /// 重新加载中
    /// Reload in progress
    Reloading,
    /// 卸载中
    /// Unload in progress
    Unloading,
    /// 加载失败且没有可用的记录
    /// Load failed and no live record exists
    Failed(String),
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleState::Unloaded => write!(f, "Unloaded"),
            ModuleState::Loading => write!(f, "Loading"),
            ModuleState::Loaded => write!(f, "Loaded"),
            ModuleState::Reloading => write!(f, "Reloading"),
            ModuleState::Unloading => write!(f, "Unloading"),
            ModuleState::Failed(err) => write!(f, "Failed: {}", err),
        }
    }
}

/// 模块事件
/// Module lifecycle event, broadcast to subscribers
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ModuleEvent {
    /// 发现新的模块包
    /// A new package file was discovered
    PackageDiscovered { path: PathBuf },
    /// 模块已加载
    /// Module (re)loaded
    Loaded {
        name: String,
        path: PathBuf,
        generation: u64,
        duration: Duration,
    },
    /// 模块已移除
    /// Module removed
    Removed { name: String },
    /// 模块加载或卸载失败
    /// Load or unload failed
    Failed { name: String, error: String },
}

/// 模块监听器
/// Listener notified of lifecycle transitions.
///
/// Callbacks run synchronously on the thread that performed the transition,
/// after the orchestrator has released its internal locks.
pub trait ModuleListener: Send + Sync {
    /// 模块加载完成
    /// Module loaded or reloaded
    fn on_loaded(&self, name: &str) {}

    /// 模块已移除
    /// Module removed
    fn on_removed(&self, name: &str) {}

    /// 发生错误
    /// A load or unload attempt failed
    fn on_error(&self, name: &str, error: &ModuleError) {}
}

/// Outcome of a load or reload attempt.
///
/// Load failures are reported here and through listeners, never returned as
/// errors, so that a broken package cannot stop the caller.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Module name, or the package path when the manifest was unreadable
    pub name: String,
    pub path: PathBuf,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
    /// Realm generation of the new record
    pub generation: Option<u64>,
}

impl LoadReport {
    /// Successful load
    pub fn loaded(name: &str, path: PathBuf, generation: u64, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            path,
            success: true,
            error: None,
            duration,
            generation: Some(generation),
        }
    }

    /// Failed load
    pub fn failed(name: &str, path: PathBuf, error: &ModuleError, duration: Duration) -> Self {
        Self {
            name: name.to_string(),
            path,
            success: false,
            error: Some(error.to_string()),
            duration,
            generation: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ModuleState::Loaded.to_string(), "Loaded");
        assert_eq!(
            ModuleState::Failed("bad manifest".to_string()).to_string(),
            "Failed: bad manifest"
        );
        assert_eq!(ModuleState::default(), ModuleState::Unloaded);
    }

    #[test]
    fn test_report_carries_error_text() {
        let err = ModuleError::UnknownModule("demo.Main".to_string());
        let report = LoadReport::failed("demo.Main", PathBuf::from("a.mpk"), &err, Duration::ZERO);
        assert!(!report.success);
        assert_eq!(report.error.as_deref(), Some("Unknown module: demo.Main"));
        assert!(report.generation.is_none());
    }

    struct Silent;
    impl ModuleListener for Silent {}

    #[test]
    fn test_listener_defaults_are_noops() {
        let listener = Silent;
        listener.on_loaded("a");
        listener.on_removed("a");
        listener.on_error("a", &ModuleError::UnknownModule("a".to_string()));
    }
}
