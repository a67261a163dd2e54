//! Host application lifecycle notifications
//!
//! Hosts forward their lifecycle events here. None of them affects session
//! state: sessions stay open across pause/resume and are only closed by an
//! explicit close (or when the manager is dropped).

/// Lifecycle hooks a host may call in any order, any number of times
pub trait HostLifecycle {
    fn on_create(&self) {
        tracing::warn!("onCreate ...");
    }

    fn on_start(&self) {
        tracing::warn!("onStart ...");
    }

    fn on_restart(&self) {
        tracing::warn!("onRestart ...");
    }

    fn on_resume(&self) {
        tracing::warn!("onResume ...");
    }

    fn on_pause(&self) {
        tracing::warn!("onPause ...");
    }

    fn on_stop(&self) {
        tracing::warn!("onStop ...");
    }

    fn on_destroy(&self) {
        tracing::warn!("onDestroy ...");
    }
}
