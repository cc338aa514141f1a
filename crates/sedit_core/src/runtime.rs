//! Process-scoped editor runtime.
//!
//! # Responsibility
//! - Build the editor context, extension registry and debugger from config.
//! - Run the startup load pass and the shutdown teardown pass.
//!
//! # Invariants
//! - Startup never fails because of an extension; load problems are logged.
//! - Shutdown tears extensions down without changing the persisted enabled
//!   set, so the next start restores it.

use crate::config::SeditConfig;
use crate::context::EditorContext;
use crate::debug::DebugSessionController;
use crate::extension::{DefaultExtensionLoader, ExtensionLoader, ExtensionRegistry, LoadSummary};
use crate::host::EditorHost;
use crate::settings::SettingsStore;
use log::{error, info, warn};
use std::sync::Arc;

#[derive(Debug)]
pub struct Sedit {
    config: SeditConfig,
    context: Arc<EditorContext>,
    registry: Arc<ExtensionRegistry>,
    debugger: DebugSessionController,
}

impl Sedit {
    /// Starts with script-only extension loading.
    pub fn start(config: SeditConfig, host: Arc<dyn EditorHost>) -> Self {
        Self::start_with_loader(config, host, Arc::new(DefaultExtensionLoader::new()))
    }

    pub fn start_with_loader(
        config: SeditConfig,
        host: Arc<dyn EditorHost>,
        loader: Arc<dyn ExtensionLoader>,
    ) -> Self {
        let settings = SettingsStore::open(&config.settings_path);
        let context = EditorContext::new(host, settings);
        let registry = ExtensionRegistry::new(
            Arc::clone(&context),
            config.extensions_dir.clone(),
            loader,
        );
        let runtime = Self {
            config,
            context,
            registry,
            debugger: DebugSessionController::new(),
        };
        match runtime.registry.load_all() {
            Ok(summary) => log_summary(&summary),
            Err(err) => error!("event=startup module=runtime status=error error={err}"),
        }
        runtime
    }

    pub fn config(&self) -> &SeditConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<EditorContext> {
        &self.context
    }

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn debugger(&self) -> &DebugSessionController {
        &self.debugger
    }

    /// Starts a debug session over the current buffer, named after the
    /// current document path.
    pub fn debug_buffer(&self) -> Result<crate::debug::SessionId, crate::debug::DebugError> {
        let filename = self
            .context
            .current_path()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<buffer>".to_string());
        self.debugger.start(&self.context.text(), &filename)
    }

    /// Disables every extension and flushes settings.
    pub fn shutdown(&self) {
        self.registry.shutdown();
        if let Err(err) = self.context.settings().flush() {
            warn!("event=shutdown module=runtime status=error error={err}");
        }
        info!("event=shutdown module=runtime status=ok");
    }
}

fn log_summary(summary: &LoadSummary) {
    info!(
        "event=startup module=runtime status=ok loaded={} failed={} enabled={} enable_failed={}",
        summary.loaded.len(),
        summary.failed.len(),
        summary.enabled.len(),
        summary.enable_failed.len()
    );
}

#[cfg(test)]
mod tests {
    use super::Sedit;
    use crate::config::SeditConfig;
    use crate::debug::DebugMessage;
    use crate::host::{EditorHost, HeadlessHost};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn startup_creates_extensions_dir_and_survives_broken_modules() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SeditConfig::rooted_at(dir.path());
        std::fs::create_dir_all(&config.extensions_dir).expect("create extensions dir");
        std::fs::write(config.extensions_dir.join("broken.sed"), "let = \n").expect("write module");

        let runtime = Sedit::start(config.clone(), Arc::new(HeadlessHost::new()));
        let broken = runtime
            .extensions()
            .extension("broken")
            .expect("broken extension is listed");
        assert!(!broken.enabled);
        runtime.shutdown();
        assert!(config.settings_path.exists());
    }

    #[test]
    fn debug_buffer_uses_current_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = Arc::new(HeadlessHost::new());
        host.set_buffer_text("print 5\n");
        let runtime = Sedit::start(SeditConfig::rooted_at(dir.path()), host);
        runtime.debug_buffer().expect("start debugging");
        assert_eq!(
            runtime.debugger().wait_message(Duration::from_secs(5)),
            Some(DebugMessage::Stopped {
                file: "<buffer>".to_string(),
                line: 1
            })
        );
    }
}
