use std::path::Path;
use std::sync::Arc;

use crate::tags::{FileTags, TagEdit};

use super::{Decoder, DecoderError, DecoderPlugin, RodioPlugin};

/// Decoder plugins in priority order; the first that claims a path wins.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    plugins: Vec<Arc<dyn DecoderPlugin>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rodio/lofty decoder for `extensions`.
    pub fn with_defaults(extensions: &[String]) -> Self {
        let mut reg = Self::new();
        reg.register(RodioPlugin::new(extensions));
        reg
    }

    /// Append a plugin at the lowest priority.
    pub fn register<P: DecoderPlugin + 'static>(&mut self, plugin: P) {
        log::debug!("decoder plugin registered: {}", plugin.name());
        self.plugins.push(Arc::new(plugin));
    }

    pub fn find(&self, path: &Path) -> Option<&dyn DecoderPlugin> {
        self.plugins
            .iter()
            .find(|p| p.handles(path))
            .map(|p| p.as_ref())
    }

    pub fn handles(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    fn plugin_for(&self, path: &Path) -> Result<&dyn DecoderPlugin, DecoderError> {
        self.find(path)
            .ok_or_else(|| DecoderError::Unsupported(path.display().to_string()))
    }

    pub fn open(&self, path: &Path) -> Result<Box<dyn Decoder>, DecoderError> {
        self.plugin_for(path)?.open(path)
    }

    pub fn read_tags(&self, path: &Path) -> Result<FileTags, DecoderError> {
        self.plugin_for(path)?.read_tags(path)
    }

    pub fn write_tags(&self, path: &Path, edit: &TagEdit) -> Result<(), DecoderError> {
        self.plugin_for(path)?.write_tags(path, edit)
    }
}

impl std::fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}
