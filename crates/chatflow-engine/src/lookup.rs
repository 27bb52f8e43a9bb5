use std::collections::HashMap;
use std::path::PathBuf;

use futures::future::BoxFuture;
use tracing::debug;

use chatflow_core::error::{FlowError, Result};
use chatflow_core::traits::TypebotLookup;
use chatflow_core::Typebot;

/// Typebots held in memory, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTypebots {
    typebots: HashMap<String, Typebot>,
}

impl InMemoryTypebots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, typebot: Typebot) {
        self.typebots.insert(typebot.id.clone(), typebot);
    }

    pub fn with(mut self, typebot: Typebot) -> Self {
        self.insert(typebot);
        self
    }
}

impl FromIterator<Typebot> for InMemoryTypebots {
    fn from_iter<I: IntoIterator<Item = Typebot>>(iter: I) -> Self {
        let mut lookup = Self::new();
        for typebot in iter {
            lookup.insert(typebot);
        }
        lookup
    }
}

impl TypebotLookup for InMemoryTypebots {
    fn get_typebot<'a>(&'a self, typebot_id: &'a str) -> BoxFuture<'a, Result<Option<Typebot>>> {
        Box::pin(async move { Ok(self.typebots.get(typebot_id).cloned()) })
    }
}

/// Typebots stored as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryTypebots {
    dir: PathBuf,
}

impl DirectoryTypebots {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TypebotLookup for DirectoryTypebots {
    fn get_typebot<'a>(&'a self, typebot_id: &'a str) -> BoxFuture<'a, Result<Option<Typebot>>> {
        Box::pin(async move {
            // Ids are file stems; anything that could escape the directory is not a typebot.
            if typebot_id.is_empty()
                || typebot_id.contains(['/', '\\'])
                || typebot_id.starts_with('.')
            {
                return Ok(None);
            }
            let path = self.dir.join(format!("{}.json", typebot_id));
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Typebot file not found");
                    return Ok(None);
                }
                Err(e) => return Err(FlowError::Io(e)),
            };
            let typebot: Typebot = serde_json::from_str(&content)?;
            Ok(Some(typebot))
        })
    }
}
