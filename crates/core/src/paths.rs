use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".snare"))
            .unwrap_or_else(|| PathBuf::from(".snare"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn db_file(&self) -> PathBuf {
        self.base.join("snare.db")
    }

    pub fn rules_dir(&self) -> PathBuf {
        self.base.join("rules")
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.base.join("modules")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.rules_dir())?;
        std::fs::create_dir_all(self.modules_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
