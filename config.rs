use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Quality tags a reviewer can apply; these are also the tag columns of the
/// tagged export, in order.
pub const TAG_COLUMNS: &[&str] = &[
    "Blurry",
    "Low-light",
    "Body part",
    "Blends in",
    "Unidentifiable to taxonomix level by human ground-truth",
];

/// Taxonomic ranks: one sheet tab and one mirror CSV column per rank.
pub const TAXONOMIC_RANKS: &[&str] = &[
    "Class",
    "Order",
    "Family",
    "Genus",
    "Species",
    "Common_name",
];

/// Sentinel a client sends to clear a species classification.
pub const CLEAR_SELECTION: &str = "CLEAR_SELECTION";

/// Upper bound on a single image read before the request is abandoned.
pub const IMAGE_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPaths {
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub images_root: PathBuf,
    pub mirror_path: PathBuf,
    pub backups_dir: PathBuf,
}

impl AppPaths {
    /// Resolves all filesystem locations from the environment, falling back
    /// to a local `data/` tree, and creates the directories we own.
    pub fn discover() -> Result<Self, crate::error::Error> {
        let root = env_path("CAMTRAP_DATA_DIR").unwrap_or_else(|| PathBuf::from("data"));

        let db_path = root.join("review.db");
        let images_root =
            env_path("CAMTRAP_IMAGES_ROOT").unwrap_or_else(|| root.join("images"));
        let mirror_path =
            env_path("CAMTRAP_MIRROR_CSV").unwrap_or_else(|| root.join("species_mirror.csv"));
        let backups_dir = root.join("backups");

        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&images_root)?;
        std::fs::create_dir_all(&backups_dir)?;
        if let Some(parent) = mirror_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            root,
            db_path,
            images_root,
            mirror_path,
            backups_dir,
        })
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Port the HTTP surface binds to.
pub fn server_port() -> u16 {
    std::env::var("CAMTRAP_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000)
}
