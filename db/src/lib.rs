pub mod models;
pub mod test_utils;

use sea_orm::{Database, DatabaseConnection, DbErr};
use std::path::Path;

/// Opens the application database.
///
/// Accepts either a full DSN or a bare SQLite file path; for the latter the parent
/// directory is created and the file is opened in read-write-create mode.
pub async fn connect(path_or_url: &str) -> Result<DatabaseConnection, DbErr> {
    let url = if path_or_url.starts_with("sqlite:") {
        path_or_url.to_string()
    } else {
        // SQLite won't create intermediate dirs.
        if let Some(parent) = Path::new(path_or_url).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        format!("sqlite://{path_or_url}?mode=rwc")
    };

    Database::connect(&url).await
}
